pub mod chadwick;
pub mod db;
pub mod download;
pub mod error;
pub mod http_client;
pub mod layout;
pub mod loader;
pub mod logging;
pub mod parse;
pub mod reconcile;
pub mod retry;
pub mod schema;
pub mod settings;
