use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use crate::error::EtlError;
use crate::settings::DatabaseSettings;

/// Connection parameters taken from the `database` settings section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub engine: String,
    pub database: String,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectionSpec {
    pub fn from_settings(db: &DatabaseSettings) -> Self {
        Self {
            engine: db.engine.trim().to_ascii_lowercase(),
            database: db.database.trim().to_string(),
            host: non_empty(&db.host),
            user: non_empty(&db.user),
            password: non_empty(&db.password),
        }
    }

    pub fn is_sqlite(&self) -> bool {
        matches!(self.engine.as_str(), "sqlite" | "sqlite3")
    }

    /// `sqlite:///<database>` or `<engine>://[user[:password]@]host/<database>`.
    pub fn connection_string(&self) -> Result<String, EtlError> {
        if self.engine.is_empty() {
            return Err(EtlError::MissingSetting("database.engine"));
        }
        if self.database.is_empty() {
            return Err(EtlError::MissingSetting("database.database"));
        }
        if self.is_sqlite() {
            return Ok(format!("sqlite:///{}", self.database));
        }

        let host = self
            .host
            .as_deref()
            .ok_or(EtlError::MissingSetting("database.host"))?;
        let auth = match (&self.user, &self.password) {
            (Some(user), Some(password)) => format!("{user}:{password}@"),
            (Some(user), None) => format!("{user}@"),
            _ => String::new(),
        };
        Ok(format!("{}://{auth}{host}/{}", self.engine, self.database))
    }

    /// Connection string with the password blanked, for log lines and errors.
    pub fn redacted(&self) -> String {
        let mut spec = self.clone();
        if spec.password.is_some() {
            spec.password = Some("***".to_string());
        }
        spec.connection_string()
            .unwrap_or_else(|_| format!("{}://?", self.engine))
    }

    pub fn open(&self) -> Result<Connection, EtlError> {
        self.connection_string()?;
        if !self.is_sqlite() {
            return Err(EtlError::UnsupportedEngine(self.engine.clone()));
        }
        let target = self.redacted();
        let path = Path::new(&self.database);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| EtlError::DatabaseDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|source| EtlError::Connection {
            target: target.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(|source| EtlError::Connection {
                target: target.clone(),
                source,
            })?;
        debug!(db = %target, "database connection opened");
        Ok(conn)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
