//! Settings for every job, loaded once at startup from a single JSON file.
//!
//! Resolution order: explicit override (`--config` / `RETRODB_CONFIG`), then
//! `./conf/retrodb.json`, then the user config dir, then `/etc/retrodb`.
//! `RETRODB_<SECTION>__<KEY>` environment variables override file values.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::EtlError;
use crate::loader::LoadStrategy;

pub const CONFIG_ENV: &str = "RETRODB_CONFIG";
const CONFIG_FILE: &str = "retrodb.json";
const CONFIG_DIR: &str = "retrodb";
const ENV_PREFIX: &str = "RETRODB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub retrosheet: RetrosheetSettings,
    #[serde(default)]
    pub crosswalk: CrosswalkSettings,
    #[serde(default)]
    pub chadwick: ChadwickSettings,
    #[serde(default)]
    pub debug: DebugSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    /// Which loader variant the parse jobs use.
    #[serde(default)]
    pub load_strategy: LoadStrategy,
    /// Directory holding `<name>_schema.sql` overrides of the bundled scripts.
    #[serde(default)]
    pub sql_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    #[serde(default = "default_download_directory")]
    pub directory: String,
    #[serde(default)]
    pub use_tmp: bool,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    #[serde(default = "default_true")]
    pub dl_eventfiles: bool,
    #[serde(default = "default_true")]
    pub dl_gamelogs: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Unpack downloaded `.zip` archives next to themselves.
    #[serde(default = "default_true")]
    pub extract: bool,
}

fn default_download_directory() -> String {
    "downloads".to_string()
}

fn default_num_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    500
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            directory: default_download_directory(),
            use_tmp: false,
            num_threads: default_num_threads(),
            dl_eventfiles: true,
            dl_gamelogs: true,
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            extract: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrosheetSettings {
    #[serde(default = "default_eventfiles_url")]
    pub eventfiles_url: String,
    #[serde(default = "default_gamelogs_url")]
    pub gamelogs_url: String,
}

fn default_eventfiles_url() -> String {
    "http://www.retrosheet.org/game.htm".to_string()
}

fn default_gamelogs_url() -> String {
    "http://www.retrosheet.org/gamelogs/index.html".to_string()
}

impl Default for RetrosheetSettings {
    fn default() -> Self {
        Self {
            eventfiles_url: default_eventfiles_url(),
            gamelogs_url: default_gamelogs_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosswalkSettings {
    #[serde(default = "default_people_url")]
    pub people_url: String,
    #[serde(default = "default_players_url")]
    pub players_url: String,
    #[serde(default = "default_hist_players_url")]
    pub hist_players_url: String,
    #[serde(default = "default_teams_url")]
    pub teams_url: String,
}

fn default_people_url() -> String {
    "https://raw.githubusercontent.com/chadwickbureau/register/master/data/people.csv".to_string()
}

fn default_players_url() -> String {
    "http://crunchtimebaseball.com/master.csv".to_string()
}

fn default_hist_players_url() -> String {
    "https://raw.githubusercontent.com/chadwickbureau/baseballdatabank/master/core/People.csv"
        .to_string()
}

fn default_teams_url() -> String {
    "http://www.retrosheet.org/CurrentNames.csv".to_string()
}

impl Default for CrosswalkSettings {
    fn default() -> Self {
        Self {
            people_url: default_people_url(),
            players_url: default_players_url(),
            hist_players_url: default_hist_players_url(),
            teams_url: default_teams_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChadwickSettings {
    #[serde(default = "default_chadwick_directory")]
    pub directory: PathBuf,
}

fn default_chadwick_directory() -> PathBuf {
    PathBuf::from("/usr/local/bin")
}

impl Default for ChadwickSettings {
    fn default() -> Self {
        Self {
            directory: default_chadwick_directory(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    #[serde(default)]
    pub verbose: bool,
}

/// Locations derived from the settings; never read from the file.
#[derive(Debug, Clone, Serialize)]
pub struct Paths {
    pub config_file: PathBuf,
    pub download_dir: PathBuf,
    pub csv_dir: PathBuf,
    pub sql_dir: Option<PathBuf>,
}

impl Settings {
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.database.engine.trim().is_empty() {
            return Err(EtlError::MissingSetting("database.engine"));
        }
        if self.database.database.trim().is_empty() {
            return Err(EtlError::MissingSetting("database.database"));
        }
        if self.download.directory.trim().is_empty() {
            return Err(EtlError::MissingSetting("download.directory"));
        }
        if self.download.num_threads == 0 {
            return Err(EtlError::InvalidSetting {
                key: "download.num_threads".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.download.max_attempts == 0 {
            return Err(EtlError::InvalidSetting {
                key: "download.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn derive_paths(&self, config_file: &Path) -> Result<Paths> {
        let directory = Path::new(self.download.directory.trim());
        let download_dir = if self.download.use_tmp {
            std::env::temp_dir().join(directory)
        } else {
            std::path::absolute(directory)
                .with_context(|| format!("resolve download directory {}", directory.display()))?
        };
        let csv_dir = download_dir.join("csv");

        let sql_dir = self.database.sql_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                config_file
                    .parent()
                    .map(|parent| parent.join(dir))
                    .unwrap_or_else(|| dir.clone())
            }
        });

        Ok(Paths {
            config_file: config_file.to_path_buf(),
            download_dir,
            csv_dir,
            sql_dir,
        })
    }

    /// Effective settings plus the derived `path` section, password masked.
    pub fn to_display_value(&self, paths: &Paths) -> Result<Value> {
        let mut value = serde_json::to_value(self).context("serialize settings")?;
        if let Some(db) = value.get_mut("database").and_then(Value::as_object_mut)
            && db.get("password").is_some_and(|p| !p.is_null())
        {
            db.insert("password".to_string(), Value::from("********"));
        }
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "path".to_string(),
                serde_json::to_value(paths).context("serialize paths")?,
            );
        }
        Ok(value)
    }
}

impl Paths {
    /// Creates the download and CSV directories when missing.
    pub fn prepare(&self) -> Result<()> {
        for dir in [&self.download_dir, &self.csv_dir] {
            if !dir.exists() {
                info!(dir = %dir.display(), "directory does not exist, creating");
                fs::create_dir_all(dir)
                    .with_context(|| format!("create directory {}", dir.display()))?;
            }
        }
        Ok(())
    }
}

/// Search order used when no explicit file is given.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut out = vec![PathBuf::from("conf").join(CONFIG_FILE)];
    if let Some(dir) = user_config_dir() {
        out.push(dir.join(CONFIG_DIR).join(CONFIG_FILE));
    }
    out.push(PathBuf::from("/etc").join(CONFIG_DIR).join(CONFIG_FILE));
    out
}

fn user_config_dir() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CONFIG_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base));
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".config"))
}

pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, EtlError> {
    let explicit = explicit.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    });
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path);
        }
        return Err(EtlError::ConfigOverrideMissing(path));
    }

    let candidates = candidate_paths();
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or(EtlError::ConfigNotFound(candidates))
}

/// Reads and validates the settings file at `path`, applying env overrides.
pub fn load_from(path: &Path) -> Result<Settings, EtlError> {
    let built = config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Json))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let settings: Settings = built.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

pub fn load(explicit: Option<&Path>) -> Result<(Settings, PathBuf), EtlError> {
    let path = resolve_config_path(explicit)?;
    let settings = load_from(&path)?;
    Ok((settings, path))
}

/// Sets `section.key` in the file at `path`, keeping the value's JSON type in
/// line with the settings schema. The document must still validate.
pub fn modify(path: &Path, section: &str, key: &str, raw_value: &str) -> Result<()> {
    let template = serde_json::to_value(Settings::default()).context("serialize template")?;
    let Some(slot) = template.get(section).and_then(|s| s.get(key)) else {
        return Err(EtlError::InvalidSetting {
            key: format!("{section}.{key}"),
            reason: "unknown setting".to_string(),
        }
        .into());
    };
    let value = coerce_value(slot, raw_value).map_err(|reason| EtlError::InvalidSetting {
        key: format!("{section}.{key}"),
        reason,
    })?;

    let raw = fs::read_to_string(path)
        .with_context(|| format!("read configuration {}", path.display()))?;
    let mut doc: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse configuration {}", path.display()))?;
    let root = doc
        .as_object_mut()
        .with_context(|| format!("{} is not a JSON object", path.display()))?;
    let section_obj = root
        .entry(section.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let Some(section_obj) = section_obj.as_object_mut() else {
        return Err(EtlError::InvalidSetting {
            key: section.to_string(),
            reason: "section is not an object".to_string(),
        }
        .into());
    };
    section_obj.insert(key.to_string(), value);

    let checked: Settings =
        serde_json::from_value(doc.clone()).context("modified configuration does not parse")?;
    checked.validate()?;

    let json = serde_json::to_string_pretty(&doc).context("serialize configuration")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    info!(section, key, file = %path.display(), "configuration updated");
    Ok(())
}

fn coerce_value(slot: &Value, raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    match slot {
        Value::Bool(_) => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(Value::Bool(true)),
            "false" | "no" | "0" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("expected a boolean, got {raw:?}")),
        },
        Value::Number(_) => trimmed
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| format!("expected a non-negative integer, got {raw:?}")),
        _ => Ok(Value::String(raw.to_string())),
    }
}
