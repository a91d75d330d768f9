use std::path::PathBuf;

use thiserror::Error;

/// Failures the jobs distinguish between. Everything else travels as
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("no configuration file found (looked in: {})", format_paths(.0))]
    ConfigNotFound(Vec<PathBuf>),

    #[error("configuration file {0} does not exist")]
    ConfigOverrideMissing(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("missing required setting {0}")]
    MissingSetting(&'static str),

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("unsupported database engine {0:?} (supported: sqlite)")]
    UnsupportedEngine(String),

    #[error("cannot create database directory {}: {source}", .path.display())]
    DatabaseDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot connect to {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("chadwick tool {tool} not found under {}", .dir.display())]
    ToolMissing { tool: &'static str, dir: PathBuf },

    #[error("{}: {reason}", .path.display())]
    BadLayout { path: PathBuf, reason: String },

    #[error("unknown load strategy {0:?} (expected row_guarded or bulk_staged)")]
    UnknownStrategy(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::EtlError;

    #[test]
    fn config_not_found_lists_every_candidate() {
        let err = EtlError::ConfigNotFound(vec![
            PathBuf::from("conf/retrodb.json"),
            PathBuf::from("/etc/retrodb/retrodb.json"),
        ]);
        assert_eq!(
            err.to_string(),
            "no configuration file found (looked in: conf/retrodb.json, /etc/retrodb/retrodb.json)"
        );
    }
}
