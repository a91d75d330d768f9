//! Table groups and the bundled scripts that create them.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum TableGroup {
    Retro,
    People,
    Players,
    HistPlayers,
    Teams,
    Parks,
}

impl TableGroup {
    pub const ALL: [TableGroup; 6] = [
        TableGroup::Retro,
        TableGroup::People,
        TableGroup::Players,
        TableGroup::HistPlayers,
        TableGroup::Teams,
        TableGroup::Parks,
    ];

    pub fn tables(self) -> &'static [&'static str] {
        match self {
            TableGroup::Retro => &["events", "games", "teams", "rosters"],
            TableGroup::People => &["peopleids"],
            TableGroup::Players => &["playerids"],
            TableGroup::HistPlayers => &["hist_playerids"],
            TableGroup::Teams => &["teamids"],
            TableGroup::Parks => &["parkids"],
        }
    }

    pub fn script_name(self) -> &'static str {
        match self {
            TableGroup::Retro => "retro",
            TableGroup::People => "peopleids",
            TableGroup::Players => "playerids",
            TableGroup::HistPlayers => "hist_playerids",
            TableGroup::Teams => "teamids",
            TableGroup::Parks => "parkids",
        }
    }

    pub fn script_file(self) -> String {
        format!("{}_schema.sql", self.script_name())
    }

    fn bundled_script(self) -> &'static str {
        match self {
            TableGroup::Retro => include_str!("../sql/retro_schema.sql"),
            TableGroup::People => include_str!("../sql/peopleids_schema.sql"),
            TableGroup::Players => include_str!("../sql/playerids_schema.sql"),
            TableGroup::HistPlayers => include_str!("../sql/hist_playerids_schema.sql"),
            TableGroup::Teams => include_str!("../sql/teamids_schema.sql"),
            TableGroup::Parks => include_str!("../sql/parkids_schema.sql"),
        }
    }
}

impl fmt::Display for TableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.script_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Bundled,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub source: ScriptSource,
    pub text: String,
}

/// Picks `<sql_dir>/<script>_schema.sql` when it exists, else the bundled copy.
pub fn load_script(group: TableGroup, sql_dir: Option<&Path>) -> Result<Script> {
    if let Some(dir) = sql_dir {
        let path = dir.join(group.script_file());
        if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read schema script {}", path.display()))?;
            return Ok(Script {
                source: ScriptSource::File(path),
                text,
            });
        }
        debug!(path = %path.display(), "no schema override, using bundled script");
    }
    Ok(Script {
        source: ScriptSource::Bundled,
        text: group.bundled_script().to_string(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitScript {
    pub statements: Vec<String>,
    /// Text after the last `;`, never executed.
    pub trailing: Option<String>,
}

/// Line-oriented splitter: `--` comment lines and blank lines are dropped,
/// other lines are joined with a space until the text ends with `;`.
pub fn split_statements(script: &str) -> SplitScript {
    let mut out = SplitScript::default();
    let mut current = String::new();
    for line in script.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(line);
        if current.ends_with(';') {
            out.statements.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.trailing = Some(current);
    }
    out
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .with_context(|| format!("check table {table}"))?;
    Ok(count > 0)
}

pub fn tables_present(conn: &Connection, group: TableGroup) -> Result<bool> {
    for table in group.tables() {
        if !table_exists(conn, table)? {
            debug!(group = %group, table, "table missing");
            return Ok(false);
        }
    }
    Ok(true)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub group: TableGroup,
    pub executed: usize,
    pub source: Option<ScriptSource>,
}

impl EnsureOutcome {
    pub fn print(&self) {
        match &self.source {
            None => println!("{}: all tables present, nothing to do", self.group),
            Some(source) => {
                let from = match source {
                    ScriptSource::Bundled => "bundled script".to_string(),
                    ScriptSource::File(path) => path.display().to_string(),
                };
                println!(
                    "{}: executed {} statements from {from}",
                    self.group, self.executed
                );
            }
        }
    }
}

/// Runs each statement on its own; the first failure aborts with the
/// statements before it already applied.
pub fn execute_script(conn: &Connection, script: &Script) -> Result<usize> {
    let split = split_statements(&script.text);
    if let Some(tail) = &split.trailing {
        warn!(fragment = %tail, "unterminated statement at end of script, not executed");
    }
    for (idx, statement) in split.statements.iter().enumerate() {
        conn.execute_batch(statement)
            .with_context(|| format!("statement {} failed: {statement}", idx + 1))?;
    }
    Ok(split.statements.len())
}

pub fn ensure_group(
    conn: &Connection,
    group: TableGroup,
    recreate: bool,
    sql_dir: Option<&Path>,
) -> Result<EnsureOutcome> {
    if !recreate && tables_present(conn, group)? {
        info!(group = %group, "all tables present");
        return Ok(EnsureOutcome {
            group,
            executed: 0,
            source: None,
        });
    }
    let script = load_script(group, sql_dir)?;
    info!(group = %group, recreate, "creating tables");
    let executed = execute_script(conn, &script)
        .with_context(|| format!("run {}", group.script_file()))?;
    Ok(EnsureOutcome {
        group,
        executed,
        source: Some(script.source),
    })
}

#[cfg(test)]
mod tests {
    use super::{TableGroup, split_statements};

    #[test]
    fn comments_and_blanks_are_dropped() {
        let split = split_statements(
            "-- header\n\nDROP TABLE x;\n  -- note\nCREATE TABLE x (\n  a TEXT\n);\n",
        );
        assert_eq!(
            split.statements,
            vec!["DROP TABLE x;".to_string(), "CREATE TABLE x ( a TEXT );".to_string()]
        );
        assert_eq!(split.trailing, None);
    }

    #[test]
    fn unterminated_tail_is_kept_aside() {
        let split = split_statements("CREATE TABLE a (b TEXT);\nCREATE TABLE c (d TEXT)");
        assert_eq!(split.statements.len(), 1);
        assert_eq!(split.trailing.as_deref(), Some("CREATE TABLE c (d TEXT)"));
    }

    #[test]
    fn bundled_scripts_split_cleanly() {
        for group in TableGroup::ALL {
            let split = split_statements(group.bundled_script());
            assert!(split.trailing.is_none(), "{group} has a trailing fragment");
            assert!(!split.statements.is_empty());
        }
    }

    #[test]
    fn script_file_names() {
        assert_eq!(TableGroup::HistPlayers.script_file(), "hist_playerids_schema.sql");
        assert_eq!(TableGroup::Retro.script_file(), "retro_schema.sql");
    }
}
