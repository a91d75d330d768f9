//! Insert-if-absent loading of parsed rows.
//!
//! Two interchangeable strategies: `RowGuarded` looks up the natural key before
//! each insert, `BulkStaged` stages the file in a temp table and merges it in
//! one statement. Both run a whole file in one transaction and end with the
//! same table contents. Rows repeating a key within one file are folded into
//! the first such row before either strategy sees them.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EtlError;
use crate::reconcile::{IdRemap, placeholder_id};

/// One parsed row, aligned with `TableSpec::columns`. `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStrategy {
    #[default]
    RowGuarded,
    BulkStaged,
}

impl LoadStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStrategy::RowGuarded => "row_guarded",
            LoadStrategy::BulkStaged => "bulk_staged",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStrategy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "row_guarded" | "row" => Ok(LoadStrategy::RowGuarded),
            "bulk_staged" | "bulk" => Ok(LoadStrategy::BulkStaged),
            _ => Err(EtlError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Crosswalk tables map an MLB id (`source`) to a Retrosheet id (`canonical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalMapping {
    pub source: &'static str,
    pub canonical: &'static str,
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
    pub key: &'static [&'static str],
    pub canonical: Option<CanonicalMapping>,
}

impl TableSpec {
    fn position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| *c == column)
            .ok_or_else(|| anyhow!("column {column} is not loaded into {}", self.name))
    }

    fn key_positions(&self) -> Result<Vec<usize>> {
        self.key.iter().map(|k| self.position(k)).collect()
    }

    fn key_predicate(&self, left: &str, right: Option<&str>) -> String {
        self.key
            .iter()
            .enumerate()
            .map(|(idx, k)| match right {
                Some(alias) => format!("{left}.{k} IS {alias}.{k}"),
                None => format!("{left}{k} IS ?{}", idx + 1),
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn column_list(&self) -> String {
        self.columns.join(", ")
    }

    fn insert_sql(&self, table: &str) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            self.column_list()
        )
    }

    fn staging_name(&self) -> String {
        format!("staging_{}", self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub remaps: Vec<IdRemap>,
}

impl LoadReport {
    pub fn merge(&mut self, other: LoadReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.malformed += other.malformed;
        self.remaps.extend(other.remaps);
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted {}, updated {}, skipped {}, malformed {}, remaps {}",
            self.inserted,
            self.updated,
            self.skipped,
            self.malformed,
            self.remaps.len()
        )
    }
}

/// Drops rows of the wrong width or with a NULL key column; they count as
/// malformed.
fn well_formed<'a>(
    spec: &TableSpec,
    rows: &'a [Row],
    report: &mut LoadReport,
) -> Result<Vec<&'a Row>> {
    let key_pos = spec.key_positions()?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != spec.columns.len() || key_pos.iter().any(|&i| row[i].is_none()) {
            report.malformed += 1;
            continue;
        }
        out.push(row);
    }
    Ok(out)
}

/// Folds rows that repeat a key into the first row with that key. The first
/// row's values are kept, except that the last non-NULL canonical id wins.
/// Folded rows count as skipped.
fn fold_duplicate_keys(
    spec: &TableSpec,
    rows: Vec<&Row>,
    report: &mut LoadReport,
) -> Result<Vec<Row>> {
    let key_pos = spec.key_positions()?;
    let canon = match spec.canonical {
        Some(m) => Some(spec.position(m.canonical)?),
        None => None,
    };
    let mut first_at: HashMap<Vec<&str>, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let key: Vec<&str> = key_pos
            .iter()
            .map(|&i| row[i].as_deref().unwrap_or_default())
            .collect();
        match first_at.get(&key) {
            Some(&at) => {
                report.skipped += 1;
                if let Some(c) = canon
                    && row[c].is_some()
                {
                    out[at][c] = row[c].clone();
                }
            }
            None => {
                first_at.insert(key, out.len());
                out.push(row.clone());
            }
        }
    }
    Ok(out)
}

fn canonical_remap(
    source_id: Option<&str>,
    old: Option<&str>,
    new: &str,
) -> Option<IdRemap> {
    let from = match old {
        Some(old) => old.to_string(),
        None => placeholder_id(source_id?),
    };
    (from != new).then(|| IdRemap {
        from,
        to: new.to_string(),
    })
}

/// Loads `rows` into `spec.name` inside one transaction.
pub fn load_rows(
    conn: &mut Connection,
    spec: &TableSpec,
    rows: &[Row],
    strategy: LoadStrategy,
) -> Result<LoadReport> {
    let tx = conn
        .transaction()
        .with_context(|| format!("begin load of {}", spec.name))?;
    let report = match strategy {
        LoadStrategy::RowGuarded => load_row_guarded(&tx, spec, rows)?,
        LoadStrategy::BulkStaged => load_bulk_staged(&tx, spec, rows)?,
    };
    tx.commit()
        .with_context(|| format!("commit load of {}", spec.name))?;
    debug!(table = spec.name, %strategy, %report, "file loaded");
    Ok(report)
}

fn load_row_guarded(conn: &Connection, spec: &TableSpec, rows: &[Row]) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let rows = well_formed(spec, rows, &mut report)?;
    let rows = fold_duplicate_keys(spec, rows, &mut report)?;
    let key_pos = spec.key_positions()?;
    let mapping = match spec.canonical {
        Some(m) => Some((m, spec.position(m.source)?, spec.position(m.canonical)?)),
        None => None,
    };

    let lookup_col = mapping.map(|(m, _, _)| m.canonical).unwrap_or("NULL");
    let lookup_sql = format!(
        "SELECT {lookup_col} FROM {} WHERE {} LIMIT 1",
        spec.name,
        spec.key_predicate("", None)
    );
    let mut lookup = conn
        .prepare(&lookup_sql)
        .with_context(|| format!("prepare key lookup on {}", spec.name))?;
    let mut insert = conn
        .prepare(&spec.insert_sql(spec.name))
        .with_context(|| format!("prepare insert into {}", spec.name))?;
    let update_sql = mapping.map(|(m, _, _)| {
        format!(
            "UPDATE {} SET {} = ?{} WHERE {}",
            spec.name,
            m.canonical,
            spec.key.len() + 1,
            spec.key_predicate("", None)
        )
    });

    for row in &rows {
        let key_values = key_pos.iter().map(|&i| &row[i]);
        let existing: Option<Option<String>> = lookup
            .query_row(params_from_iter(key_values.clone()), |r| r.get(0))
            .optional()
            .with_context(|| format!("look up key in {}", spec.name))?;

        match existing {
            None => {
                insert
                    .execute(params_from_iter(row.iter()))
                    .with_context(|| format!("insert into {}", spec.name))?;
                report.inserted += 1;
                if let Some((_, src, canon)) = mapping
                    && let (Some(source_id), Some(new)) = (&row[src], &row[canon])
                    && let Some(remap) = canonical_remap(Some(source_id.as_str()), None, new)
                {
                    report.remaps.push(remap);
                }
            }
            Some(old) => {
                let changed = mapping.and_then(|(_, src, canon)| {
                    let new = row[canon].as_deref()?;
                    (old.as_deref() != Some(new)).then_some((src, new))
                });
                match (changed, &update_sql) {
                    (Some((src, new)), Some(sql)) => {
                        let new_value = Some(new.to_string());
                        let mut values: Vec<&Option<String>> = key_values.collect();
                        values.push(&new_value);
                        conn.execute(sql, params_from_iter(values))
                            .with_context(|| format!("update canonical id in {}", spec.name))?;
                        report.updated += 1;
                        if let Some(remap) =
                            canonical_remap(row[src].as_deref(), old.as_deref(), new)
                        {
                            report.remaps.push(remap);
                        }
                    }
                    _ => report.skipped += 1,
                }
            }
        }
    }
    Ok(report)
}

fn load_bulk_staged(conn: &Connection, spec: &TableSpec, rows: &[Row]) -> Result<LoadReport> {
    let mut report = LoadReport::default();
    let rows = well_formed(spec, rows, &mut report)?;
    let rows = fold_duplicate_keys(spec, rows, &mut report)?;
    let staging = spec.staging_name();

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS temp.{staging};
         CREATE TEMP TABLE {staging} AS SELECT * FROM {} WHERE 0;",
        spec.name
    ))
    .with_context(|| format!("create staging table for {}", spec.name))?;

    {
        let mut stage = conn
            .prepare(&spec.insert_sql(&staging))
            .with_context(|| format!("prepare staging insert for {}", spec.name))?;
        for row in &rows {
            stage
                .execute(params_from_iter(row.iter()))
                .with_context(|| format!("stage row for {}", spec.name))?;
        }
    }

    let matches_target = spec.key_predicate("t", Some("s"));

    if let Some(m) = spec.canonical {
        // Existing keys whose canonical id changed.
        let conflict_sql = format!(
            "SELECT DISTINCT s.{src}, t.{canon}, s.{canon}, {keys}
             FROM {staging} s JOIN {table} t ON {matches_target}
             WHERE s.{canon} IS NOT NULL AND t.{canon} IS NOT s.{canon}",
            src = m.source,
            canon = m.canonical,
            keys = spec
                .key
                .iter()
                .map(|k| format!("s.{k}"))
                .collect::<Vec<_>>()
                .join(", "),
            table = spec.name,
        );
        let conflicts: Vec<(Option<String>, Option<String>, String, Vec<Option<String>>)> = {
            let mut stmt = conn
                .prepare(&conflict_sql)
                .with_context(|| format!("prepare conflict query for {}", spec.name))?;
            let key_len = spec.key.len();
            let mapped = stmt
                .query_map([], |r| {
                    let mut key = Vec::with_capacity(key_len);
                    for i in 0..key_len {
                        key.push(r.get::<_, Option<String>>(3 + i)?);
                    }
                    Ok((
                        r.get::<_, Option<String>>(0)?,
                        r.get::<_, Option<String>>(1)?,
                        r.get::<_, String>(2)?,
                        key,
                    ))
                })
                .with_context(|| format!("query conflicts in {}", spec.name))?;
            let mut out = Vec::new();
            for row in mapped {
                out.push(row.context("decode conflict row")?);
            }
            out
        };

        let update_sql = format!(
            "UPDATE {} SET {} = ?{} WHERE {}",
            spec.name,
            m.canonical,
            spec.key.len() + 1,
            spec.key_predicate("", None)
        );
        for (source_id, old, new, key) in &conflicts {
            let new_value = Some(new.clone());
            let mut values: Vec<&Option<String>> = key.iter().collect();
            values.push(&new_value);
            conn.execute(&update_sql, params_from_iter(values))
                .with_context(|| format!("update canonical id in {}", spec.name))?;
            report.updated += 1;
            if let Some(remap) = canonical_remap(source_id.as_deref(), old.as_deref(), new) {
                report.remaps.push(remap);
            }
        }

        // Keys about to be inserted that already carry a canonical id.
        let fresh_sql = format!(
            "SELECT DISTINCT s.{src}, s.{canon} FROM {staging} s
             WHERE s.{src} IS NOT NULL AND s.{canon} IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM {table} t WHERE {matches_target})",
            src = m.source,
            canon = m.canonical,
            table = spec.name,
        );
        let mut stmt = conn
            .prepare(&fresh_sql)
            .with_context(|| format!("prepare new-key query for {}", spec.name))?;
        let fresh = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .with_context(|| format!("query new keys in {}", spec.name))?;
        let mut seen = BTreeSet::new();
        for pair in fresh {
            let (source_id, canonical) = pair.context("decode new-key row")?;
            if let Some(remap) = canonical_remap(Some(&source_id), None, &canonical)
                && seen.insert(remap.clone())
            {
                report.remaps.push(remap);
            }
        }
    }

    let cols = spec.column_list();
    report.inserted = conn
        .execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({cols}) SELECT {cols} FROM {staging}",
                spec.name
            ),
            [],
        )
        .with_context(|| format!("merge staging into {}", spec.name))?;
    report.skipped += rows
        .len()
        .saturating_sub(report.inserted)
        .saturating_sub(report.updated);

    conn.execute_batch(&format!("DROP TABLE temp.{staging};"))
        .with_context(|| format!("drop staging table for {}", spec.name))?;
    Ok(report)
}
