//! Rewrites player references in `games` and `events` once a crosswalk
//! supplies (or changes) a player's Retrosheet id.

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::schema::table_exists;

pub const PLACEHOLDER_PREFIX: &str = "ravenholm-";

/// Id used for a player known only by MLB id.
pub fn placeholder_id(mlb_id: &str) -> String {
    format!("{PLACEHOLDER_PREFIX}{}", mlb_id.trim())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdRemap {
    pub from: String,
    pub to: String,
}

/// Every column holding a player id. Extend this when the converter field
/// ranges grow.
pub const PLAYER_REFERENCES: &[(&str, &str)] = &[
    ("games", "away_start_pit_id"),
    ("games", "home_start_pit_id"),
    ("games", "win_pit_id"),
    ("games", "lose_pit_id"),
    ("games", "save_pit_id"),
    ("games", "gwrbi_bat_id"),
    ("games", "away_lineup1_bat_id"),
    ("games", "away_lineup2_bat_id"),
    ("games", "away_lineup3_bat_id"),
    ("games", "away_lineup4_bat_id"),
    ("games", "away_lineup5_bat_id"),
    ("games", "away_lineup6_bat_id"),
    ("games", "away_lineup7_bat_id"),
    ("games", "away_lineup8_bat_id"),
    ("games", "away_lineup9_bat_id"),
    ("games", "home_lineup1_bat_id"),
    ("games", "home_lineup2_bat_id"),
    ("games", "home_lineup3_bat_id"),
    ("games", "home_lineup4_bat_id"),
    ("games", "home_lineup5_bat_id"),
    ("games", "home_lineup6_bat_id"),
    ("games", "home_lineup7_bat_id"),
    ("games", "home_lineup8_bat_id"),
    ("games", "home_lineup9_bat_id"),
    ("games", "away_finish_pit_id"),
    ("games", "home_finish_pit_id"),
    ("events", "bat_id"),
    ("events", "resp_bat_id"),
    ("events", "pit_id"),
    ("events", "resp_pit_id"),
    ("events", "pos2_fld_id"),
    ("events", "pos3_fld_id"),
    ("events", "pos4_fld_id"),
    ("events", "pos5_fld_id"),
    ("events", "pos6_fld_id"),
    ("events", "pos7_fld_id"),
    ("events", "pos8_fld_id"),
    ("events", "pos9_fld_id"),
    ("events", "base1_run_id"),
    ("events", "base2_run_id"),
    ("events", "base3_run_id"),
    ("events", "run1_resp_pit_id"),
    ("events", "run2_resp_pit_id"),
    ("events", "run3_resp_pit_id"),
    ("events", "removed_for_pr_run1_id"),
    ("events", "removed_for_pr_run2_id"),
    ("events", "removed_for_pr_run3_id"),
    ("events", "removed_for_ph_bat_id"),
    ("events", "bat_on_deck_id"),
    ("events", "bat_in_hold_id"),
    ("events", "fld_id"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub remaps_applied: usize,
    /// Remaps whose old id appears in no reference column.
    pub remaps_unreferenced: usize,
    /// Remaps dropped because the batch maps their old id to more than one
    /// new id.
    pub ambiguous: Vec<IdRemap>,
    pub updates_issued: usize,
    pub cells_rewritten: usize,
    pub tables_missing: Vec<&'static str>,
}

/// Applies a batch of remaps across every reference column.
///
/// The batch is one simultaneous substitution: every `from` is matched
/// against the values stored before the call, so `a -> b` and `b -> a` in the
/// same batch swap the two ids. Remaps that share no id with another remap
/// each run in their own transaction; remaps that chain into each other run
/// together in one. Ids that nothing references cost no UPDATE, and tables
/// that do not exist yet are skipped.
pub fn apply_remaps(conn: &mut Connection, remaps: &[IdRemap]) -> Result<RewriteReport> {
    let mut report = RewriteReport::default();
    let batch = collapse_batch(remaps, &mut report);
    if batch.is_empty() {
        return Ok(report);
    }

    let mut refs = Vec::new();
    for &(table, column) in PLAYER_REFERENCES {
        if report.tables_missing.contains(&table) {
            continue;
        }
        if table_exists(conn, table)? {
            refs.push((table, column));
        } else {
            debug!(table, "reference table missing, skipping");
            report.tables_missing.push(table);
        }
    }
    if refs.is_empty() {
        return Ok(report);
    }

    let referenced = referenced_ids(conn, &refs, &batch)?;
    let live: Vec<&IdRemap> = batch
        .iter()
        .filter(|remap| referenced.contains_key(remap.from.as_str()))
        .collect();
    report.remaps_unreferenced = batch.len() - live.len();
    if report.remaps_unreferenced > 0 {
        debug!(count = report.remaps_unreferenced, "remaps with no referencing rows skipped");
    }

    let froms: HashSet<&str> = live.iter().map(|r| r.from.as_str()).collect();
    let tos: HashSet<&str> = live.iter().map(|r| r.to.as_str()).collect();
    let (entangled, independent): (Vec<&IdRemap>, Vec<&IdRemap>) = live
        .into_iter()
        .partition(|r| froms.contains(r.to.as_str()) || tos.contains(r.from.as_str()));

    for remap in independent {
        let columns = &referenced[remap.from.as_str()];
        let tx = conn
            .transaction()
            .with_context(|| format!("begin rewrite {} -> {}", remap.from, remap.to))?;
        let mut touched = 0;
        for &idx in columns {
            let (table, column) = refs[idx];
            touched += tx
                .execute(
                    &format!("UPDATE {table} SET {column} = ?1 WHERE {column} = ?2"),
                    params![remap.to, remap.from],
                )
                .with_context(|| format!("rewrite {table}.{column}"))?;
            report.updates_issued += 1;
        }
        tx.commit()
            .with_context(|| format!("commit rewrite {} -> {}", remap.from, remap.to))?;
        info!(from = %remap.from, to = %remap.to, cells = touched, "player references rewritten");
        report.remaps_applied += 1;
        report.cells_rewritten += touched;
    }

    if !entangled.is_empty() {
        let mut columns: BTreeSet<usize> = BTreeSet::new();
        for remap in &entangled {
            columns.extend(referenced[remap.from.as_str()].iter().copied());
        }
        let touched = substitute_together(conn, &refs, &columns, &entangled, &mut report)?;
        info!(
            remaps = entangled.len(),
            cells = touched,
            "chained player references rewritten together"
        );
        report.remaps_applied += entangled.len();
        report.cells_rewritten += touched;
    }
    Ok(report)
}

/// Removes duplicates and no-op remaps. An old id mapped to two different new
/// ids has no single answer, so every remap for it is dropped and reported.
fn collapse_batch(remaps: &[IdRemap], report: &mut RewriteReport) -> Vec<IdRemap> {
    let unique: BTreeSet<&IdRemap> = remaps.iter().filter(|r| r.from != r.to).collect();
    let mut targets: HashMap<&str, usize> = HashMap::new();
    for remap in unique.iter().copied() {
        *targets.entry(remap.from.as_str()).or_default() += 1;
    }
    let mut batch = Vec::with_capacity(unique.len());
    for remap in unique {
        if targets[remap.from.as_str()] > 1 {
            warn!(from = %remap.from, to = %remap.to, "conflicting remaps for one id, skipping");
            report.ambiguous.push(remap.clone());
        } else {
            batch.push(remap.clone());
        }
    }
    batch
}

/// Maps each old id that actually occurs to the indexes (into `refs`) of the
/// columns holding it. One scan per column, however many remaps there are.
fn referenced_ids(
    conn: &mut Connection,
    refs: &[(&str, &str)],
    batch: &[IdRemap],
) -> Result<HashMap<String, Vec<usize>>> {
    let tx = conn.transaction().context("begin remap candidate scan")?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS temp.remap_candidates;
         CREATE TEMP TABLE remap_candidates (id TEXT PRIMARY KEY);",
    )
    .context("create remap candidate table")?;
    {
        let mut insert =
            tx.prepare("INSERT OR IGNORE INTO temp.remap_candidates (id) VALUES (?1)")?;
        for remap in batch {
            insert.execute(params![remap.from])?;
        }
    }

    let mut found: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, (table, column)) in refs.iter().enumerate() {
        let mut stmt = tx
            .prepare(&format!(
                "SELECT DISTINCT {column} FROM {table} \
                 WHERE {column} IN (SELECT id FROM temp.remap_candidates)"
            ))
            .with_context(|| format!("scan {table}.{column}"))?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for id in ids {
            found.entry(id?).or_default().push(idx);
        }
    }
    tx.execute_batch("DROP TABLE temp.remap_candidates;")
        .context("drop remap candidate table")?;
    tx.commit().context("commit remap candidate scan")?;
    Ok(found)
}

/// Rewrites every remap in `batch` in one transaction, each cell looked up
/// once against the old values, so swaps and chains land where they point.
fn substitute_together(
    conn: &mut Connection,
    refs: &[(&str, &str)],
    columns: &BTreeSet<usize>,
    batch: &[&IdRemap],
    report: &mut RewriteReport,
) -> Result<usize> {
    let tx = conn.transaction().context("begin chained rewrite")?;
    tx.execute_batch(
        "DROP TABLE IF EXISTS temp.remap_batch;
         CREATE TEMP TABLE remap_batch (from_id TEXT PRIMARY KEY, to_id TEXT NOT NULL);",
    )
    .context("create remap batch table")?;
    {
        let mut insert =
            tx.prepare("INSERT INTO temp.remap_batch (from_id, to_id) VALUES (?1, ?2)")?;
        for remap in batch {
            insert.execute(params![remap.from, remap.to])?;
        }
    }
    let mut touched = 0;
    for &idx in columns {
        let (table, column) = refs[idx];
        touched += tx
            .execute(
                &format!(
                    "UPDATE {table} SET {column} = \
                     (SELECT m.to_id FROM temp.remap_batch m WHERE m.from_id = {table}.{column}) \
                     WHERE {column} IN (SELECT from_id FROM temp.remap_batch)"
                ),
                [],
            )
            .with_context(|| format!("rewrite {table}.{column}"))?;
        report.updates_issued += 1;
    }
    tx.execute_batch("DROP TABLE temp.remap_batch;")
        .context("drop remap batch table")?;
    tx.commit().context("commit chained rewrite")?;
    Ok(touched)
}
