//! Parse jobs: read Retrosheet side files, converter CSVs and crosswalk CSVs,
//! then hand the rows to the loader.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::ValueEnum;
use csv::{ByteRecord, ReaderBuilder};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use tracing::{error, info, warn};

use crate::chadwick::{Tool, Toolchain};
use crate::error::EtlError;
use crate::layout::{
    self, EVENT_FIELDS, EVENT_ID_INDEX, GAME_FIELDS, HIST_PLAYER_FIELDS, PEOPLE_FIELDS,
    PLAYER_ID_FIELDS, ROSTER_FIELDS, TEAM_FIELDS, TEAM_ID_FIELDS,
};
use crate::loader::{CanonicalMapping, LoadReport, LoadStrategy, Row, TableSpec, load_rows};
use crate::reconcile::{RewriteReport, apply_remaps};
use crate::settings::{Paths, Settings};

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}").expect("static regex"));
static LEADING_YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}").expect("static regex"));

const SOURCE: &str = "Retrosheet";
const UNCERTAINTY: &str = "1";

/// First run of four digits anywhere in the file name.
pub fn extract_year(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    YEAR_RE.find(name).map(|m| m.as_str().to_string())
}

/// Four digits at the very start of the file name (`2012TEX.EVA`).
pub fn leading_year(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    LEADING_YEAR_RE.find(name).map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ParseKind {
    Retro,
    People,
    Players,
    HistPlayers,
    Teams,
}

impl ParseKind {
    /// Crosswalk file name inside the download directory.
    pub fn crosswalk_file(self) -> Option<&'static str> {
        match self {
            ParseKind::Retro => None,
            ParseKind::People => Some("people.csv"),
            ParseKind::Players => Some("players.csv"),
            ParseKind::HistPlayers => Some("hist_players.csv"),
            ParseKind::Teams => Some("teams.csv"),
        }
    }

    fn table(self) -> Option<TableSpec> {
        match self {
            ParseKind::Retro => None,
            ParseKind::People => Some(people_table()),
            ParseKind::Players => Some(playerids_table()),
            ParseKind::HistPlayers => Some(hist_playerids_table()),
            ParseKind::Teams => Some(teamids_table()),
        }
    }
}

pub fn teams_table() -> TableSpec {
    TableSpec {
        name: "teams",
        columns: TEAM_FIELDS.to_vec(),
        key: &["team_id"],
        canonical: None,
    }
}

pub fn rosters_table() -> TableSpec {
    TableSpec {
        name: "rosters",
        columns: ROSTER_FIELDS.to_vec(),
        key: &["year", "player_id", "team_tx"],
        canonical: None,
    }
}

pub fn games_table() -> TableSpec {
    TableSpec {
        name: "games",
        columns: layout::game_columns(),
        key: &["game_id"],
        canonical: None,
    }
}

pub fn events_table() -> TableSpec {
    TableSpec {
        name: "events",
        columns: layout::event_columns(),
        key: &["game_id", "event_id"],
        canonical: None,
    }
}

pub fn people_table() -> TableSpec {
    TableSpec {
        name: "peopleids",
        columns: PEOPLE_FIELDS.to_vec(),
        key: &["key_person"],
        canonical: Some(CanonicalMapping {
            source: "key_mlbam",
            canonical: "key_retro",
        }),
    }
}

pub fn playerids_table() -> TableSpec {
    TableSpec {
        name: "playerids",
        columns: PLAYER_ID_FIELDS.to_vec(),
        key: &["mlb_id"],
        canonical: Some(CanonicalMapping {
            source: "mlb_id",
            canonical: "retro_id",
        }),
    }
}

pub fn hist_playerids_table() -> TableSpec {
    TableSpec {
        name: "hist_playerids",
        columns: HIST_PLAYER_FIELDS.iter().map(|(col, _)| *col).collect(),
        key: &["player_id"],
        canonical: None,
    }
}

pub fn teamids_table() -> TableSpec {
    TableSpec {
        name: "teamids",
        columns: TEAM_ID_FIELDS.to_vec(),
        key: &["team_id", "first_dt"],
        canonical: None,
    }
}

/// Rows read from one file plus the records dropped for their shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRows {
    pub rows: Vec<Row>,
    pub malformed: usize,
}

fn field(raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(raw).into_owned())
    }
}

fn open_reader(path: &Path, has_headers: bool) -> Result<csv::Reader<fs::File>> {
    ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))
}

/// Headerless file with a fixed width; `prefix` values are prepended.
fn read_positional(path: &Path, width: usize, prefix: &[&str]) -> Result<ParsedRows> {
    let mut rdr = open_reader(path, false)?;
    let mut out = ParsedRows::default();
    let mut rec = ByteRecord::new();
    while rdr
        .read_byte_record(&mut rec)
        .with_context(|| format!("read {}", path.display()))?
    {
        if rec.len() != width {
            out.malformed += 1;
            continue;
        }
        let mut row: Row = prefix.iter().map(|p| Some(p.to_string())).collect();
        row.extend(rec.iter().map(field));
        out.rows.push(row);
    }
    Ok(out)
}

/// `TEAMyyyy`: team id, league, city, nickname.
pub fn read_teams_file(path: &Path) -> Result<ParsedRows> {
    read_positional(path, TEAM_FIELDS.len(), &[])
}

/// `<TEAM><year>.ROS`. `None` when the file name carries no year.
pub fn read_rosters_file(path: &Path) -> Result<Option<ParsedRows>> {
    let Some(year) = extract_year(path) else {
        warn!(file = %path.display(), "cannot get year from roster file, skipping");
        return Ok(None);
    };
    read_positional(path, ROSTER_FIELDS.len() - 1, &[year.as_str()]).map(Some)
}

/// `CurrentNames.csv` saved as `teams.csv`.
pub fn read_teamids_file(path: &Path) -> Result<ParsedRows> {
    read_positional(path, TEAM_ID_FIELDS.len(), &[])
}

fn check_converter_header(
    path: &Path,
    header: &ByteRecord,
    expected: &[&str],
    anchors: &[usize],
) -> Result<(), EtlError> {
    if header.len() != expected.len() {
        return Err(EtlError::BadLayout {
            path: path.to_path_buf(),
            reason: format!("expected {} columns, found {}", expected.len(), header.len()),
        });
    }
    for &idx in anchors {
        let found = String::from_utf8_lossy(&header[idx]).trim().to_ascii_lowercase();
        if found != expected[idx] {
            return Err(EtlError::BadLayout {
                path: path.to_path_buf(),
                reason: format!("column {idx} is {found:?}, expected {:?}", expected[idx]),
            });
        }
    }
    Ok(())
}

/// Converter output with a header row; audit columns are appended.
fn read_converter_csv(
    path: &Path,
    expected: &[&str],
    anchors: &[usize],
    inserted_time: &str,
) -> Result<ParsedRows> {
    let mut rdr = open_reader(path, true)?;
    let header = rdr
        .byte_headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .clone();
    check_converter_header(path, &header, expected, anchors)?;

    let mut out = ParsedRows::default();
    let mut rec = ByteRecord::new();
    while rdr
        .read_byte_record(&mut rec)
        .with_context(|| format!("read {}", path.display()))?
    {
        if rec.len() != expected.len() {
            out.malformed += 1;
            continue;
        }
        let mut row: Row = rec.iter().map(field).collect();
        row.push(Some(inserted_time.to_string()));
        row.push(Some(UNCERTAINTY.to_string()));
        row.push(Some(SOURCE.to_string()));
        out.rows.push(row);
    }
    Ok(out)
}

pub fn read_games_file(path: &Path, inserted_time: &str) -> Result<ParsedRows> {
    read_converter_csv(path, &GAME_FIELDS, &[0], inserted_time)
}

pub fn read_events_file(path: &Path, inserted_time: &str) -> Result<ParsedRows> {
    read_converter_csv(path, &EVENT_FIELDS, &[0, EVENT_ID_INDEX], inserted_time)
}

/// Header-driven file: each `(column, header)` pair picks its source column by
/// name. Missing optional headers load as NULL; a missing key header rejects
/// the file.
fn read_named(path: &Path, mapping: &[(&str, &str)], key: &[&str]) -> Result<ParsedRows> {
    let mut rdr = open_reader(path, true)?;
    let header = rdr
        .byte_headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .clone();
    let positions: Vec<Option<usize>> = mapping
        .iter()
        .map(|(_, name)| {
            header.iter().position(|h| {
                String::from_utf8_lossy(h)
                    .trim()
                    .trim_start_matches('\u{feff}')
                    == *name
            })
        })
        .collect();
    for ((column, name), pos) in mapping.iter().zip(&positions) {
        if pos.is_none() {
            if key.contains(column) {
                return Err(EtlError::BadLayout {
                    path: path.to_path_buf(),
                    reason: format!("key column {name:?} missing from header"),
                }
                .into());
            }
            warn!(
                file = %path.display(),
                column = name,
                "column missing from header, loading NULL"
            );
        }
    }

    let mut out = ParsedRows::default();
    let mut rec = ByteRecord::new();
    while rdr
        .read_byte_record(&mut rec)
        .with_context(|| format!("read {}", path.display()))?
    {
        let row: Row = positions
            .iter()
            .map(|pos| pos.and_then(|i| rec.get(i)).and_then(field))
            .collect();
        out.rows.push(row);
    }
    Ok(out)
}

pub fn read_crosswalk_file(kind: ParseKind, path: &Path) -> Result<ParsedRows> {
    match kind {
        ParseKind::People => {
            let mapping: Vec<_> = PEOPLE_FIELDS.iter().map(|c| (*c, *c)).collect();
            read_named(path, &mapping, &["key_person"])
        }
        ParseKind::Players => {
            let mapping: Vec<_> = PLAYER_ID_FIELDS.iter().map(|c| (*c, *c)).collect();
            read_named(path, &mapping, &["mlb_id"])
        }
        ParseKind::HistPlayers => read_named(path, &HIST_PLAYER_FIELDS, &["player_id"]),
        ParseKind::Teams => read_teamids_file(path),
        ParseKind::Retro => Err(anyhow::anyhow!("retro is not a crosswalk kind")),
    }
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: PathBuf,
    pub table: &'static str,
    pub report: LoadReport,
}

#[derive(Debug, Clone, Default)]
pub struct ParseSummary {
    pub strategy: LoadStrategy,
    pub files: Vec<FileReport>,
    pub totals: LoadReport,
    pub rewrites: RewriteReport,
    pub errors: Vec<String>,
}

impl ParseSummary {
    pub fn new(strategy: LoadStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    fn record(&mut self, path: &Path, table: &'static str, report: LoadReport) {
        info!(file = %path.display(), table, %report, "processed");
        self.totals.merge(report.clone());
        self.files.push(FileReport {
            path: path.to_path_buf(),
            table,
            report,
        });
    }

    fn fail(&mut self, path: &Path, err: anyhow::Error) {
        let message = format!("{err:#}");
        error!(file = %path.display(), error = %message, "file abandoned");
        self.errors.push(format!("{}: {message}", path.display()));
    }

    pub fn print(&self) {
        println!("Parse complete ({})", self.strategy);
        println!("Files loaded: {}", self.files.len());
        let mut per_table: BTreeMap<&str, LoadReport> = BTreeMap::new();
        for file in &self.files {
            per_table.entry(file.table).or_default().merge(file.report.clone());
        }
        for (table, report) in &per_table {
            println!("  {table}: {report}");
        }
        if self.rewrites.remaps_applied > 0 {
            println!(
                "Player references: {} remaps, {} cells rewritten",
                self.rewrites.remaps_applied, self.rewrites.cells_rewritten
            );
        }
        if !self.rewrites.ambiguous.is_empty() {
            println!("Conflicting remaps skipped: {}", self.rewrites.ambiguous.len());
        }
        if !self.errors.is_empty() {
            println!("Errors: {}", self.errors.len());
            for err in self.errors.iter().take(8) {
                println!("  - {err}");
            }
            if self.errors.len() > 8 {
                println!("  ... {} more", self.errors.len() - 8);
            }
        }
    }
}

/// Loads one parsed file; any failure abandons just this file.
fn load_file(
    conn: &mut Connection,
    summary: &mut ParseSummary,
    path: &Path,
    spec: &TableSpec,
    parsed: Result<ParsedRows>,
) {
    let outcome = parsed.and_then(|parsed| {
        let mut report = load_rows(conn, spec, &parsed.rows, summary.strategy)?;
        report.malformed += parsed.malformed;
        Ok(report)
    });
    match outcome {
        Ok(report) => summary.record(path, spec.name, report),
        Err(err) => summary.fail(path, err),
    }
}

/// Sorted files in `dir` whose name satisfies `keep`.
fn list_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("list {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()).is_some_and(&keep) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn year_matches(path: &Path, year: Option<&str>) -> bool {
    match year {
        None => true,
        Some(year) => extract_year(path).as_deref() == Some(year),
    }
}

/// Event files grouped by the year at the start of their name.
pub fn discover_event_files(dir: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let mut by_year: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in list_files(dir, |name| name.contains(".EV"))? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        match leading_year(&path) {
            Some(year) => by_year.entry(year).or_default().push(name),
            None => warn!(file = %path.display(), "event file name has no leading year, ignoring"),
        }
    }
    Ok(by_year)
}

fn convert_year(
    tools: &Toolchain,
    paths: &Paths,
    year: &str,
    inputs: &[String],
    summary: &mut ParseSummary,
) {
    for (tool, prefix) in [(Tool::Event, "events"), (Tool::Game, "games")] {
        let out = paths.csv_dir.join(format!("{prefix}-{year}.csv"));
        if out.is_file() {
            info!(out = %out.display(), "converter output exists, not regenerating");
            continue;
        }
        info!(tool = tool.binary(), year, files = inputs.len(), "converting event files");
        if let Err(err) = tools.run(tool, year, inputs, &paths.download_dir, &out) {
            summary.fail(&out, err);
        }
    }
}

pub fn parse_retro(
    conn: &mut Connection,
    settings: &Settings,
    paths: &Paths,
    year: Option<&str>,
    strategy: LoadStrategy,
) -> Result<ParseSummary> {
    let tools = Toolchain::locate(&settings.chadwick.directory)?;
    fs::create_dir_all(&paths.csv_dir)
        .with_context(|| format!("create {}", paths.csv_dir.display()))?;

    let mut summary = ParseSummary::new(strategy);

    let by_year = discover_event_files(&paths.download_dir)?;
    if by_year.is_empty() {
        warn!(dir = %paths.download_dir.display(), "no event files found");
    }
    for (file_year, inputs) in &by_year {
        if year.is_some_and(|y| y != file_year.as_str()) {
            continue;
        }
        convert_year(&tools, paths, file_year, inputs, &mut summary);
    }

    load_retro_files(conn, paths, year, &mut summary)?;
    Ok(summary)
}

/// Loads teams, rosters, games and events, in that order.
pub fn load_retro_files(
    conn: &mut Connection,
    paths: &Paths,
    year: Option<&str>,
    summary: &mut ParseSummary,
) -> Result<()> {
    let inserted_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let teams = teams_table();
    for path in list_files(&paths.download_dir, |n| n.starts_with("TEAM"))? {
        if year_matches(&path, year) {
            let parsed = read_teams_file(&path);
            load_file(conn, summary, &path, &teams, parsed);
        }
    }

    let rosters = rosters_table();
    for path in list_files(&paths.download_dir, |n| n.ends_with(".ROS"))? {
        if !year_matches(&path, year) {
            continue;
        }
        match read_rosters_file(&path) {
            Ok(Some(parsed)) => load_file(conn, summary, &path, &rosters, Ok(parsed)),
            Ok(None) => {}
            Err(err) => summary.fail(&path, err),
        }
    }

    let games = games_table();
    for path in list_files(&paths.csv_dir, |n| n.starts_with("games-") && n.ends_with(".csv"))? {
        if year_matches(&path, year) {
            let parsed = read_games_file(&path, &inserted_time);
            load_file(conn, summary, &path, &games, parsed);
        }
    }

    let events = events_table();
    for path in list_files(&paths.csv_dir, |n| n.starts_with("events-") && n.ends_with(".csv"))? {
        if year_matches(&path, year) {
            let parsed = read_events_file(&path, &inserted_time);
            load_file(conn, summary, &path, &events, parsed);
        }
    }
    Ok(())
}

/// Loads one crosswalk file, then rewrites player references for every
/// canonical id it introduced or changed.
pub fn parse_crosswalk(
    conn: &mut Connection,
    paths: &Paths,
    kind: ParseKind,
    strategy: LoadStrategy,
) -> Result<ParseSummary> {
    let (Some(file), Some(spec)) = (kind.crosswalk_file(), kind.table()) else {
        return Err(anyhow::anyhow!("{kind:?} is not a crosswalk kind"));
    };
    let path = paths.download_dir.join(file);
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "{} not found; run the matching download first",
            path.display()
        ));
    }

    let mut summary = ParseSummary::new(strategy);
    let parsed = read_crosswalk_file(kind, &path);
    load_file(conn, &mut summary, &path, &spec, parsed);

    if !summary.totals.remaps.is_empty() {
        summary.rewrites = apply_remaps(conn, &summary.totals.remaps)?;
    }
    Ok(summary)
}

pub fn run(
    conn: &mut Connection,
    settings: &Settings,
    paths: &Paths,
    kind: ParseKind,
    year: Option<&str>,
    strategy: LoadStrategy,
) -> Result<ParseSummary> {
    info!(?kind, %strategy, year = year.unwrap_or("all"), "parse started");
    match kind {
        ParseKind::Retro => parse_retro(conn, settings, paths, year, strategy),
        other => {
            if year.is_some() {
                warn!(kind = ?other, "--year only applies to retro, ignoring");
            }
            parse_crosswalk(conn, paths, other, strategy)
        }
    }
}
