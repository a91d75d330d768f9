//! Archive and crosswalk downloads.
//!
//! Index pages are scanned for year-stamped archive links; every matching
//! requested year becomes one job. Jobs are drained by a bounded rayon pool
//! and each one reports its own outcome.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::http_client::http_client;
use crate::retry::RetryPolicy;
use crate::settings::Settings;

static EVENT_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})eve\.zip").expect("static regex"));
static GAMELOG_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"gl(\d{4})\.zip").expect("static regex"));

const EVENTS_BASE: &str = "http://www.retrosheet.org/events";
const GAMELOGS_BASE: &str = "http://www.retrosheet.org/gamelogs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArchiveKind {
    EventFiles,
    GameLogs,
}

impl ArchiveKind {
    pub fn label(self) -> &'static str {
        match self {
            ArchiveKind::EventFiles => "event files",
            ArchiveKind::GameLogs => "game logs",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            ArchiveKind::EventFiles => &EVENT_LINK_RE,
            ArchiveKind::GameLogs => &GAMELOG_LINK_RE,
        }
    }

    pub fn url_for(self, year: &str) -> String {
        match self {
            ArchiveKind::EventFiles => format!("{EVENTS_BASE}/{year}eve.zip"),
            ArchiveKind::GameLogs => format!("{GAMELOGS_BASE}/gl{year}.zip"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DownloadJob {
    pub url: String,
    pub file_name: String,
}

impl DownloadJob {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
        }
    }

    /// File name taken from the last URL path segment.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let file_name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string();
        Self { url, file_name }
    }
}

/// Archive URLs for every requested year linked from `body`, one per year.
pub fn scan_index(kind: ArchiveKind, body: &str, years: &BTreeSet<String>) -> Vec<String> {
    let found: BTreeSet<&str> = kind
        .pattern()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|year| years.contains(*year))
        .collect();
    found.into_iter().map(|year| kind.url_for(year)).collect()
}

fn fetch_index(url: &str, policy: &RetryPolicy) -> Result<String> {
    let client = http_client()?;
    let fetch = || -> Result<String> {
        let resp = client
            .get(url)
            .send()
            .with_context(|| format!("request {url}"))?
            .error_for_status()
            .with_context(|| format!("status for {url}"))?;
        resp.text().with_context(|| format!("read body of {url}"))
    };
    let (_, result) = policy.run_while(url, fetch, is_transient);
    result
}

/// Connection failures, timeouts, truncated bodies, 429 and 5xx are worth
/// another attempt. Other statuses and local I/O errors are final.
pub fn is_transient(err: &anyhow::Error) -> bool {
    let Some(err) = err.chain().find_map(|cause| cause.downcast_ref::<reqwest::Error>()) else {
        return false;
    };
    if let Some(status) = err.status() {
        return status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    }
    err.is_connect() || err.is_timeout() || err.is_body() || err.is_request()
}

/// Fetches each enabled index page once and plans the archive downloads.
pub fn plan_retro_downloads(
    settings: &Settings,
    years: &[String],
    policy: &RetryPolicy,
) -> Result<Vec<DownloadJob>> {
    let wanted: BTreeSet<String> = years.iter().map(|y| y.trim().to_string()).collect();
    for year in &wanted {
        if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
            warn!(year = %year, "not a four digit year; it will never match");
        }
    }

    let mut sources = Vec::new();
    if settings.download.dl_eventfiles {
        sources.push((ArchiveKind::EventFiles, &settings.retrosheet.eventfiles_url));
    }
    if settings.download.dl_gamelogs {
        sources.push((ArchiveKind::GameLogs, &settings.retrosheet.gamelogs_url));
    }

    let mut jobs = Vec::new();
    for (kind, index_url) in sources {
        info!(kind = kind.label(), index = %index_url, "queuing archives for download");
        let body = fetch_index(index_url, policy)?;
        let urls = scan_index(kind, &body, &wanted);
        if urls.is_empty() {
            warn!(kind = kind.label(), "no requested year is linked from the index page");
        }
        jobs.extend(urls.into_iter().map(DownloadJob::from_url));
    }
    Ok(jobs)
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
    pub extracted: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: String,
    pub attempts: u32,
    pub result: Result<Fetched, String>,
}

impl FetchOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub dest_dir: PathBuf,
    pub outcomes: Vec<FetchOutcome>,
}

impl DownloadSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn total_bytes(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|f| f.bytes)
            .sum()
    }

    pub fn print(&self) {
        println!("Download complete");
        println!("Saved to: {}", self.dest_dir.display());
        println!(
            "Files: {}/{} ok ({} bytes)",
            self.succeeded(),
            self.outcomes.len(),
            self.total_bytes()
        );
        for outcome in &self.outcomes {
            if let Ok(fetched) = &outcome.result {
                println!(
                    "  {}  {}  {}",
                    short_digest(&fetched.sha256),
                    fetched.bytes,
                    fetched.path.display()
                );
            }
        }
        let failures: Vec<_> = self.failures().collect();
        if !failures.is_empty() {
            println!("Errors: {}", failures.len());
            for outcome in failures {
                if let Err(err) = &outcome.result {
                    println!(
                        "  - {} (after {} attempts): {err}",
                        outcome.url, outcome.attempts
                    );
                }
            }
        }
    }
}

fn short_digest(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Downloads `url` into `path` via a `.part` file, so a failed transfer never
/// leaves a truncated file under the final name.
pub fn fetch_to_file(url: &str, path: &Path) -> Result<Fetched> {
    let client = http_client()?;
    let resp = client
        .get(url)
        .send()
        .with_context(|| format!("request {url}"))?
        .error_for_status()
        .with_context(|| format!("status for {url}"))?;
    let body = resp
        .bytes()
        .with_context(|| format!("read body of {url}"))?;

    let part = path.with_extension("part");
    fs::write(&part, &body).with_context(|| format!("write {}", part.display()))?;
    fs::rename(&part, path).with_context(|| format!("rename to {}", path.display()))?;

    Ok(Fetched {
        path: path.to_path_buf(),
        bytes: body.len() as u64,
        sha256: hex_digest(&body),
        extracted: Vec::new(),
    })
}

/// Unpacks `archive` into `dest`, returning the files written.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(archive).with_context(|| format!("open {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("read zip archive {}", archive.display()))?;
    let mut written = Vec::new();
    for idx in 0..zip.len() {
        let mut entry = zip
            .by_index(idx)
            .with_context(|| format!("read entry {idx} of {}", archive.display()))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = entry.name(), "skipping unsafe entry");
            continue;
        };
        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("create {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let mut out =
            File::create(&out_path).with_context(|| format!("create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out).with_context(|| format!("write {}", out_path.display()))?;
        written.push(out_path);
    }
    Ok(written)
}

fn run_job(job: &DownloadJob, dest: &Path, policy: &RetryPolicy, extract: bool) -> FetchOutcome {
    let path = dest.join(&job.file_name);
    let (attempts, result) =
        policy.run_while(&job.url, || fetch_to_file(&job.url, &path), is_transient);
    let result = result.and_then(|mut fetched| {
        if extract && fetched.path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("zip")) {
            fetched.extracted = extract_zip(&fetched.path, dest)?;
        }
        Ok(fetched)
    });
    match &result {
        Ok(fetched) => info!(
            url = %job.url,
            bytes = fetched.bytes,
            extracted = fetched.extracted.len(),
            "downloaded"
        ),
        Err(err) => {
            let error = format!("{err:#}");
            warn!(url = %job.url, attempts, error = %error, "download failed")
        }
    }
    FetchOutcome {
        url: job.url.clone(),
        attempts,
        result: result.map_err(|err| format!("{err:#}")),
    }
}

fn with_fetch_pool<T>(threads: usize, action: impl FnOnce() -> T + Send) -> T
where
    T: Send,
{
    match rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("fetch-{i}"))
        .build()
    {
        Ok(pool) => pool.install(action),
        Err(err) => {
            warn!(error = %err, "could not build fetch pool, downloading on the caller thread");
            action()
        }
    }
}

/// Drains `jobs` with at most `threads` concurrent fetches. Every job yields
/// exactly one outcome, in job order.
pub fn run_pool(
    jobs: &[DownloadJob],
    dest: &Path,
    threads: usize,
    policy: &RetryPolicy,
    extract: bool,
) -> DownloadSummary {
    let outcomes = with_fetch_pool(threads, || {
        jobs.par_iter()
            .map(|job| run_job(job, dest, policy, extract))
            .collect::<Vec<_>>()
    });
    DownloadSummary {
        dest_dir: dest.to_path_buf(),
        outcomes,
    }
}

pub fn download_retro(
    settings: &Settings,
    dest: &Path,
    years: &[String],
) -> Result<DownloadSummary> {
    if years.is_empty() {
        return Err(anyhow!("no years given"));
    }
    let policy = RetryPolicy::from_settings(&settings.download);
    let jobs = plan_retro_downloads(settings, years, &policy)?;
    info!(jobs = jobs.len(), threads = settings.download.num_threads, "starting downloads");
    Ok(run_pool(
        &jobs,
        dest,
        settings.download.num_threads,
        &policy,
        settings.download.extract,
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crosswalk {
    People,
    Players,
    Teams,
}

impl Crosswalk {
    pub fn jobs(self, settings: &Settings) -> Vec<DownloadJob> {
        let urls = &settings.crosswalk;
        match self {
            Crosswalk::People => vec![DownloadJob::new(&urls.people_url, "people.csv")],
            Crosswalk::Players => vec![
                DownloadJob::new(&urls.players_url, "players.csv"),
                DownloadJob::new(&urls.hist_players_url, "hist_players.csv"),
            ],
            Crosswalk::Teams => vec![DownloadJob::new(&urls.teams_url, "teams.csv")],
        }
    }
}

fn remove_existing(dest: &Path, file_name: &str) {
    let path = dest.join(file_name);
    match fs::remove_file(&path) {
        Ok(()) => info!(file = file_name, "removed existing file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(file = file_name, "no existing file to remove")
        }
        Err(err) => warn!(file = file_name, error = %err, "could not remove existing file"),
    }
}

/// Replaces the crosswalk CSV files with fresh copies.
pub fn download_crosswalk(settings: &Settings, dest: &Path, which: Crosswalk) -> DownloadSummary {
    let jobs = which.jobs(settings);
    for job in &jobs {
        remove_existing(dest, &job.file_name);
    }
    let policy = RetryPolicy::from_settings(&settings.download);
    run_pool(&jobs, dest, settings.download.num_threads, &policy, false)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use anyhow::Context;

    use super::{ArchiveKind, DownloadJob, hex_digest, is_transient, scan_index};

    fn years(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn event_links_map_to_canonical_urls() {
        let body = r#"<a href="events/2011eve.zip">2011</a> <a href="events/2012eve.zip">2012</a>"#;
        assert_eq!(
            scan_index(ArchiveKind::EventFiles, body, &years(&["2012"])),
            vec!["http://www.retrosheet.org/events/2012eve.zip".to_string()]
        );
    }

    #[test]
    fn duplicated_links_yield_one_url() {
        let body = "gl1999.zip gl1999.zip gl2000.zip";
        assert_eq!(
            scan_index(ArchiveKind::GameLogs, body, &years(&["1999", "2000", "2001"])),
            vec![
                "http://www.retrosheet.org/gamelogs/gl1999.zip".to_string(),
                "http://www.retrosheet.org/gamelogs/gl2000.zip".to_string(),
            ]
        );
    }

    #[test]
    fn job_file_name_is_last_segment() {
        let job = DownloadJob::from_url("http://www.retrosheet.org/gamelogs/gl2001.zip");
        assert_eq!(job.file_name, "gl2001.zip");
    }

    #[test]
    fn digest_is_lowercase_hex() {
        assert_eq!(
            hex_digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn local_io_errors_are_final() {
        let err = std::fs::read("/nonexistent/retrodb/part")
            .context("write part file")
            .unwrap_err();
        assert!(!is_transient(&err));
    }
}
