use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use retrodb::db::ConnectionSpec;
use retrodb::download::{self, Crosswalk, DownloadSummary};
use retrodb::loader::LoadStrategy;
use retrodb::logging::init_tracing;
use retrodb::parse::{self, ParseKind};
use retrodb::schema::{self, TableGroup};
use retrodb::settings::{self, Paths, Settings};

#[derive(Parser)]
#[command(
    name = "retrodb",
    version,
    about = "Download Retrosheet data and load it into a database"
)]
struct Cli {
    /// Settings file; overrides RETRODB_CONFIG and the search path
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download files for populating the database
    Download {
        #[command(subcommand)]
        what: DownloadCmd,
    },
    /// Create a table group when any of its tables is missing
    Ensure {
        group: TableGroup,
        /// Drop and recreate the tables even if they exist
        #[arg(long)]
        recreate: bool,
    },
    /// Load downloaded files into the database
    Parse {
        kind: ParseKind,
        /// Only this season (retro only)
        #[arg(long, value_parser = clap::value_parser!(u16).range(1800..=2999))]
        year: Option<u16>,
        /// row_guarded or bulk_staged; defaults to database.load_strategy
        #[arg(long)]
        strategy: Option<LoadStrategy>,
    },
    /// Show or change the settings file
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum DownloadCmd {
    /// Event files and game logs for the given seasons
    Retro {
        #[arg(required = true)]
        years: Vec<String>,
    },
    /// Chadwick register (people.csv)
    People,
    /// Player id crosswalks (players.csv, hist_players.csv)
    Players,
    /// Retrosheet franchise names (teams.csv)
    Teams,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Set one key, e.g. `config modify download num_threads 8`
    Modify {
        section: String,
        key: String,
        value: String,
    },
    /// Print the effective settings and derived paths
    Show,
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    let cli = Cli::parse();

    if let Commands::Config {
        action: ConfigCmd::Modify {
            section,
            key,
            value,
        },
    } = &cli.command
    {
        init_tracing(cli.verbose)?;
        let path = settings::resolve_config_path(cli.config.as_deref())?;
        settings::modify(&path, section, key, value)?;
        println!("{section}.{key} updated in {}", path.display());
        return Ok(());
    }

    let (settings, config_file) = settings::load(cli.config.as_deref())?;
    init_tracing(cli.verbose || settings.debug.verbose)?;
    let paths = settings.derive_paths(&config_file)?;
    info!(config = %config_file.display(), "settings loaded");

    match cli.command {
        Commands::Download { what } => {
            paths.prepare()?;
            run_download(&settings, &paths, what)
        }
        Commands::Ensure { group, recreate } => {
            let conn = ConnectionSpec::from_settings(&settings.database).open()?;
            let outcome = schema::ensure_group(&conn, group, recreate, paths.sql_dir.as_deref())?;
            outcome.print();
            Ok(())
        }
        Commands::Parse {
            kind,
            year,
            strategy,
        } => {
            paths.prepare()?;
            let strategy = strategy.unwrap_or(settings.database.load_strategy);
            let year = year.map(|y| format!("{y:04}"));
            let mut conn = ConnectionSpec::from_settings(&settings.database).open()?;
            let summary =
                parse::run(&mut conn, &settings, &paths, kind, year.as_deref(), strategy)?;
            summary.print();
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                let shown = settings.to_display_value(&paths)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&shown).context("render settings")?
                );
                Ok(())
            }
            ConfigCmd::Modify { .. } => Ok(()),
        },
    }
}

fn run_download(settings: &Settings, paths: &Paths, what: DownloadCmd) -> Result<()> {
    let dest = &paths.download_dir;
    let summary: DownloadSummary = match what {
        DownloadCmd::Retro { years } => download::download_retro(settings, dest, &years)?,
        DownloadCmd::People => download::download_crosswalk(settings, dest, Crosswalk::People),
        DownloadCmd::Players => download::download_crosswalk(settings, dest, Crosswalk::Players),
        DownloadCmd::Teams => download::download_crosswalk(settings, dest, Crosswalk::Teams),
    };
    summary.print();
    let failed = summary.failures().count();
    if failed > 0 {
        bail!("{failed} of {} downloads failed", summary.outcomes.len());
    }
    Ok(())
}
