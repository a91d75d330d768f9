use std::fs;
use std::path::Path;

use rusqlite::Connection;

use retrodb::layout::{EVENT_FIELDS, EVENT_ID_INDEX, GAME_FIELDS};
use retrodb::loader::LoadStrategy;
use retrodb::parse::{ParseSummary, load_retro_files};
use retrodb::schema::{TableGroup, ensure_group};
use retrodb::settings::Paths;

const STRATEGIES: [LoadStrategy; 2] = [LoadStrategy::RowGuarded, LoadStrategy::BulkStaged];

struct Fixture {
    _dir: tempfile::TempDir,
    paths: Paths,
}

fn header(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| format!("\"{}\"", f.to_ascii_uppercase()))
        .collect::<Vec<_>>()
        .join(",")
}

fn record(width: usize, values: &[(usize, &str)]) -> String {
    let mut out = vec![String::new(); width];
    for (idx, value) in values {
        out[*idx] = value.to_string();
    }
    out.join(",")
}

fn game_index(name: &str) -> usize {
    GAME_FIELDS.iter().position(|f| *f == name).unwrap()
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let download_dir = dir.path().join("downloads");
    let csv_dir = download_dir.join("csv");
    fs::create_dir_all(&csv_dir).unwrap();

    fs::write(
        download_dir.join("TEAM2012"),
        "ANA,A,Anaheim,Angels\nBAL,A,Baltimore,Orioles\nBAD,A\n",
    )
    .unwrap();
    fs::write(
        download_dir.join("TEX2012.ROS"),
        "jonesj01,Jones,John,R,R,TEX,1B\n",
    )
    .unwrap();
    fs::write(download_dir.join("ROSTER.ROS"), "smitj01,Smith,Joe,R,R,TEX,C\n").unwrap();

    let games = [
        header(&GAME_FIELDS),
        record(
            GAME_FIELDS.len(),
            &[
                (0, "TEX201204060"),
                (game_index("home_team_id"), "TEX"),
                (game_index("inn_ct"), "9"),
            ],
        ),
        record(
            GAME_FIELDS.len(),
            &[
                (0, "TEX201204070"),
                (game_index("home_team_id"), "TEX"),
                (game_index("inn_ct"), "10"),
            ],
        ),
        "TEX201204080,too,short".to_string(),
    ];
    fs::write(csv_dir.join("games-2012.csv"), games.join("\n") + "\n").unwrap();

    let events = [
        header(&EVENT_FIELDS),
        record(EVENT_FIELDS.len(), &[(0, "TEX201204060"), (EVENT_ID_INDEX, "1")]),
        record(EVENT_FIELDS.len(), &[(0, "TEX201204060"), (EVENT_ID_INDEX, "2")]),
        record(EVENT_FIELDS.len(), &[(0, "TEX201204070"), (EVENT_ID_INDEX, "1")]),
    ];
    fs::write(csv_dir.join("events-2012.csv"), events.join("\n") + "\n").unwrap();

    fs::write(csv_dir.join("games-2013.csv"), "\"GAME_ID\",\"GAME_DT\"\nX,Y\n").unwrap();

    Fixture {
        paths: Paths {
            config_file: dir.path().join("retrodb.json"),
            download_dir,
            csv_dir,
            sql_dir: None,
        },
        _dir: dir,
    }
}

fn database() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    ensure_group(&conn, TableGroup::Retro, false, None).unwrap();
    conn
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

fn run(
    conn: &mut Connection,
    paths: &Paths,
    year: Option<&str>,
    strategy: LoadStrategy,
) -> ParseSummary {
    let mut summary = ParseSummary::new(strategy);
    load_retro_files(conn, paths, year, &mut summary).unwrap();
    summary
}

#[test]
fn loads_every_kind_and_reports_bad_files() {
    for strategy in STRATEGIES {
        let fx = fixture();
        let mut conn = database();
        let summary = run(&mut conn, &fx.paths, None, strategy);

        assert_eq!(count(&conn, "teams"), 2, "{strategy}");
        assert_eq!(count(&conn, "rosters"), 1, "{strategy}");
        assert_eq!(count(&conn, "games"), 2, "{strategy}");
        assert_eq!(count(&conn, "events"), 3, "{strategy}");

        assert_eq!(summary.totals.inserted, 8);
        assert_eq!(summary.totals.malformed, 2);
        assert_eq!(summary.errors.len(), 1, "{:?}", summary.errors);
        assert!(summary.errors[0].contains("games-2013.csv"));
    }
}

#[test]
fn roster_row_gets_year_from_file_name() {
    for strategy in STRATEGIES {
        let fx = fixture();
        let mut conn = database();
        run(&mut conn, &fx.paths, None, strategy);

        let stored: Vec<String> = conn
            .query_row(
                "SELECT CAST(year AS TEXT), player_id, last_name_tx, first_name_tx,
                        bat_hand_cd, pit_hand_cd, team_tx, pos_tx
                 FROM rosters",
                [],
                |r| (0..8).map(|i| r.get::<_, String>(i)).collect(),
            )
            .unwrap();
        assert_eq!(
            stored,
            vec!["2012", "jonesj01", "Jones", "John", "R", "R", "TEX", "1B"]
        );

        let smith: i64 = conn
            .query_row("SELECT COUNT(*) FROM rosters WHERE player_id = 'smitj01'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(smith, 0);
    }
}

#[test]
fn second_run_inserts_nothing() {
    for strategy in STRATEGIES {
        let fx = fixture();
        let mut conn = database();
        run(&mut conn, &fx.paths, None, strategy);
        let before: Vec<i64> = ["teams", "rosters", "games", "events"]
            .iter()
            .map(|t| count(&conn, t))
            .collect();

        let again = run(&mut conn, &fx.paths, None, strategy);
        assert_eq!(again.totals.inserted, 0, "{strategy}");
        assert_eq!(again.totals.skipped, 8, "{strategy}");

        let after: Vec<i64> = ["teams", "rosters", "games", "events"]
            .iter()
            .map(|t| count(&conn, t))
            .collect();
        assert_eq!(before, after);
    }
}

#[test]
fn strategies_mix_without_duplicates() {
    let fx = fixture();
    let mut conn = database();
    run(&mut conn, &fx.paths, None, LoadStrategy::BulkStaged);
    let again = run(&mut conn, &fx.paths, None, LoadStrategy::RowGuarded);
    assert_eq!(again.totals.inserted, 0);
    assert_eq!(count(&conn, "games"), 2);
}

#[test]
fn audit_columns_are_filled() {
    let fx = fixture();
    let mut conn = database();
    run(&mut conn, &fx.paths, None, LoadStrategy::RowGuarded);

    let (uncertainty, source, inserted): (i64, String, Option<String>) = conn
        .query_row(
            "SELECT uncertainty, source, inserted_time FROM games WHERE game_id = 'TEX201204060'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(uncertainty, 1);
    assert_eq!(source, "Retrosheet");
    assert!(inserted.is_some());

    let innings: i64 = conn
        .query_row("SELECT inn_ct FROM games WHERE game_id = 'TEX201204070'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(innings, 10);

    let (true_time, park): (Option<String>, Option<String>) = conn
        .query_row(
            "SELECT true_time, bat_id FROM events \
             WHERE game_id = 'TEX201204060' AND event_id = '2'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(true_time, None);
    assert_eq!(park, None);
}

#[test]
fn year_filter_limits_files() {
    let fx = fixture();
    let mut conn = database();
    let summary = run(&mut conn, &fx.paths, Some("2013"), LoadStrategy::RowGuarded);
    assert_eq!(count(&conn, "teams"), 0);
    assert_eq!(count(&conn, "games"), 0);
    assert_eq!(summary.files.len(), 0);
    assert_eq!(summary.errors.len(), 1);
}

#[test]
fn missing_tables_abandon_files_without_aborting() {
    let fx = fixture();
    let mut conn = Connection::open_in_memory().unwrap();
    let summary = run(&mut conn, &fx.paths, Some("2012"), LoadStrategy::BulkStaged);
    assert!(summary.files.is_empty());
    assert_eq!(summary.errors.len(), 4);
    assert!(Path::new(&fx.paths.csv_dir).join("games-2012.csv").exists());
}
