use std::fs;

use rusqlite::{Connection, params};

use retrodb::layout::PLAYER_ID_FIELDS;
use retrodb::loader::LoadStrategy;
use retrodb::parse::{ParseKind, parse_crosswalk};
use retrodb::reconcile::{IdRemap, PLAYER_REFERENCES, apply_remaps};
use retrodb::schema::{TableGroup, ensure_group};
use retrodb::settings::Paths;

const STRATEGIES: [LoadStrategy; 2] = [LoadStrategy::RowGuarded, LoadStrategy::BulkStaged];

fn paths(dir: &tempfile::TempDir) -> Paths {
    let download_dir = dir.path().to_path_buf();
    Paths {
        config_file: download_dir.join("retrodb.json"),
        csv_dir: download_dir.join("csv"),
        download_dir,
        sql_dir: None,
    }
}

fn write_players(dir: &tempfile::TempDir, rows: &[(&str, &str)]) {
    let mut header: Vec<&str> = PLAYER_ID_FIELDS.to_vec();
    header.insert(3, "cbs_name");
    let mut lines = vec![header.join(",")];
    for (mlb_id, retro_id) in rows {
        let line: Vec<String> = header
            .iter()
            .map(|col| match *col {
                "mlb_id" => mlb_id.to_string(),
                "retro_id" => retro_id.to_string(),
                "mlb_name" => "Jorge Ortiz".to_string(),
                _ => String::new(),
            })
            .collect();
        lines.push(line.join(","));
    }
    fs::write(dir.path().join("players.csv"), lines.join("\n") + "\n").unwrap();
}

fn seeded_database() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    ensure_group(&conn, TableGroup::Retro, false, None).unwrap();
    ensure_group(&conn, TableGroup::Players, false, None).unwrap();
    conn.execute(
        "INSERT INTO games (game_id, home_start_pit_id, win_pit_id) VALUES (?1, ?2, ?2)",
        params!["TEX201204060", "ravenholm-12345"],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO events (game_id, event_id, pit_id, bat_id) VALUES (?1, '1', ?2, 'smitj001')",
        params!["TEX201204060", "ravenholm-12345"],
    )
    .unwrap();
    conn
}

fn references_to(conn: &Connection, id: &str) -> i64 {
    PLAYER_REFERENCES
        .iter()
        .map(|(table, column)| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                [id],
                |r| r.get::<_, i64>(0),
            )
            .unwrap()
        })
        .sum()
}

#[test]
fn placeholder_is_rewritten_to_retro_id() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().unwrap();
        write_players(&dir, &[("12345", "joroj001"), ("777", "")]);
        let mut conn = seeded_database();

        let summary =
            parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, strategy).unwrap();
        assert_eq!(summary.totals.inserted, 2, "{strategy}");
        assert_eq!(
            summary.totals.remaps,
            vec![IdRemap {
                from: "ravenholm-12345".to_string(),
                to: "joroj001".to_string(),
            }]
        );
        assert_eq!(summary.rewrites.cells_rewritten, 3, "{strategy}");
        assert_eq!(references_to(&conn, "ravenholm-12345"), 0, "{strategy}");
        assert_eq!(references_to(&conn, "joroj001"), 3, "{strategy}");
        assert_eq!(references_to(&conn, "smitj001"), 1);
    }
}

#[test]
fn changed_retro_id_follows_through() {
    for strategy in STRATEGIES {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = seeded_database();

        write_players(&dir, &[("12345", "joroj001")]);
        parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, strategy).unwrap();

        write_players(&dir, &[("12345", "joroj002")]);
        let summary =
            parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, strategy).unwrap();
        assert_eq!(summary.totals.updated, 1, "{strategy}");
        assert_eq!(references_to(&conn, "joroj001"), 0, "{strategy}");
        assert_eq!(references_to(&conn, "joroj002"), 3, "{strategy}");

        let retro: String = conn
            .query_row("SELECT retro_id FROM playerids WHERE mlb_id = '12345'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(retro, "joroj002");
    }
}

#[test]
fn unchanged_crosswalk_rewrites_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_players(&dir, &[("12345", "joroj001")]);
    let mut conn = seeded_database();
    parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, LoadStrategy::RowGuarded).unwrap();

    let again =
        parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, LoadStrategy::BulkStaged)
            .unwrap();
    assert_eq!(again.totals.inserted, 0);
    assert_eq!(again.totals.skipped, 1);
    assert!(again.totals.remaps.is_empty());
    assert_eq!(again.rewrites.remaps_applied, 0);
}

#[test]
fn crosswalk_without_game_tables_still_loads() {
    let dir = tempfile::tempdir().unwrap();
    write_players(&dir, &[("12345", "joroj001")]);
    let mut conn = Connection::open_in_memory().unwrap();
    ensure_group(&conn, TableGroup::Players, false, None).unwrap();

    let summary =
        parse_crosswalk(&mut conn, &paths(&dir), ParseKind::Players, LoadStrategy::RowGuarded)
            .unwrap();
    assert_eq!(summary.totals.inserted, 1);
    assert_eq!(summary.rewrites.cells_rewritten, 0);
    assert!(summary.rewrites.tables_missing.contains(&"games"));
    assert!(summary.rewrites.tables_missing.contains(&"events"));
}

#[test]
fn each_remap_is_applied_independently() {
    let mut conn = seeded_database();
    let report = apply_remaps(
        &mut conn,
        &[
            IdRemap {
                from: "ravenholm-12345".to_string(),
                to: "joroj001".to_string(),
            },
            IdRemap {
                from: "smitj001".to_string(),
                to: "smitj002".to_string(),
            },
        ],
    )
    .unwrap();
    assert_eq!(report.remaps_applied, 2);
    assert_eq!(report.updates_issued, 4);
    assert_eq!(report.cells_rewritten, 4);
    assert_eq!(references_to(&conn, "smitj002"), 1);
}

fn remap(from: &str, to: &str) -> IdRemap {
    IdRemap {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[test]
fn unreferenced_remaps_issue_no_updates() {
    let mut conn = seeded_database();
    let remaps: Vec<IdRemap> = (0..1000)
        .map(|i| remap(&format!("ravenholm-{i}"), &format!("p{i:04}")))
        .collect();

    let report = apply_remaps(&mut conn, &remaps).unwrap();
    assert_eq!(report.remaps_applied, 0);
    assert_eq!(report.remaps_unreferenced, 1000);
    assert_eq!(report.updates_issued, 0);
    assert_eq!(report.cells_rewritten, 0);
    assert_eq!(references_to(&conn, "ravenholm-12345"), 3);
}

#[test]
fn only_columns_holding_the_id_are_updated() {
    let mut conn = seeded_database();
    let report = apply_remaps(&mut conn, &[remap("smitj001", "smitj002")]).unwrap();
    assert_eq!(report.remaps_applied, 1);
    assert_eq!(report.updates_issued, 1);
    assert_eq!(report.cells_rewritten, 1);
}

#[test]
fn swapped_ids_trade_places() {
    let mut conn = seeded_database();
    conn.execute(
        "UPDATE games SET away_start_pit_id = 'smitj001' WHERE game_id = 'TEX201204060'",
        [],
    )
    .unwrap();

    let report = apply_remaps(
        &mut conn,
        &[remap("ravenholm-12345", "smitj001"), remap("smitj001", "ravenholm-12345")],
    )
    .unwrap();
    assert_eq!(report.remaps_applied, 2);
    assert_eq!(report.cells_rewritten, 5);

    let (away, home): (String, String) = conn
        .query_row(
            "SELECT away_start_pit_id, home_start_pit_id FROM games",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(away, "ravenholm-12345");
    assert_eq!(home, "smitj001");
    let (pit, bat): (String, String) = conn
        .query_row("SELECT pit_id, bat_id FROM events", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert_eq!(pit, "smitj001");
    assert_eq!(bat, "ravenholm-12345");
}

#[test]
fn chained_remaps_use_the_values_before_the_batch() {
    let mut conn = seeded_database();
    let report = apply_remaps(
        &mut conn,
        &[remap("ravenholm-12345", "smitj001"), remap("smitj001", "smitj002")],
    )
    .unwrap();
    assert_eq!(report.remaps_applied, 2);
    assert_eq!(references_to(&conn, "smitj001"), 3);
    assert_eq!(references_to(&conn, "smitj002"), 1);
    assert_eq!(references_to(&conn, "ravenholm-12345"), 0);
}

#[test]
fn conflicting_remaps_for_one_id_are_skipped() {
    let mut conn = seeded_database();
    let report = apply_remaps(
        &mut conn,
        &[
            remap("ravenholm-12345", "joroj001"),
            remap("ravenholm-12345", "joroj002"),
            remap("ravenholm-12345", "joroj001"),
        ],
    )
    .unwrap();
    assert_eq!(report.remaps_applied, 0);
    assert_eq!(
        report.ambiguous,
        vec![remap("ravenholm-12345", "joroj001"), remap("ravenholm-12345", "joroj002")]
    );
    assert_eq!(references_to(&conn, "ravenholm-12345"), 3);
}

#[test]
fn missing_crosswalk_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut conn = seeded_database();
    let err = parse_crosswalk(&mut conn, &paths(&dir), ParseKind::People, LoadStrategy::RowGuarded)
        .unwrap_err();
    assert!(err.to_string().contains("people.csv"));
}
