//! Column layouts of the Chadwick outputs and the Retrosheet side files.
//!
//! Names match the `retro` schema script one-for-one; the loaders rely on
//! that to build their insert statements.

/// `cwgame -f 0-83` output order.
pub const GAME_FIELDS: [&str; 84] = [
    "game_id",
    "game_dt",
    "game_ct",
    "game_dy",
    "start_game_tm",
    "dh_fl",
    "daynight_park_cd",
    "away_team_id",
    "home_team_id",
    "park_id",
    "away_start_pit_id",
    "home_start_pit_id",
    "base4_ump_id",
    "base1_ump_id",
    "base2_ump_id",
    "base3_ump_id",
    "lf_ump_id",
    "rf_ump_id",
    "attend_park_ct",
    "scorer_record_id",
    "translator_record_id",
    "inputter_record_id",
    "input_record_ts",
    "edit_record_ts",
    "method_record_cd",
    "pitches_record_cd",
    "temp_park_ct",
    "wind_direction_park_cd",
    "wind_speed_park_ct",
    "field_park_cd",
    "precip_park_cd",
    "sky_park_cd",
    "minutes_game_ct",
    "inn_ct",
    "away_score_ct",
    "home_score_ct",
    "away_hits_ct",
    "home_hits_ct",
    "away_err_ct",
    "home_err_ct",
    "away_lob_ct",
    "home_lob_ct",
    "win_pit_id",
    "lose_pit_id",
    "save_pit_id",
    "gwrbi_bat_id",
    "away_lineup1_bat_id",
    "away_lineup1_fld_cd",
    "away_lineup2_bat_id",
    "away_lineup2_fld_cd",
    "away_lineup3_bat_id",
    "away_lineup3_fld_cd",
    "away_lineup4_bat_id",
    "away_lineup4_fld_cd",
    "away_lineup5_bat_id",
    "away_lineup5_fld_cd",
    "away_lineup6_bat_id",
    "away_lineup6_fld_cd",
    "away_lineup7_bat_id",
    "away_lineup7_fld_cd",
    "away_lineup8_bat_id",
    "away_lineup8_fld_cd",
    "away_lineup9_bat_id",
    "away_lineup9_fld_cd",
    "home_lineup1_bat_id",
    "home_lineup1_fld_cd",
    "home_lineup2_bat_id",
    "home_lineup2_fld_cd",
    "home_lineup3_bat_id",
    "home_lineup3_fld_cd",
    "home_lineup4_bat_id",
    "home_lineup4_fld_cd",
    "home_lineup5_bat_id",
    "home_lineup5_fld_cd",
    "home_lineup6_bat_id",
    "home_lineup6_fld_cd",
    "home_lineup7_bat_id",
    "home_lineup7_fld_cd",
    "home_lineup8_bat_id",
    "home_lineup8_fld_cd",
    "home_lineup9_bat_id",
    "home_lineup9_fld_cd",
    "away_finish_pit_id",
    "home_finish_pit_id",
];

/// `cwevent -f 0-96 -x 0-62` output order: the 97 standard fields, then the
/// 63 extended fields.
pub const EVENT_FIELDS: [&str; 160] = [
    "game_id",
    "away_team_id",
    "inn_ct",
    "bat_home_id",
    "outs_ct",
    "balls_ct",
    "strikes_ct",
    "pitch_seq_tx",
    "away_score_ct",
    "home_score_ct",
    "bat_id",
    "bat_hand_cd",
    "resp_bat_id",
    "resp_bat_hand_cd",
    "pit_id",
    "pit_hand_cd",
    "resp_pit_id",
    "resp_pit_hand_cd",
    "pos2_fld_id",
    "pos3_fld_id",
    "pos4_fld_id",
    "pos5_fld_id",
    "pos6_fld_id",
    "pos7_fld_id",
    "pos8_fld_id",
    "pos9_fld_id",
    "base1_run_id",
    "base2_run_id",
    "base3_run_id",
    "event_tx",
    "leadoff_fl",
    "ph_fl",
    "bat_fld_cd",
    "bat_lineup_id",
    "event_cd",
    "bat_event_fl",
    "ab_fl",
    "h_cd",
    "sh_fl",
    "sf_fl",
    "event_outs_ct",
    "dp_fl",
    "tp_fl",
    "rbi_ct",
    "wp_fl",
    "pb_fl",
    "fld_cd",
    "battedball_cd",
    "bunt_fl",
    "foul_fl",
    "battedball_loc_tx",
    "err_ct",
    "err1_fld_cd",
    "err1_cd",
    "err2_fld_cd",
    "err2_cd",
    "err3_fld_cd",
    "err3_cd",
    "bat_dest_id",
    "run1_dest_id",
    "run2_dest_id",
    "run3_dest_id",
    "bat_play_tx",
    "run1_play_tx",
    "run2_play_tx",
    "run3_play_tx",
    "run1_sb_fl",
    "run2_sb_fl",
    "run3_sb_fl",
    "run1_cs_fl",
    "run2_cs_fl",
    "run3_cs_fl",
    "run1_pk_fl",
    "run2_pk_fl",
    "run3_pk_fl",
    "run1_resp_pit_id",
    "run2_resp_pit_id",
    "run3_resp_pit_id",
    "game_new_fl",
    "game_end_fl",
    "pr_run1_fl",
    "pr_run2_fl",
    "pr_run3_fl",
    "removed_for_pr_run1_id",
    "removed_for_pr_run2_id",
    "removed_for_pr_run3_id",
    "removed_for_ph_bat_id",
    "removed_for_ph_bat_fld_cd",
    "po1_fld_cd",
    "po2_fld_cd",
    "po3_fld_cd",
    "ass1_fld_cd",
    "ass2_fld_cd",
    "ass3_fld_cd",
    "ass4_fld_cd",
    "ass5_fld_cd",
    "event_id",
    "home_team_id",
    "bat_team_id",
    "fld_team_id",
    "bat_last_id",
    "inn_new_fl",
    "inn_end_fl",
    "start_bat_score_ct",
    "start_fld_score_ct",
    "inn_runs_ct",
    "game_pa_ct",
    "inn_pa_ct",
    "pa_new_fl",
    "pa_trunc_fl",
    "start_bases_cd",
    "end_bases_cd",
    "bat_start_fl",
    "resp_bat_start_fl",
    "bat_on_deck_id",
    "bat_in_hold_id",
    "pit_start_fl",
    "resp_pit_start_fl",
    "run1_fld_cd",
    "run1_lineup_cd",
    "run1_origin_event_id",
    "run2_fld_cd",
    "run2_lineup_cd",
    "run2_origin_event_id",
    "run3_fld_cd",
    "run3_lineup_cd",
    "run3_origin_event_id",
    "run1_resp_cat_id",
    "run2_resp_cat_id",
    "run3_resp_cat_id",
    "pa_ball_ct",
    "pa_called_ball_ct",
    "pa_intent_ball_ct",
    "pa_pitchout_ball_ct",
    "pa_hitbatter_ball_ct",
    "pa_other_ball_ct",
    "pa_strike_ct",
    "pa_called_strike_ct",
    "pa_swingmiss_strike_ct",
    "pa_foul_strike_ct",
    "pa_inplay_strike_ct",
    "pa_other_strike_ct",
    "event_runs_ct",
    "fld_id",
    "base2_force_fl",
    "base3_force_fl",
    "base4_force_fl",
    "bat_safe_err_fl",
    "bat_fate_id",
    "run1_fate_id",
    "run2_fate_id",
    "run3_fate_id",
    "fate_runs_ct",
    "ass6_fld_cd",
    "ass7_fld_cd",
    "ass8_fld_cd",
    "ass9_fld_cd",
    "ass10_fld_cd",
    "unknown_out_exc_fl",
    "uncertain_play_exc_fl",
];

/// Position of `event_id` inside an `cwevent` row.
pub const EVENT_ID_INDEX: usize = 96;

/// Audit columns appended to every `games` / `events` row on load.
pub const AUDIT_FIELDS: [&str; 3] = ["inserted_time", "uncertainty", "source"];

/// `TEAMyyyy` rows: id, league, city, nickname.
pub const TEAM_FIELDS: [&str; 4] = ["team_id", "lg_id", "city_tx", "name_tx"];

/// `.ROS` rows with the season prepended from the file name.
pub const ROSTER_FIELDS: [&str; 8] = [
    "year",
    "player_id",
    "last_name_tx",
    "first_name_tx",
    "bat_hand_cd",
    "pit_hand_cd",
    "team_tx",
    "pos_tx",
];

/// Chadwick register `people.csv`; header names equal column names.
pub const PEOPLE_FIELDS: [&str; 17] = [
    "key_person",
    "key_uuid",
    "key_mlbam",
    "key_retro",
    "key_bbref",
    "key_bbref_minors",
    "key_fangraphs",
    "key_npb",
    "name_last",
    "name_first",
    "name_given",
    "name_suffix",
    "birth_year",
    "birth_month",
    "birth_day",
    "mlb_played_first",
    "mlb_played_last",
];

/// Player crosswalk `players.csv`; header names equal column names. The file
/// carries more columns than these, the rest are ignored.
pub const PLAYER_ID_FIELDS: [&str; 22] = [
    "mlb_id",
    "mlb_name",
    "mlb_pos",
    "mlb_team",
    "mlb_team_long",
    "bats",
    "throws",
    "birth_year",
    "bp_id",
    "bref_id",
    "bref_name",
    "cbs_id",
    "espn_id",
    "fg_id",
    "lahman_id",
    "nfbc_id",
    "retro_id",
    "retro_name",
    "debut",
    "yahoo_id",
    "ottoneu_id",
    "rotowire_id",
];

/// `hist_players.csv` (databank `People.csv`): column, source header.
pub const HIST_PLAYER_FIELDS: [(&str, &str); 14] = [
    ("player_id", "playerID"),
    ("birth_year", "birthYear"),
    ("birth_month", "birthMonth"),
    ("birth_day", "birthDay"),
    ("birth_country", "birthCountry"),
    ("name_first", "nameFirst"),
    ("name_last", "nameLast"),
    ("name_given", "nameGiven"),
    ("bats", "bats"),
    ("throws", "throws"),
    ("debut", "debut"),
    ("final_game", "finalGame"),
    ("retro_id", "retroID"),
    ("bbref_id", "bbrefID"),
];

/// `CurrentNames.csv`, positional, no header.
pub const TEAM_ID_FIELDS: [&str; 11] = [
    "franchise_id",
    "team_id",
    "lg_id",
    "div_id",
    "location_tx",
    "nickname_tx",
    "alt_nickname_tx",
    "first_dt",
    "last_dt",
    "city_tx",
    "state_tx",
];

/// Columns the loader writes into `games`, in insert order.
pub fn game_columns() -> Vec<&'static str> {
    GAME_FIELDS.iter().chain(AUDIT_FIELDS.iter()).copied().collect()
}

/// Columns the loader writes into `events`, in insert order.
pub fn event_columns() -> Vec<&'static str> {
    EVENT_FIELDS.iter().chain(AUDIT_FIELDS.iter()).copied().collect()
}
