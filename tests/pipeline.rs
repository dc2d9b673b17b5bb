use keiba_engine::features::{FeatureColumn, TRAINING_FEATURES};
use keiba_engine::lightgbm::Booster;
use keiba_engine::models::{DistanceChange, EngineeredRecord, RaceRecord, RaceTable};
use keiba_engine::preprocessor::Preprocessor;
use keiba_engine::simulator::{Simulator, THRESHOLDS};
use keiba_engine::trainer::{
    ensure_training_features, evaluate, rank_importances, score_records, split_by_year,
    CategoryEncoder,
};
use std::sync::Once;

const TEST_YEAR: i32 = 2025;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Single tree splitting on course_top3_count: horses with a prior top-3 at the
/// venue score sigmoid(2), everyone else sigmoid(-1).
fn course_form_model_text() -> String {
    let feature_names: Vec<&str> = TRAINING_FEATURES.iter().map(|f| f.name()).collect();
    let top3_idx = TRAINING_FEATURES
        .iter()
        .position(|feature| *feature == FeatureColumn::CourseTop3Count)
        .expect("course_top3_count is a training feature");
    format!(
        "tree\nversion=v4\nnum_class=1\nnum_tree_per_iteration=1\nlabel_index=0\nmax_feature_idx={}\nobjective=binary sigmoid:1\nfeature_names={}\n\nTree=0\nnum_leaves=2\nnum_cat=0\nsplit_feature={}\nsplit_gain=1\nthreshold=0.5\ndecision_type=2\nleft_child=-1\nright_child=-2\nleaf_value=-1 2\nshrinkage=1\n\n\nend of trees\n",
        TRAINING_FEATURES.len() - 1,
        feature_names.join(" "),
        top3_idx
    )
}

#[allow(clippy::too_many_arguments)]
fn result_row(
    year: &str,
    month_day: &str,
    venue: &str,
    race_number: &str,
    horse: &str,
    distance: &str,
    odds: &str,
    finish: &str,
) -> RaceRecord {
    RaceRecord {
        year: Some(year.to_string()),
        month_day: Some(month_day.to_string()),
        venue_code: Some(venue.to_string()),
        meeting: Some("1".to_string()),
        day: Some("2".to_string()),
        race_number: Some(race_number.to_string()),
        distance: Some(distance.to_string()),
        track_code: Some("11".to_string()),
        weather_code: Some("1".to_string()),
        turf_going_code: Some("1".to_string()),
        dirt_going_code: Some("0".to_string()),
        horse_number: Some("01".to_string()),
        horse_id: Some(horse.to_string()),
        horse_name: Some(format!("Horse {}", horse)),
        sex_code: Some("1".to_string()),
        weight_carried: Some("560".to_string()),
        jockey_code: Some("01088".to_string()),
        trainer_code: Some("01001".to_string()),
        body_weight: Some("470".to_string()),
        body_weight_delta: Some("0".to_string()),
        win_odds: Some(odds.to_string()),
        popularity: Some("1".to_string()),
        finish_position: Some(finish.to_string()),
    }
}

fn two_season_table() -> RaceTable {
    RaceTable::with_all_columns(vec![
        result_row("2024", "0601", "05", "11", "A", "1600", "35", "1"),
        result_row("2024", "0601", "05", "11", "B", "1600", "120", "5"),
        result_row("2025", "0105", "05", "11", "A", "1800", "50", "1"),
        result_row("2025", "0105", "05", "11", "B", "1800", "30", "2"),
        result_row("2025", "0105", "06", "3", "C", "1200", "80", "1"),
        // scratched runner, never reaches the model
        result_row("2025", "0105", "06", "3", "D", "1200", "15", "0"),
    ])
}

fn find<'a>(records: &'a [EngineeredRecord], horse: &str, year: i32) -> &'a EngineeredRecord {
    records
        .iter()
        .find(|record| record.horse_id.as_deref() == Some(horse) && record.year == Some(year))
        .expect("engineered record present")
}

#[test]
fn engineered_table_is_ready_for_training() {
    ensure_test_env();
    let engineered = Preprocessor::new().process(&two_season_table());

    ensure_training_features(&engineered).expect("all training features derivable");
    assert_eq!(engineered.len(), 5);

    let repeat = find(&engineered.records, "A", TEST_YEAR);
    assert_eq!(repeat.course_top3_count, 1);
    assert_eq!(repeat.distance_change, DistanceChange::Extension);
    assert_eq!(repeat.distance_delta, 200.0);

    let debut = find(&engineered.records, "C", TEST_YEAR);
    assert_eq!(debut.course_top3_count, 0);
    assert_eq!(debut.distance_change, DistanceChange::Same);
}

#[test]
fn fake_model_scores_test_year_and_drives_the_backtest() {
    ensure_test_env();
    let engineered = Preprocessor::new().process(&two_season_table());
    let booster = Booster::from_model_text(&course_form_model_text()).expect("parse fake model");
    assert_eq!(booster.num_features(), TRAINING_FEATURES.len());

    let encoder = CategoryEncoder::fit(&engineered.records);
    let (train, test) = split_by_year(&engineered.records, TEST_YEAR);
    assert_eq!(train.len(), 2);
    assert_eq!(test.len(), 3);

    let scored = score_records(&booster, &encoder, test.iter().copied()).expect("score");
    assert_eq!(scored.len(), test.len());
    for entry in &scored {
        let expected = if entry.record.horse_id.as_deref() == Some("A") {
            1.0 / (1.0 + (-2.0f64).exp())
        } else {
            1.0 / (1.0 + 1.0f64.exp())
        };
        assert!(
            (entry.probability - expected).abs() < 1e-12,
            "{:?} scored {}",
            entry.record.horse_id,
            entry.probability
        );
    }

    let metrics = evaluate(&scored);
    assert_eq!(metrics.total_rows, 3);
    assert_eq!(metrics.positives, 3);
    assert!((metrics.accuracy - 1.0 / 3.0).abs() < 1e-12);
    assert!(metrics.auc.is_none());

    let importances = rank_importances(&booster);
    assert_eq!(importances[0].feature, FeatureColumn::CourseTop3Count);
    assert_eq!(importances[0].splits, 1);

    let report = Simulator::new().simulate_win_bets(&scored);
    assert_eq!(report.eligible_records, 3);
    assert_eq!(report.rows.len(), THRESHOLDS.len());
    for row in &report.rows {
        assert_eq!(row.bets, 1);
        assert_eq!(row.hits, 1);
        assert!((row.payout - 500.0).abs() < 1e-9);
        assert!((row.recovery_rate - 500.0).abs() < 1e-9);
    }
    let best = report.best.as_ref().expect("best threshold");
    assert_eq!(best.threshold, THRESHOLDS[0]);
    assert!(report.is_profitable());
}
