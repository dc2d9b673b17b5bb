use crate::config::{TrainingSettings, YearRange};
use crate::context::AppContext;
use crate::extractor::{describe_error, ExtractOutcome};
use crate::preprocessor::Preprocessor;
use crate::simulator::Simulator;
use crate::trainer::{ModelTrainer, TrainingOutcome, TrainingReport};
use anyhow::{anyhow, Result};
use log::{info, warn};

const IMPORTANCE_DISPLAY_COUNT: usize = 5;

/// Extract, engineer, train and backtest in one run.
pub async fn run(app: &AppContext, range: YearRange, settings: TrainingSettings) -> Result<()> {
    if !range.contains(settings.test_year) {
        warn!(
            "Test year {} lies outside the extraction range {}; the test split will be empty",
            settings.test_year, range
        );
    }

    let table = match app.extractor().extract(range).await {
        ExtractOutcome::Rows(table) => table,
        ExtractOutcome::Empty => {
            warn!("Nothing to train on for {}", range);
            return Ok(());
        }
        ExtractOutcome::Failed(err) => {
            return Err(anyhow!("Extraction failed: {}", describe_error(&err)));
        }
    };

    let engineered = Preprocessor::new().process(&table);
    info!(
        "Engineered {} rows with {} columns",
        engineered.len(),
        engineered.columns.len()
    );

    let trainer = ModelTrainer::new(settings);
    let report = match trainer.train(&engineered)? {
        TrainingOutcome::Trained(report) => report,
        TrainingOutcome::InsufficientData {
            train_rows,
            test_rows,
        } => {
            println!(
                "Not enough data to train (train rows={}, test rows={}); widen the year range",
                train_rows, test_rows
            );
            return Ok(());
        }
    };

    print_training_report(&report);

    let simulation = Simulator::new().simulate_win_bets(&report.scored);
    simulation.print();
    Ok(())
}

fn print_training_report(report: &TrainingReport) {
    let summary = &report.summary;
    let metrics = &summary.test_metrics;
    println!(
        "Training rows={} {}; test rows={} {}",
        summary.train_dataset.row_count,
        summary.train_dataset.label_line(),
        summary.test_dataset.row_count,
        summary.test_dataset.label_line(),
    );
    println!("Saved LightGBM model to {}", report.model_path.display());
    println!(
        "Evaluation on {} ({} rows)",
        summary.test_year, metrics.total_rows
    );
    println!("  Accuracy: {:.2}%", metrics.accuracy * 100.0);
    match metrics.auc {
        Some(auc) => println!("  AUC: {:.4}", auc),
        None => println!("  AUC: n/a (single class in test year)"),
    }
    println!("Top features by split count:");
    for importance in report.importances.iter().take(IMPORTANCE_DISPLAY_COUNT) {
        println!("  {:<22} {}", importance.feature.name(), importance.splits);
    }
    match serde_json::to_string(summary) {
        Ok(payload) => println!("KEIBA_LIGHTGBM_TRAIN_SUMMARY={payload}"),
        Err(err) => warn!("Failed to serialize LightGBM training summary: {err}"),
    }
}
