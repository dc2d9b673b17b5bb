use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

use crate::config::{LightgbmParams, TrainingSettings};
use crate::features::{FeatureColumn, FeatureKind, FeatureValue, TRAINING_FEATURES};
use crate::lightgbm::Booster;
use crate::models::{EngineeredRecord, EngineeredTable, ScoredRecord};

const LABEL_COUNT: usize = 2;
const LABEL_NAMES: [&str; LABEL_COUNT] = ["out_of_top3", "top3"];
const DECISION_THRESHOLD: f64 = 0.5;

/// Integer codes for categorical features, assigned in sorted category order.
#[derive(Debug, Clone, Default)]
pub struct CategoryEncoder {
    codes: HashMap<FeatureColumn, HashMap<String, usize>>,
}

impl CategoryEncoder {
    pub fn fit(records: &[EngineeredRecord]) -> Self {
        let mut codes = HashMap::new();
        for feature in TRAINING_FEATURES {
            if feature.kind() != FeatureKind::Categorical {
                continue;
            }
            let categories: BTreeSet<&str> = records
                .iter()
                .filter_map(|record| match feature.value(record) {
                    FeatureValue::Category(value) => value,
                    FeatureValue::Number(_) => None,
                })
                .collect();
            let mapping = categories
                .into_iter()
                .enumerate()
                .map(|(code, category)| (category.to_string(), code))
                .collect();
            codes.insert(feature, mapping);
        }
        Self { codes }
    }

    pub fn code(&self, feature: FeatureColumn, category: &str) -> Option<usize> {
        self.codes.get(&feature)?.get(category).copied()
    }

    pub fn category_count(&self, feature: FeatureColumn) -> usize {
        self.codes.get(&feature).map(HashMap::len).unwrap_or(0)
    }

    /// Model input row in `TRAINING_FEATURES` order; missing values are NaN.
    pub fn feature_vector(&self, record: &EngineeredRecord) -> Vec<f64> {
        TRAINING_FEATURES
            .iter()
            .map(|&feature| match feature.value(record) {
                FeatureValue::Number(value) => value.unwrap_or(f64::NAN),
                FeatureValue::Category(Some(category)) => self
                    .code(feature, category)
                    .map(|code| code as f64)
                    .unwrap_or(f64::NAN),
                FeatureValue::Category(None) => f64::NAN,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub total_rows: usize,
    pub positives: usize,
    pub accuracy: f64,
    pub auc: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct FeatureImportance {
    pub feature: FeatureColumn,
    pub splits: usize,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model_path: PathBuf,
    pub summary: TrainingSummary,
    pub importances: Vec<FeatureImportance>,
    pub scored: Vec<ScoredRecord>,
}

#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    InsufficientData { train_rows: usize, test_rows: usize },
    Trained(TrainingReport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub row_count: usize,
    pub feature_count: usize,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub label_counts: BTreeMap<String, usize>,
}

impl DatasetSummary {
    pub fn label_line(&self) -> String {
        let parts: Vec<String> = self
            .label_counts
            .iter()
            .map(|(label, count)| format!("{}={}", label, count))
            .collect();
        format!("label_counts({})", parts.join(", "))
    }
}

/// Serialized as the `KEIBA_LIGHTGBM_TRAIN_SUMMARY=` line.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSummary {
    pub test_year: i32,
    pub hyperparameters: LightgbmParams,
    pub train_dataset: DatasetSummary,
    pub test_dataset: DatasetSummary,
    pub test_metrics: EvaluationMetrics,
}

pub struct ModelTrainer {
    settings: TrainingSettings,
}

impl ModelTrainer {
    pub fn new(settings: TrainingSettings) -> Self {
        Self { settings }
    }

    /// Fits the top-3 classifier on years before the test year and scores the test year.
    pub fn train(&self, table: &EngineeredTable) -> Result<TrainingOutcome> {
        ensure_training_features(table)?;
        self.settings.params.validate()?;

        let test_year = self.settings.test_year;
        let (train_records, test_records) = split_by_year(&table.records, test_year);
        info!(
            "Split {} engineered rows into {} training rows (< {}) and {} test rows (= {})",
            table.len(),
            train_records.len(),
            test_year,
            test_records.len(),
            test_year
        );
        if train_records.is_empty() || test_records.is_empty() {
            warn!(
                "Not enough data to split at test year {} (train={}, test={}); widen the extraction range",
                test_year,
                train_records.len(),
                test_records.len()
            );
            return Ok(TrainingOutcome::InsufficientData {
                train_rows: train_records.len(),
                test_rows: test_records.len(),
            });
        }

        let encoder = CategoryEncoder::fit(&table.records);
        let train_dataset = summarize_dataset(&train_records);
        let test_dataset = summarize_dataset(&test_records);
        info!(
            "Training rows={} {}; test rows={} {}",
            train_dataset.row_count,
            train_dataset.label_line(),
            test_dataset.row_count,
            test_dataset.label_line(),
        );

        let destination = &self.settings.model_path;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let exe_path = resolve_lightgbm_executable()?;
        info!("Using LightGBM executable at {}", exe_path.display());

        let dataset_path =
            std::env::temp_dir().join(format!("keiba_lightgbm_train_{}.csv", Uuid::new_v4()));
        info!(
            "Writing training dataset to {} ({} rows)",
            dataset_path.display(),
            train_records.len()
        );
        write_csv_dataset(&encoder, &train_records, &dataset_path)?;

        let mut args = vec![
            String::from("task=train"),
            String::from("objective=binary"),
            String::from("metric=auc"),
            String::from("header=true"),
            format!("categorical_feature={}", categorical_feature_indices()),
        ];
        args.extend(self.settings.params.to_cli_args());
        args.push(format!("data={}", dataset_path.to_string_lossy()));
        args.push(format!("output_model={}", destination.to_string_lossy()));
        args.push(String::from("verbosity=-1"));

        info!("Launching LightGBM: {}", self.settings.params.to_cli_args().join(", "));
        let status = Command::new(&exe_path)
            .args(&args)
            .status()
            .context("Failed to spawn lightgbm for training");
        let _ = fs::remove_file(&dataset_path);
        let status = status?;
        if !status.success() {
            return Err(anyhow!("lightgbm training failed with status {status}"));
        }
        info!("LightGBM training complete");

        let booster = Booster::load(destination)?;
        info!("Loaded trained model with {} trees", booster.num_trees());
        let expected_names: Vec<&str> = TRAINING_FEATURES.iter().map(|f| f.name()).collect();
        if !booster.feature_names().is_empty() && booster.feature_names() != expected_names {
            warn!(
                "Model feature names {:?} differ from the training columns {:?}",
                booster.feature_names(),
                expected_names
            );
        }
        if booster.num_features() != TRAINING_FEATURES.len() {
            return Err(anyhow!(
                "Trained model expects {} features but {} were written",
                booster.num_features(),
                TRAINING_FEATURES.len()
            ));
        }

        let scored = score_records(&booster, &encoder, test_records.iter().copied())?;
        let metrics = evaluate(&scored);
        info!(
            "Scored {} test rows (accuracy {:.4})",
            metrics.total_rows, metrics.accuracy
        );

        Ok(TrainingOutcome::Trained(TrainingReport {
            model_path: destination.clone(),
            summary: TrainingSummary {
                test_year,
                hyperparameters: self.settings.params.clone(),
                train_dataset,
                test_dataset,
                test_metrics: metrics,
            },
            importances: rank_importances(&booster),
            scored,
        }))
    }
}

pub fn ensure_training_features(table: &EngineeredTable) -> Result<()> {
    let missing: Vec<&str> = TRAINING_FEATURES
        .iter()
        .filter(|feature| !table.has_column(**feature))
        .map(|feature| feature.name())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "Engineered table is missing training features: {}",
            missing.join(", ")
        ))
    }
}

/// Records before `test_year` train the model; records in `test_year` evaluate it.
pub fn split_by_year(
    records: &[EngineeredRecord],
    test_year: i32,
) -> (Vec<&EngineeredRecord>, Vec<&EngineeredRecord>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for record in records {
        match record.year.map(|year| year.cmp(&test_year)) {
            Some(Ordering::Less) => train.push(record),
            Some(Ordering::Equal) => test.push(record),
            _ => {}
        }
    }
    (train, test)
}

pub fn score_records<'a>(
    booster: &Booster,
    encoder: &CategoryEncoder,
    records: impl IntoIterator<Item = &'a EngineeredRecord>,
) -> Result<Vec<ScoredRecord>> {
    records
        .into_iter()
        .map(|record| {
            let features = encoder.feature_vector(record);
            let probability = booster.predict_probability(&features).ok_or_else(|| {
                anyhow!(
                    "Model expects {} features but only {} are available",
                    booster.num_features(),
                    features.len()
                )
            })?;
            Ok(ScoredRecord {
                record: record.clone(),
                probability,
            })
        })
        .collect()
}

pub fn evaluate(scored: &[ScoredRecord]) -> EvaluationMetrics {
    let total_rows = scored.len();
    let positives = scored.iter().filter(|entry| entry.record.is_top3()).count();
    let correct = scored
        .iter()
        .filter(|entry| (entry.probability > DECISION_THRESHOLD) == entry.record.is_top3())
        .count();
    let accuracy = if total_rows == 0 {
        0.0
    } else {
        correct as f64 / total_rows as f64
    };
    let pairs: Vec<(f64, bool)> = scored
        .iter()
        .map(|entry| (entry.probability, entry.record.is_top3()))
        .collect();
    EvaluationMetrics {
        total_rows,
        positives,
        accuracy,
        auc: roc_auc(&pairs),
    }
}

/// Area under the ROC curve via the rank-sum statistic, averaging tied ranks.
/// `None` when only one class is present.
pub fn roc_auc(pairs: &[(f64, bool)]) -> Option<f64> {
    let positives = pairs.iter().filter(|(_, label)| *label).count();
    let negatives = pairs.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<&(f64, bool)> = pairs.iter().collect();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < sorted.len() {
        let mut end = start + 1;
        while end < sorted.len() && sorted[end].0 == sorted[start].0 {
            end += 1;
        }
        // ranks are 1-based: the tie block covers ranks start+1..=end
        let average_rank = (start + 1 + end) as f64 / 2.0;
        let block_positives = sorted[start..end].iter().filter(|(_, label)| *label).count();
        positive_rank_sum += average_rank * block_positives as f64;
        start = end;
    }

    let positives = positives as f64;
    let negatives = negatives as f64;
    let u = positive_rank_sum - positives * (positives + 1.0) / 2.0;
    Some(u / (positives * negatives))
}

pub fn rank_importances(booster: &Booster) -> Vec<FeatureImportance> {
    let counts = booster.split_importance();
    let mut importances: Vec<FeatureImportance> = TRAINING_FEATURES
        .iter()
        .enumerate()
        .map(|(idx, &feature)| FeatureImportance {
            feature,
            splits: counts.get(idx).copied().unwrap_or(0),
        })
        .collect();
    importances.sort_by(|a, b| b.splits.cmp(&a.splits));
    importances
}

fn categorical_feature_indices() -> String {
    TRAINING_FEATURES
        .iter()
        .enumerate()
        .filter(|(_, feature)| feature.kind() == FeatureKind::Categorical)
        .map(|(idx, _)| idx.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn write_csv_dataset(
    encoder: &CategoryEncoder,
    records: &[&EngineeredRecord],
    path: &Path,
) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(csv_header().as_bytes())?;
    for record in records {
        writer.write_all(csv_line(encoder, record).as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_header() -> String {
    let mut line = String::from("target");
    for feature in TRAINING_FEATURES {
        line.push(',');
        line.push_str(feature.name());
    }
    line.push('\n');
    line
}

fn csv_line(encoder: &CategoryEncoder, record: &EngineeredRecord) -> String {
    let mut line = if record.is_top3() {
        String::from("1")
    } else {
        String::from("0")
    };
    for value in encoder.feature_vector(record) {
        line.push(',');
        if value.is_nan() {
            line.push_str("nan");
        } else {
            line.push_str(&value.to_string());
        }
    }
    line.push('\n');
    line
}

fn resolve_lightgbm_executable() -> Result<PathBuf> {
    let binary = if cfg!(windows) {
        "lightgbm.exe"
    } else {
        "lightgbm"
    };
    let vendor_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("vendor")
        .join(binary);
    if vendor_path.exists() {
        return Ok(vendor_path);
    }

    if let Some(path) = find_in_path(binary) {
        return Ok(path);
    }

    Err(anyhow!(
        "{} executable not found in vendor/ or PATH; install LightGBM CLI to train models",
        binary
    ))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn class_histogram(records: &[&EngineeredRecord]) -> [usize; LABEL_COUNT] {
    let mut histogram = [0usize; LABEL_COUNT];
    for record in records {
        let idx = usize::from(record.is_top3());
        histogram[idx] += 1;
    }
    histogram
}

fn summarize_dataset(records: &[&EngineeredRecord]) -> DatasetSummary {
    let dates: Vec<_> = records.iter().filter_map(|record| record.race_date()).collect();
    let start_date = dates.iter().min().map(|date| date.to_string());
    let end_date = dates.iter().max().map(|date| date.to_string());

    let histogram = class_histogram(records);
    let label_counts = histogram
        .iter()
        .enumerate()
        .map(|(idx, count)| (LABEL_NAMES[idx].to_string(), *count))
        .collect();

    DatasetSummary {
        row_count: records.len(),
        feature_count: TRAINING_FEATURES.len(),
        start_date,
        end_date,
        label_counts,
    }
}
