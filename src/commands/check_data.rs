use crate::config::YearRange;
use crate::context::AppContext;
use crate::extractor::{describe_error, ExtractOutcome};
use crate::features::FeatureColumn;
use crate::models::EngineeredTable;
use crate::preprocessor::Preprocessor;
use anyhow::{anyhow, Result};
use log::{info, warn};
use statrs::statistics::{Data, OrderStatistics, Statistics};

const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

impl ColumnSummary {
    /// Summary statistics over the non-missing values; `None` when there are none.
    pub fn describe(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut data = Data::new(values.to_vec());
        Some(Self {
            count: values.len(),
            mean: values.mean(),
            std_dev: values.std_dev(),
            min: Statistics::min(values),
            q25: data.percentile(25),
            median: data.percentile(50),
            q75: data.percentile(75),
            max: Statistics::max(values),
        })
    }

    fn print(&self, name: &str) {
        println!("{} statistics:", name);
        println!("  count {:>12}", self.count);
        println!("  mean  {:>12.4}", self.mean);
        println!("  std   {:>12.4}", self.std_dev);
        println!("  min   {:>12.4}", self.min);
        println!("  25%   {:>12.4}", self.q25);
        println!("  50%   {:>12.4}", self.median);
        println!("  75%   {:>12.4}", self.q75);
        println!("  max   {:>12.4}", self.max);
    }
}

pub async fn run(app: &AppContext, range: YearRange) -> Result<()> {
    info!("Checking engineered data for {}", range);
    let table = match app.extractor().extract(range).await {
        ExtractOutcome::Rows(table) => table,
        ExtractOutcome::Empty => {
            println!("No races found for {}", range);
            return Ok(());
        }
        ExtractOutcome::Failed(err) => {
            return Err(anyhow!("Extraction failed: {}", describe_error(&err)));
        }
    };

    let engineered = Preprocessor::new().process(&table);
    println!("Sample rows:");
    for line in sample_lines(&engineered, SAMPLE_ROWS) {
        println!("  {}", line);
    }

    if !engineered.has_column(FeatureColumn::WinOdds) {
        warn!("tansho_odds is not present in the engineered table");
        return Ok(());
    }
    let odds: Vec<f64> = engineered
        .records
        .iter()
        .filter_map(|record| record.win_odds)
        .collect();
    match ColumnSummary::describe(&odds) {
        Some(summary) => summary.print(FeatureColumn::WinOdds.name()),
        None => println!("No odds values to describe"),
    }
    Ok(())
}

fn sample_lines(table: &EngineeredTable, limit: usize) -> Vec<String> {
    let columns: Vec<FeatureColumn> = [
        FeatureColumn::Year,
        FeatureColumn::FinishPosition,
        FeatureColumn::WinOdds,
    ]
    .into_iter()
    .filter(|column| table.has_column(*column))
    .collect();

    let mut lines = vec![columns
        .iter()
        .map(|column| column.name())
        .collect::<Vec<_>>()
        .join("\t")];
    for record in table.records.iter().take(limit) {
        lines.push(
            columns
                .iter()
                .map(|column| column.value(record).display())
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    lines
}
