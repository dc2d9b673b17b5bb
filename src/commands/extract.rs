use crate::config::YearRange;
use crate::context::AppContext;
use crate::extractor::{describe_error, ExtractOutcome};
use crate::models::{RaceColumn, RaceTable};
use anyhow::{anyhow, Result};
use log::info;

const PREVIEW_ROWS: usize = 5;
const PREVIEW_COLUMNS: [RaceColumn; 8] = [
    RaceColumn::Year,
    RaceColumn::MonthDay,
    RaceColumn::VenueCode,
    RaceColumn::RaceNumber,
    RaceColumn::HorseNumber,
    RaceColumn::HorseName,
    RaceColumn::WinOdds,
    RaceColumn::FinishPosition,
];

pub async fn run(app: &AppContext, range: YearRange) -> Result<()> {
    info!("Starting extraction preview for {}", range);
    match app.extractor().extract(range).await {
        ExtractOutcome::Rows(table) => {
            println!("Sample rows:");
            for line in preview_lines(&table, PREVIEW_ROWS) {
                println!("  {}", line);
            }
            println!("Data shape: ({}, {})", table.len(), table.column_count());
            Ok(())
        }
        ExtractOutcome::Empty => {
            println!("No races found for {}", range);
            Ok(())
        }
        ExtractOutcome::Failed(err) => Err(anyhow!("Extraction failed: {}", describe_error(&err))),
    }
}

pub(crate) fn preview_lines(table: &RaceTable, limit: usize) -> Vec<String> {
    let columns: Vec<RaceColumn> = PREVIEW_COLUMNS
        .iter()
        .copied()
        .filter(|column| table.has_column(*column))
        .collect();
    let mut lines = Vec::with_capacity(limit + 1);
    lines.push(
        columns
            .iter()
            .map(|column| column.db_name())
            .collect::<Vec<_>>()
            .join("\t"),
    );
    for record in table.records().iter().take(limit) {
        lines.push(
            columns
                .iter()
                .map(|column| record.get(*column).unwrap_or("None"))
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    lines
}
