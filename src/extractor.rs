use crate::config::{DatabaseConfig, YearRange};
use crate::database::Database;
use crate::models::RaceTable;
use log::{error, info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("database is not configured: {0}")]
    Config(String),
    #[error("failed to connect to PostgreSQL at {target}")]
    Connect {
        target: String,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("race query failed")]
    Query(#[from] tokio_postgres::Error),
}

/// Result of one extraction run. Callers must handle all three cases.
#[derive(Debug)]
pub enum ExtractOutcome {
    Rows(RaceTable),
    Empty,
    Failed(ExtractError),
}

/// Pulls joined race/result rows for a year range from the JRA-VAN mirror.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: Option<DatabaseConfig>,
}

impl Extractor {
    pub fn new(config: Option<DatabaseConfig>) -> Self {
        Self { config }
    }

    pub async fn extract(&self, range: YearRange) -> ExtractOutcome {
        info!("Extracting races for {}", range);
        match self.try_extract(range).await {
            Ok(table) if table.is_empty() => {
                warn!("No races found for {}", range);
                ExtractOutcome::Empty
            }
            Ok(table) => {
                info!(
                    "Extracted {} rows x {} columns for {}",
                    table.len(),
                    table.column_count(),
                    range
                );
                ExtractOutcome::Rows(table)
            }
            Err(err) => {
                error!("Extraction for {} failed: {}", range, describe_error(&err));
                ExtractOutcome::Failed(err)
            }
        }
    }

    async fn try_extract(&self, range: YearRange) -> Result<RaceTable, ExtractError> {
        let config = self.config.as_ref().ok_or_else(|| {
            ExtractError::Config("set DB_HOST, DB_USER and DB_NAME (DB_PORT, DB_PASS optional)".into())
        })?;
        let database = Database::connect(config).await?;
        database.fetch_race_records(range).await
    }
}

/// Flattens the source chain into one line for the log.
pub fn describe_error(err: &ExtractError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_configuration_fails_without_connecting() {
        let extractor = Extractor::new(None);
        let range = YearRange::new(2023, 2023).unwrap();

        match extractor.extract(range).await {
            ExtractOutcome::Failed(ExtractError::Config(message)) => {
                assert!(message.contains("DB_HOST"));
            }
            other => panic!("expected configuration failure, got {:?}", other),
        }
    }

    #[test]
    fn configuration_error_is_described_plainly() {
        assert_eq!(
            describe_error(&ExtractError::Config("missing".into())),
            "database is not configured: missing"
        );
    }
}
