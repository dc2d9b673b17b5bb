use crate::config::{DatabaseConfig, YearRange};
use crate::extractor::ExtractError;
use crate::models::{RaceColumn, RaceRecord, RaceTable};
use anyhow::{anyhow, Context, Result};
use futures::{pin_mut, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, warn};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_postgres::{Client, NoTls, Row};

const RACE_TABLE: &str = "jvd_ra";
const RESULT_TABLE: &str = "jvd_se";
const JOIN_KEYS: [&str; 5] = [
    "kaisai_nen",
    "keibajo_code",
    "kaisai_kai",
    "kaisai_nichime",
    "race_bango",
];
const SPINNER_TICK: Duration = Duration::from_millis(120);
const ROWS_PER_SPINNER_UPDATE: u64 = 5_000;

pub struct Database {
    client: Client,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, ExtractError> {
        let (client, connection) = config
            .to_pg_config()
            .connect(NoTls)
            .await
            .map_err(|source| ExtractError::Connect {
                target: config.describe(),
                source,
            })?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    /// Streams the race/result join for `range` into memory.
    pub async fn fetch_race_records(&self, range: YearRange) -> Result<RaceTable, ExtractError> {
        let sql = race_query();
        debug!("Race query: {}", sql);
        let params = vec![range.start.to_string(), range.end.to_string()];
        let stream = self.client.query_raw(sql.as_str(), params).await?;
        pin_mut!(stream);

        let spinner = extraction_spinner(range);
        let mut columns: Option<Vec<Option<RaceColumn>>> = None;
        let mut records = Vec::new();
        while let Some(row) = stream.try_next().await? {
            let mapping = columns.get_or_insert_with(|| column_mapping(&row));
            records.push(race_record_from_row(&row, mapping)?);
            if records.len() as u64 % ROWS_PER_SPINNER_UPDATE == 0 {
                spinner.set_message(format!("{} rows", records.len()));
            }
        }
        spinner.finish_and_clear();

        // Without rows the column set still comes from the query itself.
        let present: BTreeSet<RaceColumn> = match columns {
            Some(mapping) => mapping.into_iter().flatten().collect(),
            None => RaceColumn::ALL.iter().copied().collect(),
        };
        Ok(RaceTable::new(present, records))
    }

    /// Column names of `table`, read from an empty result set.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        validate_identifier(table)?;
        let statement = self
            .client
            .prepare(&format!("SELECT * FROM {} LIMIT 0", table))
            .await
            .with_context(|| format!("Failed to describe table {}", table))?;
        Ok(statement
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect())
    }
}

fn column_source(column: RaceColumn) -> &'static str {
    match column {
        RaceColumn::Year
        | RaceColumn::MonthDay
        | RaceColumn::VenueCode
        | RaceColumn::Meeting
        | RaceColumn::Day
        | RaceColumn::RaceNumber
        | RaceColumn::Distance
        | RaceColumn::TrackCode
        | RaceColumn::WeatherCode
        | RaceColumn::TurfGoingCode
        | RaceColumn::DirtGoingCode => "ra",
        RaceColumn::HorseNumber
        | RaceColumn::HorseId
        | RaceColumn::HorseName
        | RaceColumn::SexCode
        | RaceColumn::WeightCarried
        | RaceColumn::JockeyCode
        | RaceColumn::TrainerCode
        | RaceColumn::BodyWeight
        | RaceColumn::BodyWeightDelta
        | RaceColumn::WinOdds
        | RaceColumn::Popularity
        | RaceColumn::FinishPosition => "se",
    }
}

fn finish_position_expr() -> String {
    let raw = "trim(se.kakutei_chakujun::text)";
    format!(
        "(CASE WHEN {raw} ~ '^[0-9]+$' THEN {raw}::integer ELSE 0 END)",
        raw = raw
    )
}

pub fn race_query() -> String {
    let select = RaceColumn::ALL
        .iter()
        .map(|column| {
            format!(
                "{}.{name}::text AS {name}",
                column_source(*column),
                name = column.db_name()
            )
        })
        .collect::<Vec<_>>()
        .join(",\n       ");
    let join = JOIN_KEYS
        .iter()
        .map(|key| format!("ra.{key} = se.{key}", key = key))
        .collect::<Vec<_>>()
        .join(" AND ");
    let finish = finish_position_expr();

    format!(
        "SELECT {select}
FROM {race_table} AS ra
INNER JOIN {result_table} AS se ON {join}
WHERE ra.kaisai_nen::text BETWEEN $1 AND $2
  AND {finish} > 0
ORDER BY ra.kaisai_nen, ra.kaisai_tsukihi, ra.race_bango, {finish}",
        select = select,
        race_table = RACE_TABLE,
        result_table = RESULT_TABLE,
        join = join,
        finish = finish,
    )
}

fn column_mapping(row: &Row) -> Vec<Option<RaceColumn>> {
    row.columns()
        .iter()
        .map(|column| {
            let mapped = RaceColumn::from_db_name(column.name());
            if mapped.is_none() {
                warn!("Ignoring unexpected column {}", column.name());
            }
            mapped
        })
        .collect()
}

fn race_record_from_row(
    row: &Row,
    mapping: &[Option<RaceColumn>],
) -> Result<RaceRecord, ExtractError> {
    let mut record = RaceRecord::default();
    for (idx, column) in mapping.iter().enumerate() {
        if let Some(column) = column {
            let value: Option<String> = row.try_get(idx)?;
            record.set(*column, value);
        }
    }
    Ok(record)
}

fn extraction_spinner(range: YearRange) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    match ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {prefix} {msg}")
    {
        Ok(style) => spinner.set_style(style),
        Err(err) => debug!("Falling back to default spinner style: {}", err),
    }
    spinner.set_prefix(format!("Extracting {}", range));
    spinner.enable_steady_tick(SPINNER_TICK);
    spinner
}

pub fn validate_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .map(|ch| ch.is_ascii_lowercase() || ch == '_')
            .unwrap_or(false)
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(anyhow!(
            "Invalid table name \"{}\"; expected lowercase letters, digits and underscores",
            name
        ))
    }
}
