use crate::features::present_columns;
use crate::models::{
    CourseDirection, DistanceChange, EngineeredRecord, EngineeredTable, RaceColumn, RaceRecord,
    RaceTable,
};
use log::{debug, info};
use std::cmp::Ordering;
use std::collections::HashMap;

const TOP3_FINISH: u32 = 3;

/// Turns extracted race rows into the model-ready engineered table.
#[derive(Debug, Default, Clone, Copy)]
pub struct Preprocessor;

struct CoercedRow<'a> {
    source: &'a RaceRecord,
    horse_id: Option<&'a str>,
    venue_code: Option<&'a str>,
    month_day: Option<&'a str>,
    year: Option<f64>,
    meeting: Option<f64>,
    day: Option<f64>,
    race_number: Option<f64>,
    distance: Option<f64>,
    weight_carried: Option<f64>,
    body_weight: Option<f64>,
    body_weight_delta: Option<f64>,
    win_odds: Option<f64>,
    finish_position: u32,
}

#[derive(Default)]
struct RaceAggregate {
    body_weight_sum: f64,
    weight_carried_sum: f64,
    count: usize,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    pub fn process(&self, table: &RaceTable) -> EngineeredTable {
        info!(
            "Starting feature engineering on {} extracted rows",
            table.len()
        );

        let fill_weight_carried = table.has_column(RaceColumn::WeightCarried);
        let fill_body_weight = table.has_column(RaceColumn::BodyWeight);
        let fill_body_weight_delta = table.has_column(RaceColumn::BodyWeightDelta);
        let fill_win_odds = table.has_column(RaceColumn::WinOdds);

        let mut rows: Vec<CoercedRow<'_>> = Vec::with_capacity(table.len());
        let mut dropped = 0usize;
        for record in table.records() {
            let Some(finish_position) = coerce_position(record.get(RaceColumn::FinishPosition))
            else {
                dropped += 1;
                continue;
            };
            rows.push(CoercedRow {
                source: record,
                horse_id: text_value(record.get(RaceColumn::HorseId)),
                venue_code: text_value(record.get(RaceColumn::VenueCode)),
                month_day: text_value(record.get(RaceColumn::MonthDay)),
                year: coerce_numeric(record.get(RaceColumn::Year)),
                meeting: coerce_numeric(record.get(RaceColumn::Meeting)),
                day: coerce_numeric(record.get(RaceColumn::Day)),
                race_number: coerce_numeric(record.get(RaceColumn::RaceNumber)),
                distance: coerce_numeric(record.get(RaceColumn::Distance)),
                weight_carried: fill_zero(
                    coerce_numeric(record.get(RaceColumn::WeightCarried)),
                    fill_weight_carried,
                ),
                body_weight: fill_zero(
                    coerce_numeric(record.get(RaceColumn::BodyWeight)),
                    fill_body_weight,
                ),
                body_weight_delta: fill_zero(
                    coerce_numeric(record.get(RaceColumn::BodyWeightDelta)),
                    fill_body_weight_delta,
                ),
                win_odds: fill_zero(
                    coerce_numeric(record.get(RaceColumn::WinOdds)),
                    fill_win_odds,
                ),
                finish_position,
            });
        }
        if dropped > 0 {
            debug!("Dropped {} rows without a usable finish position", dropped);
        }

        // Previous-race features are only correct in (horse, year, month-day) order.
        rows.sort_by(compare_chronologically);

        let mut race_ids = Vec::with_capacity(rows.len());
        let mut aggregates: HashMap<String, RaceAggregate> = HashMap::new();
        for row in &rows {
            let race_id = synthetic_race_id(row);
            let aggregate = aggregates.entry(race_id.clone()).or_default();
            aggregate.body_weight_sum += row.body_weight.unwrap_or(0.0);
            aggregate.weight_carried_sum += row.weight_carried.unwrap_or(0.0);
            aggregate.count += 1;
            race_ids.push(race_id);
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut previous: Option<(&str, Option<f64>)> = None;
        let mut top3_by_course: HashMap<(&str, &str), u32> = HashMap::new();

        for (row, race_id) in rows.iter().zip(race_ids) {
            let previous_distance = match (row.horse_id, previous) {
                (Some(horse), Some((previous_horse, distance))) if horse == previous_horse => {
                    distance
                }
                _ => None,
            };
            previous = row.horse_id.map(|horse| (horse, row.distance));

            let distance_delta = match (row.distance, previous_distance) {
                (Some(current), Some(prior)) => Some(current - prior),
                _ => None,
            };

            let course_top3_count = match (row.horse_id, row.venue_code) {
                (Some(horse), Some(venue)) => {
                    let slot = top3_by_course.entry((horse, venue)).or_insert(0);
                    let prior = *slot;
                    if row.finish_position <= TOP3_FINISH {
                        *slot += 1;
                    }
                    prior
                }
                _ => 0,
            };

            let (body_weight_deviation, weight_carried_deviation) =
                match aggregates.get(&race_id) {
                    Some(aggregate) if aggregate.count > 0 => {
                        let count = aggregate.count as f64;
                        (
                            row.body_weight
                                .map(|value| value - aggregate.body_weight_sum / count),
                            row.weight_carried
                                .map(|value| value - aggregate.weight_carried_sum / count),
                        )
                    }
                    _ => (None, None),
                };

            let jockey_code = text_value(row.source.get(RaceColumn::JockeyCode));
            let jockey_venue = match (jockey_code, row.venue_code) {
                (Some(jockey), Some(venue)) => Some(format!("{}_{}", jockey, venue)),
                _ => None,
            };

            records.push(EngineeredRecord {
                race_id,
                horse_id: row.horse_id.map(str::to_string),
                year: row.year.and_then(integral_i32),
                month_day: row.month_day.map(str::to_string),
                venue_code: row.venue_code.map(str::to_string),
                distance: row.distance,
                track_code: owned_text(row.source.get(RaceColumn::TrackCode)),
                weather_code: owned_text(row.source.get(RaceColumn::WeatherCode)),
                turf_going_code: owned_text(row.source.get(RaceColumn::TurfGoingCode)),
                dirt_going_code: owned_text(row.source.get(RaceColumn::DirtGoingCode)),
                sex_code: owned_text(row.source.get(RaceColumn::SexCode)),
                weight_carried: row.weight_carried,
                body_weight: row.body_weight,
                body_weight_delta: row.body_weight_delta,
                jockey_code: jockey_code.map(str::to_string),
                body_weight_deviation,
                weight_carried_deviation,
                jockey_venue,
                distance_change: DistanceChange::from_delta(distance_delta),
                distance_delta: distance_delta.unwrap_or(0.0),
                course_direction: row
                    .venue_code
                    .map(CourseDirection::from_venue_code)
                    .unwrap_or(CourseDirection::Unknown),
                course_top3_count,
                win_odds: row.win_odds,
                finish_position: row.finish_position,
            });
        }

        let columns = present_columns(table);
        info!(
            "Feature engineering complete: {} rows, {} projected columns",
            records.len(),
            columns.len()
        );
        info!("Added distance change, course direction and course top-3 features");

        EngineeredTable { columns, records }
    }
}

/// Parses a numeric column value; anything unparseable becomes missing.
pub fn coerce_numeric(raw: Option<&str>) -> Option<f64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn coerce_position(raw: Option<&str>) -> Option<u32> {
    let value = coerce_numeric(raw)?;
    if value <= 0.0 || value.fract() != 0.0 || value > f64::from(u32::MAX) {
        return None;
    }
    Some(value as u32)
}

fn fill_zero(value: Option<f64>, column_present: bool) -> Option<f64> {
    if column_present {
        Some(value.unwrap_or(0.0))
    } else {
        None
    }
}

fn text_value(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

fn owned_text(raw: Option<&str>) -> Option<String> {
    text_value(raw).map(str::to_string)
}

fn integral_i32(value: f64) -> Option<i32> {
    if value.fract() == 0.0 && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX) {
        Some(value as i32)
    } else {
        None
    }
}

fn id_part(value: Option<f64>) -> String {
    match value {
        Some(number) if number.fract() == 0.0 => format!("{}", number as i64),
        Some(number) => format!("{}", number),
        None => "nan".to_string(),
    }
}

fn synthetic_race_id(row: &CoercedRow<'_>) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        id_part(row.year),
        row.venue_code.unwrap_or("nan"),
        id_part(row.meeting),
        id_part(row.day),
        id_part(row.race_number)
    )
}

fn compare_chronologically(a: &CoercedRow<'_>, b: &CoercedRow<'_>) -> Ordering {
    cmp_missing_last(a.horse_id, b.horse_id, |x, y| x.cmp(y))
        .then_with(|| {
            cmp_missing_last(a.year, b.year, |x, y| {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            })
        })
        .then_with(|| cmp_missing_last(a.month_day, b.month_day, |x, y| x.cmp(y)))
}

fn cmp_missing_last<T, F>(a: Option<T>, b: Option<T>, cmp: F) -> Ordering
where
    F: FnOnce(T, T) -> Ordering,
{
    match (a, b) {
        (Some(x), Some(y)) => cmp(x, y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureColumn;
    use std::collections::BTreeSet;

    fn entry(
        horse: &str,
        year: &str,
        month_day: &str,
        venue: &str,
        race_number: &str,
        distance: &str,
        finish: &str,
    ) -> RaceRecord {
        RaceRecord {
            year: Some(year.to_string()),
            month_day: Some(month_day.to_string()),
            venue_code: Some(venue.to_string()),
            meeting: Some("01".to_string()),
            day: Some("02".to_string()),
            race_number: Some(race_number.to_string()),
            distance: Some(distance.to_string()),
            track_code: Some("10".to_string()),
            weather_code: Some("1".to_string()),
            turf_going_code: Some("1".to_string()),
            dirt_going_code: Some("0".to_string()),
            horse_id: Some(horse.to_string()),
            sex_code: Some("1".to_string()),
            weight_carried: Some("550".to_string()),
            jockey_code: Some("01126".to_string()),
            body_weight: Some("480".to_string()),
            body_weight_delta: Some("+004".to_string()),
            win_odds: Some("0052".to_string()),
            finish_position: Some(finish.to_string()),
            ..RaceRecord::default()
        }
    }

    fn sample_table() -> RaceTable {
        let mut second_race_other_horse = entry("B", "2023", "0312", "05", "11", "2000", "2");
        second_race_other_horse.body_weight = Some("500".to_string());
        RaceTable::with_all_columns(vec![
            entry("A", "2023", "0312", "05", "11", "2000", "1"),
            entry("A", "2023", "0105", "05", "09", "1800", "3"),
            entry("A", "2023", "0520", "05", "10", "1600", "5"),
            entry("A", "2023", "0204", "06", "08", "1600", "2"),
            second_race_other_horse,
            entry("B", "2022", "1225", "05", "11", "2400", "8"),
        ])
    }

    fn find<'a>(
        table: &'a EngineeredTable,
        horse: &str,
        month_day: &str,
        year: i32,
    ) -> &'a EngineeredRecord {
        table
            .records
            .iter()
            .find(|record| {
                record.horse_id.as_deref() == Some(horse)
                    && record.month_day.as_deref() == Some(month_day)
                    && record.year == Some(year)
            })
            .expect("record present")
    }

    #[test]
    fn output_is_sorted_by_horse_then_date() {
        let table = Preprocessor::new().process(&sample_table());
        let keys: Vec<(String, i32, String)> = table
            .records
            .iter()
            .map(|record| {
                (
                    record.horse_id.clone().unwrap_or_default(),
                    record.year.unwrap_or_default(),
                    record.month_day.clone().unwrap_or_default(),
                )
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn first_race_has_zero_delta_and_same_category() {
        let table = Preprocessor::new().process(&sample_table());
        let first_a = find(&table, "A", "0105", 2023);
        assert_eq!(first_a.distance_delta, 0.0);
        assert_eq!(first_a.distance_change, DistanceChange::Same);

        let first_b = find(&table, "B", "1225", 2022);
        assert_eq!(first_b.distance_delta, 0.0);
        assert_eq!(first_b.distance_change, DistanceChange::Same);
    }

    #[test]
    fn distance_delta_uses_previous_race_of_the_same_horse() {
        let table = Preprocessor::new().process(&sample_table());
        let a_feb = find(&table, "A", "0204", 2023);
        assert_eq!(a_feb.distance_delta, -200.0);
        assert_eq!(a_feb.distance_change, DistanceChange::Shortening);

        let a_mar = find(&table, "A", "0312", 2023);
        assert_eq!(a_mar.distance_delta, 400.0);
        assert_eq!(a_mar.distance_change, DistanceChange::Extension);

        let b_mar = find(&table, "B", "0312", 2023);
        assert_eq!(b_mar.distance_delta, -400.0);
    }

    #[test]
    fn course_top3_count_excludes_current_race() {
        let table = Preprocessor::new().process(&sample_table());
        // Venue 05 history for A: 0105 (3rd), 0312 (1st), 0520.
        assert_eq!(find(&table, "A", "0105", 2023).course_top3_count, 0);
        assert_eq!(find(&table, "A", "0312", 2023).course_top3_count, 1);
        assert_eq!(find(&table, "A", "0520", 2023).course_top3_count, 2);
        // First visit to venue 06.
        assert_eq!(find(&table, "A", "0204", 2023).course_top3_count, 0);
        // B finished 8th at 05 before, so nothing counts.
        assert_eq!(find(&table, "B", "0312", 2023).course_top3_count, 0);
    }

    #[test]
    fn deviations_are_centered_within_each_race() {
        let table = Preprocessor::new().process(&sample_table());
        let mut sums: HashMap<&str, f64> = HashMap::new();
        for record in &table.records {
            *sums.entry(record.race_id.as_str()).or_default() +=
                record.body_weight_deviation.unwrap_or_default();
        }
        for (race_id, sum) in sums {
            assert!(sum.abs() < 1e-9, "race {} deviation sum {}", race_id, sum);
        }

        let a_mar = find(&table, "A", "0312", 2023);
        assert_eq!(a_mar.race_id, "2023_05_1_2_11");
        assert_eq!(a_mar.body_weight_deviation, Some(-10.0));
        assert_eq!(a_mar.weight_carried_deviation, Some(0.0));
    }

    #[test]
    fn coercion_turns_garbage_into_missing_and_fills_zero() {
        let mut record = entry("C", "2023", "0601", "01", "01", "1200", "4");
        record.body_weight = Some("***".to_string());
        record.win_odds = None;
        record.body_weight_delta = Some("   ".to_string());
        let table = Preprocessor::new().process(&RaceTable::with_all_columns(vec![record]));

        let only = &table.records[0];
        assert_eq!(only.body_weight, Some(0.0));
        assert_eq!(only.win_odds, Some(0.0));
        assert_eq!(only.body_weight_delta, Some(0.0));
        assert_eq!(only.course_direction, CourseDirection::Right);
        assert_eq!(only.jockey_venue.as_deref(), Some("01126_01"));
    }

    #[test]
    fn rows_without_finish_position_are_dropped() {
        let mut scratched = entry("D", "2023", "0601", "01", "01", "1200", "1");
        scratched.finish_position = Some("  ".to_string());
        let mut cancelled = entry("E", "2023", "0601", "01", "01", "1200", "1");
        cancelled.finish_position = Some("00".to_string());
        let kept = entry("F", "2023", "0601", "01", "01", "1200", "01");

        let table = Preprocessor::new().process(&RaceTable::with_all_columns(vec![
            scratched, cancelled, kept,
        ]));
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].finish_position, 1);
    }

    #[test]
    fn absent_columns_are_omitted_from_projection() {
        let columns: BTreeSet<RaceColumn> = RaceColumn::ALL
            .iter()
            .copied()
            .filter(|column| {
                !matches!(column, RaceColumn::BodyWeight | RaceColumn::JockeyCode)
            })
            .collect();
        let mut record = entry("G", "2023", "0601", "01", "01", "1200", "2");
        record.body_weight = None;
        record.jockey_code = None;
        let table = Preprocessor::new().process(&RaceTable::new(columns, vec![record]));

        assert!(!table.has_column(FeatureColumn::BodyWeight));
        assert!(!table.has_column(FeatureColumn::BodyWeightDeviation));
        assert!(!table.has_column(FeatureColumn::JockeyVenue));
        assert!(table.has_column(FeatureColumn::WeightCarried));
        assert_eq!(table.records[0].body_weight, None);
        assert_eq!(table.records[0].body_weight_deviation, None);
    }

    #[test]
    fn processing_is_idempotent() {
        let raw = sample_table();
        let preprocessor = Preprocessor::new();
        assert_eq!(preprocessor.process(&raw), preprocessor.process(&raw));
    }
}
