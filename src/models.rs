use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Columns of the flat race/result join, named after their database columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RaceColumn {
    Year,
    MonthDay,
    VenueCode,
    Meeting,
    Day,
    RaceNumber,
    Distance,
    TrackCode,
    WeatherCode,
    TurfGoingCode,
    DirtGoingCode,
    HorseNumber,
    HorseId,
    HorseName,
    SexCode,
    WeightCarried,
    JockeyCode,
    TrainerCode,
    BodyWeight,
    BodyWeightDelta,
    WinOdds,
    Popularity,
    FinishPosition,
}

impl RaceColumn {
    pub const ALL: [RaceColumn; 23] = [
        RaceColumn::Year,
        RaceColumn::MonthDay,
        RaceColumn::VenueCode,
        RaceColumn::Meeting,
        RaceColumn::Day,
        RaceColumn::RaceNumber,
        RaceColumn::Distance,
        RaceColumn::TrackCode,
        RaceColumn::WeatherCode,
        RaceColumn::TurfGoingCode,
        RaceColumn::DirtGoingCode,
        RaceColumn::HorseNumber,
        RaceColumn::HorseId,
        RaceColumn::HorseName,
        RaceColumn::SexCode,
        RaceColumn::WeightCarried,
        RaceColumn::JockeyCode,
        RaceColumn::TrainerCode,
        RaceColumn::BodyWeight,
        RaceColumn::BodyWeightDelta,
        RaceColumn::WinOdds,
        RaceColumn::Popularity,
        RaceColumn::FinishPosition,
    ];

    pub fn db_name(self) -> &'static str {
        match self {
            RaceColumn::Year => "kaisai_nen",
            RaceColumn::MonthDay => "kaisai_tsukihi",
            RaceColumn::VenueCode => "keibajo_code",
            RaceColumn::Meeting => "kaisai_kai",
            RaceColumn::Day => "kaisai_nichime",
            RaceColumn::RaceNumber => "race_bango",
            RaceColumn::Distance => "kyori",
            RaceColumn::TrackCode => "track_code",
            RaceColumn::WeatherCode => "tenko_code",
            RaceColumn::TurfGoingCode => "babajotai_code_shiba",
            RaceColumn::DirtGoingCode => "babajotai_code_dirt",
            RaceColumn::HorseNumber => "umaban",
            RaceColumn::HorseId => "ketto_toroku_bango",
            RaceColumn::HorseName => "bamei",
            RaceColumn::SexCode => "seibetsu_code",
            RaceColumn::WeightCarried => "futan_juryo",
            RaceColumn::JockeyCode => "kishu_code",
            RaceColumn::TrainerCode => "chokyoshi_code",
            RaceColumn::BodyWeight => "bataiju",
            RaceColumn::BodyWeightDelta => "zogen_sa",
            RaceColumn::WinOdds => "tansho_odds",
            RaceColumn::Popularity => "tansho_ninkijun",
            RaceColumn::FinishPosition => "kakutei_chakujun",
        }
    }

    pub fn from_db_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|column| column.db_name().eq_ignore_ascii_case(name.trim()))
    }
}

/// One (race, horse) row as delivered by the extractor. Every value is raw text;
/// numeric coercion happens in the preprocessor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaceRecord {
    pub year: Option<String>,
    pub month_day: Option<String>,
    pub venue_code: Option<String>,
    pub meeting: Option<String>,
    pub day: Option<String>,
    pub race_number: Option<String>,
    pub distance: Option<String>,
    pub track_code: Option<String>,
    pub weather_code: Option<String>,
    pub turf_going_code: Option<String>,
    pub dirt_going_code: Option<String>,
    pub horse_number: Option<String>,
    pub horse_id: Option<String>,
    pub horse_name: Option<String>,
    pub sex_code: Option<String>,
    pub weight_carried: Option<String>,
    pub jockey_code: Option<String>,
    pub trainer_code: Option<String>,
    pub body_weight: Option<String>,
    pub body_weight_delta: Option<String>,
    pub win_odds: Option<String>,
    pub popularity: Option<String>,
    pub finish_position: Option<String>,
}

impl RaceRecord {
    pub fn get(&self, column: RaceColumn) -> Option<&str> {
        self.slot(column).as_deref()
    }

    pub fn set(&mut self, column: RaceColumn, value: Option<String>) {
        *self.slot_mut(column) = value;
    }

    fn slot(&self, column: RaceColumn) -> &Option<String> {
        match column {
            RaceColumn::Year => &self.year,
            RaceColumn::MonthDay => &self.month_day,
            RaceColumn::VenueCode => &self.venue_code,
            RaceColumn::Meeting => &self.meeting,
            RaceColumn::Day => &self.day,
            RaceColumn::RaceNumber => &self.race_number,
            RaceColumn::Distance => &self.distance,
            RaceColumn::TrackCode => &self.track_code,
            RaceColumn::WeatherCode => &self.weather_code,
            RaceColumn::TurfGoingCode => &self.turf_going_code,
            RaceColumn::DirtGoingCode => &self.dirt_going_code,
            RaceColumn::HorseNumber => &self.horse_number,
            RaceColumn::HorseId => &self.horse_id,
            RaceColumn::HorseName => &self.horse_name,
            RaceColumn::SexCode => &self.sex_code,
            RaceColumn::WeightCarried => &self.weight_carried,
            RaceColumn::JockeyCode => &self.jockey_code,
            RaceColumn::TrainerCode => &self.trainer_code,
            RaceColumn::BodyWeight => &self.body_weight,
            RaceColumn::BodyWeightDelta => &self.body_weight_delta,
            RaceColumn::WinOdds => &self.win_odds,
            RaceColumn::Popularity => &self.popularity,
            RaceColumn::FinishPosition => &self.finish_position,
        }
    }

    fn slot_mut(&mut self, column: RaceColumn) -> &mut Option<String> {
        match column {
            RaceColumn::Year => &mut self.year,
            RaceColumn::MonthDay => &mut self.month_day,
            RaceColumn::VenueCode => &mut self.venue_code,
            RaceColumn::Meeting => &mut self.meeting,
            RaceColumn::Day => &mut self.day,
            RaceColumn::RaceNumber => &mut self.race_number,
            RaceColumn::Distance => &mut self.distance,
            RaceColumn::TrackCode => &mut self.track_code,
            RaceColumn::WeatherCode => &mut self.weather_code,
            RaceColumn::TurfGoingCode => &mut self.turf_going_code,
            RaceColumn::DirtGoingCode => &mut self.dirt_going_code,
            RaceColumn::HorseNumber => &mut self.horse_number,
            RaceColumn::HorseId => &mut self.horse_id,
            RaceColumn::HorseName => &mut self.horse_name,
            RaceColumn::SexCode => &mut self.sex_code,
            RaceColumn::WeightCarried => &mut self.weight_carried,
            RaceColumn::JockeyCode => &mut self.jockey_code,
            RaceColumn::TrainerCode => &mut self.trainer_code,
            RaceColumn::BodyWeight => &mut self.body_weight,
            RaceColumn::BodyWeightDelta => &mut self.body_weight_delta,
            RaceColumn::WinOdds => &mut self.win_odds,
            RaceColumn::Popularity => &mut self.popularity,
            RaceColumn::FinishPosition => &mut self.finish_position,
        }
    }
}

/// Extracted rows together with the set of columns the source actually returned.
#[derive(Debug, Clone, Default)]
pub struct RaceTable {
    columns: BTreeSet<RaceColumn>,
    records: Vec<RaceRecord>,
}

impl RaceTable {
    pub fn new(columns: BTreeSet<RaceColumn>, records: Vec<RaceRecord>) -> Self {
        Self { columns, records }
    }

    /// Table carrying every known column.
    pub fn with_all_columns(records: Vec<RaceRecord>) -> Self {
        Self::new(RaceColumn::ALL.iter().copied().collect(), records)
    }

    pub fn has_column(&self, column: RaceColumn) -> bool {
        self.columns.contains(&column)
    }

    pub fn columns(&self) -> impl Iterator<Item = RaceColumn> + '_ {
        self.columns.iter().copied()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn records(&self) -> &[RaceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceChange {
    Extension,
    Shortening,
    Same,
}

impl DistanceChange {
    pub fn from_delta(delta: Option<f64>) -> Self {
        match delta {
            Some(value) if value > 0.0 => DistanceChange::Extension,
            Some(value) if value < 0.0 => DistanceChange::Shortening,
            _ => DistanceChange::Same,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceChange::Extension => "extension",
            DistanceChange::Shortening => "shortening",
            DistanceChange::Same => "same",
        }
    }
}

impl fmt::Display for DistanceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CourseDirection {
    Right,
    Left,
    Unknown,
}

impl CourseDirection {
    /// Maps a JRA venue code to the direction its track turns.
    ///
    /// Niigata (04) also hosts a 1000m straight course; it is folded into Left
    /// here because the track code is not consulted.
    pub fn from_venue_code(code: &str) -> Self {
        let trimmed = code.trim();
        let padded = if trimmed.len() < 2 {
            format!("{:0>2}", trimmed)
        } else {
            trimmed.to_string()
        };
        match padded.as_str() {
            "01" | "02" | "03" | "06" | "08" | "09" | "10" => CourseDirection::Right,
            "05" | "07" => CourseDirection::Left,
            "04" => CourseDirection::Left,
            _ => CourseDirection::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CourseDirection::Right => "Right",
            CourseDirection::Left => "Left",
            CourseDirection::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for CourseDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A race record after preprocessing. Optional fields are `None` when the source
/// value was missing or its column was absent from the extracted table.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredRecord {
    pub race_id: String,
    pub horse_id: Option<String>,
    pub year: Option<i32>,
    pub month_day: Option<String>,
    pub venue_code: Option<String>,
    pub distance: Option<f64>,
    pub track_code: Option<String>,
    pub weather_code: Option<String>,
    pub turf_going_code: Option<String>,
    pub dirt_going_code: Option<String>,
    pub sex_code: Option<String>,
    pub weight_carried: Option<f64>,
    pub body_weight: Option<f64>,
    pub body_weight_delta: Option<f64>,
    pub jockey_code: Option<String>,
    pub body_weight_deviation: Option<f64>,
    pub weight_carried_deviation: Option<f64>,
    pub jockey_venue: Option<String>,
    pub distance_change: DistanceChange,
    pub distance_delta: f64,
    pub course_direction: CourseDirection,
    pub course_top3_count: u32,
    pub win_odds: Option<f64>,
    pub finish_position: u32,
}

impl EngineeredRecord {
    pub fn is_top3(&self) -> bool {
        self.finish_position <= 3
    }

    pub fn is_winner(&self) -> bool {
        self.finish_position == 1
    }

    pub fn race_date(&self) -> Option<NaiveDate> {
        let year = self.year?;
        let month_day = self.month_day.as_deref()?.trim();
        if month_day.len() != 4 {
            return None;
        }
        let month = month_day[..2].parse::<u32>().ok()?;
        let day = month_day[2..].parse::<u32>().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// Output of the preprocessor: projection columns that could be derived from the
/// input, plus the engineered rows in (horse, year, month-day) order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineeredTable {
    pub columns: Vec<crate::features::FeatureColumn>,
    pub records: Vec<EngineeredRecord>,
}

impl EngineeredTable {
    pub fn has_column(&self, column: crate::features::FeatureColumn) -> bool {
        self.columns.contains(&column)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A held-out record paired with the model's top-3 probability.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: EngineeredRecord,
    pub probability: f64,
}
