use crate::models::{EngineeredRecord, RaceColumn, RaceTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

/// Columns of the engineered projection, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureColumn {
    Year,
    VenueCode,
    Distance,
    TrackCode,
    WeatherCode,
    TurfGoingCode,
    DirtGoingCode,
    SexCode,
    WeightCarried,
    BodyWeight,
    BodyWeightDelta,
    JockeyCode,
    BodyWeightDeviation,
    WeightCarriedDeviation,
    JockeyVenue,
    DistanceChange,
    DistanceDelta,
    CourseDirection,
    CourseTop3Count,
    WinOdds,
    FinishPosition,
}

pub const PROJECTION: [FeatureColumn; 21] = [
    FeatureColumn::Year,
    FeatureColumn::VenueCode,
    FeatureColumn::Distance,
    FeatureColumn::TrackCode,
    FeatureColumn::WeatherCode,
    FeatureColumn::TurfGoingCode,
    FeatureColumn::DirtGoingCode,
    FeatureColumn::SexCode,
    FeatureColumn::WeightCarried,
    FeatureColumn::BodyWeight,
    FeatureColumn::BodyWeightDelta,
    FeatureColumn::JockeyCode,
    FeatureColumn::BodyWeightDeviation,
    FeatureColumn::WeightCarriedDeviation,
    FeatureColumn::JockeyVenue,
    FeatureColumn::DistanceChange,
    FeatureColumn::DistanceDelta,
    FeatureColumn::CourseDirection,
    FeatureColumn::CourseTop3Count,
    FeatureColumn::WinOdds,
    FeatureColumn::FinishPosition,
];

/// Model inputs, in the column order written to the training dataset.
pub const TRAINING_FEATURES: [FeatureColumn; 18] = [
    FeatureColumn::VenueCode,
    FeatureColumn::Distance,
    FeatureColumn::TrackCode,
    FeatureColumn::WeatherCode,
    FeatureColumn::TurfGoingCode,
    FeatureColumn::DirtGoingCode,
    FeatureColumn::SexCode,
    FeatureColumn::WeightCarried,
    FeatureColumn::BodyWeight,
    FeatureColumn::BodyWeightDelta,
    FeatureColumn::JockeyCode,
    FeatureColumn::BodyWeightDeviation,
    FeatureColumn::WeightCarriedDeviation,
    FeatureColumn::JockeyVenue,
    FeatureColumn::DistanceChange,
    FeatureColumn::DistanceDelta,
    FeatureColumn::CourseDirection,
    FeatureColumn::CourseTop3Count,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue<'a> {
    Number(Option<f64>),
    Category(Option<&'a str>),
}

impl FeatureValue<'_> {
    pub fn display(&self) -> String {
        match self {
            FeatureValue::Number(Some(value)) => format!("{}", value),
            FeatureValue::Category(Some(value)) => value.to_string(),
            FeatureValue::Number(None) | FeatureValue::Category(None) => "NaN".to_string(),
        }
    }
}

impl FeatureColumn {
    pub fn name(self) -> &'static str {
        match self {
            FeatureColumn::Year => "kaisai_nen",
            FeatureColumn::VenueCode => "keibajo_code",
            FeatureColumn::Distance => "kyori",
            FeatureColumn::TrackCode => "track_code",
            FeatureColumn::WeatherCode => "tenko_code",
            FeatureColumn::TurfGoingCode => "babajotai_code_shiba",
            FeatureColumn::DirtGoingCode => "babajotai_code_dirt",
            FeatureColumn::SexCode => "seibetsu_code",
            FeatureColumn::WeightCarried => "futan_juryo",
            FeatureColumn::BodyWeight => "bataiju",
            FeatureColumn::BodyWeightDelta => "zogen_sa",
            FeatureColumn::JockeyCode => "kishu_code",
            FeatureColumn::BodyWeightDeviation => "bataiju_diff",
            FeatureColumn::WeightCarriedDeviation => "futan_diff",
            FeatureColumn::JockeyVenue => "kishu_course",
            FeatureColumn::DistanceChange => "dist_change",
            FeatureColumn::DistanceDelta => "dist_diff",
            FeatureColumn::CourseDirection => "course_direction",
            FeatureColumn::CourseTop3Count => "course_top3_count",
            FeatureColumn::WinOdds => "tansho_odds",
            FeatureColumn::FinishPosition => "kakutei_chakujun",
        }
    }

    pub fn kind(self) -> FeatureKind {
        match self {
            FeatureColumn::VenueCode
            | FeatureColumn::TrackCode
            | FeatureColumn::WeatherCode
            | FeatureColumn::TurfGoingCode
            | FeatureColumn::DirtGoingCode
            | FeatureColumn::SexCode
            | FeatureColumn::JockeyCode
            | FeatureColumn::JockeyVenue
            | FeatureColumn::DistanceChange
            | FeatureColumn::CourseDirection => FeatureKind::Categorical,
            FeatureColumn::Year
            | FeatureColumn::Distance
            | FeatureColumn::WeightCarried
            | FeatureColumn::BodyWeight
            | FeatureColumn::BodyWeightDelta
            | FeatureColumn::BodyWeightDeviation
            | FeatureColumn::WeightCarriedDeviation
            | FeatureColumn::DistanceDelta
            | FeatureColumn::CourseTop3Count
            | FeatureColumn::WinOdds
            | FeatureColumn::FinishPosition => FeatureKind::Numeric,
        }
    }

    /// Source columns this projection column is derived from.
    fn inputs(self) -> &'static [RaceColumn] {
        match self {
            FeatureColumn::Year => &[RaceColumn::Year],
            FeatureColumn::VenueCode => &[RaceColumn::VenueCode],
            FeatureColumn::Distance => &[RaceColumn::Distance],
            FeatureColumn::TrackCode => &[RaceColumn::TrackCode],
            FeatureColumn::WeatherCode => &[RaceColumn::WeatherCode],
            FeatureColumn::TurfGoingCode => &[RaceColumn::TurfGoingCode],
            FeatureColumn::DirtGoingCode => &[RaceColumn::DirtGoingCode],
            FeatureColumn::SexCode => &[RaceColumn::SexCode],
            FeatureColumn::WeightCarried => &[RaceColumn::WeightCarried],
            FeatureColumn::BodyWeight => &[RaceColumn::BodyWeight],
            FeatureColumn::BodyWeightDelta => &[RaceColumn::BodyWeightDelta],
            FeatureColumn::JockeyCode => &[RaceColumn::JockeyCode],
            FeatureColumn::BodyWeightDeviation => &[RaceColumn::BodyWeight],
            FeatureColumn::WeightCarriedDeviation => &[RaceColumn::WeightCarried],
            FeatureColumn::JockeyVenue => &[RaceColumn::JockeyCode, RaceColumn::VenueCode],
            FeatureColumn::DistanceChange | FeatureColumn::DistanceDelta => {
                &[RaceColumn::Distance]
            }
            FeatureColumn::CourseDirection => &[RaceColumn::VenueCode],
            FeatureColumn::CourseTop3Count => &[RaceColumn::FinishPosition],
            FeatureColumn::WinOdds => &[RaceColumn::WinOdds],
            FeatureColumn::FinishPosition => &[RaceColumn::FinishPosition],
        }
    }

    pub fn derivable_from(self, table: &RaceTable) -> bool {
        self.inputs().iter().all(|column| table.has_column(*column))
    }

    pub fn value(self, record: &EngineeredRecord) -> FeatureValue<'_> {
        match self {
            FeatureColumn::Year => FeatureValue::Number(record.year.map(f64::from)),
            FeatureColumn::VenueCode => FeatureValue::Category(record.venue_code.as_deref()),
            FeatureColumn::Distance => FeatureValue::Number(record.distance),
            FeatureColumn::TrackCode => FeatureValue::Category(record.track_code.as_deref()),
            FeatureColumn::WeatherCode => FeatureValue::Category(record.weather_code.as_deref()),
            FeatureColumn::TurfGoingCode => {
                FeatureValue::Category(record.turf_going_code.as_deref())
            }
            FeatureColumn::DirtGoingCode => {
                FeatureValue::Category(record.dirt_going_code.as_deref())
            }
            FeatureColumn::SexCode => FeatureValue::Category(record.sex_code.as_deref()),
            FeatureColumn::WeightCarried => FeatureValue::Number(record.weight_carried),
            FeatureColumn::BodyWeight => FeatureValue::Number(record.body_weight),
            FeatureColumn::BodyWeightDelta => FeatureValue::Number(record.body_weight_delta),
            FeatureColumn::JockeyCode => FeatureValue::Category(record.jockey_code.as_deref()),
            FeatureColumn::BodyWeightDeviation => {
                FeatureValue::Number(record.body_weight_deviation)
            }
            FeatureColumn::WeightCarriedDeviation => {
                FeatureValue::Number(record.weight_carried_deviation)
            }
            FeatureColumn::JockeyVenue => FeatureValue::Category(record.jockey_venue.as_deref()),
            FeatureColumn::DistanceChange => {
                FeatureValue::Category(Some(record.distance_change.as_str()))
            }
            FeatureColumn::DistanceDelta => FeatureValue::Number(Some(record.distance_delta)),
            FeatureColumn::CourseDirection => {
                FeatureValue::Category(Some(record.course_direction.as_str()))
            }
            FeatureColumn::CourseTop3Count => {
                FeatureValue::Number(Some(f64::from(record.course_top3_count)))
            }
            FeatureColumn::WinOdds => FeatureValue::Number(record.win_odds),
            FeatureColumn::FinishPosition => {
                FeatureValue::Number(Some(f64::from(record.finish_position)))
            }
        }
    }
}

/// Projection columns that can be produced from the given input table.
pub fn present_columns(table: &RaceTable) -> Vec<FeatureColumn> {
    PROJECTION
        .iter()
        .copied()
        .filter(|column| column.derivable_from(table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RaceRecord;
    use std::collections::BTreeSet;

    #[test]
    fn projection_skips_columns_missing_from_input() {
        let columns: BTreeSet<RaceColumn> = [
            RaceColumn::Year,
            RaceColumn::VenueCode,
            RaceColumn::Distance,
            RaceColumn::FinishPosition,
        ]
        .into_iter()
        .collect();
        let table = RaceTable::new(columns, vec![RaceRecord::default()]);

        let present = present_columns(&table);
        assert!(present.contains(&FeatureColumn::CourseDirection));
        assert!(present.contains(&FeatureColumn::DistanceChange));
        assert!(!present.contains(&FeatureColumn::JockeyVenue));
        assert!(!present.contains(&FeatureColumn::BodyWeightDeviation));
        assert!(!present.contains(&FeatureColumn::WinOdds));
    }

    #[test]
    fn training_features_are_a_subset_of_the_projection() {
        for feature in TRAINING_FEATURES {
            assert!(PROJECTION.contains(&feature), "{} missing", feature.name());
        }
    }
}
