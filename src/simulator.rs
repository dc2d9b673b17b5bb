use crate::models::ScoredRecord;
use log::{info, warn};
use serde::Serialize;

/// Probability cut-offs swept in ascending order.
pub const THRESHOLDS: [f64; 7] = [0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80];

/// Stake per bet, in yen.
pub const UNIT_STAKE: f64 = 100.0;

/// Win odds are stored as ten times the decimal payout multiplier.
pub const ODDS_SCALE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdResult {
    pub threshold: f64,
    pub bets: usize,
    pub hits: usize,
    pub cost: f64,
    pub payout: f64,
    pub profit: f64,
    pub recovery_rate: f64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub eligible_records: usize,
    pub rows: Vec<ThresholdResult>,
    pub best: Option<ThresholdResult>,
}

impl SimulationReport {
    pub fn is_profitable(&self) -> bool {
        self.best
            .as_ref()
            .map(|best| best.recovery_rate > 100.0)
            .unwrap_or(false)
    }

    pub fn print(&self) {
        println!("Win-bet simulation ({} eligible entries)", self.eligible_records);
        if self.rows.is_empty() {
            println!("  No threshold produced any bets");
            return;
        }
        println!(
            "  {:>9} {:>6} {:>6} {:>10} {:>10} {:>10} {:>9} {:>8}",
            "threshold", "bets", "hits", "cost", "payout", "profit", "recovery", "hit"
        );
        for row in &self.rows {
            println!(
                "  {:>9.2} {:>6} {:>6} {:>10.0} {:>10.0} {:>+10.0} {:>8.1}% {:>7.1}%",
                row.threshold,
                row.bets,
                row.hits,
                row.cost,
                row.payout,
                row.profit,
                row.recovery_rate,
                row.hit_rate
            );
        }
        if let Some(best) = &self.best {
            println!(
                "Best threshold: {:.2} (recovery {:.1}%)",
                best.threshold, best.recovery_rate
            );
            if self.is_profitable() {
                println!("  Recovery above 100%: this threshold was profitable on the test year");
            } else {
                println!("  Recovery at or below 100%: no threshold beat the takeout");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Simulator {
    thresholds: Vec<f64>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            thresholds: THRESHOLDS.to_vec(),
        }
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: Vec<f64>) -> Self {
        Self { thresholds }
    }

    /// Bets one unit to win on every entry whose probability reaches each threshold.
    pub fn simulate_win_bets(&self, scored: &[ScoredRecord]) -> SimulationReport {
        let eligible: Vec<&ScoredRecord> = scored
            .iter()
            .filter(|entry| entry.record.win_odds.map(|odds| odds > 0.0).unwrap_or(false))
            .collect();
        if eligible.len() < scored.len() {
            info!(
                "Skipping {} entries without positive win odds",
                scored.len() - eligible.len()
            );
        }

        let mut report = SimulationReport {
            eligible_records: eligible.len(),
            ..SimulationReport::default()
        };

        for &threshold in &self.thresholds {
            let Some(row) = evaluate_threshold(&eligible, threshold) else {
                continue;
            };
            let improves = report
                .best
                .as_ref()
                .map(|best| row.recovery_rate > best.recovery_rate)
                .unwrap_or(true);
            if improves {
                report.best = Some(row.clone());
            }
            report.rows.push(row);
        }

        if report.rows.is_empty() {
            warn!("No entries reached any betting threshold");
        }
        report
    }
}

fn evaluate_threshold(eligible: &[&ScoredRecord], threshold: f64) -> Option<ThresholdResult> {
    let bets: Vec<&&ScoredRecord> = eligible
        .iter()
        .filter(|entry| entry.probability >= threshold)
        .collect();
    if bets.is_empty() {
        return None;
    }

    let mut hits = 0usize;
    let mut payout = 0.0;
    for entry in &bets {
        if entry.record.is_winner() {
            hits += 1;
            let odds = entry.record.win_odds.unwrap_or(0.0);
            payout += odds / ODDS_SCALE * UNIT_STAKE;
        }
    }

    let cost = bets.len() as f64 * UNIT_STAKE;
    Some(ThresholdResult {
        threshold,
        bets: bets.len(),
        hits,
        cost,
        payout,
        profit: payout - cost,
        recovery_rate: payout / cost * 100.0,
        hit_rate: hits as f64 / bets.len() as f64 * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CourseDirection, DistanceChange, EngineeredRecord};

    fn entry(odds: f64, probability: f64, finish: u32) -> ScoredRecord {
        ScoredRecord {
            record: EngineeredRecord {
                race_id: "2025_05_1_1_1".to_string(),
                horse_id: Some("2020100001".to_string()),
                year: Some(2025),
                month_day: Some("0105".to_string()),
                venue_code: Some("05".to_string()),
                distance: Some(1600.0),
                track_code: None,
                weather_code: None,
                turf_going_code: None,
                dirt_going_code: None,
                sex_code: None,
                weight_carried: Some(0.0),
                body_weight: Some(0.0),
                body_weight_delta: Some(0.0),
                jockey_code: None,
                body_weight_deviation: Some(0.0),
                weight_carried_deviation: Some(0.0),
                jockey_venue: None,
                distance_change: DistanceChange::Same,
                distance_delta: 0.0,
                course_direction: CourseDirection::Left,
                course_top3_count: 0,
                win_odds: Some(odds),
                finish_position: finish,
            },
            probability,
        }
    }

    #[test]
    fn single_winner_at_lowest_threshold() {
        let scored = vec![entry(50.0, 0.6, 1), entry(30.0, 0.55, 2)];
        let report = Simulator::new().simulate_win_bets(&scored);

        let first = &report.rows[0];
        assert_eq!(first.threshold, 0.50);
        assert_eq!(first.bets, 2);
        assert_eq!(first.cost, 200.0);
        assert!((first.payout - 500.0).abs() < 1e-9);
        assert!((first.profit - 300.0).abs() < 1e-9);
        assert!((first.recovery_rate - 250.0).abs() < 1e-9);
        assert!((first.hit_rate - 50.0).abs() < 1e-9);
    }

    #[test]
    fn thresholds_without_bets_produce_no_rows() {
        let scored = vec![entry(50.0, 0.6, 1), entry(30.0, 0.55, 2)];
        let report = Simulator::new().simulate_win_bets(&scored);

        let thresholds: Vec<f64> = report.rows.iter().map(|row| row.threshold).collect();
        assert_eq!(thresholds, vec![0.50, 0.55, 0.60]);
        let best = report.best.as_ref().expect("best threshold");
        assert_eq!(best.threshold, 0.60);
        assert!((best.recovery_rate - 500.0).abs() < 1e-9);
        assert!(report.is_profitable());
    }

    #[test]
    fn ties_keep_the_lower_threshold() {
        let scored = vec![entry(20.0, 0.9, 1)];
        let report = Simulator::new().simulate_win_bets(&scored);

        assert_eq!(report.rows.len(), THRESHOLDS.len());
        assert_eq!(report.best.map(|best| best.threshold), Some(0.50));
    }

    #[test]
    fn non_positive_odds_are_never_bet() {
        let scored = vec![entry(0.0, 0.95, 1), entry(-10.0, 0.95, 1)];
        let report = Simulator::new().simulate_win_bets(&scored);

        assert_eq!(report.eligible_records, 0);
        assert!(report.rows.is_empty());
        assert!(report.best.is_none());
        assert!(!report.is_profitable());
    }

    #[test]
    fn losing_sweep_is_not_profitable() {
        let scored = vec![entry(15.0, 0.7, 1), entry(40.0, 0.7, 4)];
        let report = Simulator::with_thresholds(vec![0.5]).simulate_win_bets(&scored);

        // losing sweeps still report the real best row, not a zero threshold
        let best = report.best.clone().expect("best threshold");
        assert_eq!(best.threshold, 0.5);
        assert!((best.recovery_rate - 75.0).abs() < 1e-9);
        assert!(!report.is_profitable());
    }
}
