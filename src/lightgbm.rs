use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use std::str::FromStr;

const CATEGORICAL_MASK: u8 = 1;
const DEFAULT_LEFT_MASK: u8 = 2;
const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MissingType {
    None,
    Zero,
    NaN,
}

impl MissingType {
    fn from_decision_type(decision_type: u8) -> Self {
        match (decision_type >> 2) & 3 {
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => MissingType::None,
        }
    }
}

#[derive(Debug)]
struct LightGBMTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    decision_types: Vec<u8>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    cat_boundaries: Vec<usize>,
    cat_threshold: Vec<u32>,
}

impl LightGBMTree {
    fn from_lines(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Result<Self> {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut decision_types = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();
        let mut cat_boundaries = Vec::new();
        let mut cat_threshold = Vec::new();

        while let Some(peeked) = lines.peek() {
            let peeked = peeked.trim();
            if peeked.starts_with("Tree=")
                || peeked.starts_with("end of trees")
                || peeked.starts_with("feature_importances:")
            {
                break;
            }
            let Some(raw) = lines.next() else {
                break;
            };
            let line = raw.trim();

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("decision_type=") {
                decision_types = parse_array(line, "decision_type=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            } else if line.starts_with("cat_boundaries=") {
                cat_boundaries = parse_array(line, "cat_boundaries=")?;
            } else if line.starts_with("cat_threshold=") {
                cat_threshold = parse_array(line, "cat_threshold=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(anyhow!(
                "LightGBM tree definition invalid: split/child/threshold length mismatch"
            ));
        }
        if decision_types.is_empty() {
            decision_types = vec![0; internal_nodes];
        } else if decision_types.len() != internal_nodes {
            return Err(anyhow!(
                "LightGBM tree definition invalid: decision_type length mismatch"
            ));
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves != leaf_values.len() {
            return Err(anyhow!(
                "LightGBM tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            ));
        }
        if leaf_values.is_empty() {
            return Err(anyhow!("LightGBM tree has no leaves"));
        }

        Ok(Self {
            split_features,
            thresholds,
            decision_types,
            left_child,
            right_child,
            leaf_values,
            cat_boundaries,
            cat_threshold,
        })
    }

    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values[0];
        }

        let mut node_idx = 0usize;
        loop {
            let goes_left = self.goes_left(node_idx, features);
            let child = if goes_left {
                self.left_child.get(node_idx).copied().unwrap_or(-1)
            } else {
                self.right_child.get(node_idx).copied().unwrap_or(-1)
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default();
            }

            node_idx = child as usize;
        }
    }

    fn goes_left(&self, node_idx: usize, features: &[f64]) -> bool {
        let feature_idx = self.split_features.get(node_idx).copied().unwrap_or_default();
        let decision_type = self.decision_types.get(node_idx).copied().unwrap_or_default();
        let threshold = self.thresholds.get(node_idx).copied().unwrap_or(0.0);
        let value = features.get(feature_idx).copied().unwrap_or(f64::NAN);

        if decision_type & CATEGORICAL_MASK != 0 {
            return self.categorical_goes_left(threshold, value);
        }

        let missing_type = MissingType::from_decision_type(decision_type);
        let default_left = decision_type & DEFAULT_LEFT_MASK != 0;
        let mut value = value;
        if value.is_nan() && missing_type != MissingType::NaN {
            value = 0.0;
        }
        let is_zero = value.abs() <= ZERO_THRESHOLD;
        if (missing_type == MissingType::Zero && is_zero)
            || (missing_type == MissingType::NaN && value.is_nan())
        {
            return default_left;
        }
        value <= threshold
    }

    fn categorical_goes_left(&self, threshold: f64, value: f64) -> bool {
        if value.is_nan() || value < 0.0 {
            return false;
        }
        let category = value as usize;
        let cat_idx = threshold as usize;
        let (Some(&start), Some(&end)) = (
            self.cat_boundaries.get(cat_idx),
            self.cat_boundaries.get(cat_idx + 1),
        ) else {
            return false;
        };
        let Some(words) = self.cat_threshold.get(start..end) else {
            return false;
        };
        let word = category / 32;
        let bit = category % 32;
        words
            .get(word)
            .map(|bits| (bits >> bit) & 1 == 1)
            .unwrap_or(false)
    }
}

/// Binary-objective LightGBM model parsed from the text format written by the CLI.
#[derive(Debug)]
pub struct Booster {
    trees: Vec<LightGBMTree>,
    feature_count: usize,
    feature_names: Vec<String>,
    sigmoid: f64,
}

impl Booster {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut feature_names = Vec::new();
        let mut sigmoid = 1.0;

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with("objective=") {
                if !trimmed.contains("binary") {
                    return Err(anyhow!(
                        "Unsupported LightGBM objective \"{}\"; expected binary",
                        trimmed
                    ));
                }
                sigmoid = extract_sigmoid(trimmed);
            } else if trimmed.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed, "max_feature_idx=")?);
            } else if let Some(raw) = trimmed.strip_prefix("feature_names=") {
                feature_names = raw.split_whitespace().map(str::to_string).collect();
            }

            if trimmed.starts_with("Tree=") {
                let tree = LightGBMTree::from_lines(&mut lines)?;
                trees.push(tree);
            }
        }

        if trees.is_empty() {
            return Err(anyhow!("LightGBM model contained no trees"));
        }

        let inferred_max_feature = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_max_feature + 1);

        Ok(Self {
            trees,
            feature_count,
            feature_names,
            sigmoid,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read LightGBM model {}", path.display()))?;
        Self::from_model_text(&text)
            .with_context(|| format!("Failed to parse LightGBM model {}", path.display()))
    }

    pub fn num_features(&self) -> usize {
        self.feature_count
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_raw(&self, features: &[f64]) -> f64 {
        self.trees.iter().map(|tree| tree.predict(features)).sum()
    }

    /// Probability of the positive class.
    pub fn predict_probability(&self, features: &[f64]) -> Option<f64> {
        if features.len() < self.feature_count {
            return None;
        }
        let logit = self.predict_raw(features) * self.sigmoid;
        let probability = 1.0 / (1.0 + (-logit).exp());
        Some(probability.clamp(0.0, 1.0))
    }

    /// Number of splits using each feature, the default LightGBM importance.
    pub fn split_importance(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.feature_count];
        for tree in &self.trees {
            for &feature in &tree.split_features {
                if let Some(slot) = counts.get_mut(feature) {
                    *slot += 1;
                }
            }
        }
        counts
    }
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.trim().parse::<T>().map_err(|err| {
        anyhow!(
            "Failed to parse value for {prefix} from \"{line}\" while loading LightGBM model: {err}"
        )
    })
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("Failed to parse value {token} for {prefix}: {err}"))
        })
        .collect()
}

fn extract_sigmoid(objective_line: &str) -> f64 {
    objective_line
        .split_whitespace()
        .find_map(|token| token.strip_prefix("sigmoid:"))
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_model_text() -> &'static str {
        "tree\nversion=v4\nnum_class=1\nnum_tree_per_iteration=1\nlabel_index=0\nmax_feature_idx=1\nobjective=binary sigmoid:1\nfeature_names=kyori course_top3_count\n\nTree=0\nnum_leaves=3\nnum_cat=0\nsplit_feature=0 1\nsplit_gain=10 5\nthreshold=1500 0.5\ndecision_type=10 2\nleft_child=-1 -2\nright_child=1 -3\nleaf_value=-1 0.5 2\nleaf_weight=1 1 1\nleaf_count=1 1 1\ninternal_value=0 0\ninternal_weight=0 0\ninternal_count=3 2\nis_linear=0\nshrinkage=0.1\n\n\nend of trees\n\nfeature_importances:\nkyori=1\ncourse_top3_count=1\n"
    }

    fn categorical_model_text() -> &'static str {
        // Categories 1 and 3 go left (bitset 0b1010 = 10).
        "tree\nmax_feature_idx=0\nobjective=binary sigmoid:1\nTree=0\nnum_leaves=2\nnum_cat=1\nsplit_feature=0\nthreshold=0\ndecision_type=1\nleft_child=-1\nright_child=-2\nleaf_value=1.5 -1.5\ncat_boundaries=0 1\ncat_threshold=10\nshrinkage=1\n\nend of trees\n"
    }

    #[test]
    fn numeric_splits_route_by_threshold() {
        let booster = Booster::from_model_text(numeric_model_text()).expect("parse model");
        assert_eq!(booster.num_features(), 2);
        assert_eq!(booster.num_trees(), 1);
        assert_eq!(booster.feature_names(), ["kyori", "course_top3_count"]);

        assert!((booster.predict_raw(&[1200.0, 0.0]) + 1.0).abs() < 1e-12);
        assert!((booster.predict_raw(&[2000.0, 0.0]) - 0.5).abs() < 1e-12);
        assert!((booster.predict_raw(&[2000.0, 3.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn missing_values_follow_default_direction() {
        let booster = Booster::from_model_text(numeric_model_text()).expect("parse model");
        // Root node: missing type NaN with default-left set.
        assert!((booster.predict_raw(&[f64::NAN, 3.0]) + 1.0).abs() < 1e-12);
        // Second node has no missing type, so NaN is treated as zero.
        assert!((booster.predict_raw(&[2000.0, f64::NAN]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn categorical_splits_check_bitset() {
        let booster = Booster::from_model_text(categorical_model_text()).expect("parse model");
        assert!((booster.predict_raw(&[1.0]) - 1.5).abs() < 1e-12);
        assert!((booster.predict_raw(&[3.0]) - 1.5).abs() < 1e-12);
        assert!((booster.predict_raw(&[2.0]) + 1.5).abs() < 1e-12);
        assert!((booster.predict_raw(&[40.0]) + 1.5).abs() < 1e-12);
        assert!((booster.predict_raw(&[f64::NAN]) + 1.5).abs() < 1e-12);
    }

    #[test]
    fn probability_applies_sigmoid() {
        let booster = Booster::from_model_text(categorical_model_text()).expect("parse model");
        let probability = booster.predict_probability(&[1.0]).expect("probability");
        let expected = 1.0 / (1.0 + (-1.5f64).exp());
        assert!((probability - expected).abs() < 1e-12);
        assert!(booster.predict_probability(&[]).is_none());
    }

    #[test]
    fn split_importance_counts_feature_usage() {
        let booster = Booster::from_model_text(numeric_model_text()).expect("parse model");
        assert_eq!(booster.split_importance(), vec![1, 1]);
    }

    #[test]
    fn rejects_non_binary_objective() {
        let text = "objective=multiclass num_class:3\nTree=0\nnum_leaves=1\nleaf_value=0\n";
        assert!(Booster::from_model_text(text).is_err());
    }
}
