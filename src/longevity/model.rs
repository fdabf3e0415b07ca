//! Regressors
//!
//! The analysis pipeline only needs a fit/predict contract, expressed as the
//! [`Regressor`] trait. Two implementations ship:
//!
//! - [`RandomForestRegressor`]: bagged CART trees, deterministic under a seed
//!   (`ChaCha8Rng`), the default.
//! - [`LinearRegressor`]: ordinary least squares with an intercept, solved
//!   through an SVD so rank-deficient feature sets still fit.

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Fit/predict contract used by the pipeline.
pub trait Regressor: Send {
    /// Short identifier recorded in run results.
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), ModelError>;

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError>;
}

/// Which regressor to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    RandomForest,
    Linear,
}

/// Regressor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_estimators() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::RandomForest,
            n_estimators: default_n_estimators(),
            seed: default_seed(),
        }
    }
}

impl ModelConfig {
    /// Build a fresh, unfitted regressor.
    pub fn build(&self) -> Box<dyn Regressor> {
        match self.kind {
            ModelKind::RandomForest => {
                Box::new(RandomForestRegressor::new(self.n_estimators, self.seed))
            }
            ModelKind::Linear => Box::new(LinearRegressor::default()),
        }
    }
}

/// Errors from fitting or predicting.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    EmptyInput,
    RaggedRows { expected: usize, found: usize, row: usize },
    LengthMismatch { rows: usize, targets: usize },
    NonFinite,
    NotFitted,
    Solver(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "no samples to fit"),
            Self::RaggedRows { expected, found, row } => write!(
                f,
                "row {} has {} features, expected {}",
                row, found, expected
            ),
            Self::LengthMismatch { rows, targets } => {
                write!(f, "{} feature rows but {} targets", rows, targets)
            }
            Self::NonFinite => write!(f, "features or targets contain non-finite values"),
            Self::NotFitted => write!(f, "model has not been fitted"),
            Self::Solver(e) => write!(f, "solver error: {}", e),
        }
    }
}

impl std::error::Error for ModelError {}

fn check_matrix(x: &[Vec<f64>], width: Option<usize>) -> Result<usize, ModelError> {
    let first = x.first().ok_or(ModelError::EmptyInput)?;
    let expected = width.unwrap_or(first.len());
    if expected == 0 {
        return Err(ModelError::EmptyInput);
    }
    for (row, values) in x.iter().enumerate() {
        if values.len() != expected {
            return Err(ModelError::RaggedRows {
                expected,
                found: values.len(),
                row,
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
    }
    Ok(expected)
}

fn check_training(x: &[Vec<f64>], y: &[f64]) -> Result<usize, ModelError> {
    let width = check_matrix(x, None)?;
    if x.len() != y.len() {
        return Err(ModelError::LengthMismatch {
            rows: x.len(),
            targets: y.len(),
        });
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite);
    }
    Ok(width)
}

// =============================================================================
// RANDOM FOREST
// =============================================================================

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single regression tree stored as a node arena; index 0 is the root.
#[derive(Debug, Clone, Default)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn grow(x: &[Vec<f64>], y: &[f64], samples: Vec<usize>, width: usize) -> Self {
        let mut tree = Self::default();
        tree.build(x, y, samples, width);
        tree
    }

    fn build(&mut self, x: &[Vec<f64>], y: &[f64], samples: Vec<usize>, width: usize) -> usize {
        let idx = self.nodes.len();
        let mean = samples.iter().map(|&i| y[i]).sum::<f64>() / samples.len() as f64;
        self.nodes.push(Node::Leaf(mean));

        if samples.len() < 2 {
            return idx;
        }
        let Some((feature, threshold)) = best_split(x, y, &samples, width) else {
            return idx;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) =
            samples.into_iter().partition(|&i| x[i][feature] <= threshold);
        if left_samples.is_empty() || right_samples.is_empty() {
            return idx;
        }
        let left = self.build(x, y, left_samples, width);
        let right = self.build(x, y, right_samples, width);
        self.nodes[idx] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        idx
    }

    fn predict_one(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Variance-reduction split over every feature. `None` when no split lowers
/// the squared error (constant targets or constant features).
fn best_split(x: &[Vec<f64>], y: &[f64], samples: &[usize], width: usize) -> Option<(usize, f64)> {
    let n = samples.len() as f64;
    let total: f64 = samples.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = samples.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total * total / n;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = samples.to_vec();
    for feature in 0..width {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..order.len() - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if next <= here {
                continue;
            }

            let nl = (k + 1) as f64;
            let nr = n - nl;
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);

            if best.map_or(true, |(_, _, s)| sse < s) {
                best = Some((feature, split_threshold(here, next), sse));
            }
        }
    }

    best.filter(|&(_, _, sse)| sse < parent_sse)
        .map(|(feature, threshold, _)| (feature, threshold))
}

/// Midpoint between two distinct sorted values, falling back to `here` when
/// the midpoint rounds up to `next` (adjacent floats).
fn split_threshold(here: f64, next: f64) -> f64 {
    let mid = here + (next - here) / 2.0;
    if mid < next {
        mid
    } else {
        here
    }
}

/// Bagged ensemble of fully grown regression trees.
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    n_estimators: usize,
    seed: u64,
    width: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            seed,
            width: 0,
            trees: Vec::new(),
        }
    }
}

impl Regressor for RandomForestRegressor {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), ModelError> {
        let width = check_training(x, y)?;
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let n = x.len();

        self.trees = (0..self.n_estimators)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::grow(x, y, bootstrap, width)
            })
            .collect();
        self.width = width;
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }
        if x.is_empty() {
            return Ok(Vec::new());
        }
        check_matrix(x, Some(self.width))?;

        let k = self.trees.len() as f64;
        Ok(x
            .iter()
            .map(|row| self.trees.iter().map(|t| t.predict_one(row)).sum::<f64>() / k)
            .collect())
    }
}

// =============================================================================
// LINEAR
// =============================================================================

/// Least-squares linear model with intercept.
#[derive(Debug, Clone, Default)]
pub struct LinearRegressor {
    /// `[intercept, w_1, ..., w_k]` once fitted.
    coefficients: Option<DVector<f64>>,
}

impl LinearRegressor {
    pub fn coefficients(&self) -> Option<&[f64]> {
        self.coefficients.as_ref().map(|c| c.as_slice())
    }
}

impl Regressor for LinearRegressor {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), ModelError> {
        let width = check_training(x, y)?;
        let design = DMatrix::from_fn(x.len(), width + 1, |r, c| if c == 0 { 1.0 } else { x[r][c - 1] });
        let target = DVector::from_column_slice(y);

        let solution = design
            .svd(true, true)
            .solve(&target, 1e-12)
            .map_err(|e| ModelError::Solver(e.to_string()))?;
        self.coefficients = Some(solution);
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        let coef = self.coefficients.as_ref().ok_or(ModelError::NotFitted)?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        check_matrix(x, Some(coef.len() - 1))?;
        Ok(x
            .iter()
            .map(|row| coef[0] + row.iter().zip(coef.iter().skip(1)).map(|(a, b)| a * b).sum::<f64>())
            .collect())
    }
}
