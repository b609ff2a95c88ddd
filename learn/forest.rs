//! # Random Forests
//!
//! Bootstrap-aggregated, fully grown CART trees for binary classification and
//! regression. Every tree is grown on its own bootstrap sample and considers `mtry`
//! randomly drawn features at each split. Trees are stored as flat node arenas so
//! that a fitted forest serializes to TOML without recursion.
//!
//! Classification trees store the fraction of positive labels in each leaf, so the
//! averaged forest output is the probability of the positive class.

use super::ModelError;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of trees grown when the caller does not ask for a specific count.
pub const DEFAULT_TREES: usize = 200;
const MIN_SAMPLES_SPLIT: usize = 2;

/// The impurity measure minimized when choosing a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    /// Gini impurity over the two classes.
    Gini,
    /// Within-node sum of squared deviations.
    Variance,
}

impl Criterion {
    /// Features considered per split when none is configured: the floor of the
    /// square root of the feature count for classification, a third of it for
    /// regression, never less than one.
    pub fn default_mtry(self, n_features: usize) -> usize {
        let mtry = match self {
            Criterion::Gini => (n_features as f64).sqrt().floor() as usize,
            Criterion::Variance => n_features / 3,
        };
        mtry.max(1)
    }

    /// Impurity of a node summarized by its count, sum, and sum of squares, scaled
    /// by the node size so that children can be added directly.
    fn weighted_impurity(self, count: f64, sum: f64, sum_sq: f64) -> f64 {
        if count == 0.0 {
            return 0.0;
        }
        match self {
            Criterion::Gini => {
                let p = sum / count;
                count * 2.0 * p * (1.0 - p)
            }
            Criterion::Variance => (sum_sq - sum * sum / count).max(0.0),
        }
    }
}

/// Settings shared by every tree of a forest.
#[derive(Debug, Clone)]
pub struct ForestSettings {
    pub trees: usize,
    /// Features drawn at each split; `None` picks [`Criterion::default_mtry`].
    pub mtry: Option<usize>,
    /// Worker threads used while growing trees.
    pub cores: usize,
    pub seed: Option<u64>,
    /// Shows a progress bar while trees are grown.
    pub verbose: bool,
}

impl Default for ForestSettings {
    fn default() -> Self {
        Self {
            trees: DEFAULT_TREES,
            mtry: None,
            cores: 1,
            seed: None,
            verbose: false,
        }
    }
}

/// A node of a flattened tree. Node 0 is the root, so a node whose `left` child is 0
/// has no children and is a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub value: f64,
}

impl TreeNode {
    fn leaf() -> Self {
        Self {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 0,
            value: 0.0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left == 0
    }
}

/// One fully grown tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `samples` (duplicates allowed).
    fn grow(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        samples: Vec<usize>,
        criterion: Criterion,
        mtry: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut nodes = vec![TreeNode::leaf()];
        let mut pending = vec![(0usize, samples)];
        let mut features: Vec<usize> = (0..x.ncols()).collect();

        while let Some((slot, rows)) = pending.pop() {
            nodes[slot].value = rows.iter().map(|&row| y[row]).sum::<f64>() / rows.len() as f64;
            if rows.len() < MIN_SAMPLES_SPLIT || is_pure(y, &rows) {
                continue;
            }

            features.shuffle(rng);
            let Some(split) = best_split(x, y, &rows, &features, criterion, mtry) else {
                continue;
            };

            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .iter()
                .copied()
                .partition(|&row| x[[row, split.feature]] <= split.threshold);

            let left = nodes.len();
            nodes.push(TreeNode::leaf());
            let right = nodes.len();
            nodes.push(TreeNode::leaf());

            let node = &mut nodes[slot];
            node.feature = split.feature;
            node.threshold = split.threshold;
            node.left = left;
            node.right = right;

            pending.push((left, left_rows));
            pending.push((right, right_rows));
        }

        Self { nodes }
    }

    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            let node = &self.nodes[index];
            if node.is_leaf() {
                return node.value;
            }
            index = if row[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            let node = &self.nodes[index];
            if !node.is_leaf() {
                stack.push((node.left, depth + 1));
                stack.push((node.right, depth + 1));
            }
        }
        deepest
    }
}

fn is_pure(y: ArrayView1<f64>, rows: &[usize]) -> bool {
    let first = y[rows[0]];
    rows.iter().all(|&row| y[row] == first)
}

/// Scans shuffled features until `mtry` non-constant ones have been evaluated and
/// returns the split with the lowest weighted child impurity.
fn best_split(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    rows: &[usize],
    features: &[usize],
    criterion: Criterion,
    mtry: usize,
) -> Option<Split> {
    let count = rows.len() as f64;
    let total_sum: f64 = rows.iter().map(|&row| y[row]).sum();
    let total_sq: f64 = rows.iter().map(|&row| y[row] * y[row]).sum();

    let mut best: Option<Split> = None;
    let mut evaluated = 0;
    let mut ordered: Vec<(f64, f64)> = Vec::with_capacity(rows.len());

    for &feature in features {
        if evaluated == mtry {
            break;
        }
        ordered.clear();
        ordered.extend(rows.iter().map(|&row| (x[[row, feature]], y[row])));
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));
        if ordered[0].0 == ordered[ordered.len() - 1].0 {
            continue;
        }
        evaluated += 1;

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 1..ordered.len() {
            let (value, target) = ordered[k - 1];
            left_sum += target;
            left_sq += target * target;
            let next = ordered[k].0;
            if value == next {
                continue;
            }

            let left_count = k as f64;
            let impurity = criterion.weighted_impurity(left_count, left_sum, left_sq)
                + criterion.weighted_impurity(count - left_count, total_sum - left_sum, total_sq - left_sq);

            if best.as_ref().is_none_or(|current| impurity < current.impurity) {
                let midpoint = value + (next - value) / 2.0;
                let threshold = if midpoint < next { midpoint } else { value };
                best = Some(Split {
                    feature,
                    threshold,
                    impurity,
                });
            }
        }
    }

    best
}

/// A bagged ensemble of decision trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub criterion: Criterion,
    pub mtry: usize,
    pub n_features: usize,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Grows `settings.trees` trees on a dedicated pool of `settings.cores` threads.
    pub fn fit(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        criterion: Criterion,
        settings: &ForestSettings,
    ) -> Result<Self, ModelError> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        if n_samples == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if n_samples != y.len() {
            return Err(ModelError::ShapeMismatch {
                rows: n_samples,
                targets: y.len(),
            });
        }
        if settings.trees == 0 {
            return Err(ModelError::InvalidHyperparameter(
                "a random forest needs at least one tree".to_string(),
            ));
        }
        if settings.mtry == Some(0) {
            return Err(ModelError::InvalidHyperparameter(
                "mtry must be at least one".to_string(),
            ));
        }

        let mtry = settings
            .mtry
            .unwrap_or_else(|| criterion.default_mtry(n_features))
            .min(n_features);
        let base_seed = settings.seed.unwrap_or_else(rand::random);
        log::info!(
            "Growing {} trees ({criterion:?}, mtry = {mtry}) on {n_samples} rows using {} threads",
            settings.trees,
            settings.cores
        );

        let progress = if settings.verbose {
            let bar = ProgressBar::new(settings.trees as u64);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} trees")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.cores.max(1))
            .build()?;
        let trees: Vec<DecisionTree> = pool.install(|| {
            (0..settings.trees)
                .into_par_iter()
                .map(|tree_index| {
                    let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(tree_index as u64));
                    let samples: Vec<usize> =
                        (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect();
                    let tree = DecisionTree::grow(x, y, samples, criterion, mtry, &mut rng);
                    progress.inc(1);
                    tree
                })
                .collect()
        });
        progress.finish_and_clear();

        let deepest = trees.iter().map(DecisionTree::depth).max().unwrap_or(0);
        log::debug!("Forest grown; deepest tree has depth {deepest}");

        Ok(Self {
            criterion,
            mtry,
            n_features,
            trees,
        })
    }

    /// Averages the tree outputs for every row of `x`.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if x.ncols() != self.n_features {
            return Err(ModelError::FeatureCountMismatch {
                expected: self.n_features,
                found: x.ncols(),
            });
        }
        let tree_count = self.trees.len() as f64;
        Ok(x.outer_iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_row(row))
                    .sum::<f64>()
                    / tree_count
            })
            .collect())
    }
}
