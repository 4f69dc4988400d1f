//! Outlier scoring - labels flows Normal or Suspicious.
//!
//! An isolation forest is fitted over the derived feature vectors. Points that
//! need fewer random splits to isolate are more anomalous.
//!
//! # Scoring
//!
//! For a sub-sample of size ψ, the expected path length of an unsuccessful
//! binary search tree lookup is
//!
//! c(ψ) = 2·H(ψ−1) − 2(ψ−1)/ψ,  H(i) ≈ ln(i) + γ
//!
//! and the anomaly score of x is s(x) = 2^(−E[h(x)] / c(ψ)), where E[h(x)] is
//! the mean path length of x over all trees.
//!
//! ## Contamination
//! The decision threshold is the (1 − contamination) quantile of the
//! in-sample scores. A flow is Suspicious iff its score is strictly above it.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use tracing::{debug, info};

use crate::error::{QueryError, ScorerError};
use crate::features::{self, FeatureTable, FeatureVector, FlowRow, FEATURE_COUNT};

/// Euler-Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Outcome of classifying a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyLabel {
    Normal,
    Suspicious,
}

impl AnomalyLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Suspicious => "Suspicious",
        }
    }
}

impl std::fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Hyperparameters of the outlier model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Assumed fraction of outliers in the data.
    pub contamination: f64,
    /// Seed for sub-sampling and split selection.
    pub seed: u64,
    /// Number of isolation trees.
    pub n_estimators: usize,
    /// Upper bound on rows drawn per tree.
    pub max_samples: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            seed: 42,
            n_estimators: 100,
            max_samples: 256,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), ScorerError> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(ScorerError::InvalidConfig(format!(
                "contamination must be in (0.0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(ScorerError::InvalidConfig(
                "n_estimators must be greater than 0".to_string(),
            ));
        }
        if self.max_samples == 0 {
            return Err(ScorerError::InvalidConfig(
                "max_samples must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Average path length of an unsuccessful search in a BST of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

/// A single random partitioning tree.
#[derive(Debug, Clone)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build<R: Rng>(samples: &[FeatureVector], max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::build_node(samples, 0, max_depth, rng),
        }
    }

    fn build_node<R: Rng>(
        samples: &[FeatureVector],
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> IsolationNode {
        if depth >= max_depth || samples.len() <= 1 {
            return IsolationNode::Leaf {
                size: samples.len(),
            };
        }

        // Only features that still vary within this node can split it
        let candidates: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|feature| {
                let (min, max) = samples.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), s| (lo.min(s[feature]), hi.max(s[feature])),
                );
                (max > min).then_some((feature, min, max))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationNode::Leaf {
                size: samples.len(),
            };
        }

        let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let t: f64 = rng.gen();
        let split = min + t * (max - min);

        let (left, right): (Vec<FeatureVector>, Vec<FeatureVector>) =
            samples.iter().copied().partition(|s| s[feature] < split);

        IsolationNode::Internal {
            feature,
            split,
            left: Box::new(Self::build_node(&left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(&right, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &FeatureVector) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;

        loop {
            match node {
                IsolationNode::Leaf { size } => {
                    return depth as f64 + average_path_length(*size);
                }
                IsolationNode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *split {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    };
                    depth += 1;
                }
            }
        }
    }
}

/// Ensemble of isolation trees.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sub_sample_size: usize,
    normalizer: f64,
}

impl IsolationForest {
    /// Grows the forest. Identical data and config give an identical forest.
    pub fn fit(data: &[FeatureVector], config: &ScorerConfig) -> Result<Self, ScorerError> {
        config.validate()?;
        if data.is_empty() {
            return Err(ScorerError::EmptyDataset);
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let sub_sample_size = config.max_samples.min(data.len());
        let max_depth = (sub_sample_size as f64).log2().ceil() as usize;

        let trees = (0..config.n_estimators)
            .map(|_| {
                let sample: Vec<FeatureVector> = index::sample(&mut rng, data.len(), sub_sample_size)
                    .iter()
                    .map(|i| data[i])
                    .collect();
                IsolationTree::build(&sample, max_depth, &mut rng)
            })
            .collect();

        debug!(
            "Grew {} isolation trees (sub-sample {}, height limit {})",
            config.n_estimators, sub_sample_size, max_depth
        );

        Ok(Self {
            trees,
            sub_sample_size,
            normalizer: average_path_length(sub_sample_size),
        })
    }

    /// Anomaly score in (0, 1]; higher is more anomalous.
    pub fn score(&self, sample: &FeatureVector) -> f64 {
        if self.trees.is_empty() || self.normalizer == 0.0 {
            return 0.5;
        }

        let total: f64 = self.trees.iter().map(|tree| tree.path_length(sample)).sum();
        let mean_path = total / self.trees.len() as f64;

        2.0_f64.powf(-mean_path / self.normalizer)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    pub fn sub_sample_size(&self) -> usize {
        self.sub_sample_size
    }
}

/// Score threshold at which `contamination` of `scores` lie strictly above.
fn contamination_threshold(scores: &[f64], contamination: f64) -> f64 {
    let mut data = Data::new(scores.to_vec());
    data.quantile(1.0 - contamination)
}

/// A fitted outlier model with its decision threshold.
///
/// Only [`fit_and_label`] produces one, so holding a `&FittedScorer` means the
/// model has been fitted.
#[derive(Debug, Clone)]
pub struct FittedScorer {
    forest: IsolationForest,
    threshold: f64,
    config: ScorerConfig,
}

impl FittedScorer {
    /// Classifies a feature vector, returning the label and its score.
    pub fn classify(&self, sample: &FeatureVector) -> (AnomalyLabel, f64) {
        let score = self.forest.score(sample);
        let label = if score > self.threshold {
            AnomalyLabel::Suspicious
        } else {
            AnomalyLabel::Normal
        };
        (label, score)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }
}

/// A scored flow from the batch path.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFlow {
    pub row: FlowRow,
    pub label: AnomalyLabel,
    pub score: f64,
}

/// Fits the model on every row and labels the same rows, in order.
pub fn fit_and_label(
    table: &FeatureTable,
    config: &ScorerConfig,
) -> Result<(FittedScorer, Vec<LabeledFlow>), ScorerError> {
    if table.is_empty() {
        return Err(ScorerError::EmptyDataset);
    }

    let matrix = table.feature_matrix();
    let forest = IsolationForest::fit(&matrix, config)?;

    let scores: Vec<f64> = matrix.iter().map(|x| forest.score(x)).collect();
    let threshold = contamination_threshold(&scores, config.contamination);

    let scorer = FittedScorer {
        forest,
        threshold,
        config: config.clone(),
    };

    let labeled: Vec<LabeledFlow> = table
        .rows
        .iter()
        .zip(scores)
        .map(|(row, score)| LabeledFlow {
            row: row.clone(),
            label: if score > threshold {
                AnomalyLabel::Suspicious
            } else {
                AnomalyLabel::Normal
            },
            score,
        })
        .collect();

    let suspicious = labeled
        .iter()
        .filter(|f| f.label == AnomalyLabel::Suspicious)
        .count();
    info!(
        "Scored {} flows: {} suspicious (contamination {}, threshold {:.4})",
        labeled.len(),
        suspicious,
        config.contamination,
        threshold
    );

    Ok((scorer, labeled))
}

/// An ad-hoc session entered by the analyst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionQuery {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub duration_seconds: f64,
}

/// Where a single-record label came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredictionSource {
    /// No bytes moved in either direction; the model was not consulted.
    ZeroTraffic,
    Model { score: f64 },
}

/// Result of classifying a single session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: AnomalyLabel,
    pub source: PredictionSource,
}

impl Prediction {
    /// Model score, if the model was consulted.
    pub fn score(&self) -> Option<f64> {
        match self.source {
            PredictionSource::Model { score } => Some(score),
            PredictionSource::ZeroTraffic => None,
        }
    }
}

/// Classifies one session with an already fitted scorer.
pub fn predict_one(scorer: &FittedScorer, query: &SessionQuery) -> Result<Prediction, QueryError> {
    if query.duration_seconds == 0.0 {
        return Err(QueryError::ZeroDuration);
    }
    if !query.duration_seconds.is_finite() {
        return Err(QueryError::InvalidDuration(query.duration_seconds));
    }

    if query.bytes_in == 0 && query.bytes_out == 0 {
        return Ok(Prediction {
            label: AnomalyLabel::Suspicious,
            source: PredictionSource::ZeroTraffic,
        });
    }

    let bytes_in = query.bytes_in as f64;
    let bytes_out = query.bytes_out as f64;
    let avg = features::avg_packet_size(bytes_in, bytes_out, query.duration_seconds);

    let (label, score) = scorer.classify(&[bytes_in, bytes_out, query.duration_seconds, avg]);
    debug!("Query {:?} scored {:.4} -> {}", query, score, label);

    Ok(Prediction {
        label,
        source: PredictionSource::Model { score },
    })
}
