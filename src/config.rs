use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

// Add logging
use log::{debug, info};

/// What to do when an impression references a news id that was never encoded.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum MissingEmbeddingPolicy {
    /// Abort the whole run on the first missing id.
    #[default]
    Abort,
    /// Skip the impression and account for it in the final summary.
    Skip,
}

/// Decomposition used to extract the bias subspace from the scatter matrix.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecompositionBackend {
    /// General SVD, right singular vectors.
    #[default]
    Svd,
    /// Symmetric eigendecomposition; cheaper and equivalent for a PSD scatter matrix.
    SymmetricEigen,
}

/// Explicit configuration handed to every pipeline component.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvalConfig {
    // Debiasing
    pub bias_rank: usize,
    pub backend: DecompositionBackend,
    pub degenerate_norm_eps: f64,
    pub rank_tolerance: f64,

    // Streaming
    pub news_batch_size: usize,
    pub user_batch_size: usize,
    pub num_clicked_news_a_user: usize,
    pub max_impressions: Option<usize>,
    pub scoring_chunk: usize,
    pub missing_embedding_policy: MissingEmbeddingPolicy,

    // Tables
    pub news_attributes: Vec<String>,
    pub padding_token: String,
    pub prediction_file: String,
    pub user2int_path: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        debug!("Creating EvalConfig with default parameters");
        Self {
            bias_rank: 2,
            backend: DecompositionBackend::Svd,
            degenerate_norm_eps: 1e-10,
            rank_tolerance: 1e-9,

            news_batch_size: 128 * 16,
            user_batch_size: 128 * 16,
            num_clicked_news_a_user: 50,
            max_impressions: None,
            scoring_chunk: 1,
            missing_embedding_policy: MissingEmbeddingPolicy::Abort,

            news_attributes: vec!["title".to_string()],
            padding_token: "PADDED_NEWS".to_string(),
            prediction_file: "prediction.txt".to_string(),
            user2int_path: None,
        }
    }
}

impl EvalConfig {
    pub fn new() -> Self {
        info!("Initializing new EvalConfig");
        Self::default()
    }

    /// Load a JSON config; absent fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading evaluation config from {}", path.display());
        let raw = fs::read_to_string(path)?;
        let config: EvalConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rank k of the bias subspace, 1 ≤ k ≤ D (D is checked at extraction).
    pub fn with_bias_rank(mut self, k: usize) -> Self {
        info!("Setting bias subspace rank: {}", k);
        self.bias_rank = k;
        self
    }

    pub fn with_backend(mut self, backend: DecompositionBackend) -> Self {
        info!("Setting decomposition backend: {:?}", backend);
        self.backend = backend;
        self
    }

    /// Batch sizes for news and user encoding.
    pub fn with_batch_sizes(mut self, news: usize, user: usize) -> Self {
        info!("Setting batch sizes: news={}, user={}", news, user);
        self.news_batch_size = news;
        self.user_batch_size = user;
        self
    }

    pub fn with_history_length(mut self, n: usize) -> Self {
        info!("Setting clicked-news history length: {}", n);
        self.num_clicked_news_a_user = n;
        self
    }

    /// Stop after writing `n` impressions (smoke runs).
    pub fn with_max_impressions(mut self, n: Option<usize>) -> Self {
        info!("Setting max impressions: {:?}", n);
        self.max_impressions = n;
        self
    }

    /// Impressions scored concurrently before their lines are written in order.
    pub fn with_scoring_chunk(mut self, chunk: usize) -> Self {
        info!("Setting scoring chunk: {}", chunk);
        self.scoring_chunk = chunk;
        self
    }

    pub fn with_missing_policy(mut self, policy: MissingEmbeddingPolicy) -> Self {
        info!("Setting missing embedding policy: {:?}", policy);
        self.missing_embedding_policy = policy;
        self
    }

    pub fn with_news_attributes(mut self, attributes: Vec<String>) -> Self {
        info!("Setting news attributes: {:?}", attributes);
        self.news_attributes = attributes;
        self
    }

    pub fn with_user2int_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.user2int_path = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bias_rank == 0 {
            return Err(EvalError::invalid_parameter("bias_rank must be >= 1"));
        }
        if self.news_batch_size == 0 || self.user_batch_size == 0 {
            return Err(EvalError::invalid_parameter("batch sizes must be > 0"));
        }
        if self.num_clicked_news_a_user == 0 {
            return Err(EvalError::invalid_parameter(
                "num_clicked_news_a_user must be > 0",
            ));
        }
        if self.scoring_chunk == 0 {
            return Err(EvalError::invalid_parameter("scoring_chunk must be > 0"));
        }
        if !(self.degenerate_norm_eps.is_finite() && self.degenerate_norm_eps >= 0.0) {
            return Err(EvalError::invalid_parameter(
                "degenerate_norm_eps must be finite and non-negative",
            ));
        }
        if !(self.rank_tolerance.is_finite() && self.rank_tolerance >= 0.0) {
            return Err(EvalError::invalid_parameter(
                "rank_tolerance must be finite and non-negative",
            ));
        }
        if self.padding_token.trim().is_empty() {
            return Err(EvalError::invalid_parameter("padding_token must not be blank"));
        }
        Ok(())
    }
}
