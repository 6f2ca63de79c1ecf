//! Error types for the debias-and-rank evaluation pipeline.
//!
//! Structural problems (schema, checkpoint, configuration) are raised before
//! any computation starts. Numeric failures (`DegenerateProjection`) and
//! lookup failures (`MissingEmbedding`) abort the run unless the caller opted
//! into skipping impressions, see [`crate::config::MissingEmbeddingPolicy`].
//!
//! A scatter matrix with fewer informative directions than the requested rank
//! is not an error: it is logged with `warn!` and reported on the extracted
//! [`crate::subspace::BiasSubspace`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while evaluating a recommender on debiased embeddings.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A candidate or history news id was never encoded.
    #[error("Missing embedding for news id '{id}'")]
    MissingEmbedding {
        /// The id that could not be resolved
        id: String,
    },

    /// Removing the bias subspace left an embedding with (near) zero norm.
    #[error("Degenerate projection: embedding {index} has norm {norm:e} after bias removal")]
    DegenerateProjection {
        /// Row index of the embedding in the neutralized set
        index: usize,
        /// Norm measured before renormalization
        norm: f64,
    },

    /// Required input columns are absent or malformed.
    #[error("Schema mismatch in {table}: {message}")]
    SchemaMismatch {
        /// Table being loaded (news, behaviors, user2int)
        table: String,
        /// What is wrong with it
        message: String,
    },

    /// No trained model artifact found.
    #[error("No checkpoint file found in {}", dir.display())]
    NoCheckpoint {
        /// Directory that was scanned
        dir: PathBuf,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of what's wrong with the parameter
        message: String,
    },

    /// Vector or batch length doesn't match what the pipeline expects.
    #[error("Dimension mismatch: expected {expected}, actual {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Decomposition failure reported by the linear-algebra backend.
    #[error("Linear algebra failure: {0}")]
    Linalg(String),

    /// Failure raised by the external recommender model.
    #[error("Model error: {message}")]
    Model {
        /// Message reported by the model
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl EvalError {
    /// Create a MissingEmbedding error.
    pub fn missing_embedding(id: impl Into<String>) -> Self {
        Self::MissingEmbedding { id: id.into() }
    }

    /// Create a SchemaMismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a Model error.
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// True for errors that only invalidate a single impression.
    pub fn is_per_impression(&self) -> bool {
        matches!(self, Self::MissingEmbedding { .. })
    }
}

impl From<smartcore::error::Failed> for EvalError {
    fn from(err: smartcore::error::Failed) -> Self {
        Self::Linalg(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
