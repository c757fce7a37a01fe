//! Error taxonomy for agreement decisions.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgreementError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgreementError {
    /// Fewer than two texts; agreement is undefined.
    #[error("need at least 2 texts to decide agreement, got {got}")]
    InsufficientInput { got: usize },

    /// The embedder could not produce a vector. `index` names the text when the failure is attributable to one.
    #[error("embedding failed{}: {reason}", at_index(.index))]
    EmbeddingFailure { index: Option<usize>, reason: String },

    /// Similarities that cannot be turned into a valid distance matrix.
    #[error("degenerate clustering input: {0}")]
    DegenerateClustering(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn at_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" for text {i}")).unwrap_or_default()
}

impl AgreementError {
    pub(crate) fn embedding(index: Option<usize>, reason: impl Into<String>) -> Self {
        Self::EmbeddingFailure { index, reason: reason.into() }
    }

    /// Stable tag used in metrics labels and HTTP error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientInput { .. } => "insufficient_input",
            Self::EmbeddingFailure { .. } => "embedding_failure",
            Self::DegenerateClustering(_) => "degenerate_clustering",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InsufficientInput { .. } | Self::InvalidConfig(_) => 400,
            Self::DegenerateClustering(_) => 422,
            Self::EmbeddingFailure { .. } => 502,
        }
    }
}
