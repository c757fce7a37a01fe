//! Semantic agreement decisions over a batch of agent responses.
//!
//! Pipeline: canonicalize -> embed -> pairwise cosine -> average-linkage clustering ->
//! four-gate verdict. Every call is independent; nothing is cached between calls.
//!
//! ```no_run
//! use concord_engine::{agreement_decision, batch_normalize, AgreementConfig};
//!
//! let texts = batch_normalize(&["Paris is the capital of France.", "The capital of France is Paris."]);
//! let cfg = AgreementConfig { embed_model: "hashing".into(), ..Default::default() };
//! let decision = agreement_decision(&texts, &cfg)?;
//! assert!(decision.agreement);
//! # Ok::<(), concord_engine::AgreementError>(())
//! ```

pub mod canonicalize;
pub mod cluster;
pub mod config;
pub mod embed;
pub mod error;
pub mod evaluate;
#[cfg(feature = "local-models")]
pub mod local_model;
pub mod similarity;

use metrics::{counter, histogram};
use tracing::{debug, info};

pub use canonicalize::{batch_normalize, normalize};
pub use concord_schema::{Decision, Diagnostics, GateReport, ProviderReply, Thresholds};
pub use config::AgreementConfig;
pub use embed::{embedder_for, Embedder, EmbeddingSet, HashingEmbedder, HttpEmbedder};
#[cfg(feature = "local-models")]
pub use local_model::FastEmbedder;
pub use error::{AgreementError, Result};

use similarity::SimilarityMatrix;

/// Decides whether `texts` agree, using the embedder named by `config.embed_model`.
///
/// Texts are expected to be normalized already (see [`normalize`]).
pub fn agreement_decision(texts: &[String], config: &AgreementConfig) -> Result<Decision> {
    config.validate().map_err(record_error)?;
    if texts.len() < 2 { return Err(record_error(AgreementError::InsufficientInput { got: texts.len() })); }
    let embedder = embedder_for(config).map_err(record_error)?;
    agreement_decision_with(embedder.as_ref(), texts, config)
}

/// Same as [`agreement_decision`] with an explicit embedding backend.
#[tracing::instrument(skip_all, fields(n = texts.len(), model = %embedder.model_id()))]
pub fn agreement_decision_with(embedder: &dyn Embedder, texts: &[String], config: &AgreementConfig) -> Result<Decision> {
    config.validate().map_err(record_error)?;
    decide(embedder, texts, config).map_err(record_error)
}

/// Normalizes each reply's text and decides agreement over the batch.
pub fn decide_replies(replies: &[ProviderReply], config: &AgreementConfig) -> Result<Decision> {
    let texts: Vec<String> = replies.iter().map(|r| normalize(&r.text)).collect();
    debug!(refusals = replies.iter().filter(|r| r.refusal).count(), "deciding over provider replies");
    agreement_decision(&texts, config)
}

fn decide(embedder: &dyn Embedder, texts: &[String], config: &AgreementConfig) -> Result<Decision> {
    if texts.len() < 2 { return Err(AgreementError::InsufficientInput { got: texts.len() }); }

    let embeddings = embedder.embed(texts)?;
    if embeddings.len() != texts.len() {
        return Err(AgreementError::embedding(None, format!("{} vectors for {} texts", embeddings.len(), texts.len())));
    }
    debug!(dim = embeddings.dim(), "embedded batch");

    let similarity = SimilarityMatrix::from_embeddings(&embeddings)?;
    let assignment = cluster::cluster(&similarity.distances(), config.distance_threshold);
    debug!(clusters = assignment.cluster_count(), "clustered batch");

    let decision = evaluate::evaluate(similarity, assignment, config.thresholds(), embeddings.model());
    let g = decision.diagnostics.gates;
    info!(
        agreement = decision.agreement,
        mean_cos = decision.mean_cos,
        min_cos = decision.min_cos,
        core_fraction = decision.diagnostics.core_fraction,
        silhouette = decision.diagnostics.silhouette,
        gate_mean = g.mean_cos,
        gate_min = g.min_cos,
        gate_core = g.core_fraction,
        gate_silhouette = g.silhouette,
        "agreement decided"
    );
    counter!("concord_decisions_total", "verdict" => if decision.agreement { "agree" } else { "disagree" }).increment(1);
    histogram!("concord_mean_cos").record(decision.mean_cos);
    histogram!("concord_cluster_count").record(decision.diagnostics.cluster_count as f64);
    Ok(decision)
}

fn record_error(e: AgreementError) -> AgreementError {
    counter!("concord_errors_total", "kind" => e.kind()).increment(1);
    debug!(error = %e, "agreement decision failed");
    e
}
