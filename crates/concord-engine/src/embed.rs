//! Embedding backends.
//!
//! Every backend returns an [`EmbeddingSet`]: one unit-norm vector per input text, in input
//! order, all of the same dimension. Texts that cannot be embedded are reported as
//! [`AgreementError::EmbeddingFailure`]; no placeholder vector is ever substituted.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AgreementConfig;
use crate::error::{AgreementError, Result};

pub const HASHING_MODEL_PREFIX: &str = "hashing";
pub const DEFAULT_HASHING_DIM: usize = 384;
pub const MAX_HASHING_DIM: usize = 65_536;

/// Sentence-embedding models that run in-process when built with the `local-models` feature.
pub const LOCAL_MODEL_IDS: &[&str] = &[
    "all-MiniLM-L6-v2",
    "all-MiniLM-L12-v2",
    "bge-small-en-v1.5",
    "bge-base-en-v1.5",
    "paraphrase-multilingual-MiniLM-L12-v2",
];

/// Canonical local model id for `id`, ignoring case and an `org/` prefix.
pub fn local_model_id(id: &str) -> Option<&'static str> {
    let bare = id.rsplit('/').next().unwrap_or(id);
    LOCAL_MODEL_IDS.iter().copied().find(|m| m.eq_ignore_ascii_case(bare))
}

/// Index-aligned unit-norm vectors produced by a single model.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSet {
    model: String,
    dim: usize,
    vectors: Vec<Vec<f32>>,
}

impl EmbeddingSet {
    /// L2-normalizes `raw` and checks that it forms a valid set.
    pub fn from_raw(model: impl Into<String>, raw: Vec<Vec<f32>>) -> Result<Self> {
        let dim = raw.first().map(|v| v.len()).unwrap_or(0);
        if dim == 0 { return Err(AgreementError::embedding(None, "no vectors or zero-dimensional vectors")); }
        let mut vectors = Vec::with_capacity(raw.len());
        for (i, mut v) in raw.into_iter().enumerate() {
            if v.len() != dim { return Err(AgreementError::embedding(Some(i), format!("dimension {} differs from {dim}", v.len()))); }
            if v.iter().any(|x| !x.is_finite()) { return Err(AgreementError::embedding(Some(i), "non-finite component")); }
            let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
            if norm < 1e-12 { return Err(AgreementError::embedding(Some(i), "zero vector")); }
            for x in &mut v { *x = (*x as f64 / norm) as f32; }
            vectors.push(v);
        }
        Ok(Self { model: model.into(), dim, vectors })
    }

    pub fn model(&self) -> &str { &self.model }
    pub fn dim(&self) -> usize { self.dim }
    pub fn len(&self) -> usize { self.vectors.len() }
    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }
    pub fn vectors(&self) -> &[Vec<f32>] { &self.vectors }
}

/// Maps a batch of normalized texts into a shared vector space.
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn embed(&self, texts: &[String]) -> Result<EmbeddingSet>;
}

/// Batch preconditions shared by every backend.
pub(crate) fn check_batch(texts: &[String]) -> Result<()> {
    if texts.len() < 2 { return Err(AgreementError::embedding(None, format!("need at least 2 texts, got {}", texts.len()))); }
    if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
        return Err(AgreementError::embedding(Some(i), "text is empty after normalization"));
    }
    Ok(())
}

/// Deterministic bag-of-tokens embedder: FNV-1a hashes each lowercase alphanumeric token into a bucket.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    model: String,
    dim: usize,
}

impl HashingEmbedder {
    /// `dim` must lie in `1..=MAX_HASHING_DIM`.
    pub fn new(dim: usize) -> Result<Self> {
        if !(1..=MAX_HASHING_DIM).contains(&dim) {
            return Err(AgreementError::InvalidConfig(format!("hashing dimension {dim} outside 1..={MAX_HASHING_DIM}")));
        }
        Ok(Self { model: format!("{HASHING_MODEL_PREFIX}-{dim}"), dim })
    }

    /// Accepts `hashing` or `hashing-<dim>`.
    pub fn from_model_id(id: &str) -> Result<Self> {
        match id.strip_prefix(HASHING_MODEL_PREFIX) {
            Some("") => Self::new(DEFAULT_HASHING_DIM),
            Some(rest) => match rest.strip_prefix('-').and_then(|d| d.parse::<usize>().ok()) {
                Some(dim) => Self::new(dim),
                None => Err(AgreementError::InvalidConfig(format!("bad hashing model id {id:?}, expected hashing-<dim>"))),
            },
            None => Err(AgreementError::InvalidConfig(format!("{id:?} is not a hashing model id"))),
        }
    }

    fn tokens(s: &str) -> impl Iterator<Item = String> + '_ {
        s.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(|t| t.to_lowercase())
    }

    fn raw_vector(&self, s: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in Self::tokens(s) {
            let mut x: u64 = 1469598103934665603;
            for b in token.as_bytes() { x ^= *b as u64; x = x.wrapping_mul(1099511628211); }
            v[(x % self.dim as u64) as usize] += 1.0;
        }
        v
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str { &self.model }

    fn embed(&self, texts: &[String]) -> Result<EmbeddingSet> {
        check_batch(texts)?;
        let raw: Vec<Vec<f32>> = texts.iter().map(|t| self.raw_vector(t)).collect();
        if let Some(i) = raw.iter().position(|v| v.iter().all(|x| *x == 0.0)) {
            return Err(AgreementError::embedding(Some(i), "text has no alphanumeric tokens"));
        }
        EmbeddingSet::from_raw(self.model.clone(), raw)
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> { model: &'a str, input: &'a [String] }

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse { data: Vec<EmbeddingRow> }

#[derive(Debug, Deserialize)]
struct EmbeddingRow { index: usize, embedding: Vec<f32> }

/// Client for an OpenAI-compatible `/v1/embeddings` endpoint. One request per batch, no retries.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(endpoint: &str, model: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgreementError::embedding(None, format!("http client: {e}")))?;
        let url = format!("{}/v1/embeddings", endpoint.trim_end_matches('/'));
        Ok(Self { client, url, model: model.into(), api_key })
    }
}

/// Orders rows by `index` and checks that exactly one row came back per text.
fn vectors_from_response(mut resp: EmbeddingsResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if resp.data.len() != expected {
        return Err(AgreementError::embedding(None, format!("server returned {} embeddings for {expected} texts", resp.data.len())));
    }
    resp.data.sort_by_key(|r| r.index);
    for (pos, row) in resp.data.iter().enumerate() {
        if row.index != pos { return Err(AgreementError::embedding(Some(pos), format!("missing embedding, got index {}", row.index))); }
    }
    Ok(resp.data.into_iter().map(|r| r.embedding).collect())
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str { &self.model }

    fn embed(&self, texts: &[String]) -> Result<EmbeddingSet> {
        check_batch(texts)?;
        let mut req = self.client.post(&self.url).json(&EmbeddingsRequest { model: &self.model, input: texts });
        if let Some(key) = &self.api_key { req = req.bearer_auth(key); }
        let resp = req.send().map_err(|e| AgreementError::embedding(None, format!("request to {}: {e}", self.url)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(AgreementError::embedding(None, format!("{} answered {status}: {}", self.url, body.chars().take(200).collect::<String>())));
        }
        let parsed: EmbeddingsResponse = resp.json().map_err(|e| AgreementError::embedding(None, format!("decode response: {e}")))?;
        tracing::debug!(url = %self.url, model = %self.model, n = texts.len(), "remote embeddings received");
        EmbeddingSet::from_raw(self.model.clone(), vectors_from_response(parsed, texts.len())?)
    }
}

/// Resolves the embedder for `config.embed_model`.
///
/// `hashing*` ids are always local. Otherwise a configured endpoint wins, then the
/// in-process models in [`LOCAL_MODEL_IDS`].
pub fn embedder_for(config: &AgreementConfig) -> Result<Box<dyn Embedder>> {
    let model = config.embed_model.trim();
    if model.starts_with(HASHING_MODEL_PREFIX) { return Ok(Box::new(HashingEmbedder::from_model_id(model)?)); }
    if let Some(endpoint) = config.embed_endpoint.as_deref() {
        return Ok(Box::new(HttpEmbedder::new(endpoint, model, config.embed_api_key.clone(), Duration::from_millis(config.embed_timeout_ms))?));
    }
    match local_model_id(model) {
        Some(id) => local_embedder(id),
        None => Err(AgreementError::embedding(None, format!("model {model:?} needs an embedding endpoint; set embed_endpoint or CONCORD_EMBED_ENDPOINT"))),
    }
}

#[cfg(feature = "local-models")]
fn local_embedder(id: &'static str) -> Result<Box<dyn Embedder>> { Ok(Box::new(crate::local_model::FastEmbedder::load(id)?)) }

#[cfg(not(feature = "local-models"))]
fn local_embedder(id: &'static str) -> Result<Box<dyn Embedder>> {
    Err(AgreementError::embedding(None, format!("model {id:?} runs in-process but this build lacks the local-models feature; set embed_endpoint")))
}
