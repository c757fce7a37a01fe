//! In-process sentence embeddings through `fastembed` (ONNX Runtime).
//!
//! Model files are fetched on first use into fastembed's cache directory, then loaded
//! once per process and shared by every [`FastEmbedder`] for that id.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::embed::{check_batch, local_model_id, Embedder, EmbeddingSet};
use crate::error::{AgreementError, Result};

static LOADED: Lazy<Mutex<HashMap<&'static str, Arc<Mutex<TextEmbedding>>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn fastembed_model(id: &str) -> Option<EmbeddingModel> {
    match id {
        "all-MiniLM-L6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "all-MiniLM-L12-v2" => Some(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        "paraphrase-multilingual-MiniLM-L12-v2" => Some(EmbeddingModel::ParaphraseMLMiniLML12V2),
        _ => None,
    }
}

/// A local sentence-embedding model. `TextEmbedding` is kept behind a `Mutex` so the
/// embedder stays `Send + Sync`.
pub struct FastEmbedder {
    model: &'static str,
    inner: Arc<Mutex<TextEmbedding>>,
}

impl FastEmbedder {
    pub fn load(id: &str) -> Result<Self> {
        let model = local_model_id(id).ok_or_else(|| AgreementError::InvalidConfig(format!("{id:?} is not a local model id")))?;
        let kind = fastembed_model(model).ok_or_else(|| AgreementError::InvalidConfig(format!("{model:?} has no fastembed mapping")))?;
        let mut loaded = LOADED.lock().map_err(|_| AgreementError::embedding(None, "local model cache lock poisoned"))?;
        if let Some(inner) = loaded.get(model) {
            return Ok(Self { model, inner: Arc::clone(inner) });
        }
        let start_t = Instant::now();
        let te = TextEmbedding::try_new(InitOptions::new(kind).with_show_download_progress(false))
            .map_err(|e| AgreementError::embedding(None, format!("load {model}: {e}")))?;
        tracing::info!(model, ms = start_t.elapsed().as_millis() as u64, "local embedding model loaded");
        let inner = Arc::new(Mutex::new(te));
        loaded.insert(model, Arc::clone(&inner));
        Ok(Self { model, inner })
    }
}

impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str { self.model }

    fn embed(&self, texts: &[String]) -> Result<EmbeddingSet> {
        check_batch(texts)?;
        let mut guard = self.inner.lock().map_err(|_| AgreementError::embedding(None, "local model lock poisoned"))?;
        let te: &mut TextEmbedding = &mut guard;
        let raw = te.embed(texts.to_vec(), None).map_err(|e| AgreementError::embedding(None, format!("{}: {e}", self.model)))?;
        tracing::debug!(model = self.model, n = texts.len(), "local embeddings computed");
        EmbeddingSet::from_raw(self.model, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_local_id_maps_to_a_model() {
        for id in crate::embed::LOCAL_MODEL_IDS {
            assert!(fastembed_model(id).is_some(), "{id}");
        }
    }

    #[test]
    fn unknown_ids_are_rejected_before_loading() {
        assert_eq!(FastEmbedder::load("text-embedding-3-small").err().unwrap().kind(), "invalid_config");
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2"]
    fn vectors_are_unit_norm_and_shared_across_loads() {
        let a = FastEmbedder::load("sentence-transformers/all-MiniLM-L6-v2").unwrap();
        let b = FastEmbedder::load("all-MiniLM-L6-v2").unwrap();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        let set = a.embed(&["Paris is the capital of France.".to_string(), "Berlin is in Germany.".to_string()]).unwrap();
        assert_eq!(set.dim(), 384);
        for v in set.vectors() {
            let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((n - 1.0).abs() < 1e-4);
        }
    }
}
