use concord_schema::Thresholds;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::embed::{HashingEmbedder, HASHING_MODEL_PREFIX};
use crate::error::{AgreementError, Result};

pub const DEFAULT_EMBED_MODEL: &str = "all-MiniLM-L6-v2";

/// Knobs for one agreement decision. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgreementConfig {
    pub min_core_fraction: f64,
    /// Merge ceiling for clustering, in cosine distance (1 - similarity).
    pub distance_threshold: f64,
    pub mean_cos_threshold: f64,
    pub min_cos_threshold: f64,
    pub require_silhouette: f64,
    pub embed_model: String,
    /// Base URL of an OpenAI-compatible embeddings server.
    pub embed_endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub embed_api_key: Option<String>,
    pub embed_timeout_ms: u64,
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            min_core_fraction: 0.6,
            distance_threshold: 0.25,
            mean_cos_threshold: 0.82,
            min_cos_threshold: 0.70,
            require_silhouette: 0.20,
            embed_model: DEFAULT_EMBED_MODEL.into(),
            embed_endpoint: None,
            embed_api_key: None,
            embed_timeout_ms: 10_000,
        }
    }
}

impl AgreementConfig {
    /// Defaults overlaid with `CONCORD_*` environment variables.
    pub fn from_env() -> Result<Self> { Self::from_lookup(|key| std::env::var(key).ok()) }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            min_core_fraction: parse_or(&lookup, "CONCORD_MIN_CORE_FRACTION", d.min_core_fraction)?,
            distance_threshold: parse_or(&lookup, "CONCORD_DISTANCE_THRESHOLD", d.distance_threshold)?,
            mean_cos_threshold: parse_or(&lookup, "CONCORD_MEAN_COS_THRESHOLD", d.mean_cos_threshold)?,
            min_cos_threshold: parse_or(&lookup, "CONCORD_MIN_COS_THRESHOLD", d.min_cos_threshold)?,
            require_silhouette: parse_or(&lookup, "CONCORD_REQUIRE_SILHOUETTE", d.require_silhouette)?,
            embed_model: lookup("CONCORD_EMBED_MODEL").unwrap_or(d.embed_model),
            embed_endpoint: lookup("CONCORD_EMBED_ENDPOINT").filter(|s| !s.trim().is_empty()),
            embed_api_key: lookup("CONCORD_EMBED_API_KEY").filter(|s| !s.trim().is_empty()),
            embed_timeout_ms: parse_or(&lookup, "CONCORD_EMBED_TIMEOUT_MS", d.embed_timeout_ms)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        check_range("min_core_fraction", self.min_core_fraction, 0.0, 1.0)?;
        check_range("distance_threshold", self.distance_threshold, 0.0, 2.0)?;
        check_range("mean_cos_threshold", self.mean_cos_threshold, -1.0, 1.0)?;
        check_range("min_cos_threshold", self.min_cos_threshold, -1.0, 1.0)?;
        check_range("require_silhouette", self.require_silhouette, -1.0, 1.0)?;
        let model = self.embed_model.trim();
        if model.is_empty() { return Err(AgreementError::InvalidConfig("embed_model is empty".into())); }
        if model.starts_with(HASHING_MODEL_PREFIX) { HashingEmbedder::from_model_id(model)?; }
        if self.embed_timeout_ms == 0 { return Err(AgreementError::InvalidConfig("embed_timeout_ms must be positive".into())); }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            mean_cos: self.mean_cos_threshold,
            min_cos: self.min_cos_threshold,
            core_fraction: self.min_core_fraction,
            silhouette: self.require_silhouette,
            distance: self.distance_threshold,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e| AgreementError::InvalidConfig(format!("{key}={raw:?}: {e}"))),
        None => Ok(default),
    }
}

fn check_range(name: &str, v: f64, lo: f64, hi: f64) -> Result<()> {
    if v.is_finite() && (lo..=hi).contains(&v) { Ok(()) } else { Err(AgreementError::InvalidConfig(format!("{name}={v} outside [{lo}, {hi}]"))) }
}
