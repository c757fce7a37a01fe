use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One agent response as handed to the engine by whoever collected it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReply {
    pub provider: String,
    pub model: String,
    pub text: String,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub refusal: bool,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl ProviderReply {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into(), text: text.into(), latency_ms: None, refusal: false, meta: None }
    }
}

/// Threshold values a verdict was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds { pub mean_cos: f64, pub min_cos: f64, pub core_fraction: f64, pub silhouette: f64, pub distance: f64 }

/// Outcome of each agreement gate. All four are always evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport { pub mean_cos: bool, pub min_cos: bool, pub core_fraction: bool, pub silhouette: bool }

impl GateReport {
    pub fn all(&self) -> bool { self.mean_cos && self.min_cos && self.core_fraction && self.silhouette }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Cluster label -> member count.
    pub cluster_sizes: BTreeMap<usize, usize>,
    pub cluster_count: usize,
    pub core_fraction: f64,
    pub silhouette: f64,
    pub gates: GateReport,
    pub thresholds: Thresholds,
    pub embed_model: String,
}

/// Verdict over one batch of responses plus everything needed to audit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub agreement: bool,
    pub mean_cos: f64,
    pub min_cos: f64,
    /// Indices of the dominant cluster, ascending.
    pub core_idx: Vec<usize>,
    /// Full pairwise cosine similarity matrix.
    pub pairwise: Vec<Vec<f64>>,
    /// Cluster label per reply.
    pub labels: Vec<usize>,
    pub diagnostics: Diagnostics,
}

impl Decision {
    /// SHA-256 over the canonical JSON encoding (object keys sorted).
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let canonical = serde_json::to_vec(&value)?;
        let mut hasher = Sha256::new(); hasher.update(canonical); Ok(format!("{:x}", hasher.finalize()))
    }

    /// Groups of indices sharing a label, independent of how labels are numbered.
    pub fn partition(&self) -> Vec<Vec<usize>> { partition_of(&self.labels) }

    pub fn same_partition(&self, other: &Decision) -> bool { self.partition() == other.partition() }
}

/// Canonical partition induced by a label vector: each group ascending, groups ordered by first member.
pub fn partition_of(labels: &[usize]) -> Vec<Vec<usize>> {
    let mut by_label: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, l) in labels.iter().enumerate() { by_label.entry(*l).or_default().push(i); }
    let mut groups: Vec<Vec<usize>> = by_label.into_values().collect();
    groups.sort_by_key(|g| g[0]);
    groups
}

#[cfg(test)]
mod tests { use super::*; use proptest::prelude::*;
    fn sample_decision() -> Decision {
        Decision {
            agreement: false, mean_cos: 0.41, min_cos: -0.2, core_idx: vec![0, 1],
            pairwise: vec![vec![1.0, 0.97, -0.2], vec![0.97, 1.0, -0.18], vec![-0.2, -0.18, 1.0]],
            labels: vec![0, 0, 1],
            diagnostics: Diagnostics {
                cluster_sizes: BTreeMap::from([(0, 2), (1, 1)]), cluster_count: 2, core_fraction: 0.667, silhouette: 0.6,
                gates: GateReport { mean_cos: false, min_cos: false, core_fraction: true, silhouette: true },
                thresholds: Thresholds { mean_cos: 0.82, min_cos: 0.70, core_fraction: 0.6, silhouette: 0.2, distance: 0.25 },
                embed_model: "hashing-384".into(),
            },
        }
    }
    proptest! {
        #[test] fn prop_partition_ignores_label_numbering(labels in proptest::collection::vec(0usize..4, 1..12), offset in 1usize..50) {
            let shifted: Vec<usize> = labels.iter().map(|l| (l + offset) * 7).collect();
            prop_assert_eq!(partition_of(&labels), partition_of(&shifted));
            let covered: usize = partition_of(&labels).iter().map(|g| g.len()).sum();
            prop_assert_eq!(covered, labels.len());
        }
    }
    #[test] fn fingerprint_is_stable_across_serde() { let d = sample_decision(); let json = serde_json::to_string(&d).unwrap(); let back: Decision = serde_json::from_str(&json).unwrap(); assert_eq!(back, d); assert_eq!(back.fingerprint().unwrap(), d.fingerprint().unwrap()); }
    #[test] fn fingerprint_changes_on_mutation() { let d = sample_decision(); let orig = d.fingerprint().unwrap(); let mut flipped = d.clone(); flipped.agreement = true; assert_ne!(orig, flipped.fingerprint().unwrap()); }
    #[test] fn same_partition_tolerates_renumbering() { let a = sample_decision(); let mut b = a.clone(); b.labels = vec![5, 5, 2]; assert!(a.same_partition(&b)); b.labels = vec![0, 1, 1]; assert!(!a.same_partition(&b)); }
    #[test] fn gate_report_requires_every_gate() { let mut g = GateReport { mean_cos: true, min_cos: true, core_fraction: true, silhouette: true }; assert!(g.all()); g.min_cos = false; assert!(!g.all()); }
    #[test] fn reply_defaults_optional_fields() { let r: ProviderReply = serde_json::from_str(r#"{"provider":"openai","model":"gpt-4o","text":"Paris."}"#).unwrap(); assert_eq!(r, ProviderReply::new("openai", "gpt-4o", "Paris.")); assert!(!r.refusal); }
    #[test] fn reply_missing_text_is_rejected() { let de: Result<ProviderReply, _> = serde_json::from_str(r#"{"provider":"openai","model":"gpt-4o"}"#); assert!(de.is_err(), "Deserialization should fail without text"); }
}
