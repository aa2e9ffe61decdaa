//! Static registry of backend capability tiers.
//!
//! A [`ModelCatalog`] is built once at startup and never mutated. Its
//! [`version`](ModelCatalog::version) is derived from the descriptor set, so
//! any change to model configuration produces a new version and invalidates
//! every response cached under the old one.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::tier::Tier;
use crate::OrchestratorError;

/// One backend capability level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelDescriptor {
    /// Backend model identifier (e.g. `"gpt-4o-mini"`).
    pub identifier: String,
    /// Tier this model serves.
    pub tier: Tier,
    /// Sampling temperature passed to the backend.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// The model chosen for one request and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSelection {
    /// Identifier of the chosen descriptor.
    pub model: String,
    /// Tier the request was classified as.
    pub tier: Tier,
    /// Classifier rationale.
    pub reason: String,
    /// `true` when the requested tier had no descriptor.
    pub fallback: bool,
}

/// Result of [`ModelCatalog::resolve`].
#[derive(Debug, Clone, Copy)]
pub struct Resolution<'a> {
    /// The descriptor that will serve the request.
    pub descriptor: &'a ModelDescriptor,
    /// `true` when the requested tier was missing and the highest-capability
    /// descriptor was substituted.
    pub fallback: bool,
}

/// The reference configuration: one descriptor per tier.
pub fn reference_descriptors() -> Vec<ModelDescriptor> {
    reference_set().into()
}

fn reference_set() -> [ModelDescriptor; 3] {
    [
        ModelDescriptor {
            identifier: "gpt-4o-mini".into(),
            tier: Tier::Simple,
            temperature: 0.7,
            max_output_tokens: 256,
            description: "Fast, low-cost model for conversational turns".into(),
        },
        ModelDescriptor {
            identifier: "gpt-4o".into(),
            tier: Tier::Medium,
            temperature: 0.7,
            max_output_tokens: 1024,
            description: "General-purpose model for standard questions".into(),
        },
        ModelDescriptor {
            identifier: "gpt-4.1".into(),
            tier: Tier::Complex,
            temperature: 0.4,
            max_output_tokens: 4096,
            description: "Highest-capability model for multi-stage problem solving".into(),
        },
    ]
}

/// Immutable tier → descriptor lookup.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    /// Sorted by ascending tier.
    descriptors: Vec<ModelDescriptor>,
    /// Copy of the last entry of `descriptors`.
    highest: ModelDescriptor,
    version: String,
}

impl ModelCatalog {
    /// Build a catalog from a descriptor set.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the set is empty or
    /// declares the same tier twice.
    pub fn new(mut descriptors: Vec<ModelDescriptor>) -> Result<Self, OrchestratorError> {
        let mut seen = HashSet::new();
        for d in &descriptors {
            if !seen.insert(d.tier) {
                return Err(OrchestratorError::ConfigError(format!(
                    "model catalog declares tier '{}' more than once",
                    d.tier
                )));
            }
        }

        descriptors.sort_by_key(|d| d.tier);
        let highest = descriptors.last().cloned().ok_or_else(|| {
            OrchestratorError::ConfigError(
                "model catalog must contain at least one descriptor".into(),
            )
        })?;
        let version = catalog_version(&descriptors);

        Ok(Self {
            descriptors,
            highest,
            version,
        })
    }

    /// The reference three-tier catalog.
    pub fn reference() -> Self {
        let [simple, medium, complex] = reference_set();
        let highest = complex.clone();
        let descriptors = vec![simple, medium, complex];
        let version = catalog_version(&descriptors);
        Self {
            descriptors,
            highest,
            version,
        }
    }

    /// Version string that changes whenever any descriptor changes.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All descriptors in ascending tier order.
    pub fn descriptors(&self) -> &[ModelDescriptor] {
        &self.descriptors
    }

    /// Exact lookup, without fallback.
    pub fn get(&self, tier: Tier) -> Option<&ModelDescriptor> {
        self.descriptors.iter().find(|d| d.tier == tier)
    }

    /// The descriptor with the highest tier.
    pub fn highest(&self) -> &ModelDescriptor {
        &self.highest
    }

    /// Resolve the descriptor serving `tier`.
    ///
    /// A tier missing from the catalog resolves to the highest-capability
    /// descriptor with `fallback = true`.
    pub fn resolve(&self, tier: Tier) -> Resolution<'_> {
        match self.get(tier) {
            Some(descriptor) => Resolution {
                descriptor,
                fallback: false,
            },
            None => {
                let descriptor = self.highest();
                warn!(
                    requested = tier.as_str(),
                    model = %descriptor.identifier,
                    "no model configured for tier, using highest-capability model"
                );
                Resolution {
                    descriptor,
                    fallback: true,
                }
            }
        }
    }
}

fn catalog_version(descriptors: &[ModelDescriptor]) -> String {
    let mut hasher = DefaultHasher::new();
    for d in descriptors {
        d.identifier.hash(&mut hasher);
        d.tier.hash(&mut hasher);
        d.temperature.to_bits().hash(&mut hasher);
        d.max_output_tokens.hash(&mut hasher);
    }
    format!("v{:012x}", hasher.finish() & 0xffff_ffff_ffff)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, tier: Tier) -> ModelDescriptor {
        ModelDescriptor {
            identifier: id.into(),
            tier,
            temperature: 0.5,
            max_output_tokens: 128,
            description: String::new(),
        }
    }

    #[test]
    fn test_reference_catalog_has_one_descriptor_per_tier() {
        let catalog = ModelCatalog::reference();
        for tier in Tier::ALL {
            let resolution = catalog.resolve(tier);
            assert_eq!(resolution.descriptor.tier, tier);
            assert!(!resolution.fallback);
        }
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(matches!(
            ModelCatalog::new(vec![]),
            Err(OrchestratorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_duplicate_tier_is_rejected() {
        let result = ModelCatalog::new(vec![
            descriptor("a", Tier::Simple),
            descriptor("b", Tier::Simple),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_tier_falls_back_to_highest() {
        let catalog = ModelCatalog::new(vec![
            descriptor("small", Tier::Simple),
            descriptor("mid", Tier::Medium),
        ])
        .expect("test: valid catalog");

        let resolution = catalog.resolve(Tier::Complex);
        assert!(resolution.fallback);
        assert_eq!(resolution.descriptor.identifier, "mid");
    }

    #[test]
    fn test_descriptors_sorted_by_tier_regardless_of_input_order() {
        let catalog = ModelCatalog::new(vec![
            descriptor("big", Tier::Complex),
            descriptor("small", Tier::Simple),
        ])
        .expect("test: valid catalog");
        let ids: Vec<_> = catalog.descriptors().iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids, vec!["small", "big"]);
        assert_eq!(catalog.highest().identifier, "big");
    }

    #[test]
    fn test_single_descriptor_is_its_own_highest() {
        let catalog =
            ModelCatalog::new(vec![descriptor("only", Tier::Medium)]).expect("test: valid catalog");
        assert_eq!(catalog.highest().identifier, "only");
        let resolution = catalog.resolve(Tier::Complex);
        assert!(resolution.fallback);
        assert_eq!(resolution.descriptor.identifier, "only");
    }

    #[test]
    fn test_reference_catalog_highest_is_complex_tier() {
        let catalog = ModelCatalog::reference();
        assert_eq!(catalog.highest().tier, Tier::Complex);
        assert_eq!(catalog.highest(), catalog.descriptors().last().expect("test: non-empty"));
    }

    #[test]
    fn test_version_is_stable_for_identical_descriptors() {
        let a = ModelCatalog::reference();
        let b = ModelCatalog::new(reference_descriptors()).expect("test: valid catalog");
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn test_version_changes_when_configuration_changes() {
        let base = ModelCatalog::reference();
        let mut changed = reference_descriptors();
        changed[0].temperature = 0.1;
        let changed = ModelCatalog::new(changed).expect("test: valid catalog");
        assert_ne!(base.version(), changed.version());
    }
}
