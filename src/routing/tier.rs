//! Request capability tiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability/cost class assigned to a request.
///
/// Ordered by increasing backend capability: `Simple < Medium < Complex`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Conversational openers: greetings, thanks, yes/no, identity questions.
    Simple,
    /// Everything that is neither simple nor an explicit task.
    Medium,
    /// Task-oriented requests that get the multi-stage refinement pipeline.
    Complex,
}

impl Tier {
    /// All tiers in ascending capability order.
    pub const ALL: [Tier; 3] = [Tier::Simple, Tier::Medium, Tier::Complex];

    /// Lowercase label used in logs, metrics and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
