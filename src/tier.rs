use std::fmt;

use serde::{Deserialize, Serialize};

/// Processing tier for a unit of extraction work.
///
/// Tiers are ordered by cost: `NoLlm` (free local heuristics) <
/// `Small` (cheaper paid model) < `Big` (premium model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    NoLlm,
    Small,
    Big,
}

impl Tier {
    /// All tiers, cheapest first.
    pub const ALL: [Tier; 3] = [Tier::NoLlm, Tier::Small, Tier::Big];

    /// Whether this tier involves a reasoning-service call at all.
    pub fn is_paid(self) -> bool {
        !matches!(self, Tier::NoLlm)
    }

    /// The next tier up, saturating at `Big`.
    pub fn escalated(self) -> Tier {
        match self {
            Tier::NoLlm => Tier::Small,
            Tier::Small | Tier::Big => Tier::Big,
        }
    }

    /// The next tier down, saturating at `NoLlm`.
    pub fn cheaper(self) -> Tier {
        match self {
            Tier::Big => Tier::Small,
            Tier::Small | Tier::NoLlm => Tier::NoLlm,
        }
    }

    /// Fallback chain starting at `self` and walking down to the free tier.
    pub fn fallback_chain(self) -> impl Iterator<Item = Tier> {
        let start = match self {
            Tier::Big => 0,
            Tier::Small => 1,
            Tier::NoLlm => 2,
        };
        [Tier::Big, Tier::Small, Tier::NoLlm].into_iter().skip(start)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::NoLlm => write!(f, "NO_LLM"),
            Tier::Small => write!(f, "SMALL"),
            Tier::Big => write!(f, "BIG"),
        }
    }
}
