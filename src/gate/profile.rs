use serde::{Deserialize, Serialize};

use super::candidate::Candidate;

/// A field the gate can require to be present and non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    Name,
    Kind,
    Definition,
}

impl RequiredField {
    /// Whether the field is present and non-empty on the candidate.
    pub fn present_on(self, candidate: &Candidate) -> bool {
        match self {
            RequiredField::Name => !candidate.name.trim().is_empty(),
            RequiredField::Kind => !candidate.kind.trim().is_empty(),
            RequiredField::Definition => candidate
                .definition
                .as_deref()
                .is_some_and(|d| !d.trim().is_empty()),
        }
    }
}

/// Immutable gate configuration. Three canonical variants are provided;
/// custom profiles are deliberately not constructible from config so the
/// promotion policy stays an enumerated choice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateProfile {
    pub name: &'static str,
    pub min_confidence: f64,
    pub required_fields: &'static [RequiredField],
    pub min_promotion_rate: f64,
}

impl GateProfile {
    pub const fn strict() -> Self {
        Self {
            name: "strict",
            min_confidence: 0.85,
            required_fields: &[
                RequiredField::Name,
                RequiredField::Kind,
                RequiredField::Definition,
            ],
            min_promotion_rate: 0.50,
        }
    }

    pub const fn balanced() -> Self {
        Self {
            name: "balanced",
            min_confidence: 0.70,
            required_fields: &[RequiredField::Name, RequiredField::Kind],
            min_promotion_rate: 0.30,
        }
    }

    pub const fn permissive() -> Self {
        Self {
            name: "permissive",
            min_confidence: 0.60,
            required_fields: &[RequiredField::Name],
            min_promotion_rate: 0.20,
        }
    }

    /// Resolves a profile by its config name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "strict" => Some(Self::strict()),
            "balanced" => Some(Self::balanced()),
            "permissive" => Some(Self::permissive()),
            _ => None,
        }
    }
}
