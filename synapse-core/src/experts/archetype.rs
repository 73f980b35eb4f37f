//! Closed set of expert archetypes (spec §4.3). Each is a preset of
//! temperature, verbosity, and prompt prefix; a configuration may instantiate
//! the same archetype more than once with varied parameters to encourage
//! diversity (spec §9's "closed enum of archetypes" redesign).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Archetype {
    Performance,
    Safety,
    Simplicity,
    Robustness,
    Balanced,
}

/// A preset's default temperature and prompt prefix, used when an
/// `ExpertConfig` doesn't override them explicitly.
pub struct ArchetypePreset {
    pub temperature: f64,
    pub prompt_prefix: &'static str,
}

impl Archetype {
    pub fn preset(self) -> ArchetypePreset {
        match self {
            Archetype::Performance => ArchetypePreset {
                temperature: 0.3,
                prompt_prefix: "Optimize for raw throughput and latency above all else.",
            },
            Archetype::Safety => ArchetypePreset {
                temperature: 0.1,
                prompt_prefix: "Treat correctness and safety as non-negotiable; prefer the conservative option.",
            },
            Archetype::Simplicity => ArchetypePreset {
                temperature: 0.5,
                prompt_prefix: "Prefer the smallest, most readable solution that satisfies the goal.",
            },
            Archetype::Robustness => ArchetypePreset {
                temperature: 0.4,
                prompt_prefix: "Anticipate edge cases and failure modes; favor defensive handling.",
            },
            Archetype::Balanced => ArchetypePreset {
                temperature: 0.6,
                prompt_prefix: "Balance performance, simplicity, and robustness evenly.",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_archetype_has_a_preset() {
        for archetype in [
            Archetype::Performance,
            Archetype::Safety,
            Archetype::Simplicity,
            Archetype::Robustness,
            Archetype::Balanced,
        ] {
            assert!(!archetype.preset().prompt_prefix.is_empty());
        }
    }
}
