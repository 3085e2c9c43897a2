//! The closed registry of tracked skills and learning modules.
//!
//! Modules are an enum rather than rows in a table: the scorer can only ever
//! produce a variant of `LearningModule`, and keys read back from storage are
//! validated through `FromStr`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind} key '{key}'")]
pub struct UnknownKey {
    pub kind: &'static str,
    pub key: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Skills
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    ApiDesign,
    Communication,
    DataModeling,
    Reliability,
    Scalability,
}

impl Skill {
    /// Alphabetical by key, so iteration order doubles as the tie-break order.
    pub const ALL: [Skill; 5] = [
        Skill::ApiDesign,
        Skill::Communication,
        Skill::DataModeling,
        Skill::Reliability,
        Skill::Scalability,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Skill::ApiDesign => "api_design",
            Skill::Communication => "communication",
            Skill::DataModeling => "data_modeling",
            Skill::Reliability => "reliability",
            Skill::Scalability => "scalability",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Skill::ApiDesign => "API design",
            Skill::Communication => "communication",
            Skill::DataModeling => "data modeling",
            Skill::Reliability => "reliability",
            Skill::Scalability => "scalability",
        }
    }

    /// Phrases that, found in a declared primary focus, name this skill.
    pub fn focus_aliases(&self) -> &'static [&'static str] {
        match self {
            Skill::ApiDesign => &["api design", "api", "interface", "rest", "grpc"],
            Skill::Communication => &[
                "communication",
                "behavioral",
                "behavioural",
                "presentation",
                "soft skills",
            ],
            Skill::DataModeling => &["data modeling", "data modelling", "schema", "database", "sql"],
            Skill::Reliability => &["reliability", "resilience", "availability", "incident", "on-call"],
            Skill::Scalability => &["scalability", "scaling", "scale", "performance", "throughput"],
        }
    }

    /// Role keywords for which this skill is a core competency.
    pub fn role_keywords(&self) -> &'static [&'static str] {
        match self {
            Skill::ApiDesign => &["backend", "api", "platform", "full stack", "fullstack", "integration"],
            Skill::Communication => &["lead", "manager", "staff", "principal", "architect", "consultant"],
            Skill::DataModeling => &["data", "database", "analytics", "backend", "dba"],
            Skill::Reliability => &["sre", "devops", "infrastructure", "platform", "reliability", "operations"],
            Skill::Scalability => &["backend", "infrastructure", "architect", "platform", "distributed", "sre"],
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Skill {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Skill::ALL
            .into_iter()
            .find(|skill| skill.key() == s)
            .ok_or_else(|| UnknownKey {
                kind: "skill",
                key: s.to_string(),
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Learning modules
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningModule {
    /// Cold-start module; owns no skill and is never scored.
    Onboarding,
    ApiDesignWorkshop,
    CommunicationPractice,
    DataModelingStudio,
    ReliabilityDrills,
    ScalabilityLab,
}

impl LearningModule {
    pub const ALL: [LearningModule; 6] = [
        LearningModule::Onboarding,
        LearningModule::ApiDesignWorkshop,
        LearningModule::CommunicationPractice,
        LearningModule::DataModelingStudio,
        LearningModule::ReliabilityDrills,
        LearningModule::ScalabilityLab,
    ];

    /// The module routed to when nothing is known about the user yet.
    pub const DEFAULT: LearningModule = LearningModule::Onboarding;

    pub fn key(&self) -> &'static str {
        match self {
            LearningModule::Onboarding => "onboarding",
            LearningModule::ApiDesignWorkshop => "api_design_workshop",
            LearningModule::CommunicationPractice => "communication_practice",
            LearningModule::DataModelingStudio => "data_modeling_studio",
            LearningModule::ReliabilityDrills => "reliability_drills",
            LearningModule::ScalabilityLab => "scalability_lab",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LearningModule::Onboarding => "Onboarding",
            LearningModule::ApiDesignWorkshop => "API Design Workshop",
            LearningModule::CommunicationPractice => "Communication Practice",
            LearningModule::DataModelingStudio => "Data Modeling Studio",
            LearningModule::ReliabilityDrills => "Reliability Drills",
            LearningModule::ScalabilityLab => "Scalability Lab",
        }
    }

    pub fn owning_skill(&self) -> Option<Skill> {
        match self {
            LearningModule::Onboarding => None,
            LearningModule::ApiDesignWorkshop => Some(Skill::ApiDesign),
            LearningModule::CommunicationPractice => Some(Skill::Communication),
            LearningModule::DataModelingStudio => Some(Skill::DataModeling),
            LearningModule::ReliabilityDrills => Some(Skill::Reliability),
            LearningModule::ScalabilityLab => Some(Skill::Scalability),
        }
    }

    pub fn for_skill(skill: Skill) -> LearningModule {
        match skill {
            Skill::ApiDesign => LearningModule::ApiDesignWorkshop,
            Skill::Communication => LearningModule::CommunicationPractice,
            Skill::DataModeling => LearningModule::DataModelingStudio,
            Skill::Reliability => LearningModule::ReliabilityDrills,
            Skill::Scalability => LearningModule::ScalabilityLab,
        }
    }

    /// Modules that compete in scoring (every module that owns a skill).
    pub fn scored() -> impl Iterator<Item = LearningModule> {
        Self::ALL.into_iter().filter(|m| m.owning_skill().is_some())
    }

    /// Name of the downstream service backing this module in the registry.
    pub fn service_name(&self) -> &'static str {
        self.key()
    }
}

impl fmt::Display for LearningModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for LearningModule {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LearningModule::ALL
            .into_iter()
            .find(|m| m.key() == s)
            .ok_or_else(|| UnknownKey {
                kind: "module",
                key: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_skill_has_exactly_one_module() {
        for skill in Skill::ALL {
            let module = LearningModule::for_skill(skill);
            assert_eq!(module.owning_skill(), Some(skill));
        }
        assert_eq!(LearningModule::scored().count(), Skill::ALL.len());
    }

    #[test]
    fn test_onboarding_is_not_scored() {
        assert!(LearningModule::scored().all(|m| m != LearningModule::Onboarding));
        assert_eq!(LearningModule::DEFAULT, LearningModule::Onboarding);
    }

    #[test]
    fn test_keys_round_trip_and_match_serde() {
        for module in LearningModule::ALL {
            assert_eq!(module.key().parse::<LearningModule>().unwrap(), module);
            let json = serde_json::to_string(&module).unwrap();
            assert_eq!(json, format!("\"{}\"", module.key()));
        }
        for skill in Skill::ALL {
            assert_eq!(skill.key().parse::<Skill>().unwrap(), skill);
        }
    }

    #[test]
    fn test_unknown_module_key_rejected() {
        let err = "quantum_lab".parse::<LearningModule>().unwrap_err();
        assert_eq!(err.kind, "module");
        assert_eq!(err.key, "quantum_lab");
    }

    #[test]
    fn test_skill_order_is_alphabetical() {
        let keys: Vec<_> = Skill::ALL.iter().map(|s| s.key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
