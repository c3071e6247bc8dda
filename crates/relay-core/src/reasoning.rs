//! Reasoning ("thinking") levels and their token budgets.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reasoning effort derived from the caller's thinking budget.
///
/// Controls how much reasoning the model produces before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    /// Reasoning explicitly disabled
    Off,
    /// Let the provider decide (no explicit budget)
    #[default]
    Auto,
    /// Light reasoning (1k tokens)
    Low,
    /// Moderate reasoning (16k tokens)
    Medium,
    /// Deep reasoning (32k tokens)
    High,
}

impl ReasoningLevel {
    /// Classifies a thinking budget.
    ///
    /// `None` or a negative budget means [`ReasoningLevel::Auto`], zero means
    /// [`ReasoningLevel::Off`].
    pub fn from_budget(budget: Option<i32>) -> Self {
        match budget {
            None => ReasoningLevel::Auto,
            Some(b) if b < 0 => ReasoningLevel::Auto,
            Some(0) => ReasoningLevel::Off,
            Some(b) if b <= 1024 => ReasoningLevel::Low,
            Some(b) if b <= 16_000 => ReasoningLevel::Medium,
            Some(_) => ReasoningLevel::High,
        }
    }

    /// Default token budget for this level. `None` for Off and Auto.
    pub fn budget_tokens(self) -> Option<u32> {
        match self {
            ReasoningLevel::Off | ReasoningLevel::Auto => None,
            ReasoningLevel::Low => Some(1024),
            ReasoningLevel::Medium => Some(16_000),
            ReasoningLevel::High => Some(32_000),
        }
    }

    /// Effort label used by `OpenAI` reasoning models.
    pub fn effort_label(self) -> Option<&'static str> {
        match self {
            ReasoningLevel::Off => Some("none"),
            ReasoningLevel::Auto => None,
            ReasoningLevel::Low => Some("low"),
            ReasoningLevel::Medium => Some("medium"),
            ReasoningLevel::High => Some("high"),
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, ReasoningLevel::Off)
    }
}

impl FromStr for ReasoningLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "off" => Ok(ReasoningLevel::Off),
            "auto" => Ok(ReasoningLevel::Auto),
            "low" => Ok(ReasoningLevel::Low),
            "medium" => Ok(ReasoningLevel::Medium),
            "high" => Ok(ReasoningLevel::High),
            other => Err(format!(
                "Invalid reasoning level '{other}'. Valid options: off, auto, low, medium, high"
            )),
        }
    }
}

/// Resolved reasoning request for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningBudget {
    pub level: ReasoningLevel,
    /// Explicit token budget. `None` for Off and Auto.
    pub tokens: Option<u32>,
}

impl ReasoningBudget {
    /// An explicit positive budget is used verbatim; otherwise the level default.
    pub fn from_budget(budget: Option<i32>) -> Self {
        let level = ReasoningLevel::from_budget(budget);
        let tokens = match budget {
            Some(b) if b > 0 => Some(b as u32),
            _ => level.budget_tokens(),
        };
        Self { level, tokens }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_budget() {
        assert_eq!(ReasoningLevel::from_budget(None), ReasoningLevel::Auto);
        assert_eq!(ReasoningLevel::from_budget(Some(-1)), ReasoningLevel::Auto);
        assert_eq!(ReasoningLevel::from_budget(Some(0)), ReasoningLevel::Off);
        assert_eq!(ReasoningLevel::from_budget(Some(512)), ReasoningLevel::Low);
        assert_eq!(ReasoningLevel::from_budget(Some(1024)), ReasoningLevel::Low);
        assert_eq!(ReasoningLevel::from_budget(Some(8000)), ReasoningLevel::Medium);
        assert_eq!(ReasoningLevel::from_budget(Some(40_000)), ReasoningLevel::High);
    }

    #[test]
    fn test_budget_uses_explicit_tokens() {
        let budget = ReasoningBudget::from_budget(Some(5000));
        assert_eq!(budget.level, ReasoningLevel::Medium);
        assert_eq!(budget.tokens, Some(5000));

        let auto = ReasoningBudget::from_budget(None);
        assert_eq!(auto.tokens, None);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("HIGH".parse::<ReasoningLevel>(), Ok(ReasoningLevel::High));
        assert!("extreme".parse::<ReasoningLevel>().is_err());
    }
}
