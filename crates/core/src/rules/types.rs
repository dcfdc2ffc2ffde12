//! Rule and customer profile types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::segmenter::BlockType;

/// Errors from rule lifecycle and customer persistence.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(String),

    #[error("Cannot move rule {rule_id} from {current} to {target}")]
    InvalidStateTransition {
        rule_id: String,
        current: String,
        target: String,
    },

    #[error("Customer {customer_id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        customer_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Database error: {0}")]
    Database(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// Label text preceding a value (e.g. "Release #") maps to a reference subtype.
    LabelMap,
    /// Value shape (regex) maps to a reference subtype.
    RegexMap,
    /// Keyword in the text maps to a commodity.
    CargoHint,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::LabelMap => "label_map",
            RuleType::RegexMap => "regex_map",
            RuleType::CargoHint => "cargo_hint",
        }
    }

    /// Starting confidence for a freshly proposed rule.
    pub fn initial_confidence(&self) -> f64 {
        match self {
            RuleType::LabelMap => 0.7,
            RuleType::RegexMap => 0.6,
            RuleType::CargoHint => 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Proposed,
    Active,
    Deprecated,
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleStatus::Proposed => "proposed",
            RuleStatus::Active => "active",
            RuleStatus::Deprecated => "deprecated",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Approve,
    Deprecate,
    Reactivate,
    Delete,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Approve => "approve",
            RuleAction::Deprecate => "deprecate",
            RuleAction::Reactivate => "reactivate",
            RuleAction::Delete => "delete",
        }
    }
}

/// Coarse temperature class used to key learned commodities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureCategory {
    Frozen,
    Refrigerated,
    Dry,
}

impl TemperatureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureCategory::Frozen => "frozen",
            TemperatureCategory::Refrigerated => "refrigerated",
            TemperatureCategory::Dry => "dry",
        }
    }

    /// Category for a temperature in Fahrenheit, falling back to mode keywords.
    ///
    /// Below 32°F is frozen, 32 to 45°F inclusive is refrigerated, above is dry.
    pub fn classify(fahrenheit: Option<f64>, mode: Option<&str>) -> Option<Self> {
        if let Some(f) = fahrenheit {
            return Some(if f < 32.0 {
                TemperatureCategory::Frozen
            } else if f <= 45.0 {
                TemperatureCategory::Refrigerated
            } else {
                TemperatureCategory::Dry
            });
        }
        let mode = mode?.to_lowercase();
        if mode.contains("frozen") {
            Some(TemperatureCategory::Frozen)
        } else if mode.contains("refrigerated") || mode.contains("reefer") {
            Some(TemperatureCategory::Refrigerated)
        } else if mode.contains("dry") || mode.contains("ambient") {
            Some(TemperatureCategory::Dry)
        } else {
            None
        }
    }
}

/// A learned extraction rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerRule {
    pub id: String,
    pub rule_type: RuleType,
    /// Label text, regex source or cargo keyword depending on `rule_type`.
    pub pattern: String,
    /// Reference subtype or commodity name.
    pub target_value: String,
    /// Only fire inside this zone of the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_scope: Option<BlockType>,
    pub status: RuleStatus,
    pub confidence: f64,
    #[serde(default = "default_times_learned")]
    pub times_learned: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deprecated_by: Option<String>,
    #[serde(default)]
    pub deprecated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub learned_from_tender: Option<String>,
}

fn default_times_learned() -> u32 {
    1
}

impl CustomerRule {
    /// Human readable summary used in provenance reasons.
    pub fn describe(&self) -> String {
        if let Some(ref d) = self.description {
            return d.clone();
        }
        match self.rule_type {
            RuleType::LabelMap => format!("label \"{}\" -> {}", self.pattern, self.target_value),
            RuleType::RegexMap => format!("pattern /{}/ -> {}", self.pattern, self.target_value),
            RuleType::CargoHint => format!("keyword \"{}\" -> {}", self.pattern, self.target_value),
        }
    }

    fn transition_error(&self, target: &str) -> RuleError {
        RuleError::InvalidStateTransition {
            rule_id: self.id.clone(),
            current: self.status.to_string(),
            target: target.to_string(),
        }
    }

    pub fn approve(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), RuleError> {
        if self.status != RuleStatus::Proposed {
            return Err(self.transition_error("active"));
        }
        self.status = RuleStatus::Active;
        self.approved_by = Some(actor.to_string());
        self.approved_at = Some(now);
        Ok(())
    }

    pub fn deprecate(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), RuleError> {
        if self.status != RuleStatus::Active {
            return Err(self.transition_error("deprecated"));
        }
        self.status = RuleStatus::Deprecated;
        self.approved_by = None;
        self.approved_at = None;
        self.deprecated_by = Some(actor.to_string());
        self.deprecated_at = Some(now);
        Ok(())
    }

    pub fn reactivate(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), RuleError> {
        if self.status != RuleStatus::Deprecated {
            return Err(self.transition_error("active"));
        }
        self.status = RuleStatus::Active;
        self.approved_by = Some(actor.to_string());
        self.approved_at = Some(now);
        self.deprecated_by = None;
        self.deprecated_at = None;
        Ok(())
    }

    fn is_equivalent(&self, rule_type: RuleType, pattern: &str, target: &str) -> bool {
        self.rule_type == rule_type
            && self.pattern.to_lowercase() == pattern.to_lowercase()
            && self.target_value.eq_ignore_ascii_case(target)
    }
}

/// Cargo defaults learned from reviewer edits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CargoHints {
    /// First commodity learned per temperature category.
    pub commodity_by_temp: BTreeMap<TemperatureCategory, String>,
    pub default_commodity: Option<String>,
}

/// A rule to propose on a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub rule_type: RuleType,
    pub pattern: String,
    pub target_value: String,
    pub block_scope: Option<BlockType>,
    pub description: Option<String>,
    pub learned_from_tender: Option<String>,
}

/// Outcome of [`CustomerProfile::propose_rule`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProposeOutcome {
    pub rule_id: String,
    /// False when an equivalent rule existed and was reinforced.
    pub created: bool,
    pub confidence: f64,
}

/// Customer profile owning its rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<CustomerRule>,
    #[serde(default)]
    pub cargo_hints: CargoHints,
    /// Free-form notes passed to the classifier prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_notes: Option<String>,
    /// Optimistic concurrency token, bumped on every save.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rules: Vec::new(),
            cargo_hints: CargoHints::default(),
            prompt_notes: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn rule(&self, rule_id: &str) -> Option<&CustomerRule> {
        self.rules.iter().find(|r| r.id == rule_id)
    }

    pub fn active_rules(&self) -> impl Iterator<Item = &CustomerRule> {
        self.rules.iter().filter(|r| r.status == RuleStatus::Active)
    }

    /// Apply an admin action to one rule. Failed actions leave the profile untouched.
    pub fn apply_action(
        &mut self,
        rule_id: &str,
        action: RuleAction,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RuleError> {
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| RuleError::RuleNotFound(rule_id.to_string()))?;

        match action {
            RuleAction::Approve => self.rules[idx].approve(actor, now)?,
            RuleAction::Deprecate => self.rules[idx].deprecate(actor, now)?,
            RuleAction::Reactivate => self.rules[idx].reactivate(actor, now)?,
            RuleAction::Delete => {
                if self.rules[idx].status != RuleStatus::Proposed {
                    return Err(self.rules[idx].transition_error("deleted"));
                }
                self.rules.remove(idx);
            }
        }
        self.updated_at = now;
        Ok(())
    }

    /// Propose a rule, or reinforce an equivalent one that already exists.
    ///
    /// Reinforcement raises confidence by 0.1 (capped at 1.0) and never lowers it.
    pub fn propose_rule(&mut self, rule: NewRule, actor: &str, now: DateTime<Utc>) -> ProposeOutcome {
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|r| r.is_equivalent(rule.rule_type, &rule.pattern, &rule.target_value))
        {
            existing.confidence = (existing.confidence + 0.1).min(1.0).max(existing.confidence);
            existing.times_learned += 1;
            self.updated_at = now;
            return ProposeOutcome {
                rule_id: existing.id.clone(),
                created: false,
                confidence: existing.confidence,
            };
        }

        let confidence = rule.rule_type.initial_confidence();
        let id = uuid::Uuid::new_v4().to_string();
        self.rules.push(CustomerRule {
            id: id.clone(),
            rule_type: rule.rule_type,
            pattern: rule.pattern,
            target_value: rule.target_value,
            block_scope: rule.block_scope,
            status: RuleStatus::Proposed,
            confidence,
            times_learned: 1,
            description: rule.description,
            created_by: actor.to_string(),
            created_at: now,
            approved_by: None,
            approved_at: None,
            deprecated_by: None,
            deprecated_at: None,
            learned_from_tender: rule.learned_from_tender,
        });
        self.updated_at = now;
        ProposeOutcome {
            rule_id: id,
            created: true,
            confidence,
        }
    }
}
