//! Learning events, suggested rules and the edits they are derived from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{NewRule, RuleType};
use crate::segmenter::BlockType;
use crate::shipment::RefSubtype;

/// Fields a user correction can teach us about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LearnableField {
    RefReclassification,
    CargoCommodity,
    TemperatureMode,
    Weight,
}

impl LearnableField {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearnableField::RefReclassification => "ref_reclassification",
            LearnableField::CargoCommodity => "cargo_commodity",
            LearnableField::TemperatureMode => "temperature_mode",
            LearnableField::Weight => "weight",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ref_reclassification" => Some(LearnableField::RefReclassification),
            "cargo_commodity" => Some(LearnableField::CargoCommodity),
            "temperature_mode" => Some(LearnableField::TemperatureMode),
            "weight" => Some(LearnableField::Weight),
            _ => None,
        }
    }
}

/// Classification context captured alongside an edit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EditContext {
    pub label_hint: Option<String>,
    pub nearby_text: Option<String>,
    /// Degrees Fahrenheit.
    pub temperature_value: Option<f64>,
    pub temperature_mode: Option<String>,
    pub original_subtype: Option<RefSubtype>,
}

/// One difference between the classified and the reviewed shipment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedEdit {
    pub field_type: LearnableField,
    pub field_path: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub context: EditContext,
}

/// A recorded user correction. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningEvent {
    pub id: String,
    pub customer_id: String,
    pub tender_id: String,
    pub field_type: LearnableField,
    pub field_path: String,
    pub before_value: Option<String>,
    pub after_value: Option<String>,
    pub context: EditContext,
    pub created_at: DateTime<Utc>,
}

impl LearningEvent {
    pub fn from_edit(customer_id: &str, tender_id: &str, edit: DetectedEdit) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: customer_id.to_string(),
            tender_id: tender_id.to_string(),
            field_type: edit.field_type,
            field_path: edit.field_path,
            before_value: edit.before_value,
            after_value: edit.after_value,
            context: edit.context,
            created_at: Utc::now(),
        }
    }
}

/// A rule proposal derived from a reference reclassification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedRule {
    /// `LabelMap` when a label was found, `RegexMap` for a value-shape pattern.
    pub rule_type: RuleType,
    /// Label text or regex.
    pub pattern: String,
    pub target: RefSubtype,
    pub original_subtype: RefSubtype,
    /// The reference value that triggered the suggestion.
    pub value: String,
    pub field_path: String,
    /// Zone the value sat in; only set for label rules.
    pub block_scope: Option<BlockType>,
    pub nearby_text: Option<String>,
}

impl SuggestedRule {
    pub fn description(&self) -> String {
        match self.rule_type {
            RuleType::RegexMap => format!(
                "values shaped like {} are {} numbers",
                self.pattern,
                self.target.as_str()
            ),
            _ => format!("label '{}' means {}", self.pattern, self.target.as_str()),
        }
    }

    pub fn to_new_rule(&self, tender_id: Option<&str>) -> NewRule {
        NewRule {
            rule_type: self.rule_type,
            pattern: self.pattern.clone(),
            target_value: self.target.as_str().to_string(),
            block_scope: self.block_scope,
            description: Some(self.description()),
            learned_from_tender: tender_id.map(str::to_string),
        }
    }
}
