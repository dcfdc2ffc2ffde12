//! Active-rule lookups consumed by the extractor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{CustomerProfile, CustomerRule, RuleType};
use crate::segmenter::BlockType;

/// Flattened view of an active rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleLookup {
    pub rule_id: String,
    pub pattern: String,
    pub target_value: String,
    pub block_scope: Option<BlockType>,
    pub confidence: f64,
    pub description: String,
}

impl From<&CustomerRule> for RuleLookup {
    fn from(rule: &CustomerRule) -> Self {
        Self {
            rule_id: rule.id.clone(),
            pattern: rule.pattern.clone(),
            target_value: rule.target_value.clone(),
            block_scope: rule.block_scope,
            confidence: rule.confidence,
            description: rule.describe(),
        }
    }
}

fn active_of_type(profile: &CustomerProfile, rule_type: RuleType) -> HashMap<String, RuleLookup> {
    let mut map: HashMap<String, RuleLookup> = HashMap::new();
    for rule in profile.active_rules().filter(|r| r.rule_type == rule_type) {
        let key = rule.pattern.to_lowercase();
        // On a key collision the more confident rule wins; ties keep the older one.
        match map.get(&key) {
            Some(existing) if existing.confidence >= rule.confidence => {}
            _ => {
                map.insert(key, RuleLookup::from(rule));
            }
        }
    }
    map
}

/// Active label rules keyed by lower-cased label.
pub fn get_active_label_map_rules(profile: &CustomerProfile) -> HashMap<String, RuleLookup> {
    active_of_type(profile, RuleType::LabelMap)
}

/// Active regex rules keyed by lower-cased regex source.
pub fn get_active_regex_map_rules(profile: &CustomerProfile) -> HashMap<String, RuleLookup> {
    active_of_type(profile, RuleType::RegexMap)
}

/// Active cargo keyword rules keyed by lower-cased keyword.
pub fn get_active_cargo_hint_rules(profile: &CustomerProfile) -> HashMap<String, RuleLookup> {
    active_of_type(profile, RuleType::CargoHint)
}

/// Canonical form of a reference label for comparison.
///
/// Lowercases, collapses whitespace and strips trailing number markers, so
/// `"Release #"`, `"release:"` and `"RELEASE No."` all compare equal.
pub fn normalize_label(label: &str) -> String {
    let mut s = label.to_lowercase();
    loop {
        let trimmed = s
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '#' | ':' | '.' | '-'))
            .to_string();
        let stripped = ["number", "num", "no"]
            .iter()
            .find_map(|suffix| {
                trimmed
                    .strip_suffix(suffix)
                    .filter(|rest| rest.is_empty() || rest.ends_with(' '))
                    .map(str::to_string)
            })
            .filter(|rest| !rest.trim().is_empty());
        match stripped {
            Some(rest) => s = rest,
            None => {
                s = trimmed;
                break;
            }
        }
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
