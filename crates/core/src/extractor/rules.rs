//! Application of active customer rules to extracted candidates.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::extract::{clean_value, has_digit, new_candidate};
use super::types::{
    AppliedCustomerRules, AppliedRule, Candidate, CandidateType, Confidence, Position,
    SkippedRule,
};
use crate::rules::{
    get_active_cargo_hint_rules, get_active_label_map_rules, get_active_regex_map_rules,
    normalize_label, CustomerProfile, RuleLookup, RuleType, TemperatureCategory,
};
use crate::segmenter::{Segmentation, DEFAULT_LOOKBEHIND_WINDOW};
use crate::shipment::{RefSubtype, Temperature, TemperatureUnit};

/// Tokens a regex rule is tested against.
static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9\-/]*").expect("token pattern must compile"));

pub(crate) const SKIP_SCOPE_MISMATCH: &str = "scope_mismatch";
pub(crate) const SKIP_INVALID_REGEX: &str = "invalid_regex";
pub(crate) const SKIP_INVALID_TARGET: &str = "invalid_target";
pub(crate) const SKIP_SAME_SUBTYPE: &str = "already_resolved_same_subtype";
pub(crate) const SKIP_RESOLVED_BY_RULE: &str = "already_resolved_by_rule";
pub(crate) const SKIP_LABEL_PRECEDENCE: &str = "label_takes_precedence";
pub(crate) const SKIP_LOST_OVERLAP: &str = "lost_overlap";

/// Regex matching a learned label followed by a value.
fn label_regex(label: &str) -> Option<Regex> {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return None;
    }
    let words: Vec<String> = normalized
        .split_whitespace()
        .map(regex_lite::escape)
        .collect();
    Regex::new(&format!(
        r"(?i)\b{}\b\.?[ \t]*(?:#|no\.|num(?:ber)?\.?)?[ \t]*:?[ \t]*([a-z0-9][a-z0-9\-/]*)",
        words.join(r"[ \t]+")
    ))
    .ok()
}

fn keyword_regex(keyword: &str) -> Option<Regex> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b{}\b", regex_lite::escape(keyword))).ok()
}

/// Sorted by key so application order never depends on hash order.
fn sorted(map: std::collections::HashMap<String, RuleLookup>) -> Vec<RuleLookup> {
    let mut rules: Vec<(String, RuleLookup)> = map.into_iter().collect();
    rules.sort_by(|a, b| a.0.cmp(&b.0));
    rules.into_iter().map(|(_, r)| r).collect()
}

/// Active rules of one customer, ready to run.
pub(crate) struct RuleSet {
    labels: Vec<RuleLookup>,
    regexes: Vec<RuleLookup>,
    cargo: Vec<RuleLookup>,
}

impl RuleSet {
    pub(crate) fn from_profile(profile: &CustomerProfile) -> Self {
        let mut labels = sorted(get_active_label_map_rules(profile));
        // Longer labels are more specific and run first.
        labels.sort_by(|a, b| b.pattern.len().cmp(&a.pattern.len()));
        Self {
            labels,
            regexes: sorted(get_active_regex_map_rules(profile)),
            cargo: sorted(get_active_cargo_hint_rules(profile)),
        }
    }

    pub(crate) fn apply(
        &self,
        text: &str,
        segmentation: &Segmentation,
        candidates: &mut Vec<Candidate>,
        report: &mut AppliedCustomerRules,
    ) {
        let mut resolved: HashSet<Position> = HashSet::new();
        let mut ctx = Ctx {
            text,
            segmentation,
            candidates,
            report,
        };

        for rule in &self.labels {
            ctx.apply_label_rule(rule, &mut resolved);
        }
        for rule in &self.regexes {
            ctx.apply_regex_rule(rule, &mut resolved);
        }
        for rule in &self.cargo {
            ctx.apply_cargo_rule(rule);
        }
    }

    /// Commodity the customer's temperature hints suggest for these candidates.
    pub(crate) fn suggest_commodity(
        profile: &CustomerProfile,
        candidates: &[Candidate],
    ) -> Option<String> {
        let hints = &profile.cargo_hints;
        let numeric = candidates
            .iter()
            .filter(|c| c.candidate_type == CandidateType::Temperature)
            .find_map(|c| parse_temperature(&c.value));
        let category = match numeric {
            Some(t) => TemperatureCategory::classify(t.fahrenheit(), None),
            None => candidates
                .iter()
                .filter(|c| c.candidate_type == CandidateType::Temperature)
                .find_map(|c| TemperatureCategory::classify(None, Some(&c.value))),
        };

        category
            .and_then(|cat| hints.commodity_by_temp.get(&cat).cloned())
            .or_else(|| hints.default_commodity.clone())
    }
}

/// Parse a normalized temperature candidate value such as `"34 F"`.
pub(crate) fn parse_temperature(value: &str) -> Option<Temperature> {
    let (number, unit) = value.rsplit_once(' ')?;
    let unit = match unit {
        "F" => TemperatureUnit::F,
        "C" => TemperatureUnit::C,
        _ => return None,
    };
    Some(Temperature {
        value: Some(number.parse().ok()?),
        unit,
        mode: None,
    })
}

struct Ctx<'a> {
    text: &'a str,
    segmentation: &'a Segmentation,
    candidates: &'a mut Vec<Candidate>,
    report: &'a mut AppliedCustomerRules,
}

impl Ctx<'_> {
    fn skip(&mut self, rule: &RuleLookup, rule_type: RuleType, position: Option<Position>, reason: &str) {
        self.report.skipped.push(SkippedRule {
            rule_id: rule.rule_id.clone(),
            rule_type,
            candidate_index: None,
            position,
            reason: reason.to_string(),
        });
    }

    fn applied(&mut self, rule: &RuleLookup, rule_type: RuleType, position: Position, value: &str) {
        self.report.applied.push(AppliedRule {
            rule_id: rule.rule_id.clone(),
            rule_type,
            candidate_index: None,
            position,
            value: value.to_string(),
            description: rule.description.clone(),
        });
    }

    fn in_scope(&self, rule: &RuleLookup, start: usize) -> bool {
        match rule.block_scope {
            Some(scope) => {
                self.segmentation
                    .block_type_at(self.text, start, DEFAULT_LOOKBEHIND_WINDOW)
                    == scope
            }
            None => true,
        }
    }

    fn reference_at(&self, position: Position) -> Option<usize> {
        self.candidates.iter().position(|c| {
            c.candidate_type == CandidateType::ReferenceNumber && c.position == position
        })
    }

    fn new_reference(&self, position: Position, subtype: RefSubtype, confidence: Confidence, rule: &RuleLookup) -> Candidate {
        let mut c = new_candidate(
            self.text,
            CandidateType::ReferenceNumber,
            position.start,
            position.end,
            self.text[position.start..position.end].to_string(),
            confidence,
        );
        c.subtype = Some(subtype);
        c.rule_id = Some(rule.rule_id.clone());
        c.block_type =
            self.segmentation
                .block_type_at(self.text, position.start, DEFAULT_LOOKBEHIND_WINDOW);
        c
    }

    fn apply_label_rule(&mut self, rule: &RuleLookup, resolved: &mut HashSet<Position>) {
        let Ok(target) = rule.target_value.parse::<RefSubtype>() else {
            self.skip(rule, RuleType::LabelMap, None, SKIP_INVALID_TARGET);
            return;
        };
        let Some(re) = label_regex(&rule.pattern) else {
            self.skip(rule, RuleType::LabelMap, None, SKIP_INVALID_REGEX);
            return;
        };

        let text = self.text;
        for caps in re.captures_iter(text) {
            let (Some(whole), Some(value_m)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = clean_value(value_m.as_str());
            if !has_digit(value) {
                continue;
            }
            let position = Position {
                start: value_m.start(),
                end: value_m.start() + value.len(),
            };
            if resolved.contains(&position) {
                continue;
            }
            if !self.in_scope(rule, position.start) {
                self.skip(rule, RuleType::LabelMap, Some(position), SKIP_SCOPE_MISMATCH);
                continue;
            }

            match self.reference_at(position) {
                Some(i) if self.candidates[i].subtype == Some(target) => {
                    self.skip(rule, RuleType::LabelMap, Some(position), SKIP_SAME_SUBTYPE);
                }
                Some(i) => {
                    let c = &mut self.candidates[i];
                    c.subtype = Some(target);
                    c.confidence = Confidence::High;
                    c.rule_id = Some(rule.rule_id.clone());
                    self.applied(rule, RuleType::LabelMap, position, value);
                }
                None => {
                    let label = text[whole.start()..value_m.start()]
                        .trim_end_matches(|c: char| c.is_whitespace() || c == ':')
                        .to_string();
                    let mut c = self.new_reference(position, target, Confidence::High, rule);
                    c.label_hint = Some(label);
                    self.candidates.push(c);
                    self.applied(rule, RuleType::LabelMap, position, value);
                }
            }
            resolved.insert(position);
        }
    }

    fn apply_regex_rule(&mut self, rule: &RuleLookup, resolved: &mut HashSet<Position>) {
        let Ok(target) = rule.target_value.parse::<RefSubtype>() else {
            self.skip(rule, RuleType::RegexMap, None, SKIP_INVALID_TARGET);
            return;
        };
        let re = match Regex::new(&rule.pattern) {
            Ok(re) => re,
            Err(e) => {
                tracing::debug!(rule_id = %rule.rule_id, error = %e, "skipping invalid regex rule");
                self.skip(rule, RuleType::RegexMap, None, SKIP_INVALID_REGEX);
                return;
            }
        };

        let text = self.text;
        for m in TOKEN.find_iter(text) {
            let value = clean_value(m.as_str());
            if !has_digit(value) || !re.is_match(value) {
                continue;
            }
            let position = Position {
                start: m.start(),
                end: m.start() + value.len(),
            };
            if resolved.contains(&position) {
                self.skip(rule, RuleType::RegexMap, Some(position), SKIP_RESOLVED_BY_RULE);
                continue;
            }
            if !self.in_scope(rule, position.start) {
                self.skip(rule, RuleType::RegexMap, Some(position), SKIP_SCOPE_MISMATCH);
                continue;
            }

            match self.reference_at(position) {
                Some(i) if self.candidates[i].subtype == Some(target) => {
                    self.skip(rule, RuleType::RegexMap, Some(position), SKIP_SAME_SUBTYPE);
                }
                Some(i)
                    if self.candidates[i].label_hint.is_some()
                        && self.candidates[i].subtype.is_some() =>
                {
                    self.skip(rule, RuleType::RegexMap, Some(position), SKIP_LABEL_PRECEDENCE);
                }
                Some(i) => {
                    let c = &mut self.candidates[i];
                    c.subtype = Some(target);
                    c.confidence = c.confidence.max(Confidence::Medium);
                    c.rule_id = Some(rule.rule_id.clone());
                    self.applied(rule, RuleType::RegexMap, position, value);
                }
                None => {
                    let c = self.new_reference(position, target, Confidence::Medium, rule);
                    self.candidates.push(c);
                    self.applied(rule, RuleType::RegexMap, position, value);
                }
            }
            resolved.insert(position);
        }
    }

    fn apply_cargo_rule(&mut self, rule: &RuleLookup) {
        if rule.target_value.trim().is_empty() {
            self.skip(rule, RuleType::CargoHint, None, SKIP_INVALID_TARGET);
            return;
        }
        let Some(re) = keyword_regex(&rule.pattern) else {
            self.skip(rule, RuleType::CargoHint, None, SKIP_INVALID_REGEX);
            return;
        };
        let Some(m) = re.find(self.text) else {
            return;
        };
        let position = Position {
            start: m.start(),
            end: m.end(),
        };
        if !self.in_scope(rule, position.start) {
            self.skip(rule, RuleType::CargoHint, Some(position), SKIP_SCOPE_MISMATCH);
            return;
        }

        let mut c = new_candidate(
            self.text,
            CandidateType::Commodity,
            position.start,
            position.end,
            rule.target_value.clone(),
            Confidence::High,
        );
        c.rule_id = Some(rule.rule_id.clone());
        c.label_hint = Some(rule.pattern.clone());
        c.block_type = self
            .segmentation
            .block_type_at(self.text, position.start, DEFAULT_LOOKBEHIND_WINDOW);
        self.candidates.push(c);
        self.applied(rule, RuleType::CargoHint, position, &rule.target_value);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::extractor::{extract_candidates, ExtractOptions};
    use crate::rules::{NewRule, RuleAction};
    use crate::segmenter::BlockType;

    use super::*;

    fn profile_with(rules: &[(RuleType, &str, &str, Option<BlockType>)]) -> CustomerProfile {
        let now = Utc::now();
        let mut profile = CustomerProfile::new("cust", "Customer", now);
        for (rule_type, pattern, target, scope) in rules {
            let outcome = profile.propose_rule(
                NewRule {
                    rule_type: *rule_type,
                    pattern: pattern.to_string(),
                    target_value: target.to_string(),
                    block_scope: *scope,
                    description: None,
                    learned_from_tender: None,
                },
                "tester",
                now,
            );
            profile
                .apply_action(&outcome.rule_id, RuleAction::Approve, "admin", now)
                .unwrap();
        }
        profile
    }

    fn find<'a>(candidates: &'a [Candidate], value: &str) -> &'a Candidate {
        candidates
            .iter()
            .find(|c| c.candidate_type == CandidateType::ReferenceNumber && c.value == value)
            .unwrap_or_else(|| panic!("no reference candidate {value}"))
    }

    #[test]
    fn test_label_rule_resolves_subtype() {
        let profile = profile_with(&[(RuleType::LabelMap, "Release #", "po", None)]);
        let output = extract_candidates(
            "Please note Release # 44221 for this load",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let c = find(&output.candidates, "44221");
        assert_eq!(c.subtype, Some(RefSubtype::Po));
        assert_eq!(c.rule_id.as_deref(), Some(profile.rules[0].id.as_str()));
        assert!(output.metadata.rules_applied_count >= 1);
        assert_eq!(
            output.metadata.applied_customer_rules.applied[0].candidate_index,
            output.candidates.iter().position(|x| x.value == "44221")
        );
    }

    #[test]
    fn test_label_rule_without_number_marker_creates_candidate() {
        let profile = profile_with(&[(RuleType::LabelMap, "Ticket", "load", None)]);
        let output = extract_candidates(
            "Ticket 7781",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let c = find(&output.candidates, "7781");
        assert_eq!(c.subtype, Some(RefSubtype::Load));
        assert_eq!(c.label_hint.as_deref(), Some("Ticket"));
    }

    #[test]
    fn test_inactive_rules_ignored() {
        let now = Utc::now();
        let mut profile = CustomerProfile::new("cust", "Customer", now);
        profile.propose_rule(
            NewRule {
                rule_type: RuleType::LabelMap,
                pattern: "Release #".to_string(),
                target_value: "po".to_string(),
                block_scope: None,
                description: None,
                learned_from_tender: None,
            },
            "tester",
            now,
        );
        let output = extract_candidates(
            "Release # 44221",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        assert_eq!(find(&output.candidates, "44221").subtype, None);
        assert_eq!(output.metadata.rules_applied_count, 0);
    }

    #[test]
    fn test_rule_candidate_losing_overlap_is_not_counted() {
        let profile = profile_with(&[(RuleType::LabelMap, "Ship Date", "po", None)]);
        let text = "Ship Date: 03/15/2024";
        let output = extract_candidates(
            text,
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let start = text.find("03/").unwrap();
        assert!(output
            .candidates
            .iter()
            .any(|c| c.position.start == start && c.candidate_type == CandidateType::Date));
        assert!(output.candidates.iter().all(|c| c.rule_id.is_none()));

        let report = &output.metadata.applied_customer_rules;
        assert!(report.applied.is_empty());
        assert_eq!(output.metadata.rules_applied_count, 0);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.reason == SKIP_LOST_OVERLAP && s.position.map(|p| p.start) == Some(start)));
        assert_eq!(output.metadata.rules_skipped_count, report.skipped.len());
    }

    #[test]
    fn test_scope_mismatch_is_skipped() {
        let profile = profile_with(&[(
            RuleType::LabelMap,
            "Ref #",
            "pickup",
            Some(BlockType::Pickup),
        )]);
        let text = "Header\n\nPickup: ACME Dallas\nRef # 1111\n\nDelivery: Beta Austin\nRef # 2222";
        let output = extract_candidates(
            text,
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        assert_eq!(find(&output.candidates, "1111").subtype, Some(RefSubtype::Pickup));
        assert_eq!(find(&output.candidates, "2222").subtype, Some(RefSubtype::Reference));
        let skipped = &output.metadata.applied_customer_rules.skipped;
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SKIP_SCOPE_MISMATCH);
        assert_eq!(output.metadata.rules_skipped_count, 1);
    }

    #[test]
    fn test_regex_rule_tags_bare_values() {
        let profile = profile_with(&[(RuleType::RegexMap, r"^LD\d{6}$", "load", None)]);
        let output = extract_candidates(
            "Carrier ref LD123456 please",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let c = find(&output.candidates, "LD123456");
        assert_eq!(c.subtype, Some(RefSubtype::Load));
        assert_eq!(output.metadata.rules_applied_count, 1);
    }

    #[test]
    fn test_invalid_regex_is_skipped() {
        let profile = profile_with(&[(RuleType::RegexMap, r"^(LD\d+$", "load", None)]);
        let output = extract_candidates(
            "LD123456",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let skipped = &output.metadata.applied_customer_rules.skipped;
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SKIP_INVALID_REGEX);
    }

    #[test]
    fn test_label_beats_regex() {
        let profile = profile_with(&[(RuleType::RegexMap, r"^\d{6}$", "order", None)]);
        let output = extract_candidates(
            "PO# 118585",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        assert_eq!(find(&output.candidates, "118585").subtype, Some(RefSubtype::Po));
        assert_eq!(
            output.metadata.applied_customer_rules.skipped[0].reason,
            SKIP_LABEL_PRECEDENCE
        );
    }

    #[test]
    fn test_cargo_hint_adds_commodity() {
        let profile = profile_with(&[(RuleType::CargoHint, "IQF", "Frozen Vegetables", None)]);
        let output = extract_candidates(
            "30 pallets IQF product",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        let commodity = output
            .candidates
            .iter()
            .find(|c| c.candidate_type == CandidateType::Commodity)
            .unwrap();
        assert_eq!(commodity.value, "Frozen Vegetables");
        assert_eq!(commodity.raw_match, "IQF");
        assert!(commodity.rule_id.is_some());
    }

    #[test]
    fn test_suggested_commodity_from_temperature() {
        let mut profile = profile_with(&[]);
        profile
            .cargo_hints
            .commodity_by_temp
            .insert(TemperatureCategory::Frozen, "Ice Cream".to_string());
        let output = extract_candidates(
            "Keep at -10 F",
            &ExtractOptions {
                customer_profile: Some(&profile),
            },
        );
        assert_eq!(output.metadata.suggested_commodity.as_deref(), Some("Ice Cream"));
    }

    #[test]
    fn test_rules_are_deterministic() {
        let profile = profile_with(&[
            (RuleType::LabelMap, "Release #", "po", None),
            (RuleType::LabelMap, "Ticket", "load", None),
            (RuleType::RegexMap, r"^\d{7}$", "order", None),
            (RuleType::CargoHint, "cheese", "Dairy", None),
        ]);
        let text = "Release # 44221\nTicket 9988776\nsome cheese 1234567";
        let opts = ExtractOptions {
            customer_profile: Some(&profile),
        };
        let first = extract_candidates(text, &opts);
        for _ in 0..5 {
            assert_eq!(extract_candidates(text, &opts), first);
        }
    }

    #[test]
    fn test_parse_temperature() {
        let t = parse_temperature("-10 F").unwrap();
        assert_eq!(t.value, Some(-10.0));
        assert!(parse_temperature("frozen").is_none());
    }
}
