//! Reference-number reclassification detection and rule suggestion.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::types::SuggestedRule;
use crate::extractor::{Candidate, CandidateType};
use crate::rules::{normalize_label, CustomerRule, RuleStatus, RuleType};
use crate::segmenter::{segment, BlockType, DEFAULT_LOOKBEHIND_WINDOW};
use crate::shipment::{RefScope, RefSubtype, ReferenceNumber, StructuredShipment};
use crate::text::{context_window, squash, strip_leading_zeros, window_before};

/// A label directly before a value: one to three words ending in `#` or `:`.
static LABEL_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z.]*(?:[ \t]+[A-Za-z][A-Za-z.]*){0,2})[ \t]*[#:]+[ \t]*$")
        .expect("label pattern must compile")
});

static LETTER_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]{1,6})(-?)(\d{3,})$").expect("prefix pattern must compile")
});

static DASHED_DIGITS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:-\d+)+$").expect("dashed pattern must compile"));

/// How far back the text-search fallback looks for a label.
const LABEL_SEARCH_WINDOW: usize = 40;

/// A reference whose type the user changed.
pub(crate) struct Reclassification<'a> {
    pub scope: RefScope,
    pub index: usize,
    pub original: &'a ReferenceNumber,
    pub edited: &'a ReferenceNumber,
}

impl Reclassification<'_> {
    pub(crate) fn type_path(&self) -> String {
        format!("{}.type", self.scope.path(self.index))
    }
}

fn zero_normalized(value: &str) -> String {
    strip_leading_zeros(&squash(value)).to_string()
}

/// Pair every reviewed reference with the classifier's reference of the
/// same value: same scope first, then any scope, then ignoring leading
/// zeros and punctuation.
pub(crate) fn match_references<'a>(
    original: &'a StructuredShipment,
    edited: &'a StructuredShipment,
) -> Vec<Reclassification<'a>> {
    let originals: Vec<(RefScope, usize, &ReferenceNumber)> = original.all_references().collect();
    let mut used = vec![false; originals.len()];
    let mut pairs = Vec::new();

    for (scope, index, edited_ref) in edited.all_references() {
        let zero = zero_normalized(&edited_ref.value);
        let unused = |pred: &dyn Fn(&ReferenceNumber, RefScope) -> bool| {
            originals
                .iter()
                .enumerate()
                .position(|(i, (s, _, o))| !used[i] && pred(*o, *s))
        };
        let found = unused(&|o, s| s == scope && o.value == edited_ref.value)
            .or_else(|| unused(&|o, _| o.value == edited_ref.value))
            .or_else(|| unused(&|o, _| !zero.is_empty() && zero_normalized(&o.value) == zero));
        if let Some(i) = found {
            used[i] = true;
            pairs.push(Reclassification {
                scope,
                index,
                original: originals[i].2,
                edited: edited_ref,
            });
        }
    }
    pairs
}

/// References whose type changed, excluding changes to `unknown`.
pub(crate) fn reclassifications<'a>(
    original: &'a StructuredShipment,
    edited: &'a StructuredShipment,
) -> Vec<Reclassification<'a>> {
    match_references(original, edited)
        .into_iter()
        .filter(|r| r.original.ref_type != r.edited.ref_type)
        .filter(|r| r.edited.ref_type != RefSubtype::Unknown)
        .collect()
}

fn candidate_for<'c>(candidates: &'c [Candidate], value: &str) -> Option<&'c Candidate> {
    let zero = zero_normalized(value);
    candidates
        .iter()
        .filter(|c| c.candidate_type == CandidateType::ReferenceNumber)
        .find(|c| c.value == value)
        .or_else(|| {
            candidates
                .iter()
                .filter(|c| c.candidate_type == CandidateType::ReferenceNumber)
                .find(|c| !zero.is_empty() && zero_normalized(&c.value) == zero)
        })
}

fn label_before(preceding: &str) -> Option<String> {
    let m = LABEL_BEFORE.find(preceding)?;
    let label = m.as_str().trim();
    (!normalize_label(label).is_empty()).then(|| label.to_string())
}

/// First occurrence of `value` not embedded in a longer alphanumeric run.
fn find_value(text: &str, value: &str) -> Option<usize> {
    text.match_indices(value).map(|(i, _)| i).find(|&i| {
        let before = text[..i].chars().next_back();
        let after = text[i + value.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Where the value sits in the text and what label, if any, precedes it.
pub(crate) struct ValueSite {
    pub position: Option<usize>,
    pub label: Option<String>,
    pub nearby_text: Option<String>,
}

pub(crate) fn locate_value(candidates: &[Candidate], text: &str, value: &str) -> ValueSite {
    if let Some(c) = candidate_for(candidates, value) {
        let label = c
            .label_hint
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .or_else(|| {
                let at = c.context.find(c.raw_match.as_str())?;
                label_before(&c.context[..at])
            });
        return ValueSite {
            position: Some(c.position.start),
            label,
            nearby_text: Some(c.context.clone()),
        };
    }

    match find_value(text, value) {
        Some(pos) => {
            let (_, preceding) = window_before(text, pos, LABEL_SEARCH_WINDOW);
            ValueSite {
                position: Some(pos),
                label: label_before(preceding),
                nearby_text: Some(
                    context_window(text, pos, pos + value.len(), LABEL_SEARCH_WINDOW).to_string(),
                ),
            }
        }
        None => ValueSite {
            position: None,
            label: None,
            nearby_text: None,
        },
    }
}

/// Regex describing the shape of `value`, or `None` when the value is too
/// generic to encode safely (plain numbers, free text).
pub fn derive_pattern(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(caps) = LETTER_PREFIX.captures(value) {
        let prefix = caps[1].to_uppercase();
        let dash = if caps[2].is_empty() { "" } else { "-" };
        return Some(format!(
            r"^(?i:{}){}\d{{{}}}$",
            regex_lite::escape(&prefix),
            dash,
            caps[3].len()
        ));
    }
    if DASHED_DIGITS.is_match(value) {
        let groups: Vec<String> = value
            .split('-')
            .map(|g| format!(r"\d{{{}}}", g.len()))
            .collect();
        return Some(format!("^{}$", groups.join("-")));
    }
    None
}

/// Suggested rules for every reference the user reclassified, deduplicated
/// by target type and label or pattern.
pub fn detect_reclassifications(
    original: &StructuredShipment,
    edited: &StructuredShipment,
    candidates: &[Candidate],
    original_text: &str,
) -> Vec<SuggestedRule> {
    let segmentation = segment(original_text);
    let mut seen = HashSet::new();
    let mut suggestions = Vec::new();

    for r in reclassifications(original, edited) {
        let site = locate_value(candidates, original_text, &r.edited.value);

        let (rule_type, pattern) = match site.label.clone() {
            Some(label) => (RuleType::LabelMap, label),
            None => match derive_pattern(&r.edited.value) {
                Some(p) => (RuleType::RegexMap, p),
                None => {
                    tracing::debug!(value = %r.edited.value, "no label or pattern for reclassification");
                    continue;
                }
            },
        };

        let key = match rule_type {
            RuleType::LabelMap => normalize_label(&pattern),
            _ => pattern.clone(),
        };
        if !seen.insert((r.edited.ref_type, rule_type, key)) {
            continue;
        }

        let block_scope = match (rule_type, site.position) {
            (RuleType::LabelMap, Some(pos)) => {
                match segmentation.block_type_at(original_text, pos, DEFAULT_LOOKBEHIND_WINDOW) {
                    b @ (BlockType::Pickup | BlockType::Delivery) => Some(b),
                    _ => None,
                }
            }
            _ => None,
        };

        suggestions.push(SuggestedRule {
            rule_type,
            pattern,
            target: r.edited.ref_type,
            original_subtype: r.original.ref_type,
            value: r.edited.value.clone(),
            field_path: r.type_path(),
            block_scope,
            nearby_text: site.nearby_text,
        });
    }

    tracing::debug!(count = suggestions.len(), "detected reclassifications");
    suggestions
}

/// Whether an active rule already covers `suggestion`: same type and
/// target, with a case-insensitive label match or an identical regex.
pub fn is_rule_already_learned(suggestion: &SuggestedRule, rules: &[CustomerRule]) -> bool {
    rules
        .iter()
        .filter(|r| r.status == RuleStatus::Active)
        .filter(|r| r.rule_type == suggestion.rule_type)
        .filter(|r| r.target_value.eq_ignore_ascii_case(suggestion.target.as_str()))
        .any(|r| match r.rule_type {
            RuleType::LabelMap => {
                r.pattern.trim().eq_ignore_ascii_case(suggestion.pattern.trim())
                    || normalize_label(&r.pattern) == normalize_label(&suggestion.pattern)
            }
            _ => r.pattern == suggestion.pattern,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{extract_candidates, ExtractOptions};
    use crate::rules::{CustomerProfile, NewRule, RuleAction};
    use crate::shipment::{Stop, StopType};
    use chrono::Utc;

    fn refs(items: &[(RefSubtype, &str)]) -> StructuredShipment {
        StructuredShipment {
            reference_numbers: items
                .iter()
                .map(|(t, v)| ReferenceNumber::new(*t, *v))
                .collect(),
            ..Default::default()
        }
    }

    fn detect(text: &str, original: &StructuredShipment, edited: &StructuredShipment) -> Vec<SuggestedRule> {
        let candidates = extract_candidates(text, &ExtractOptions::default()).candidates;
        detect_reclassifications(original, edited, &candidates, text)
    }

    #[test]
    fn test_derive_pattern() {
        assert_eq!(derive_pattern("LD123456").as_deref(), Some(r"^(?i:LD)\d{6}$"));
        assert_eq!(derive_pattern("ab-0042").as_deref(), Some(r"^(?i:AB)-\d{4}$"));
        assert_eq!(derive_pattern("123-4567-89").as_deref(), Some(r"^\d{3}-\d{4}-\d{2}$"));
        assert_eq!(derive_pattern("118585"), None);
        assert_eq!(derive_pattern("Frozen chicken"), None);
    }

    #[test]
    fn test_derived_patterns_compile_and_match() {
        for value in ["LD123456", "ab-0042", "123-4567-89"] {
            let pattern = derive_pattern(value).unwrap();
            let re = Regex::new(&pattern).unwrap();
            assert!(re.is_match(value), "{pattern} should match {value}");
        }
    }

    #[test]
    fn test_label_from_candidate_hint() {
        let text = "Release # 44221\nShip date 03/15/2024";
        let original = refs(&[(RefSubtype::Reference, "44221")]);
        let edited = refs(&[(RefSubtype::Po, "44221")]);

        let suggestions = detect(text, &original, &edited);
        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert_eq!(s.rule_type, RuleType::LabelMap);
        assert_eq!(normalize_label(&s.pattern), "release");
        assert_eq!(s.target, RefSubtype::Po);
        assert_eq!(s.original_subtype, RefSubtype::Reference);
        assert_eq!(s.field_path, "reference_numbers[0].type");
        assert_eq!(s.block_scope, None);
    }

    #[test]
    fn test_label_from_text_search() {
        // no candidate carries this value, so the text fallback finds the label
        let text = "Tracking Code: 7731";
        let original = refs(&[(RefSubtype::Unknown, "7731")]);
        let edited = refs(&[(RefSubtype::Pro, "7731")]);
        let candidates: Vec<Candidate> = Vec::new();

        let suggestions = detect_reclassifications(&original, &edited, &candidates, text);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].pattern, "Tracking Code:");
        assert_eq!(suggestions[0].rule_type, RuleType::LabelMap);
    }

    #[test]
    fn test_pattern_when_no_label() {
        let text = "see LD123456 for details";
        let original = refs(&[(RefSubtype::Reference, "LD123456")]);
        let edited = refs(&[(RefSubtype::Load, "LD123456")]);

        let suggestions = detect(text, &original, &edited);
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].rule_type, RuleType::RegexMap);
        assert_eq!(suggestions[0].pattern, r"^(?i:LD)\d{6}$");
    }

    #[test]
    fn test_plain_number_without_label_is_skipped() {
        let text = "numbers 55123 here";
        let original = refs(&[(RefSubtype::Reference, "55123")]);
        let edited = refs(&[(RefSubtype::Bol, "55123")]);
        assert!(detect(text, &original, &edited).is_empty());
    }

    #[test]
    fn test_change_to_unknown_ignored() {
        let text = "PO# 118585";
        let original = refs(&[(RefSubtype::Po, "118585")]);
        let edited = refs(&[(RefSubtype::Unknown, "118585")]);
        assert!(detect(text, &original, &edited).is_empty());
    }

    #[test]
    fn test_leading_zero_fallback_and_stop_scope() {
        let text = "Header\nPickup: Dallas, TX 75201\nPU# 000778";
        let original = refs(&[(RefSubtype::Reference, "000778")]);
        let mut edited = StructuredShipment::default();
        let mut stop = Stop::new(StopType::Pickup, 1);
        stop.reference_numbers.push(ReferenceNumber::new(RefSubtype::Pickup, "778"));
        edited.stops.push(stop);

        let suggestions = detect(text, &original, &edited);
        assert_eq!(suggestions.len(), 1);
        let s = &suggestions[0];
        assert_eq!(s.field_path, "stops[0].reference_numbers[0].type");
        assert_eq!(s.target, RefSubtype::Pickup);
        assert_eq!(s.block_scope, Some(BlockType::Pickup));
    }

    #[test]
    fn test_dedupes_suggestions() {
        let text = "Release # 44221\nRelease # 44222";
        let original = refs(&[
            (RefSubtype::Reference, "44221"),
            (RefSubtype::Reference, "44222"),
        ]);
        let edited = refs(&[(RefSubtype::Po, "44221"), (RefSubtype::Po, "44222")]);
        assert_eq!(detect(text, &original, &edited).len(), 1);
    }

    fn profile_with_label(label: &str, target: &str, approve: bool) -> CustomerProfile {
        let now = Utc::now();
        let mut profile = CustomerProfile::new("c1", "Acme", now);
        let outcome = profile.propose_rule(
            NewRule {
                rule_type: RuleType::LabelMap,
                pattern: label.to_string(),
                target_value: target.to_string(),
                block_scope: None,
                description: None,
                learned_from_tender: None,
            },
            "tester",
            now,
        );
        if approve {
            profile
                .apply_action(&outcome.rule_id, RuleAction::Approve, "admin", now)
                .unwrap();
        }
        profile
    }

    fn suggestion(pattern: &str, target: RefSubtype) -> SuggestedRule {
        SuggestedRule {
            rule_type: RuleType::LabelMap,
            pattern: pattern.to_string(),
            target,
            original_subtype: RefSubtype::Reference,
            value: "1".to_string(),
            field_path: "reference_numbers[0].type".to_string(),
            block_scope: None,
            nearby_text: None,
        }
    }

    #[test]
    fn test_is_rule_already_learned() {
        let profile = profile_with_label("Release #", "po", true);
        assert!(is_rule_already_learned(
            &suggestion("RELEASE #", RefSubtype::Po),
            &profile.rules
        ));
        assert!(!is_rule_already_learned(
            &suggestion("Release #", RefSubtype::Bol),
            &profile.rules
        ));

        let proposed = profile_with_label("Release #", "po", false);
        assert!(!is_rule_already_learned(
            &suggestion("Release #", RefSubtype::Po),
            &proposed.rules
        ));
    }
}
