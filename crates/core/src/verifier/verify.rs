//! Field-by-field verification of a classified shipment against its source.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::evidence::{EvidenceIndex, MatchQuality};
use super::normalize::{format_quantity, normalize_shipment};
use super::types::{
    FieldProvenance, SourceType, VerificationInput, VerificationOutput, VerificationWarning,
    WarningReason,
};
use crate::extractor::{Candidate, CandidateType};
use crate::rules::{CustomerProfile, RuleType};
use crate::shipment::{RefSubtype, StructuredShipment};
use crate::text::squash;

const NORMALIZED_CONFIDENCE: f64 = 0.85;
const FUZZY_WEIGHT: f64 = 0.5;

const REF_KINDS: &[CandidateType] = &[CandidateType::ReferenceNumber];
const NAME_KINDS: &[CandidateType] = &[CandidateType::Address, CandidateType::CityStateZip];
const ADDRESS_KINDS: &[CandidateType] = &[CandidateType::Address];
const CITY_KINDS: &[CandidateType] = &[CandidateType::CityStateZip, CandidateType::Address];
const DATE_KINDS: &[CandidateType] = &[CandidateType::Date, CandidateType::Datetime];
const TIME_KINDS: &[CandidateType] = &[CandidateType::Time, CandidateType::Datetime];
const WEIGHT_KINDS: &[CandidateType] = &[CandidateType::Weight];
const PIECES_KINDS: &[CandidateType] = &[CandidateType::Pieces];
const DIMENSION_KINDS: &[CandidateType] = &[CandidateType::Dimensions];
const COMMODITY_KINDS: &[CandidateType] = &[CandidateType::Commodity];
const TEMPERATURE_KINDS: &[CandidateType] = &[CandidateType::Temperature];
const MODE_KINDS: &[CandidateType] = &[CandidateType::Temperature, CandidateType::Commodity];

/// One scalar value in a shipment.
struct Field {
    path: String,
    value: String,
    /// Candidate types that may back this field; `None` for fields that are
    /// never checked against the source.
    kinds: Option<&'static [CandidateType]>,
    subtype: Option<RefSubtype>,
}

impl Field {
    fn checked(
        path: String,
        value: impl Into<String>,
        kinds: &'static [CandidateType],
    ) -> Self {
        Self {
            path,
            value: value.into(),
            kinds: Some(kinds),
            subtype: None,
        }
    }

    fn unchecked(path: String, value: impl Into<String>) -> Self {
        Self {
            path,
            value: value.into(),
            kinds: None,
            subtype: None,
        }
    }
}

fn push_opt(fields: &mut Vec<Field>, path: String, value: Option<&str>, kinds: &'static [CandidateType]) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        fields.push(Field::checked(path, v, kinds));
    }
}

fn scalar_fields(shipment: &StructuredShipment) -> Vec<Field> {
    let mut fields = Vec::new();

    for (scope, i, r) in shipment.all_references() {
        let base = scope.path(i);
        fields.push(Field {
            path: format!("{base}.value"),
            value: r.value.clone(),
            kinds: Some(REF_KINDS),
            subtype: Some(r.ref_type),
        });
        fields.push(Field::unchecked(format!("{base}.type"), r.ref_type.as_str()));
    }

    for (s, stop) in shipment.stops.iter().enumerate() {
        let loc = &stop.location;
        let base = format!("stops[{s}].location");
        push_opt(&mut fields, format!("{base}.name"), loc.name.as_deref(), NAME_KINDS);
        push_opt(&mut fields, format!("{base}.address"), loc.address.as_deref(), ADDRESS_KINDS);
        push_opt(&mut fields, format!("{base}.city"), loc.city.as_deref(), CITY_KINDS);
        push_opt(&mut fields, format!("{base}.state"), loc.state.as_deref(), CITY_KINDS);
        push_opt(&mut fields, format!("{base}.zip"), loc.zip.as_deref(), CITY_KINDS);
        if let Some(country) = loc.country.as_deref() {
            fields.push(Field::unchecked(format!("{base}.country"), country));
        }

        let base = format!("stops[{s}].schedule");
        push_opt(&mut fields, format!("{base}.date"), stop.schedule.date.as_deref(), DATE_KINDS);
        push_opt(&mut fields, format!("{base}.time"), stop.schedule.time.as_deref(), TIME_KINDS);
        if let Some(appt) = stop.schedule.appointment_required {
            fields.push(Field::unchecked(
                format!("{base}.appointment_required"),
                appt.to_string(),
            ));
        }
    }

    let cargo = &shipment.cargo;
    if let Some(weight) = &cargo.weight {
        fields.push(Field::checked(
            "cargo.weight.value".to_string(),
            format_quantity(weight.value),
            WEIGHT_KINDS,
        ));
    }
    if let Some(pieces) = &cargo.pieces {
        fields.push(Field::checked(
            "cargo.pieces.count".to_string(),
            pieces.count.to_string(),
            PIECES_KINDS,
        ));
    }
    push_opt(&mut fields, "cargo.dimensions".to_string(), cargo.dimensions.as_deref(), DIMENSION_KINDS);
    push_opt(&mut fields, "cargo.commodity".to_string(), cargo.commodity.as_deref(), COMMODITY_KINDS);
    if let Some(temp) = &cargo.temperature {
        if let Some(value) = temp.value {
            fields.push(Field::checked(
                "cargo.temperature.value".to_string(),
                format_quantity(value),
                TEMPERATURE_KINDS,
            ));
        }
        push_opt(&mut fields, "cargo.temperature.mode".to_string(), temp.mode.as_deref(), MODE_KINDS);
    }

    fields
}

/// Provenance from a customer rule that produced a matching candidate.
fn rule_provenance(
    field: &Field,
    kinds: &[CandidateType],
    candidates: &[Candidate],
    profile: Option<&CustomerProfile>,
) -> Option<FieldProvenance> {
    let profile = profile?;
    let target = squash(&field.value);
    candidates.iter().enumerate().find_map(|(i, c)| {
        let rule_id = c.rule_id.as_deref()?;
        if !kinds.contains(&c.candidate_type) || squash(&c.value) != target {
            return None;
        }
        if field.subtype.is_some() && c.subtype != field.subtype {
            return None;
        }
        let rule = profile.rule(rule_id)?;
        Some(FieldProvenance {
            source_type: SourceType::Rule,
            confidence: rule.confidence,
            evidence: vec![super::Evidence {
                match_text: c.raw_match.clone(),
                char_start: c.position.start,
                char_end: c.position.end,
                label: c.label_hint.clone(),
                candidate_index: Some(i),
            }],
            reason: Some(format!("rule: {}", rule.describe())),
            applied_at: rule.approved_at,
        })
    })
}

/// Commodity that came from the customer's temperature-based cargo hints.
fn cargo_hint_provenance(field: &Field, profile: Option<&CustomerProfile>) -> Option<FieldProvenance> {
    if field.path != "cargo.commodity" {
        return None;
    }
    let hints = &profile?.cargo_hints;
    let matches = |v: &String| v.eq_ignore_ascii_case(field.value.trim());
    let reason = hints
        .commodity_by_temp
        .iter()
        .find(|(_, v)| matches(v))
        .map(|(category, v)| format!("cargo hint: {} -> {}", category.as_str(), v))
        .or_else(|| {
            hints
                .default_commodity
                .as_ref()
                .filter(|v| matches(v))
                .map(|v| format!("cargo hint: default -> {}", v))
        })?;
    Some(FieldProvenance {
        source_type: SourceType::Rule,
        confidence: RuleType::CargoHint.initial_confidence(),
        evidence: Vec::new(),
        reason: Some(reason),
        applied_at: None,
    })
}

/// Normalize the shipment and attach provenance and warnings to every
/// verifiable scalar field.
pub fn verify_shipment(input: VerificationInput<'_>) -> VerificationOutput {
    let VerificationInput {
        shipment,
        candidates,
        original_text,
        source,
        customer_profile,
    } = input;

    let (shipment, normalization) = normalize_shipment(shipment, original_text, candidates);
    let index = EvidenceIndex::new(original_text, candidates);
    let text_source = source.text_source_type();

    let mut provenance = BTreeMap::new();
    let mut warnings = Vec::new();

    for field in scalar_fields(&shipment) {
        let Some(kinds) = field.kinds else { continue };

        if let Some(p) = rule_provenance(&field, kinds, candidates, customer_profile)
            .or_else(|| cargo_hint_provenance(&field, customer_profile))
        {
            provenance.insert(field.path, p);
            continue;
        }

        let found = index.find(&field.value, kinds);
        let (source_type, confidence, warning) = match found.quality {
            MatchQuality::Exact => (text_source, 1.0, None),
            MatchQuality::Normalized => (text_source, NORMALIZED_CONFIDENCE, None),
            MatchQuality::Fuzzy { score, ambiguous } => {
                let reason = if ambiguous {
                    WarningReason::AmbiguousMatch
                } else {
                    WarningReason::WeakEvidence
                };
                (SourceType::LlmInference, FUZZY_WEIGHT * score, Some(reason))
            }
            MatchQuality::None => (
                SourceType::LlmInference,
                0.0,
                Some(WarningReason::UnsupportedBySource),
            ),
        };

        if let Some(reason) = warning {
            warnings.push(VerificationWarning::new(
                field.path.clone(),
                field.value.clone(),
                reason,
                source_type,
            ));
        }
        provenance.insert(
            field.path,
            FieldProvenance {
                source_type,
                confidence,
                evidence: found.evidence,
                reason: None,
                applied_at: None,
            },
        );
    }

    tracing::debug!(
        fields = provenance.len(),
        warnings = warnings.len(),
        moved = normalization.refs_moved_to_stops,
        "verified shipment"
    );

    VerificationOutput {
        shipment,
        warnings,
        provenance,
        normalization,
    }
}

/// Provenance entries for every scalar field the user changed or added.
pub fn user_edit_provenance(
    original: &StructuredShipment,
    edited: &StructuredShipment,
    now: DateTime<Utc>,
) -> BTreeMap<String, FieldProvenance> {
    let before: BTreeMap<String, String> = scalar_fields(original)
        .into_iter()
        .map(|f| (f.path, f.value))
        .collect();

    scalar_fields(edited)
        .into_iter()
        .filter(|f| before.get(&f.path) != Some(&f.value))
        .map(|f| {
            let reason = match before.get(&f.path) {
                Some(old) => format!("user edit: {} -> {}", old, f.value),
                None => "user edit: added".to_string(),
            };
            (
                f.path,
                FieldProvenance {
                    source_type: SourceType::UserEdit,
                    confidence: 1.0,
                    evidence: Vec::new(),
                    reason: Some(reason),
                    applied_at: Some(now),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{extract_candidates, ExtractOptions};
    use crate::rules::{NewRule, TemperatureCategory};
    use crate::shipment::{
        CargoDetails, Location, ReferenceNumber, Schedule, Stop, StopType, Weight, WeightUnit,
    };
    use crate::verifier::{TenderSource, WarningCategory};
    use proptest::prelude::*;

    const TEXT: &str = "PO# 118585\n\
        Commodity: Frozen Chicken\n\
        Pickup: Acme Foods, Dallas, TX 75201 on 03/15/2024 08:00\n\
        Delivery: Chicago, IL 60601\n\
        Weight: 42,000 lbs";

    fn verify(
        shipment: StructuredShipment,
        profile: Option<&CustomerProfile>,
        text: &str,
    ) -> VerificationOutput {
        let opts = ExtractOptions {
            customer_profile: profile,
        };
        let candidates = extract_candidates(text, &opts).candidates;
        verify_shipment(VerificationInput {
            shipment,
            candidates: &candidates,
            original_text: text,
            source: TenderSource::Paste,
            customer_profile: profile,
        })
    }

    fn shipment() -> StructuredShipment {
        let mut pickup = Stop::new(StopType::Pickup, 1);
        pickup.location = Location {
            name: Some("Acme Foods".to_string()),
            city: Some("Dallas".to_string()),
            state: Some("TX".to_string()),
            zip: Some("75201".to_string()),
            country: Some("US".to_string()),
            ..Default::default()
        };
        pickup.schedule = Schedule {
            date: Some("2024-03-15".to_string()),
            time: Some("08:00".to_string()),
            appointment_required: Some(true),
        };
        let mut delivery = Stop::new(StopType::Delivery, 1);
        delivery.location.city = Some("Chicago".to_string());
        StructuredShipment {
            reference_numbers: vec![ReferenceNumber::new(RefSubtype::Po, "118585")],
            stops: vec![pickup, delivery],
            cargo: CargoDetails {
                weight: Some(Weight {
                    value: 42000.0,
                    unit: WeightUnit::Lbs,
                }),
                commodity: Some("Frozen Chicken".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_supported_fields_have_no_warnings() {
        let out = verify(shipment(), None, TEXT);
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);

        let po = &out.provenance["reference_numbers[0].value"];
        assert_eq!(po.source_type, SourceType::EmailText);
        assert_eq!(po.confidence, 1.0);
        assert_eq!(po.evidence[0].match_text, "118585");

        let date = &out.provenance["stops[0].schedule.date"];
        assert_eq!(date.confidence, NORMALIZED_CONFIDENCE);

        let weight = &out.provenance["cargo.weight.value"];
        assert_eq!(weight.confidence, NORMALIZED_CONFIDENCE);

        assert!(!out.provenance.contains_key("stops[0].location.country"));
        assert!(!out.provenance.contains_key("stops[0].schedule.appointment_required"));
    }

    #[test]
    fn test_file_source_uses_document_text() {
        let candidates = extract_candidates(TEXT, &ExtractOptions::default()).candidates;
        let out = verify_shipment(VerificationInput {
            shipment: shipment(),
            candidates: &candidates,
            original_text: TEXT,
            source: TenderSource::File,
            customer_profile: None,
        });
        assert_eq!(
            out.provenance["reference_numbers[0].value"].source_type,
            SourceType::DocumentText
        );
    }

    #[test]
    fn test_hallucinated_value() {
        let mut s = shipment();
        s.reference_numbers.push(ReferenceNumber::new(RefSubtype::Bol, "BOL-999"));
        let out = verify(s, None, TEXT);

        assert_eq!(out.warnings.len(), 1);
        let w = &out.warnings[0];
        assert_eq!(w.path(), "reference_numbers[1].value");
        assert_eq!(w.reason(), WarningReason::UnsupportedBySource);
        assert_eq!(w.category(), WarningCategory::Hallucinated);
        let p = &out.provenance["reference_numbers[1].value"];
        assert_eq!(p.source_type, SourceType::LlmInference);
        assert!(p.evidence.is_empty());
    }

    #[test]
    fn test_weak_evidence_is_unverified() {
        let mut s = shipment();
        s.stops[0].location.name = Some("Acme Food Warehouse".to_string());
        let out = verify(s, None, TEXT);

        let w = out
            .warnings
            .iter()
            .find(|w| w.path() == "stops[0].location.name")
            .expect("warning for name");
        assert_eq!(w.reason(), WarningReason::WeakEvidence);
        assert_eq!(w.category(), WarningCategory::Unverified);
        let p = &out.provenance["stops[0].location.name"];
        assert!((p.confidence - FUZZY_WEIGHT * 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rule_sourced_reference() {
        let now = Utc::now();
        let mut profile = CustomerProfile::new("cust-1", "Acme", now);
        let outcome = profile.propose_rule(
            NewRule {
                rule_type: RuleType::LabelMap,
                pattern: "release".to_string(),
                target_value: "po".to_string(),
                block_scope: None,
                description: None,
                learned_from_tender: None,
            },
            "tester",
            now,
        );
        profile
            .apply_action(&outcome.rule_id, crate::rules::RuleAction::Approve, "admin", now)
            .unwrap();

        let text = "Release # 44221\nPickup: Dallas, TX 75201";
        let s = StructuredShipment {
            reference_numbers: vec![ReferenceNumber::new(RefSubtype::Po, "44221")],
            ..Default::default()
        };
        let out = verify(s, Some(&profile), text);
        let p = &out.provenance["reference_numbers[0].value"];
        assert_eq!(p.source_type, SourceType::Rule);
        assert_eq!(p.confidence, 0.7);
        assert!(p.reason.as_deref().unwrap().starts_with("rule: "));
        assert_eq!(p.applied_at, Some(now));
    }

    #[test]
    fn test_cargo_hint_commodity() {
        let now = Utc::now();
        let mut profile = CustomerProfile::new("cust-1", "Acme", now);
        profile
            .cargo_hints
            .commodity_by_temp
            .insert(TemperatureCategory::Frozen, "Frozen Foods".to_string());

        let s = StructuredShipment {
            cargo: CargoDetails {
                commodity: Some("Frozen Foods".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let out = verify(s, Some(&profile), "Temp: -10 F");
        let p = &out.provenance["cargo.commodity"];
        assert_eq!(p.source_type, SourceType::Rule);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_user_edit_provenance() {
        let original = shipment();
        let mut edited = original.clone();
        edited.reference_numbers[0].ref_type = RefSubtype::Bol;
        edited.cargo.commodity = Some("Frozen Beef".to_string());
        let now = Utc::now();

        let prov = user_edit_provenance(&original, &edited, now);
        let keys: Vec<&str> = prov.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["cargo.commodity", "reference_numbers[0].type"]);
        assert!(prov.values().all(|p| p.source_type == SourceType::UserEdit));
        assert_eq!(
            prov["reference_numbers[0].type"].reason.as_deref(),
            Some("user edit: po -> bol")
        );
    }

    proptest! {
        #[test]
        fn prop_unsupported_values_are_flagged(value in "[QXZ]{3}[0-9]{6}") {
            let mut s = shipment();
            s.reference_numbers.push(ReferenceNumber::new(RefSubtype::Reference, value.clone()));
            let out = verify(s, None, TEXT);
            let flagged = out.warnings.iter().any(|w| {
                w.value() == value
                    && w.reason() == WarningReason::UnsupportedBySource
                    && w.category() == WarningCategory::Hallucinated
            });
            prop_assert!(flagged);
        }

        #[test]
        fn prop_verification_is_deterministic(extra in "[A-Z0-9]{1,8}") {
            let mut s = shipment();
            s.reference_numbers.push(ReferenceNumber::new(RefSubtype::Load, extra));
            prop_assert_eq!(verify(s.clone(), None, TEXT), verify(s, None, TEXT));
        }
    }
}
