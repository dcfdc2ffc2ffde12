//! Full diff of a reviewed shipment into learnable edits.

use super::reclassify::{locate_value, reclassifications};
use super::types::{DetectedEdit, EditContext, LearnableField};
use crate::extractor::Candidate;
use crate::shipment::StructuredShipment;
use crate::verifier::format_quantity;

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn temperature_context(shipment: &StructuredShipment) -> EditContext {
    let temperature = shipment.cargo.temperature.as_ref();
    EditContext {
        temperature_value: temperature.and_then(|t| t.fahrenheit()),
        temperature_mode: temperature.and_then(|t| t.mode.clone()),
        ..Default::default()
    }
}

/// Every learnable difference between the classified and reviewed shipment.
///
/// Covers reference reclassifications at all scopes, commodity changes,
/// temperature mode changes and weight corrections. Filling in a weight
/// that was zero or missing is not a correction.
pub fn detect_all_edits(
    original: &StructuredShipment,
    edited: &StructuredShipment,
    candidates: &[Candidate],
    original_text: &str,
) -> Vec<DetectedEdit> {
    let mut edits = Vec::new();

    for r in reclassifications(original, edited) {
        let site = locate_value(candidates, original_text, &r.edited.value);
        edits.push(DetectedEdit {
            field_type: LearnableField::RefReclassification,
            field_path: r.type_path(),
            before_value: Some(r.original.ref_type.as_str().to_string()),
            after_value: Some(r.edited.ref_type.as_str().to_string()),
            context: EditContext {
                label_hint: site.label,
                nearby_text: site.nearby_text,
                original_subtype: Some(r.original.ref_type),
                ..Default::default()
            },
        });
    }

    let before = non_empty(original.cargo.commodity.as_deref());
    let after = non_empty(edited.cargo.commodity.as_deref());
    if let Some(after) = after {
        if before != Some(after) {
            edits.push(DetectedEdit {
                field_type: LearnableField::CargoCommodity,
                field_path: "cargo.commodity".to_string(),
                before_value: before.map(str::to_string),
                after_value: Some(after.to_string()),
                context: temperature_context(edited),
            });
        }
    }

    let mode = |s: &StructuredShipment| {
        s.cargo
            .temperature
            .as_ref()
            .and_then(|t| non_empty(t.mode.as_deref()).map(str::to_string))
    };
    let (before_mode, after_mode) = (mode(original), mode(edited));
    if after_mode.is_some() && before_mode != after_mode {
        edits.push(DetectedEdit {
            field_type: LearnableField::TemperatureMode,
            field_path: "cargo.temperature.mode".to_string(),
            before_value: before_mode,
            after_value: after_mode,
            context: temperature_context(edited),
        });
    }

    let weight = |s: &StructuredShipment| s.cargo.weight.as_ref().map(|w| w.value).unwrap_or(0.0);
    let (before_weight, after_weight) = (weight(original), weight(edited));
    if before_weight != 0.0 && after_weight != 0.0 && before_weight != after_weight {
        edits.push(DetectedEdit {
            field_type: LearnableField::Weight,
            field_path: "cargo.weight.value".to_string(),
            before_value: Some(format_quantity(before_weight)),
            after_value: Some(format_quantity(after_weight)),
            context: EditContext::default(),
        });
    }

    tracing::debug!(count = edits.len(), "detected edits");
    edits
}
