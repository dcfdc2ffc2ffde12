//! Structural cleanup of a classified shipment.

use serde::{Deserialize, Serialize};

use super::evidence::EvidenceIndex;
use crate::extractor::Candidate;
use crate::segmenter::{segment, BlockType, Segmentation, DEFAULT_LOOKBEHIND_WINDOW};
use crate::shipment::{ReferenceNumber, StopType, StructuredShipment};

/// Zone of the source text the cargo values were found in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CargoSource {
    Header,
    Stop,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizationReport {
    pub refs_moved_to_stops: usize,
    pub refs_deduplicated: usize,
    pub stops_resequenced: usize,
    pub cargo_source: CargoSource,
}

fn same_ref(a: &ReferenceNumber, b: &ReferenceNumber) -> bool {
    a.ref_type == b.ref_type && a.value == b.value
}

/// Normalize stop numbering, reference placement and duplicates.
///
/// Running this on its own output moves and removes nothing.
pub fn normalize_shipment(
    mut shipment: StructuredShipment,
    original_text: &str,
    candidates: &[Candidate],
) -> (StructuredShipment, NormalizationReport) {
    let segmentation = segment(original_text);
    let index = EvidenceIndex::new(original_text, candidates);

    let mut report = NormalizationReport {
        stops_resequenced: shipment.resequence_stops(),
        ..Default::default()
    };

    move_refs_to_stops(&mut shipment, &segmentation, &index, &mut report);
    dedupe_refs(&mut shipment, &mut report);
    report.cargo_source = cargo_source(&shipment, &segmentation, &index);

    if report.refs_moved_to_stops > 0 || report.refs_deduplicated > 0 {
        tracing::debug!(
            moved = report.refs_moved_to_stops,
            deduplicated = report.refs_deduplicated,
            "normalized reference numbers"
        );
    }

    (shipment, report)
}

/// Stop a shipment-level reference belongs to, if every occurrence of its
/// value sits inside the same pickup or delivery segment.
fn owning_stop(
    shipment: &StructuredShipment,
    value: &str,
    segmentation: &Segmentation,
    index: &EvidenceIndex<'_>,
) -> Option<usize> {
    let occurrences = index.occurrences(value);
    let (first, _) = *occurrences.first()?;
    let seg_idx = segmentation.segments.iter().position(|s| s.contains(first))?;
    let seg = &segmentation.segments[seg_idx];
    if occurrences
        .iter()
        .any(|&(start, _)| !seg.contains(start))
    {
        return None;
    }

    let stop_type = match seg.segment_type {
        BlockType::Pickup => StopType::Pickup,
        BlockType::Delivery => StopType::Delivery,
        BlockType::Header | BlockType::Unknown => return None,
    };
    let ordinal = segmentation.segments[..seg_idx]
        .iter()
        .filter(|s| s.segment_type == seg.segment_type)
        .count();
    shipment.stop_indices(stop_type).get(ordinal).copied()
}

fn move_refs_to_stops(
    shipment: &mut StructuredShipment,
    segmentation: &Segmentation,
    index: &EvidenceIndex<'_>,
    report: &mut NormalizationReport,
) {
    let refs = std::mem::take(&mut shipment.reference_numbers);
    let mut kept = Vec::with_capacity(refs.len());
    for reference in refs {
        match owning_stop(shipment, &reference.value, segmentation, index) {
            Some(stop_idx) => {
                let stop = &mut shipment.stops[stop_idx];
                if stop.reference_numbers.iter().any(|r| same_ref(r, &reference)) {
                    report.refs_deduplicated += 1;
                } else {
                    stop.reference_numbers.push(reference);
                    report.refs_moved_to_stops += 1;
                }
            }
            None => kept.push(reference),
        }
    }
    shipment.reference_numbers = kept;
}

fn dedupe_list(refs: &mut Vec<ReferenceNumber>) -> usize {
    let before = refs.len();
    let mut seen: Vec<ReferenceNumber> = Vec::with_capacity(before);
    refs.retain(|r| {
        if seen.iter().any(|s| same_ref(s, r)) {
            false
        } else {
            seen.push(r.clone());
            true
        }
    });
    before - refs.len()
}

fn dedupe_refs(shipment: &mut StructuredShipment, report: &mut NormalizationReport) {
    for stop in &mut shipment.stops {
        report.refs_deduplicated += dedupe_list(&mut stop.reference_numbers);
    }
    report.refs_deduplicated += dedupe_list(&mut shipment.reference_numbers);

    // The stop-level copy is the more specific one.
    let stops = &shipment.stops;
    let before = shipment.reference_numbers.len();
    shipment.reference_numbers.retain(|r| {
        !stops
            .iter()
            .any(|s| s.reference_numbers.iter().any(|sr| same_ref(sr, r)))
    });
    report.refs_deduplicated += before - shipment.reference_numbers.len();
}

fn cargo_values(shipment: &StructuredShipment) -> Vec<String> {
    let cargo = &shipment.cargo;
    let mut values = Vec::new();
    if let Some(commodity) = cargo.commodity.as_deref() {
        values.push(commodity.to_string());
    }
    if let Some(weight) = &cargo.weight {
        values.push(format_quantity(weight.value));
    }
    if let Some(pieces) = &cargo.pieces {
        values.push(pieces.count.to_string());
    }
    if let Some(dimensions) = cargo.dimensions.as_deref() {
        values.push(dimensions.to_string());
    }
    values
}

pub(crate) fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn cargo_source(
    shipment: &StructuredShipment,
    segmentation: &Segmentation,
    index: &EvidenceIndex<'_>,
) -> CargoSource {
    let mut header = false;
    let mut stop = false;
    for value in cargo_values(shipment) {
        for (start, _) in index.occurrences(&value) {
            match segmentation.block_type_at(index.text(), start, DEFAULT_LOOKBEHIND_WINDOW) {
                BlockType::Header => header = true,
                BlockType::Pickup | BlockType::Delivery => stop = true,
                BlockType::Unknown => {}
            }
        }
    }
    match (header, stop) {
        (true, false) => CargoSource::Header,
        (false, true) => CargoSource::Stop,
        _ => CargoSource::Unknown,
    }
}
