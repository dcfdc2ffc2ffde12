//! Pattern tables for segmentation.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// Markers closer than this (in bytes) to the previous kept marker are dropped.
pub const MARKER_DEDUPE_DISTANCE: usize = 20;

/// How far back `block_type_at_position` looks for a pickup/delivery cue.
pub const DEFAULT_LOOKBEHIND_WINDOW: usize = 200;

/// Any of these ends the header zone.
pub(crate) const STOPS_SECTION_TRIGGERS: &[&str] = &[
    r"(?i)\bstops?\b",
    r"(?i)\bpick[\s-]?ups?\b",
    r"(?i)\bdeliver(?:y|ies)\b",
    r"(?i)\bship\s+(?:from|to)\b",
    r"(?i)\borigin\b",
    r"(?i)\bconsignee\b",
    r"(?i)\bshipper\b",
];

pub(crate) const PICKUP_MARKERS: &[&str] = &[
    r"(?i)\bpick[\s-]?ups?\b",
    r"(?i)\bship\s+from\b",
    r"(?i)\bshipper\b",
    r"(?i)\borigin\b",
    r"(?i)\bload(?:ing)?\s+(?:at|location)\b",
];

pub(crate) const DELIVERY_MARKERS: &[&str] = &[
    r"(?i)\bdeliver(?:y|ies)\b",
    r"(?i)\bship\s+to\b",
    r"(?i)\bconsignee\b",
    r"(?i)\bdestination\b",
    r"(?i)\breceiver\b",
    r"(?i)\bdrop[\s-]?off\b",
    r"(?i)\bunload(?:ing)?\s+(?:at|location)\b",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("segmenter pattern must compile"))
        .collect()
}

pub(crate) static TRIGGERS: Lazy<Vec<Regex>> = Lazy::new(|| compile(STOPS_SECTION_TRIGGERS));
pub(crate) static PICKUP: Lazy<Vec<Regex>> = Lazy::new(|| compile(PICKUP_MARKERS));
pub(crate) static DELIVERY: Lazy<Vec<Regex>> = Lazy::new(|| compile(DELIVERY_MARKERS));
