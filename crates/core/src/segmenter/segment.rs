//! Segmentation algorithm.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use super::patterns::{
    DEFAULT_LOOKBEHIND_WINDOW, DELIVERY, MARKER_DEDUPE_DISTANCE, PICKUP, TRIGGERS,
};
use crate::text::{floor_boundary, window_before};

/// Zone of a tender document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Header,
    Pickup,
    Delivery,
    Unknown,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Header => "header",
            BlockType::Pickup => "pickup",
            BlockType::Delivery => "delivery",
            BlockType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "header" => Some(BlockType::Header),
            "pickup" => Some(BlockType::Pickup),
            "delivery" => Some(BlockType::Delivery),
            "unknown" => Some(BlockType::Unknown),
            _ => None,
        }
    }
}

/// A contiguous zone `[start_index, end_index)` of the source text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub segment_type: BlockType,
    pub start_index: usize,
    pub end_index: usize,
    pub text: String,
}

impl Segment {
    pub fn contains(&self, pos: usize) -> bool {
        self.start_index <= pos && pos < self.end_index
    }
}

/// Result of [`segment`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segmentation {
    pub segments: Vec<Segment>,
    pub header_end: usize,
}

impl Segmentation {
    /// Classify `pos` using this segmentation of `text`.
    pub fn block_type_at(&self, text: &str, pos: usize, window: usize) -> BlockType {
        if let Some(seg) = self.segments.iter().find(|s| s.contains(pos)) {
            return seg.segment_type;
        }

        let (_, before) = window_before(text, pos, window);
        if let Some((_, block)) = last_cue(before) {
            return block;
        }

        if pos < self.header_end {
            BlockType::Header
        } else {
            BlockType::Unknown
        }
    }
}

fn match_starts(regexes: &[Regex], haystack: &str, block: BlockType) -> Vec<(usize, BlockType)> {
    regexes
        .iter()
        .flat_map(|r| r.find_iter(haystack).map(move |m| (m.start(), block)))
        .collect()
}

fn last_cue(haystack: &str) -> Option<(usize, BlockType)> {
    let mut cues = match_starts(&PICKUP, haystack, BlockType::Pickup);
    cues.extend(match_starts(&DELIVERY, haystack, BlockType::Delivery));
    cues.into_iter().max_by_key(|(pos, block)| (*pos, *block == BlockType::Delivery))
}

/// Split `text` into a header segment followed by pickup/delivery segments.
///
/// Text with no stops-section trigger comes back as a single header segment
/// with `header_end == text.len()`.
pub fn segment(text: &str) -> Segmentation {
    let header_end = TRIGGERS
        .iter()
        .filter_map(|r| r.find(text).map(|m| m.start()))
        .min()
        .unwrap_or(text.len());

    let mut segments = Vec::new();
    if header_end > 0 || text.is_empty() {
        segments.push(Segment {
            segment_type: BlockType::Header,
            start_index: 0,
            end_index: header_end,
            text: text[..header_end].to_string(),
        });
    }

    if header_end == text.len() {
        return Segmentation {
            segments,
            header_end,
        };
    }

    let rest = &text[header_end..];
    let mut markers = match_starts(&PICKUP, rest, BlockType::Pickup);
    markers.extend(match_starts(&DELIVERY, rest, BlockType::Delivery));
    markers.sort_by_key(|(pos, block)| (*pos, *block == BlockType::Delivery));

    let mut kept: Vec<(usize, BlockType)> = Vec::new();
    for (pos, block) in markers {
        let pos = pos + header_end;
        match kept.last() {
            Some((last, _)) if pos - last <= MARKER_DEDUPE_DISTANCE => continue,
            _ => kept.push((pos, block)),
        }
    }

    for (i, (start, block)) in kept.iter().enumerate() {
        let end = kept.get(i + 1).map(|(next, _)| *next).unwrap_or(text.len());
        segments.push(Segment {
            segment_type: *block,
            start_index: *start,
            end_index: end,
            text: text[*start..end].to_string(),
        });
    }

    tracing::debug!(
        header_end,
        segments = segments.len(),
        "segmented tender text"
    );

    Segmentation {
        segments,
        header_end,
    }
}

/// Zone containing `pos`, using the default lookbehind window.
pub fn block_type_at_position(text: &str, pos: usize) -> BlockType {
    block_type_at_position_with_window(text, pos, DEFAULT_LOOKBEHIND_WINDOW)
}

/// Zone containing `pos`.
///
/// Prefers the segment containing `pos`, then the last pickup/delivery cue in
/// the `window` bytes before it, then header if `pos` precedes the stops
/// section, else unknown.
pub fn block_type_at_position_with_window(text: &str, pos: usize, window: usize) -> BlockType {
    let pos = floor_boundary(text, pos);
    segment(text).block_type_at(text, pos, window)
}
