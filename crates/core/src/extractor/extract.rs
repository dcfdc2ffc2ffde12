//! Candidate scanning and overlap resolution.

use std::cmp::Ordering;

use chrono::NaiveDate;

use super::patterns::{
    priority, ADDRESS, BARE_NUMBER, CITY_NOISE, CITY_STATE_ZIP, COMMODITY_LABELED, DATETIME_GAP,
    DATE_ISO, DATE_MONTH_NAME, DATE_NUMERIC, DIMENSIONS, KEYWORD_COLON_REF, LABELED_REF,
    LABEL_FILLER, MONTHS, PIECES, REF_KEYWORDS, STATE_CODES, TEMPERATURE, TEMPERATURE_MODE,
    TIME_COLON, TIME_MERIDIEM, TIME_MILITARY, WEIGHT_LABELED, WEIGHT_UNIT,
};
use super::rules::{RuleSet, SKIP_LOST_OVERLAP};
use super::types::{
    AppliedCustomerRules, AppliedRule, Candidate, CandidateType, Confidence, ExtractOptions,
    ExtractionMetadata, ExtractionOutput, Position, SegmentSummary, SkippedRule,
};
use crate::segmenter::{segment, BlockType, Segmentation, DEFAULT_LOOKBEHIND_WINDOW};
use crate::shipment::RefSubtype;
use crate::text::{collapse_whitespace, context_window};

/// Bytes of context kept on each side of a candidate.
const CONTEXT_RADIUS: usize = 60;

/// Labels that precede numbers which are never shipment references.
const NON_REF_LABELS: &[&str] = &[
    "phone", "tel", "fax", "cell", "ph", "suite", "ste", "unit", "dock", "door", "apt", "room",
    "mc", "dot", "ext",
];

/// Extract candidates from `text`.
///
/// Never fails: messy input simply yields fewer candidates.
pub fn extract_candidates(text: &str, options: &ExtractOptions<'_>) -> ExtractionOutput {
    let segmentation = segment(text);

    let mut found = Vec::new();
    scan_references(text, &mut found);
    scan_dates_and_times(text, &mut found);
    scan_locations(text, &mut found);
    scan_cargo(text, &mut found);
    scan_bare_numbers(text, &mut found);

    for c in &mut found {
        c.block_type = segmentation.block_type_at(text, c.position.start, DEFAULT_LOOKBEHIND_WINDOW);
    }
    found.extend(stop_blocks(text, &segmentation));

    let mut report = AppliedCustomerRules::default();
    let mut suggested_commodity = None;
    if let Some(profile) = options.customer_profile {
        let rules = RuleSet::from_profile(profile);
        rules.apply(text, &segmentation, &mut found, &mut report);
        suggested_commodity = RuleSet::suggest_commodity(profile, &found);
    }

    let candidates = resolve_overlaps(found);

    for applied in &mut report.applied {
        applied.candidate_index = candidates
            .iter()
            .position(|c| c.position == applied.position && c.rule_id.as_deref() == Some(applied.rule_id.as_str()));
    }
    // A rule whose candidate lost overlap resolution did not apply.
    let (kept, lost): (Vec<AppliedRule>, Vec<AppliedRule>) = std::mem::take(&mut report.applied)
        .into_iter()
        .partition(|a| a.candidate_index.is_some());
    report.applied = kept;
    report.skipped.extend(lost.into_iter().map(|a| SkippedRule {
        rule_id: a.rule_id,
        rule_type: a.rule_type,
        candidate_index: None,
        position: Some(a.position),
        reason: SKIP_LOST_OVERLAP.to_string(),
    }));
    for skipped in &mut report.skipped {
        skipped.candidate_index = skipped
            .position
            .and_then(|p| candidates.iter().position(|c| c.position == p));
    }

    let mut metadata = ExtractionMetadata {
        header_end: segmentation.header_end,
        segments: segmentation
            .segments
            .iter()
            .map(|s| SegmentSummary {
                segment_type: s.segment_type,
                start_index: s.start_index,
                end_index: s.end_index,
            })
            .collect(),
        rules_applied_count: report.applied.len(),
        rules_skipped_count: report.skipped.len(),
        applied_customer_rules: report,
        suggested_commodity,
        ..Default::default()
    };
    for c in &candidates {
        *metadata
            .candidate_counts
            .entry(c.candidate_type.as_str().to_string())
            .or_insert(0) += 1;
    }

    tracing::debug!(
        candidates = candidates.len(),
        rules_applied = metadata.rules_applied_count,
        rules_skipped = metadata.rules_skipped_count,
        "extracted candidates"
    );

    ExtractionOutput {
        candidates,
        metadata,
    }
}

pub(crate) fn new_candidate(
    text: &str,
    candidate_type: CandidateType,
    start: usize,
    end: usize,
    value: String,
    confidence: Confidence,
) -> Candidate {
    Candidate {
        candidate_type,
        value,
        raw_match: text[start..end].to_string(),
        label_hint: None,
        subtype: None,
        confidence,
        position: Position { start, end },
        context: context_window(text, start, end, CONTEXT_RADIUS).to_string(),
        block_type: BlockType::Unknown,
        rule_id: None,
    }
}

fn overlaps(a: &Position, start: usize, end: usize) -> bool {
    a.start < end && start < a.end
}

pub(crate) fn has_digit(value: &str) -> bool {
    value.bytes().any(|b| b.is_ascii_digit())
}

/// Trim separators a value pattern may have swallowed at its end.
pub(crate) fn clean_value(value: &str) -> &str {
    value.trim_end_matches(['-', '/'])
}

// ============================================================================
// Reference numbers
// ============================================================================

fn label_tokens(label: &str) -> Vec<String> {
    label
        .to_lowercase()
        .replace(['.', '/'], "")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keyword matches in a token list as (first token, last token, subtype).
fn keyword_matches(tokens: &[String]) -> Vec<(usize, usize, RefSubtype)> {
    let mut matches = Vec::new();
    for (keyword, subtype) in REF_KEYWORDS {
        let kw: Vec<&str> = keyword.split(' ').collect();
        if kw.len() > tokens.len() {
            continue;
        }
        for start in 0..=tokens.len() - kw.len() {
            if tokens[start..start + kw.len()].iter().zip(&kw).all(|(t, k)| t == k) {
                matches.push((start, start + kw.len() - 1, *subtype));
            }
        }
    }
    matches
}

/// Subtype implied by a label: the keyword ending closest to the label's end,
/// longer keywords winning ties.
pub(crate) fn subtype_for_label(label: &str) -> Option<RefSubtype> {
    let tokens = label_tokens(label);
    keyword_matches(&tokens)
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then((a.1 - a.0).cmp(&(b.1 - b.0))))
        .map(|(_, _, subtype)| subtype)
}

/// Reduce a captured label to its meaningful tail.
///
/// With a known keyword the label starts at the first keyword; without one
/// only the last word is kept ("ship Release" -> "Release").
fn trim_label(raw: &str) -> String {
    let words: Vec<&str> = raw
        .split_whitespace()
        .skip_while(|w| LABEL_FILLER.contains(&w.to_lowercase().as_str()))
        .collect();
    if words.is_empty() {
        return String::new();
    }

    let first_keyword_word = words.iter().position(|w| {
        let tokens = label_tokens(w);
        !tokens.is_empty() && !keyword_matches(&tokens).is_empty()
    });
    let multi_word_start = {
        let tokens: Vec<String> = words.iter().flat_map(|w| label_tokens(w)).collect();
        keyword_matches(&tokens)
            .iter()
            .map(|(s, _, _)| *s)
            .min()
    };

    match (first_keyword_word, multi_word_start) {
        (Some(i), _) => words[i..].join(" "),
        // multi-word keyword such as "bill of lading"
        (None, Some(_)) => words.join(" "),
        (None, None) => words[words.len() - 1].to_string(),
    }
}

fn is_non_ref_label(label: &str) -> bool {
    label_tokens(label)
        .last()
        .map(|t| NON_REF_LABELS.contains(&t.as_str()))
        .unwrap_or(false)
}

fn scan_references(text: &str, out: &mut Vec<Candidate>) {
    for caps in LABELED_REF.captures_iter(text) {
        let (Some(label_m), Some(value_m)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = clean_value(value_m.as_str());
        if !has_digit(value) {
            continue;
        }
        let label = trim_label(label_m.as_str());
        if label.is_empty() || is_non_ref_label(&label) {
            continue;
        }

        let subtype = subtype_for_label(&label);
        let confidence = if subtype.is_some() {
            Confidence::High
        } else {
            Confidence::Medium
        };
        let start = value_m.start();
        let mut c = new_candidate(
            text,
            CandidateType::ReferenceNumber,
            start,
            start + value.len(),
            value.to_string(),
            confidence,
        );
        c.label_hint = Some(label);
        c.subtype = subtype;
        out.push(c);
    }

    for caps in KEYWORD_COLON_REF.captures_iter(text) {
        let (Some(label_m), Some(value_m)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = clean_value(value_m.as_str());
        if value.len() < 3 || !has_digit(value) {
            continue;
        }
        let start = value_m.start();
        if out.iter().any(|c| c.position.start == start) {
            continue;
        }
        let label = label_m.as_str().to_string();
        let mut c = new_candidate(
            text,
            CandidateType::ReferenceNumber,
            start,
            start + value.len(),
            value.to_string(),
            Confidence::High,
        );
        c.subtype = subtype_for_label(&label);
        c.label_hint = Some(label);
        out.push(c);
    }
}

fn scan_bare_numbers(text: &str, out: &mut Vec<Candidate>) {
    let mut bare = Vec::new();
    for m in BARE_NUMBER.find_iter(text) {
        if out.iter().any(|c| overlaps(&c.position, m.start(), m.end())) {
            continue;
        }
        if text[..m.start()].ends_with('$') {
            continue;
        }
        bare.push(new_candidate(
            text,
            CandidateType::ReferenceNumber,
            m.start(),
            m.end(),
            m.as_str().to_string(),
            Confidence::Low,
        ));
    }
    out.extend(bare);
}

// ============================================================================
// Dates and times
// ============================================================================

fn format_date(year: i32, month: u32, day: u32) -> Option<String> {
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
}

fn format_time(hour: u32, minute: u32, meridiem: Option<&str>) -> Option<String> {
    let hour = match meridiem.map(|m| m.to_ascii_lowercase()) {
        Some(m) if m == "a" => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour % 12
        }
        Some(_) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            hour % 12 + 12
        }
        None => hour,
    };
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", hour, minute))
}

fn scan_dates_and_times(text: &str, out: &mut Vec<Candidate>) {
    let mut dates = Vec::new();
    let mut times = Vec::new();

    for caps in DATE_ISO.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end()));
        let parsed = (
            caps[1].parse::<i32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
        );
        if let (Some((s, e)), (Ok(y), Ok(m), Ok(d))) = (whole, parsed) {
            if let Some(value) = format_date(y, m, d) {
                dates.push(new_candidate(text, CandidateType::Date, s, e, value, Confidence::High));
            }
        }
    }

    for caps in DATE_NUMERIC.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let (Ok(a), Ok(b), Ok(y)) = (
            caps[1].parse::<u32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<i32>(),
        ) else {
            continue;
        };
        let year = if caps[3].len() == 2 { 2000 + y } else { y };
        // US month/day first; fall back to day/month when the first field cannot be a month
        let (month, day) = if a <= 12 { (a, b) } else { (b, a) };
        if let Some(value) = format_date(year, month, day) {
            dates.push(new_candidate(
                text,
                CandidateType::Date,
                whole.start(),
                whole.end(),
                value,
                Confidence::Medium,
            ));
        }
    }

    for caps in DATE_MONTH_NAME.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let month_key = caps[1].to_lowercase();
        let Some(month) = MONTHS.iter().position(|m| month_key.starts_with(m)) else {
            continue;
        };
        let (Ok(day), Ok(year)) = (caps[2].parse::<u32>(), caps[3].parse::<i32>()) else {
            continue;
        };
        if let Some(value) = format_date(year, month as u32 + 1, day) {
            dates.push(new_candidate(
                text,
                CandidateType::Date,
                whole.start(),
                whole.end(),
                value,
                Confidence::High,
            ));
        }
    }

    for caps in TIME_COLON.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let (Ok(h), Ok(m)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        if let Some(value) = format_time(h, m, caps.get(3).map(|mer| mer.as_str())) {
            times.push(new_candidate(
                text,
                CandidateType::Time,
                whole.start(),
                whole.end(),
                value,
                Confidence::Medium,
            ));
        }
    }

    for caps in TIME_MERIDIEM.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if times.iter().any(|t| overlaps(&t.position, whole.start(), whole.end())) {
            continue;
        }
        let Ok(h) = caps[1].parse::<u32>() else { continue };
        if let Some(value) = format_time(h, 0, Some(&caps[2])) {
            times.push(new_candidate(
                text,
                CandidateType::Time,
                whole.start(),
                whole.end(),
                value,
                Confidence::Medium,
            ));
        }
    }

    for caps in TIME_MILITARY.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let (Ok(h), Ok(m)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) else {
            continue;
        };
        if let Some(value) = format_time(h, m, None) {
            times.push(new_candidate(
                text,
                CandidateType::Time,
                whole.start(),
                whole.end(),
                value,
                Confidence::Medium,
            ));
        }
    }

    // Fuse "03/15/2024 @ 08:00" into a single datetime.
    let mut used_times = vec![false; times.len()];
    for date in dates {
        let fused = times.iter().enumerate().find(|(i, t)| {
            !used_times[*i]
                && t.position.start >= date.position.end
                && t.position.start - date.position.end <= 6
                && DATETIME_GAP.is_match(&text[date.position.end..t.position.start])
        });
        match fused {
            Some((i, time)) => {
                used_times[i] = true;
                out.push(new_candidate(
                    text,
                    CandidateType::Datetime,
                    date.position.start,
                    time.position.end,
                    format!("{}T{}", date.value, time.value),
                    Confidence::High,
                ));
            }
            None => out.push(date),
        }
    }
    out.extend(
        times
            .into_iter()
            .zip(used_times)
            .filter(|(_, used)| !used)
            .map(|(t, _)| t),
    );
}

// ============================================================================
// Locations
// ============================================================================

fn scan_locations(text: &str, out: &mut Vec<Candidate>) {
    for m in ADDRESS.find_iter(text) {
        let raw = m.as_str().trim_end_matches([',', ' ']);
        out.push(new_candidate(
            text,
            CandidateType::Address,
            m.start(),
            m.start() + raw.len(),
            collapse_whitespace(raw),
            Confidence::High,
        ));
    }

    for caps in CITY_STATE_ZIP.captures_iter(text) {
        let (Some(whole), Some(city_m)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let state = &caps[2];
        if !STATE_CODES.contains(&state) {
            continue;
        }

        // Drop label words the capitalized-words pattern swallowed ("Ship To Chicago").
        let mut start = city_m.start();
        let mut city = city_m.as_str();
        while let Some((first, rest)) = city.split_once(char::is_whitespace) {
            if !CITY_NOISE.contains(&first.to_lowercase().as_str()) {
                break;
            }
            let rest = rest.trim_start();
            start += city.len() - rest.len();
            city = rest;
        }
        if CITY_NOISE.contains(&city.to_lowercase().as_str()) {
            continue;
        }

        let value = format!("{}, {} {}", collapse_whitespace(city), state, &caps[3]);
        out.push(new_candidate(
            text,
            CandidateType::CityStateZip,
            start,
            whole.end(),
            value,
            Confidence::High,
        ));
    }
}

// ============================================================================
// Cargo
// ============================================================================

fn format_number(raw: &str) -> Option<String> {
    let n: f64 = raw.replace(',', "").parse().ok()?;
    if n.fract() == 0.0 {
        Some(format!("{}", n as i64))
    } else {
        Some(format!("{}", n))
    }
}

fn scan_cargo(text: &str, out: &mut Vec<Candidate>) {
    let mut weights: Vec<Candidate> = Vec::new();
    for caps in WEIGHT_UNIT.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let Some(number) = format_number(&caps[1]) else { continue };
        let unit = if caps[2].to_lowercase().starts_with('k') {
            "kg"
        } else {
            "lbs"
        };
        weights.push(new_candidate(
            text,
            CandidateType::Weight,
            whole.start(),
            whole.end(),
            format!("{} {}", number, unit),
            Confidence::High,
        ));
    }
    for caps in WEIGHT_LABELED.captures_iter(text) {
        let Some(num) = caps.get(1) else { continue };
        if weights.iter().any(|w| w.position.start == num.start()) {
            continue;
        }
        let Some(number) = format_number(num.as_str()) else { continue };
        weights.push(new_candidate(
            text,
            CandidateType::Weight,
            num.start(),
            num.end(),
            format!("{} lbs", number),
            Confidence::Medium,
        ));
    }
    out.extend(weights);

    for caps in PIECES.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push(new_candidate(
            text,
            CandidateType::Pieces,
            whole.start(),
            whole.end(),
            format!("{} {}", &caps[1], caps[2].to_lowercase()),
            Confidence::Medium,
        ));
    }

    for caps in DIMENSIONS.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        let mut value = format!("{}x{}", &caps[1], &caps[2]);
        if let Some(third) = caps.get(3) {
            value.push('x');
            value.push_str(third.as_str());
        }
        if let Some(unit) = caps.get(4) {
            value.push(' ');
            value.push_str(&unit.as_str().to_lowercase());
        }
        out.push(new_candidate(
            text,
            CandidateType::Dimensions,
            whole.start(),
            whole.end(),
            value,
            Confidence::Medium,
        ));
    }

    for caps in TEMPERATURE.captures_iter(text) {
        let (Some(num), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        let Some(number) = format_number(num.as_str()) else { continue };
        out.push(new_candidate(
            text,
            CandidateType::Temperature,
            num.start(),
            whole.end(),
            format!("{} {}", number, caps[2].to_uppercase()),
            Confidence::High,
        ));
    }

    let commodities = labeled_commodities(text);
    for m in TEMPERATURE_MODE.find_iter(text) {
        // "Commodity: Frozen Chicken" names the product, not the mode
        if commodities.iter().any(|c| overlaps(&c.position, m.start(), m.end())) {
            continue;
        }
        out.push(new_candidate(
            text,
            CandidateType::Temperature,
            m.start(),
            m.end(),
            collapse_whitespace(&m.as_str().to_lowercase()),
            Confidence::Low,
        ));
    }

    out.extend(commodities);
}

fn labeled_commodities(text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    for caps in COMMODITY_LABELED.captures_iter(text) {
        let Some(value_m) = caps.get(1) else { continue };
        let value = collapse_whitespace(value_m.as_str());
        if value.is_empty() || value.len() > 80 {
            continue;
        }
        let mut c = new_candidate(
            text,
            CandidateType::Commodity,
            value_m.start(),
            value_m.end(),
            value,
            Confidence::Medium,
        );
        c.label_hint = caps
            .get(0)
            .and_then(|m| m.as_str().split(':').next())
            .map(|l| l.trim().to_string());
        out.push(c);
    }
    out
}

// ============================================================================
// Stop blocks
// ============================================================================

fn stop_blocks(text: &str, segmentation: &Segmentation) -> Vec<Candidate> {
    segmentation
        .segments
        .iter()
        .filter(|s| matches!(s.segment_type, BlockType::Pickup | BlockType::Delivery))
        .filter_map(|s| {
            let trimmed = s.text.trim();
            if trimmed.is_empty() {
                return None;
            }
            let start = s.start_index + (s.text.len() - s.text.trim_start().len());
            let end = start + trimmed.len();
            let heading = trimmed.lines().next().unwrap_or(trimmed);
            let mut c = new_candidate(
                text,
                CandidateType::StopBlock,
                start,
                end,
                collapse_whitespace(heading),
                Confidence::Medium,
            );
            c.label_hint = Some(s.segment_type.as_str().to_string());
            c.block_type = s.segment_type;
            Some(c)
        })
        .collect()
}

// ============================================================================
// Overlap resolution
// ============================================================================

fn candidate_order(a: &Candidate, b: &Candidate) -> Ordering {
    a.position
        .start
        .cmp(&b.position.start)
        .then(a.position.end.cmp(&b.position.end))
        .then(priority(a.candidate_type).cmp(&priority(b.candidate_type)))
        .then(a.value.cmp(&b.value))
}

fn preferred(new: &Candidate, existing: &Candidate) -> bool {
    (new.rule_id.is_some(), new.confidence) > (existing.rule_id.is_some(), existing.confidence)
}

/// Resolve overlapping spans and order the result.
///
/// Among candidates starting at the same offset only the highest priority
/// type survives, and identical `(type, start, end)` duplicates collapse to
/// the most confident one. Stop blocks describe zones and are exempt. The
/// result is sorted by `(start, end, priority, value)`.
pub fn resolve_overlaps(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let (blocks, mut spans): (Vec<Candidate>, Vec<Candidate>) = candidates
        .into_iter()
        .partition(|c| c.candidate_type == CandidateType::StopBlock);

    spans.sort_by(|a, b| {
        a.position
            .start
            .cmp(&b.position.start)
            .then(priority(a.candidate_type).cmp(&priority(b.candidate_type)))
            .then(a.position.end.cmp(&b.position.end))
            .then(a.value.cmp(&b.value))
    });

    let mut out: Vec<Candidate> = Vec::with_capacity(spans.len() + blocks.len());
    let mut group_start = 0;
    while group_start < spans.len() {
        let start = spans[group_start].position.start;
        let group_end = spans[group_start..]
            .iter()
            .position(|c| c.position.start != start)
            .map(|n| group_start + n)
            .unwrap_or(spans.len());
        let top = spans[group_start].candidate_type;
        let first_out = out.len();

        for c in spans[group_start..group_end]
            .iter()
            .filter(|c| c.candidate_type == top)
        {
            match out[first_out..]
                .iter_mut()
                .find(|e| e.position == c.position)
            {
                Some(existing) => {
                    if preferred(c, existing) {
                        *existing = c.clone();
                    }
                }
                None => out.push(c.clone()),
            }
        }
        group_start = group_end;
    }

    out.extend(blocks);
    out.sort_by(candidate_order);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<Candidate> {
        extract_candidates(text, &ExtractOptions::default()).candidates
    }

    fn of_type(candidates: &[Candidate], t: CandidateType) -> Vec<&Candidate> {
        candidates.iter().filter(|c| c.candidate_type == t).collect()
    }

    #[test]
    fn test_scenario_po_and_city() {
        let candidates = extract("PO# 118585 ship to Chicago, IL 60601");

        let po = candidates
            .iter()
            .find(|c| c.candidate_type == CandidateType::ReferenceNumber && c.value == "118585")
            .expect("po candidate");
        assert!(po.label_hint.as_deref().unwrap().contains("PO"));
        assert_eq!(po.subtype, Some(RefSubtype::Po));
        assert_eq!(po.confidence, Confidence::High);

        let city = of_type(&candidates, CandidateType::CityStateZip);
        assert_eq!(city.len(), 1);
        assert_eq!(city[0].value, "Chicago, IL 60601");
    }

    #[test]
    fn test_raw_match_matches_position() {
        let text = "BOL: 55123-A\nPickup 03/15/2024 @ 08:00\n42,000 lbs, 26 pallets";
        for c in extract(text) {
            assert_eq!(&text[c.position.start..c.position.end], c.raw_match);
        }
    }

    #[test]
    fn test_keyword_colon_reference() {
        let candidates = extract("BOL: 55123-A");
        let bol = of_type(&candidates, CandidateType::ReferenceNumber);
        assert_eq!(bol.len(), 1);
        assert_eq!(bol[0].value, "55123-A");
        assert_eq!(bol[0].subtype, Some(RefSubtype::Bol));
    }

    #[test]
    fn test_label_trimming() {
        assert_eq!(trim_label("Please reference PO"), "reference PO");
        assert_eq!(trim_label("Chicago IL PO"), "PO");
        assert_eq!(trim_label("ship Release"), "Release");
        assert_eq!(trim_label("Customer PO"), "Customer PO");
    }

    #[test]
    fn test_subtype_closest_to_end() {
        assert_eq!(subtype_for_label("Customer PO"), Some(RefSubtype::Po));
        assert_eq!(subtype_for_label("PO Customer"), Some(RefSubtype::Customer));
        assert_eq!(subtype_for_label("P.O."), Some(RefSubtype::Po));
        assert_eq!(subtype_for_label("B/L"), Some(RefSubtype::Bol));
        assert_eq!(subtype_for_label("Release"), None);
    }

    #[test]
    fn test_unlabeled_number_is_low_confidence() {
        let candidates = extract("see 99887766 attached");
        let refs = of_type(&candidates, CandidateType::ReferenceNumber);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].confidence, Confidence::Low);
        assert!(refs[0].label_hint.is_none());
        assert!(refs[0].subtype.is_none());
    }

    #[test]
    fn test_phone_numbers_are_not_references() {
        let candidates = extract("Phone # 5551234567");
        assert!(candidates
            .iter()
            .filter(|c| c.candidate_type == CandidateType::ReferenceNumber)
            .all(|c| c.label_hint.is_none()));
    }

    #[test]
    fn test_dates_normalized() {
        let candidates = extract("ship 03/15/2024 or 2024-03-16 or March 17th, 2024 or 31/12/24");
        let values: Vec<&str> = of_type(&candidates, CandidateType::Date)
            .iter()
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(
            values,
            vec!["2024-03-15", "2024-03-16", "2024-03-17", "2024-12-31"]
        );
    }

    #[test]
    fn test_invalid_date_dropped() {
        let candidates = extract("on 02/30/2024");
        assert!(of_type(&candidates, CandidateType::Date).is_empty());
    }

    #[test]
    fn test_times_normalized() {
        let candidates = extract("open 7am, close 4:30 PM, cutoff 1700 hrs");
        let values: Vec<&str> = of_type(&candidates, CandidateType::Time)
            .iter()
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(values, vec!["07:00", "16:30", "17:00"]);
    }

    #[test]
    fn test_datetime_fusion() {
        let candidates = extract("Appt 03/15/2024 @ 08:00 sharp");
        let dt = of_type(&candidates, CandidateType::Datetime);
        assert_eq!(dt.len(), 1);
        assert_eq!(dt[0].value, "2024-03-15T08:00");
        assert!(of_type(&candidates, CandidateType::Date).is_empty());
        assert!(of_type(&candidates, CandidateType::Time).is_empty());
    }

    #[test]
    fn test_address_and_city() {
        let candidates = extract("Pickup: Warehouse A, 100 Main St, Dallas, TX 75201");
        assert_eq!(of_type(&candidates, CandidateType::Address)[0].value, "100 Main St");
        assert_eq!(
            of_type(&candidates, CandidateType::CityStateZip)[0].value,
            "Dallas, TX 75201"
        );
    }

    #[test]
    fn test_city_noise_words_trimmed() {
        let candidates = extract("Ship To Chicago, IL 60601");
        let city = of_type(&candidates, CandidateType::CityStateZip);
        assert_eq!(city[0].value, "Chicago, IL 60601");
        assert_eq!(city[0].raw_match, "Chicago, IL 60601");
    }

    #[test]
    fn test_invalid_state_rejected() {
        let candidates = extract("Springfield, ZZ 12345");
        assert!(of_type(&candidates, CandidateType::CityStateZip).is_empty());
    }

    #[test]
    fn test_cargo_candidates() {
        let text = "42,000 lbs, 26 pallets, 48x40x60 in, keep at 34°F, frozen\nCommodity: Frozen Chicken";
        let candidates = extract(text);
        assert_eq!(of_type(&candidates, CandidateType::Weight)[0].value, "42000 lbs");
        assert_eq!(of_type(&candidates, CandidateType::Pieces)[0].value, "26 pallets");
        assert_eq!(of_type(&candidates, CandidateType::Dimensions)[0].value, "48x40x60 in");
        let temps: Vec<&str> = of_type(&candidates, CandidateType::Temperature)
            .iter()
            .map(|c| c.value.as_str())
            .collect();
        assert!(temps.contains(&"34 F"));
        assert!(temps.contains(&"frozen"));
        assert_eq!(
            of_type(&candidates, CandidateType::Commodity)[0].value,
            "Frozen Chicken"
        );
    }

    #[test]
    fn test_labeled_weight_without_unit() {
        let candidates = extract("Weight: 38000");
        let w = of_type(&candidates, CandidateType::Weight);
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].value, "38000 lbs");
        assert_eq!(w[0].confidence, Confidence::Medium);
    }

    #[test]
    fn test_stop_blocks_follow_segments() {
        let text = "Load 5521\n\nPickup: ACME, Dallas, TX 75201\n\nDelivery: Beta, Austin, TX 73301";
        let candidates = extract(text);
        let blocks = of_type(&candidates, CandidateType::StopBlock);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block_type, BlockType::Pickup);
        assert_eq!(blocks[1].block_type, BlockType::Delivery);
        assert_eq!(blocks[0].value, "Pickup: ACME, Dallas, TX 75201");

        let dallas = candidates
            .iter()
            .find(|c| c.value == "Dallas, TX 75201")
            .unwrap();
        assert_eq!(dallas.block_type, BlockType::Pickup);
    }

    #[test]
    fn test_same_start_resolved_by_priority() {
        let text = "123456";
        let a = new_candidate(text, CandidateType::ReferenceNumber, 0, 6, "123456".into(), Confidence::Low);
        let b = new_candidate(text, CandidateType::Weight, 0, 6, "123456 lbs".into(), Confidence::Low);
        let resolved = resolve_overlaps(vec![a, b]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].candidate_type, CandidateType::Weight);
    }

    #[test]
    fn test_identical_duplicates_collapse() {
        let text = "PO 123456";
        let low = new_candidate(text, CandidateType::ReferenceNumber, 3, 9, "123456".into(), Confidence::Low);
        let mut high = low.clone();
        high.confidence = Confidence::High;
        let resolved = resolve_overlaps(vec![low.clone(), high, low]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].confidence, Confidence::High);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let text = "PO# 118585 BOL: 55123\nPickup 03/15/2024 8am\n100 Main St, Dallas, TX 75201\n\
                    Delivery 03/16/2024\nConsignee: Beta, Austin, TX 73301\n42,000 lbs 26 pallets 34F";
        let first = extract_candidates(text, &ExtractOptions::default());
        for _ in 0..5 {
            assert_eq!(extract_candidates(text, &ExtractOptions::default()), first);
        }
    }

    #[test]
    fn test_garbage_input_does_not_panic() {
        let long = "x".repeat(5000);
        for text in ["", "#", "°°°", "PO#", "12/", ":::: 1", long.as_str(), "é# 1é"] {
            let _ = extract(text);
        }
    }

    #[test]
    fn test_metadata_counts() {
        let output = extract_candidates("PO# 118585 ship to Chicago, IL 60601", &ExtractOptions::default());
        assert_eq!(output.metadata.candidate_counts["reference_number"], 1);
        assert_eq!(output.metadata.candidate_counts["city_state_zip"], 1);
        assert_eq!(output.metadata.rules_applied_count, 0);
        assert!(output.metadata.suggested_commodity.is_none());
    }
}
