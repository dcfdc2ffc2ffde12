//! Pattern tables for candidate extraction.
//!
//! Kept as data so they can be tested in isolation and extended without
//! touching the scanning code.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use super::CandidateType;
use crate::shipment::RefSubtype;

/// Overlap priority, highest first. Candidates of different types starting
/// at the same offset keep only the highest priority type.
pub const CANDIDATE_PRIORITY: [CandidateType; 12] = [
    CandidateType::StopBlock,
    CandidateType::Datetime,
    CandidateType::Address,
    CandidateType::CityStateZip,
    CandidateType::Date,
    CandidateType::Time,
    CandidateType::Temperature,
    CandidateType::Weight,
    CandidateType::Dimensions,
    CandidateType::Pieces,
    CandidateType::ReferenceNumber,
    CandidateType::Commodity,
];

pub(crate) fn priority(candidate_type: CandidateType) -> usize {
    CANDIDATE_PRIORITY
        .iter()
        .position(|t| *t == candidate_type)
        .unwrap_or(CANDIDATE_PRIORITY.len())
}

/// Label keywords (normalized: lowercase, no punctuation) and the subtype they imply.
pub(crate) const REF_KEYWORDS: &[(&str, RefSubtype)] = &[
    ("po", RefSubtype::Po),
    ("purchase order", RefSubtype::Po),
    ("bol", RefSubtype::Bol),
    ("bl", RefSubtype::Bol),
    ("bill of lading", RefSubtype::Bol),
    ("pro", RefSubtype::Pro),
    ("pickup", RefSubtype::Pickup),
    ("pick up", RefSubtype::Pickup),
    ("pu", RefSubtype::Pickup),
    ("delivery", RefSubtype::Delivery),
    ("del", RefSubtype::Delivery),
    ("load", RefSubtype::Load),
    ("order", RefSubtype::Order),
    ("shipment", RefSubtype::Shipment),
    ("confirmation", RefSubtype::Confirmation),
    ("conf", RefSubtype::Confirmation),
    ("appointment", RefSubtype::Appointment),
    ("appt", RefSubtype::Appointment),
    ("seal", RefSubtype::Seal),
    ("container", RefSubtype::Container),
    ("cntr", RefSubtype::Container),
    ("customer", RefSubtype::Customer),
    ("cust", RefSubtype::Customer),
    ("reference", RefSubtype::Reference),
    ("ref", RefSubtype::Reference),
];

/// Leading words stripped from a captured label.
pub(crate) const LABEL_FILLER: &[&str] = &[
    "please", "the", "our", "your", "use", "with", "and", "for", "on", "at", "is", "a",
    "an", "to", "of", "see",
];

/// Leading words stripped from a captured city name.
pub(crate) const CITY_NOISE: &[&str] = &[
    "ship", "to", "from", "deliver", "delivery", "pickup", "consignee", "shipper", "origin",
    "destination", "dest", "at", "in", "near", "location", "and",
];

pub(crate) const STATE_CODES: &[&str] = &[
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "AB", "BC", "MB", "NB", "NL", "NS", "ON", "PE",
    "QC", "SK",
];

pub(crate) const MONTHS: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const VALUE: &str = r"([a-z0-9][a-z0-9\-/]*)";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("extractor pattern must compile")
}

/// Up to three label words, a number marker, then the value.
pub(crate) static LABELED_REF: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b([a-z][a-z./]*(?:[ \t]+[a-z][a-z./]*){{0,2}})[ \t]*(?:#|\bno\.|\bnum(?:ber)?\b\.?)[ \t]*:?[ \t]*{VALUE}"
    ))
});

/// Known keyword followed by a colon: "BOL: 55123".
pub(crate) static KEYWORD_COLON_REF: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(p\.?o\.?|bol|b/l|pro|load|order|shipment|confirmation|conf|appointment|appt|seal|container|customer|reference|ref)[ \t]*:[ \t]*{VALUE}"
    ))
});

pub(crate) static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| compile(r"\b\d{6,12}\b"));

pub(crate) static DATE_NUMERIC: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(\d{1,2})[/\-](\d{1,2})[/\-](\d{4}|\d{2})\b"));

pub(crate) static DATE_ISO: Lazy<Regex> = Lazy::new(|| compile(r"\b(\d{4})-(\d{2})-(\d{2})\b"));

pub(crate) static DATE_MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?[ \t]+(\d{1,2})(?:st|nd|rd|th)?,?[ \t]+(\d{4})\b",
    )
});

pub(crate) static TIME_COLON: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(\d{1,2}):([0-5]\d)(?:[ \t]*([ap])\.?m\b\.?)?"));

pub(crate) static TIME_MERIDIEM: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(1[0-2]|0?[1-9])[ \t]*([ap])\.?m\b\.?"));

pub(crate) static TIME_MILITARY: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b([01]\d|2[0-3])([0-5]\d)[ \t]*(?:hrs|hours)\b"));

/// Gap allowed between a date and a time to fuse them into a datetime.
pub(crate) static DATETIME_GAP: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^[ \t,@]*(?:at)?[ \t]*$"));

pub(crate) static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b\d{1,6}[ \t]+(?:[a-z0-9.'\-]+[ \t]+){0,4}?(?:street|st|avenue|ave|road|rd|boulevard|blvd|drive|dr|lane|ln|way|court|ct|highway|hwy|parkway|pkwy|place|pl|circle|cir|pike|trail|trl)\b\.?(?:,?[ \t]*(?:suite|ste|unit|bldg|#)[ \t]*[a-z0-9\-]+)?",
    )
});

pub(crate) static CITY_STATE_ZIP: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b([A-Z][A-Za-z.'\-]*(?:[ \t]+[A-Z][A-Za-z.'\-]*){0,3}),[ \t]*([A-Z]{2})[ \t]+(\d{5}(?:-\d{4})?)\b",
    )
});

pub(crate) static WEIGHT_UNIT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)[ \t]*(lbs?|pounds?|kgs?|kilos?|kilograms?)\b\.?")
});

pub(crate) static WEIGHT_LABELED: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(?:gross[ \t]+)?(?:weight|wt)\.?[ \t]*:?[ \t]*(\d{1,3}(?:,\d{3})+|\d+(?:\.\d+)?)")
});

pub(crate) static PIECES: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(\d{1,5})[ \t]*(pallets?|plts?|skids?|pieces?|pcs?|cases?|cartons?|ctns?|boxes|box|drums?|totes?|bundles?|crates?)\b",
    )
});

pub(crate) static DIMENSIONS: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(\d+(?:\.\d+)?)[ \t]*[x*][ \t]*(\d+(?:\.\d+)?)(?:[ \t]*[x*][ \t]*(\d+(?:\.\d+)?))?(?:[ \t]*(inches|in|feet|ft|cm)\b)?",
    )
});

pub(crate) static TEMPERATURE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)(?:^|[^0-9a-z.\-])(-?\d{1,3}(?:\.\d+)?)[ \t]*(?:°|deg(?:rees)?\.?)?[ \t]*([fc])\b",
    )
});

pub(crate) static TEMPERATURE_MODE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(frozen|reefer|refrigerated|temp[ \t]*controlled|dry[ \t]+van|ambient)\b")
});

pub(crate) static COMMODITY_LABELED: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(?:commodity|product|contents|cargo)[ \t]*:[ \t]*([^\r\n]*[^\s,;.])")
});
