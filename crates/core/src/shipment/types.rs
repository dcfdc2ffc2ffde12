//! Shipment data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Reference Numbers
// ============================================================================

/// Reference number subtype.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RefSubtype {
    Po,
    Bol,
    Pro,
    Pickup,
    Delivery,
    Load,
    Order,
    Shipment,
    Confirmation,
    Appointment,
    Seal,
    Container,
    Reference,
    Customer,
    Unknown,
}

impl RefSubtype {
    pub const ALL: [RefSubtype; 15] = [
        RefSubtype::Po,
        RefSubtype::Bol,
        RefSubtype::Pro,
        RefSubtype::Pickup,
        RefSubtype::Delivery,
        RefSubtype::Load,
        RefSubtype::Order,
        RefSubtype::Shipment,
        RefSubtype::Confirmation,
        RefSubtype::Appointment,
        RefSubtype::Seal,
        RefSubtype::Container,
        RefSubtype::Reference,
        RefSubtype::Customer,
        RefSubtype::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefSubtype::Po => "po",
            RefSubtype::Bol => "bol",
            RefSubtype::Pro => "pro",
            RefSubtype::Pickup => "pickup",
            RefSubtype::Delivery => "delivery",
            RefSubtype::Load => "load",
            RefSubtype::Order => "order",
            RefSubtype::Shipment => "shipment",
            RefSubtype::Confirmation => "confirmation",
            RefSubtype::Appointment => "appointment",
            RefSubtype::Seal => "seal",
            RefSubtype::Container => "container",
            RefSubtype::Reference => "reference",
            RefSubtype::Customer => "customer",
            RefSubtype::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RefSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefSubtype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        RefSubtype::ALL
            .iter()
            .copied()
            .find(|subtype| subtype.as_str() == lowered)
            .ok_or_else(|| format!("unknown reference subtype: {}", s))
    }
}

/// A reference number attached to the shipment or to a single stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferenceNumber {
    #[serde(rename = "type")]
    pub ref_type: RefSubtype,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<String>,
}

impl ReferenceNumber {
    pub fn new(ref_type: RefSubtype, value: impl Into<String>) -> Self {
        Self {
            ref_type,
            value: value.into(),
            applies_to: None,
        }
    }
}

// ============================================================================
// Stops
// ============================================================================

/// Stop type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Pickup,
    Delivery,
}

impl StopType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopType::Pickup => "pickup",
            StopType::Delivery => "delivery",
        }
    }
}

/// Stop location. Every field may be missing in a messy tender.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Location {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

/// Stop schedule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Schedule {
    /// Date as YYYY-MM-DD when the classifier could normalize it.
    pub date: Option<String>,
    /// Time as HH:MM (24h) or a window such as "08:00-12:00".
    pub time: Option<String>,
    pub appointment_required: Option<bool>,
}

/// A single pickup or delivery stop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stop {
    #[serde(rename = "type")]
    pub stop_type: StopType,
    /// 1-based position among stops of the same type.
    pub sequence: u32,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub reference_numbers: Vec<ReferenceNumber>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Stop {
    pub fn new(stop_type: StopType, sequence: u32) -> Self {
        Self {
            stop_type,
            sequence,
            location: Location::default(),
            schedule: Schedule::default(),
            reference_numbers: Vec::new(),
            notes: None,
        }
    }
}

// ============================================================================
// Cargo
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WeightUnit {
    Lbs,
    Kg,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Weight {
    pub value: f64,
    pub unit: WeightUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pieces {
    pub count: u32,
    /// Packaging type (pallets, cases, drums...).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TemperatureUnit {
    F,
    C,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Temperature {
    #[serde(default)]
    pub value: Option<f64>,
    pub unit: TemperatureUnit,
    /// Free-form mode as written in the tender ("frozen", "reefer", "dry"...).
    #[serde(default)]
    pub mode: Option<String>,
}

impl Temperature {
    /// Value converted to Fahrenheit.
    pub fn fahrenheit(&self) -> Option<f64> {
        self.value.map(|v| match self.unit {
            TemperatureUnit::F => v,
            TemperatureUnit::C => v * 9.0 / 5.0 + 32.0,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CargoDetails {
    pub weight: Option<Weight>,
    pub pieces: Option<Pieces>,
    pub dimensions: Option<String>,
    pub commodity: Option<String>,
    pub temperature: Option<Temperature>,
}

// ============================================================================
// Shipment
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationMetadata {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_notes: Option<String>,
}

/// The structured form of a tender.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StructuredShipment {
    pub reference_numbers: Vec<ReferenceNumber>,
    pub stops: Vec<Stop>,
    pub cargo: CargoDetails,
    pub unclassified_notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification_metadata: Option<ClassificationMetadata>,
}

/// Where a reference number lives inside a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefScope {
    Shipment,
    Stop(usize),
}

impl RefScope {
    /// Field path of the reference list for this scope.
    pub fn path(&self, ref_index: usize) -> String {
        match self {
            RefScope::Shipment => format!("reference_numbers[{}]", ref_index),
            RefScope::Stop(stop) => format!("stops[{}].reference_numbers[{}]", stop, ref_index),
        }
    }
}

impl StructuredShipment {
    /// Iterate all reference numbers, shipment level first, then stops in order.
    pub fn all_references(&self) -> impl Iterator<Item = (RefScope, usize, &ReferenceNumber)> {
        let shipment = self
            .reference_numbers
            .iter()
            .enumerate()
            .map(|(i, r)| (RefScope::Shipment, i, r));
        let stops = self.stops.iter().enumerate().flat_map(|(s, stop)| {
            stop.reference_numbers
                .iter()
                .enumerate()
                .map(move |(i, r)| (RefScope::Stop(s), i, r))
        });
        shipment.chain(stops)
    }

    /// Indices of stops of the given type, in document order.
    pub fn stop_indices(&self, stop_type: StopType) -> Vec<usize> {
        self.stops
            .iter()
            .enumerate()
            .filter(|(_, s)| s.stop_type == stop_type)
            .map(|(i, _)| i)
            .collect()
    }

    /// Renumber stop sequences so each stop type counts 1..n in list order.
    ///
    /// Returns how many stops had their sequence changed.
    pub fn resequence_stops(&mut self) -> usize {
        let mut pickups = 0;
        let mut deliveries = 0;
        let mut changed = 0;
        for stop in &mut self.stops {
            let counter = match stop.stop_type {
                StopType::Pickup => &mut pickups,
                StopType::Delivery => &mut deliveries,
            };
            *counter += 1;
            if stop.sequence != *counter {
                stop.sequence = *counter;
                changed += 1;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_subtype_parse() {
        assert_eq!("PO".parse::<RefSubtype>().unwrap(), RefSubtype::Po);
        assert_eq!(" bol ".parse::<RefSubtype>().unwrap(), RefSubtype::Bol);
        assert!("widget".parse::<RefSubtype>().is_err());
    }

    #[test]
    fn test_reference_serializes_type_field() {
        let r = ReferenceNumber::new(RefSubtype::Pro, "PRO-1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["type"], "pro");
        assert!(json.get("applies_to").is_none());
    }

    #[test]
    fn test_resequence_stops_per_type() {
        let mut shipment = StructuredShipment {
            stops: vec![
                Stop::new(StopType::Pickup, 3),
                Stop::new(StopType::Delivery, 1),
                Stop::new(StopType::Pickup, 3),
                Stop::new(StopType::Delivery, 5),
            ],
            ..Default::default()
        };

        let changed = shipment.resequence_stops();
        assert_eq!(changed, 3);
        let seqs: Vec<u32> = shipment.stops.iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![1, 1, 2, 2]);
        assert_eq!(shipment.resequence_stops(), 0);
    }

    #[test]
    fn test_all_references_order() {
        let mut stop = Stop::new(StopType::Delivery, 1);
        stop.reference_numbers.push(ReferenceNumber::new(RefSubtype::Delivery, "D1"));
        let shipment = StructuredShipment {
            reference_numbers: vec![ReferenceNumber::new(RefSubtype::Po, "P1")],
            stops: vec![stop],
            ..Default::default()
        };

        let paths: Vec<String> = shipment
            .all_references()
            .map(|(scope, i, _)| scope.path(i))
            .collect();
        assert_eq!(
            paths,
            vec!["reference_numbers[0]", "stops[0].reference_numbers[0]"]
        );
    }

    #[test]
    fn test_celsius_to_fahrenheit() {
        let t = Temperature {
            value: Some(-10.0),
            unit: TemperatureUnit::C,
            mode: None,
        };
        assert_eq!(t.fahrenheit(), Some(14.0));
    }

    #[test]
    fn test_shipment_deserializes_sparse_json() {
        let shipment: StructuredShipment =
            serde_json::from_str(r#"{"stops":[{"type":"pickup","sequence":1}]}"#).unwrap();
        assert_eq!(shipment.stops.len(), 1);
        assert!(shipment.cargo.commodity.is_none());
    }
}
