//! Strict schema for the model's shipment JSON.
//!
//! The response is untrusted: unknown fields are rejected and every value
//! is converted explicitly before it reaches [`StructuredShipment`].

use serde::{Deserialize, Deserializer};

use crate::shipment::{
    CargoDetails, Location, Pieces, RefSubtype, ReferenceNumber, Schedule, Stop, StopType,
    StructuredShipment, Temperature, TemperatureUnit, Weight, WeightUnit,
};

/// A JSON number or a numeric string ("42,000").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    /// Finite values only; "NaN" and "inf" parse as `f64` but cannot be stored.
    fn to_f64(&self, field: &str) -> Result<f64, String> {
        let (value, raw) = match self {
            Numeric::Number(n) => (Some(*n), n.to_string()),
            Numeric::Text(s) => (s.trim().replace(',', "").parse::<f64>().ok(), s.clone()),
        };
        value
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("{field}: '{raw}' is not a number"))
    }
}

/// A string or a bare JSON number; reference values often come back as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Text {
    Text(String),
    Number(serde_json::Number),
}

impl Text {
    fn into_string(self) -> String {
        match self {
            Text::Text(s) => s.trim().to_string(),
            Text::Number(n) => n.to_string(),
        }
    }
}

/// Lists the model may send as `null` when there is nothing to report.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ShipmentPayload {
    #[serde(default, deserialize_with = "null_as_empty")]
    reference_numbers: Vec<RefPayload>,
    #[serde(default, deserialize_with = "null_as_empty")]
    stops: Vec<StopPayload>,
    #[serde(default)]
    cargo: Option<CargoPayload>,
    #[serde(default, deserialize_with = "null_as_empty")]
    unclassified_notes: Vec<String>,
    #[serde(default)]
    confidence_notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefPayload {
    #[serde(rename = "type")]
    ref_type: String,
    value: Text,
    #[serde(default)]
    applies_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StopPayload {
    #[serde(rename = "type")]
    stop_type: StopType,
    #[serde(default)]
    sequence: Option<u32>,
    #[serde(default)]
    location: Option<LocationPayload>,
    #[serde(default)]
    schedule: Option<SchedulePayload>,
    #[serde(default, deserialize_with = "null_as_empty")]
    reference_numbers: Vec<RefPayload>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LocationPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<Text>,
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchedulePayload {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    appointment_required: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CargoPayload {
    #[serde(default)]
    weight: Option<WeightPayload>,
    #[serde(default)]
    pieces: Option<PiecesPayload>,
    #[serde(default)]
    dimensions: Option<String>,
    #[serde(default)]
    commodity: Option<String>,
    #[serde(default)]
    temperature: Option<TemperaturePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightPayload {
    value: Numeric,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PiecesPayload {
    count: Numeric,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemperaturePayload {
    #[serde(default)]
    value: Option<Numeric>,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

fn convert_refs(refs: Vec<RefPayload>) -> Vec<ReferenceNumber> {
    refs.into_iter()
        .filter_map(|r| {
            let value = r.value.into_string();
            if value.is_empty() {
                return None;
            }
            Some(ReferenceNumber {
                ref_type: r.ref_type.parse().unwrap_or(RefSubtype::Unknown),
                value,
                applies_to: clean(r.applies_to),
            })
        })
        .collect()
}

fn convert_cargo(cargo: CargoPayload) -> Result<CargoDetails, String> {
    let weight = match cargo.weight {
        Some(w) => {
            let unit = match w.unit.as_deref().map(|u| u.trim().to_lowercase()) {
                Some(u) if u.starts_with('k') => WeightUnit::Kg,
                _ => WeightUnit::Lbs,
            };
            Some(Weight {
                value: w.value.to_f64("cargo.weight.value")?,
                unit,
            })
        }
        None => None,
    };

    let pieces = match cargo.pieces {
        Some(p) => {
            let count = p.count.to_f64("cargo.pieces.count")?;
            if count < 0.0 || count.fract() != 0.0 || count > u32::MAX as f64 {
                return Err(format!("cargo.pieces.count: {count} is not a whole count"));
            }
            Some(Pieces {
                count: count as u32,
                kind: clean(p.kind),
            })
        }
        None => None,
    };

    let temperature = match cargo.temperature {
        Some(t) => {
            let value = t
                .value
                .map(|v| v.to_f64("cargo.temperature.value"))
                .transpose()?;
            let unit = match t.unit.as_deref().map(|u| u.trim().to_lowercase()) {
                Some(u) if u.starts_with('c') => TemperatureUnit::C,
                _ => TemperatureUnit::F,
            };
            let mode = clean(t.mode);
            (value.is_some() || mode.is_some()).then_some(Temperature { value, unit, mode })
        }
        None => None,
    };

    Ok(CargoDetails {
        weight,
        pieces,
        dimensions: clean(cargo.dimensions),
        commodity: clean(cargo.commodity),
        temperature,
    })
}

impl ShipmentPayload {
    /// Convert into a shipment. Stop sequences are taken as given; callers
    /// renumber them.
    pub(crate) fn into_shipment(self) -> Result<(StructuredShipment, Option<String>), String> {
        let mut stops = Vec::with_capacity(self.stops.len());
        for (i, s) in self.stops.into_iter().enumerate() {
            let loc = s.location.unwrap_or_default();
            let schedule = s.schedule.unwrap_or_default();
            stops.push(Stop {
                stop_type: s.stop_type,
                sequence: s.sequence.unwrap_or(i as u32 + 1),
                location: Location {
                    name: clean(loc.name),
                    address: clean(loc.address),
                    city: clean(loc.city),
                    state: clean(loc.state),
                    zip: loc.zip.map(Text::into_string).filter(|z| !z.is_empty()),
                    country: clean(loc.country),
                },
                schedule: Schedule {
                    date: clean(schedule.date),
                    time: clean(schedule.time),
                    appointment_required: schedule.appointment_required,
                },
                reference_numbers: convert_refs(s.reference_numbers),
                notes: clean(s.notes),
            });
        }

        let cargo = match self.cargo {
            Some(c) => convert_cargo(c)?,
            None => CargoDetails::default(),
        };

        let shipment = StructuredShipment {
            reference_numbers: convert_refs(self.reference_numbers),
            stops,
            cargo,
            unclassified_notes: self
                .unclassified_notes
                .into_iter()
                .filter_map(|n| clean(Some(n)))
                .collect(),
            classification_metadata: None,
        };
        Ok((shipment, clean(self.confidence_notes)))
    }
}

/// The outermost JSON object in a model response, ignoring any prose or
/// code fences around it.
fn json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

/// Parse and validate a model response.
pub(crate) fn parse_response(text: &str) -> Result<(StructuredShipment, Option<String>), String> {
    let payload: ShipmentPayload = serde_json::from_str(json_object(text))
        .map_err(|e| format!("invalid shipment JSON: {e}"))?;
    payload.into_shipment()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"Here is the shipment:
```json
{
  "reference_numbers": [{"type": "po", "value": 118585}, {"type": "weird", "value": "X1"}],
  "stops": [
    {"type": "pickup", "sequence": 1,
     "location": {"name": "Acme", "city": "Dallas", "state": "TX", "zip": 75201},
     "schedule": {"date": "2024-03-15", "time": "08:00", "appointment_required": true},
     "reference_numbers": [{"type": "pickup", "value": "PU-1"}]},
    {"type": "delivery", "location": {"city": "Chicago", "state": "IL"}}
  ],
  "cargo": {
    "weight": {"value": "42,000", "unit": "LBS"},
    "pieces": {"count": 26, "type": "pallets"},
    "commodity": "Frozen Chicken",
    "temperature": {"value": -10, "unit": "F", "mode": "frozen"}
  },
  "unclassified_notes": ["call before", "  "],
  "confidence_notes": "pickup time unclear"
}
```"#;

    #[test]
    fn test_parse_full_response() {
        let (s, notes) = parse_response(RESPONSE).unwrap();
        assert_eq!(notes.as_deref(), Some("pickup time unclear"));
        assert_eq!(s.reference_numbers[0].value, "118585");
        assert_eq!(s.reference_numbers[0].ref_type, RefSubtype::Po);
        assert_eq!(s.reference_numbers[1].ref_type, RefSubtype::Unknown);

        assert_eq!(s.stops.len(), 2);
        assert_eq!(s.stops[0].location.zip.as_deref(), Some("75201"));
        assert_eq!(s.stops[0].schedule.appointment_required, Some(true));
        assert_eq!(s.stops[1].stop_type, StopType::Delivery);
        assert_eq!(s.stops[1].sequence, 2);

        let weight = s.cargo.weight.unwrap();
        assert_eq!(weight.value, 42000.0);
        assert_eq!(weight.unit, WeightUnit::Lbs);
        assert_eq!(s.cargo.pieces.unwrap().count, 26);
        assert_eq!(s.cargo.temperature.unwrap().value, Some(-10.0));
        assert_eq!(s.unclassified_notes, vec!["call before".to_string()]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_response(r#"{"stops": [], "shipper_mood": "happy"}"#).unwrap_err();
        assert!(err.contains("shipper_mood"), "{err}");
    }

    #[test]
    fn test_bad_stop_type_rejected() {
        assert!(parse_response(r#"{"stops": [{"type": "crossdock"}]}"#).is_err());
    }

    #[test]
    fn test_non_numeric_weight_rejected() {
        let err =
            parse_response(r#"{"cargo": {"weight": {"value": "heavy"}}}"#).unwrap_err();
        assert!(err.contains("cargo.weight.value"));
    }

    #[test]
    fn test_non_finite_numbers_rejected() {
        for raw in [r#""NaN""#, r#""inf""#, r#""-infinity""#] {
            let weight = format!(r#"{{"cargo": {{"weight": {{"value": {raw}}}}}}}"#);
            let err = parse_response(&weight).unwrap_err();
            assert!(err.contains("cargo.weight.value"), "{err}");

            let temp = format!(r#"{{"cargo": {{"temperature": {{"value": {raw}, "unit": "F"}}}}}}"#);
            let err = parse_response(&temp).unwrap_err();
            assert!(err.contains("cargo.temperature.value"), "{err}");
        }
    }

    #[test]
    fn test_parsed_weight_survives_json_round_trip() {
        let (s, _) = parse_response(r#"{"cargo": {"weight": {"value": "1,250.5"}}}"#).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        let back: StructuredShipment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn test_null_lists_are_empty() {
        let (s, _) = parse_response(
            r#"{"reference_numbers": null, "stops": [{"type": "pickup", "reference_numbers": null}],
                "unclassified_notes": null}"#,
        )
        .unwrap();
        assert!(s.reference_numbers.is_empty());
        assert_eq!(s.stops.len(), 1);
        assert!(s.stops[0].reference_numbers.is_empty());
        assert!(s.unclassified_notes.is_empty());

        let (s, _) = parse_response(r#"{"reference_numbers": null, "stops": null}"#).unwrap();
        assert_eq!(s, StructuredShipment::default());
    }

    #[test]
    fn test_fractional_pieces_rejected() {
        assert!(parse_response(r#"{"cargo": {"pieces": {"count": 2.5}}}"#).is_err());
    }

    #[test]
    fn test_not_json() {
        assert!(parse_response("I could not find a shipment").is_err());
    }

    #[test]
    fn test_empty_object_is_empty_shipment() {
        let (s, notes) = parse_response("{}").unwrap();
        assert_eq!(s, StructuredShipment::default());
        assert!(notes.is_none());
    }
}
