//! Testing utilities: a scriptable LLM client and sample data.
//!
//! # Example
//!
//! ```rust,ignore
//! use tenderdesk_core::testing::{fixtures, MockLlmClient};
//!
//! let llm = MockLlmClient::new();
//! llm.push_response(fixtures::SAMPLE_LLM_RESPONSE);
//! // hand Arc::new(llm) to a ShipmentClassifier or TenderService
//! ```

mod mock_llm;

pub use mock_llm::MockLlmClient;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::rules::{CustomerProfile, NewRule, RuleAction, RuleType};
    use crate::shipment::{
        CargoDetails, Location, RefSubtype, ReferenceNumber, Stop, StopType, StructuredShipment,
        Weight, WeightUnit,
    };

    /// A small two-stop tender as pasted from an email.
    pub const SAMPLE_TENDER: &str = "Load Tender - Acme Foods\n\
        PO# 118585\n\
        Weight: 42,000 lbs\n\
        Commodity: Frozen Chicken\n\
        Pickup: Acme Cold Storage, Dallas, TX 75201\n\
        03/15/2024 08:00\n\
        Delivery: Chicago, IL 60601\n\
        Appt# 8890";

    /// Model output that matches [`SAMPLE_TENDER`].
    pub const SAMPLE_LLM_RESPONSE: &str = r#"{
        "reference_numbers": [{"type": "po", "value": "118585"}],
        "stops": [
            {"type": "pickup", "sequence": 1,
             "location": {"name": "Acme Cold Storage", "city": "Dallas", "state": "TX", "zip": "75201"},
             "schedule": {"date": "2024-03-15", "time": "08:00"}},
            {"type": "delivery", "sequence": 1,
             "location": {"city": "Chicago", "state": "IL", "zip": "60601"},
             "reference_numbers": [{"type": "appointment", "value": "8890"}]}
        ],
        "cargo": {
            "weight": {"value": 42000, "unit": "lbs"},
            "commodity": "Frozen Chicken"
        }
    }"#;

    /// The shipment [`SAMPLE_LLM_RESPONSE`] parses into.
    pub fn sample_shipment() -> StructuredShipment {
        let mut pickup = Stop::new(StopType::Pickup, 1);
        pickup.location = Location {
            name: Some("Acme Cold Storage".to_string()),
            city: Some("Dallas".to_string()),
            state: Some("TX".to_string()),
            zip: Some("75201".to_string()),
            ..Default::default()
        };
        pickup.schedule.date = Some("2024-03-15".to_string());
        pickup.schedule.time = Some("08:00".to_string());

        let mut delivery = Stop::new(StopType::Delivery, 1);
        delivery.location = Location {
            city: Some("Chicago".to_string()),
            state: Some("IL".to_string()),
            zip: Some("60601".to_string()),
            ..Default::default()
        };
        delivery
            .reference_numbers
            .push(ReferenceNumber::new(RefSubtype::Appointment, "8890"));

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

    /// A customer profile with no rules.
    pub fn customer_profile(id: &str) -> CustomerProfile {
        CustomerProfile::new(id, format!("Customer {}", id), Utc::now())
    }

    /// A customer profile with one active label rule.
    pub fn profile_with_label_rule(id: &str, label: &str, subtype: RefSubtype) -> CustomerProfile {
        let now = Utc::now();
        let mut profile = customer_profile(id);
        let outcome = profile.propose_rule(
            NewRule {
                rule_type: RuleType::LabelMap,
                pattern: label.to_string(),
                target_value: subtype.as_str().to_string(),
                block_scope: None,
                description: None,
                learned_from_tender: None,
            },
            "fixtures",
            now,
        );
        profile
            .apply_action(&outcome.rule_id, RuleAction::Approve, "fixtures", now)
            .expect("fresh rule approves");
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use crate::classifier::{ClassificationInput, ShipmentClassifier};
    use crate::extractor::{extract_candidates, ExtractOptions};
    use crate::verifier::TenderSource;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sample_response_matches_sample_shipment() {
        let llm = Arc::new(super::MockLlmClient::new());
        llm.push_response(fixtures::SAMPLE_LLM_RESPONSE);
        let candidates =
            extract_candidates(fixtures::SAMPLE_TENDER, &ExtractOptions::default()).candidates;

        let result = ShipmentClassifier::new(llm)
            .classify_and_verify(ClassificationInput {
                original_text: fixtures::SAMPLE_TENDER,
                candidates: &candidates,
                customer_profile: None,
                source: TenderSource::Paste,
            })
            .await
            .unwrap();

        let mut shipment = result.shipment;
        shipment.classification_metadata = None;
        assert_eq!(shipment, fixtures::sample_shipment());
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }
}
