//! McLeod LoadMaster order export.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{
    DryRunReport, ExportError, ExportPayload, ExportProvider, ExportReceipt, ValidationIssue,
};
use crate::shipment::{RefSubtype, Stop, StopType, StructuredShipment, WeightUnit};

/// Connection settings for a McLeod instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McLeodConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub company_id: String,
}

pub struct McLeodProvider {
    config: McLeodConfig,
    client: reqwest::Client,
}

impl McLeodProvider {
    pub const ID: &'static str = "mcleod";

    pub fn new(config: McLeodConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn validate(&self, shipment: &StructuredShipment) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if shipment.stop_indices(StopType::Pickup).is_empty() {
            issues.push(ValidationIssue::error("stops", "at least one pickup stop is required"));
        }
        if shipment.stop_indices(StopType::Delivery).is_empty() {
            issues.push(ValidationIssue::error("stops", "at least one delivery stop is required"));
        }

        for (i, stop) in shipment.stops.iter().enumerate() {
            let loc = &stop.location;
            if is_blank(&loc.city) {
                issues.push(ValidationIssue::error(
                    format!("stops[{}].location.city", i),
                    "city is required",
                ));
            }
            if is_blank(&loc.state) {
                issues.push(ValidationIssue::error(
                    format!("stops[{}].location.state", i),
                    "state is required",
                ));
            }
            if is_blank(&loc.zip) {
                issues.push(ValidationIssue::warning(
                    format!("stops[{}].location.zip", i),
                    "zip code missing; McLeod will geocode by city",
                ));
            }
            if is_blank(&stop.schedule.date) {
                issues.push(ValidationIssue::warning(
                    format!("stops[{}].schedule.date", i),
                    "no scheduled date",
                ));
            }
        }

        match &shipment.cargo.weight {
            None => issues.push(ValidationIssue::warning("cargo.weight", "weight missing")),
            Some(w) if w.value <= 0.0 => issues.push(ValidationIssue::error(
                "cargo.weight.value",
                "weight must be positive",
            )),
            Some(_) => {}
        }

        issues
    }

    fn map_order(&self, payload: &ExportPayload) -> Value {
        let shipment = &payload.shipment;
        let cargo = &shipment.cargo;
        let weight_lbs = cargo.weight.as_ref().map(|w| match w.unit {
            WeightUnit::Lbs => w.value,
            WeightUnit::Kg => (w.value * 2.20462 * 10.0).round() / 10.0,
        });
        let temperature_f = cargo.temperature.as_ref().and_then(|t| t.fahrenheit());

        json!({
            "__type": "orders",
            "company_id": self.config.company_id,
            "customer_id": payload.customer_id,
            "blnum": first_value(shipment, RefSubtype::Bol),
            "consignee_refno": first_value(shipment, RefSubtype::Po),
            "commodity": cargo.commodity,
            "weight": weight_lbs,
            "weight_um": "LB",
            "pieces": cargo.pieces.as_ref().map(|p| p.count),
            "temperature_min": temperature_f,
            "temperature_max": temperature_f,
            "stops": shipment.stops.iter().map(map_stop).collect::<Vec<_>>(),
            "reference_numbers": shipment
                .reference_numbers
                .iter()
                .map(|r| json!({
                    "__type": "reference_number",
                    "reference_qual": qualifier(r.ref_type),
                    "reference_number": r.value,
                }))
                .collect::<Vec<_>>(),
            "ordered_remarks": format!("tenderdesk:{}", payload.tender_id),
        })
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn first_value(shipment: &StructuredShipment, subtype: RefSubtype) -> Option<&str> {
    shipment
        .all_references()
        .find(|(_, _, r)| r.ref_type == subtype)
        .map(|(_, _, r)| r.value.as_str())
}

fn qualifier(subtype: RefSubtype) -> &'static str {
    match subtype {
        RefSubtype::Po => "PO",
        RefSubtype::Bol => "BL",
        RefSubtype::Pro => "PR",
        RefSubtype::Pickup => "PU",
        RefSubtype::Delivery => "DL",
        RefSubtype::Load => "LD",
        RefSubtype::Order => "OR",
        RefSubtype::Shipment => "SH",
        RefSubtype::Confirmation => "CN",
        RefSubtype::Appointment => "AP",
        RefSubtype::Seal => "SN",
        RefSubtype::Container => "CT",
        RefSubtype::Customer => "CR",
        RefSubtype::Reference | RefSubtype::Unknown => "RF",
    }
}

fn map_stop(stop: &Stop) -> Value {
    let loc = &stop.location;
    let scheduled = match (&stop.schedule.date, &stop.schedule.time) {
        (Some(date), Some(time)) => Some(format!("{} {}", date, time)),
        (Some(date), None) => Some(date.clone()),
        _ => None,
    };
    json!({
        "__type": "stop",
        "stop_type": match stop.stop_type {
            StopType::Pickup => "PU",
            StopType::Delivery => "SO",
        },
        "order_sequence": stop.sequence,
        "location_name": loc.name,
        "address": loc.address,
        "city_name": loc.city,
        "state": loc.state,
        "zip_code": loc.zip,
        "country": loc.country.as_deref().unwrap_or("USA"),
        "sched_arrive_early": scheduled,
        "appt_required": stop.schedule.appointment_required.unwrap_or(false),
        "stop_notes": stop.notes,
        "reference_numbers": stop
            .reference_numbers
            .iter()
            .map(|r| json!({
                "__type": "reference_number",
                "reference_qual": qualifier(r.ref_type),
                "reference_number": r.value,
            }))
            .collect::<Vec<_>>(),
    })
}

#[derive(Deserialize)]
struct McLeodOrderResponse {
    id: Option<String>,
}

#[async_trait]
impl ExportProvider for McLeodProvider {
    fn id(&self) -> &str {
        Self::ID
    }

    fn is_configured(&self) -> bool {
        !self.config.base_url.is_empty()
            && !self.config.api_token.is_empty()
            && !self.config.company_id.is_empty()
    }

    async fn dry_run(&self, payload: &ExportPayload) -> Result<DryRunReport, ExportError> {
        Ok(DryRunReport {
            provider: Self::ID.to_string(),
            mapped: self.map_order(payload),
            issues: self.validate(&payload.shipment),
        })
    }

    async fn export(&self, payload: &ExportPayload) -> Result<ExportReceipt, ExportError> {
        if !self.is_configured() {
            return Err(ExportError::NotConfigured(Self::ID.to_string()));
        }

        let report = self.dry_run(payload).await?;
        if report.has_errors() {
            warn!(tender_id = %payload.tender_id, issues = report.issues.len(), "McLeod export blocked by validation");
            return Err(ExportError::Validation(report.issues));
        }

        let response = self
            .client
            .post(format!(
                "{}/ws/orders/create",
                self.config.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Token {}", self.config.api_token))
            .header("Accept", "application/json")
            .json(&report.mapped)
            .send()
            .await
            .map_err(|e| ExportError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response.text().await.unwrap_or_default();
            return Err(ExportError::Rejected { status, message });
        }

        let body: McLeodOrderResponse = response
            .json()
            .await
            .map_err(|e| ExportError::Http(e.to_string()))?;
        info!(tender_id = %payload.tender_id, external_id = ?body.id, "Exported order to McLeod");

        Ok(ExportReceipt {
            provider: Self::ID.to_string(),
            external_id: body.id,
            warnings: report.issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shipment::{ReferenceNumber, Weight};
    use crate::testing::fixtures;

    fn provider(configured: bool) -> McLeodProvider {
        McLeodProvider::new(if configured {
            McLeodConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_token: "token".into(),
                company_id: "TMS".into(),
            }
        } else {
            McLeodConfig::default()
        })
    }

    fn payload(shipment: StructuredShipment) -> ExportPayload {
        ExportPayload {
            tender_id: "t-1".into(),
            customer_id: Some("c-1".into()),
            shipment,
        }
    }

    #[tokio::test]
    async fn test_dry_run_maps_sample_shipment() {
        let report = provider(true)
            .dry_run(&payload(fixtures::sample_shipment()))
            .await
            .unwrap();

        assert!(!report.has_errors(), "{:?}", report.issues);
        assert_eq!(report.mapped["company_id"], "TMS");
        assert_eq!(report.mapped["stops"][0]["stop_type"], "PU");
        assert_eq!(report.mapped["stops"][1]["stop_type"], "SO");
        assert_eq!(report.mapped["ordered_remarks"], "tenderdesk:t-1");
    }

    #[tokio::test]
    async fn test_dry_run_reports_missing_stops_and_weight() {
        let mut shipment = StructuredShipment::default();
        shipment.reference_numbers.push(ReferenceNumber::new(RefSubtype::Po, "1"));
        let report = provider(true).dry_run(&payload(shipment)).await.unwrap();

        assert!(report.has_errors());
        let fields: Vec<_> = report.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["stops", "stops", "cargo.weight"]);
        assert_eq!(report.mapped["consignee_refno"], "1");
    }

    #[tokio::test]
    async fn test_kg_weight_converted_to_pounds() {
        let mut shipment = fixtures::sample_shipment();
        shipment.cargo.weight = Some(Weight {
            value: 1000.0,
            unit: WeightUnit::Kg,
        });
        let report = provider(true).dry_run(&payload(shipment)).await.unwrap();
        assert_eq!(report.mapped["weight"], 2204.6);
    }

    #[tokio::test]
    async fn test_export_requires_configuration() {
        let err = provider(false)
            .export(&payload(fixtures::sample_shipment()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_export_refuses_invalid_payload_before_sending() {
        let err = provider(true)
            .export(&payload(StructuredShipment::default()))
            .await
            .unwrap_err();
        match err {
            ExportError::Validation(issues) => assert!(!issues.is_empty()),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
