//! In-process API tests driving the real router with `oneshot`.

mod common;

use axum::http::StatusCode;
use serde_json::json;
use tenderdesk_core::classifier::LlmError;
use tenderdesk_core::ratelimit::RateLimitConfig;
use tenderdesk_core::shipment::RefSubtype;

use common::{fixtures, TestConfig, TestFixture, ADMIN_API_KEY, API_KEY};

async fn create_customer(fixture: &TestFixture, id: &str) {
    let response = fixture
        .post(
            "/api/v1/customers",
            json!({ "id": id, "name": format!("Customer {}", id) }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
}

async fn paste_tender(fixture: &TestFixture, customer_id: Option<&str>) -> String {
    let response = fixture
        .post(
            "/api/v1/tenders",
            json!({ "text": fixtures::SAMPLE_TENDER, "customer_id": customer_id }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    response.body["id"].as_str().unwrap().to_string()
}

/// Path and query of a signed URL, without the public base.
fn local_path(url: &str) -> String {
    url.trim_start_matches("http://tenderdesk.test").to_string()
}

// =============================================================================
// Basics
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_hides_secrets() {
    let fixture = TestFixture::with_config(TestConfig::with_api_keys()).await;
    let response = fixture.get_with_key("/api/v1/config", API_KEY).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["auth"]["api_key_configured"], true);
    assert_eq!(response.body["storage"]["signing_secret_configured"], true);

    let text = response.body.to_string();
    assert!(!text.contains(API_KEY));
    assert!(!text.contains(common::SIGNING_SECRET));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_bytes("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("tenderdesk_http_requests_total"));
}

// =============================================================================
// Auth and rate limiting
// =============================================================================

#[tokio::test]
async fn test_api_key_required_except_health() {
    let fixture = TestFixture::with_config(TestConfig::with_api_keys()).await;

    assert_status!(fixture.get("/api/v1/health").await, StatusCode::OK);

    let response = fixture.get("/api/v1/customers").await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "unauthorized");

    assert_status!(
        fixture.get_with_key("/api/v1/customers", "wrong").await,
        StatusCode::UNAUTHORIZED
    );
    assert_status!(
        fixture.get_with_key("/api/v1/customers", API_KEY).await,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_rate_limit_returns_429_with_retry_after() {
    let fixture = TestFixture::with_config(TestConfig {
        rate_limit: RateLimitConfig {
            window_secs: 60,
            max_requests: 2,
        },
        ..Default::default()
    })
    .await;

    assert_status!(fixture.get("/api/v1/customers").await, StatusCode::OK);
    assert_status!(fixture.get("/api/v1/customers").await, StatusCode::OK);

    let limited = fixture.get("/api/v1/customers").await;
    assert_status!(limited, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.body["error"], "rate_limited");
    assert!(limited.headers.contains_key("retry-after"));

    // Health is never limited.
    assert_status!(fixture.get("/api/v1/health").await, StatusCode::OK);
}

// =============================================================================
// Tenders
// =============================================================================

#[tokio::test]
async fn test_paste_tender_and_fetch_detail() {
    let fixture = TestFixture::new().await;
    let id = paste_tender(&fixture, None).await;

    let response = fixture.get(&format!("/api/v1/tenders/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["tender"]["id"], id.as_str());
    assert_eq!(response.body["tender"]["source_type"], "paste");

    let extraction = &response.body["extraction"];
    assert!(!extraction["candidates"].as_array().unwrap().is_empty());
    assert_eq!(
        extraction["llm_output"]["reference_numbers"][0]["value"],
        "118585"
    );

    let listed = fixture.get("/api/v1/tenders").await;
    assert_eq!(listed.body["tenders"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_tender_requests() {
    let fixture = TestFixture::new().await;

    let empty = fixture
        .post("/api/v1/tenders", json!({ "text": "   " }))
        .await;
    assert_status!(empty, StatusCode::BAD_REQUEST);

    let unknown_customer = fixture
        .post(
            "/api/v1/tenders",
            json!({ "text": fixtures::SAMPLE_TENDER, "customer_id": "ghost" }),
        )
        .await;
    assert_status!(unknown_customer, StatusCode::NOT_FOUND);

    assert_status!(
        fixture.get("/api/v1/tenders/does-not-exist").await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_classification_failure_still_creates_tender() {
    let fixture = TestFixture::new().await;
    for _ in 0..3 {
        fixture.llm.push_error(LlmError::Server {
            status: 503,
            message: "overloaded".to_string(),
        });
    }

    let id = paste_tender(&fixture, None).await;
    let detail = fixture.get(&format!("/api/v1/tenders/{}", id)).await;
    let extraction = &detail.body["extraction"];
    assert!(extraction["llm_output"].is_null());
    assert!(extraction["error"].is_string());
    assert!(!extraction["candidates"].as_array().unwrap().is_empty());

    let failures = fixture.wait_for_audit("classification_failed").await;
    assert_eq!(failures[0]["tender_id"], id.as_str());
}

#[tokio::test]
async fn test_upload_dedupes_and_serves_signed_file() {
    let fixture = TestFixture::new().await;
    create_customer(&fixture, "acme").await;
    let bytes = fixtures::SAMPLE_TENDER.as_bytes();

    let first = fixture
        .post_files("/api/v1/tenders/upload", &[("tender.txt", bytes)], Some("acme"))
        .await;
    assert_status!(first, StatusCode::CREATED);
    assert_eq!(first.body["deduped"], false);
    let id = first.body["id"].as_str().unwrap().to_string();

    let second = fixture
        .post_files("/api/v1/tenders/upload", &[("again.txt", bytes)], Some("acme"))
        .await;
    assert_status!(second, StatusCode::OK);
    assert_eq!(second.body["deduped"], true);
    assert_eq!(second.body["id"], id.as_str());

    let url = fixture
        .get(&format!("/api/v1/tenders/{}/file-url", id))
        .await;
    assert_status!(url, StatusCode::OK);
    let path = local_path(url.body["url"].as_str().unwrap());

    let (status, downloaded) = fixture.get_bytes(&path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(downloaded, bytes);

    let tampered = path.replace("signature=", "signature=0");
    assert_eq!(fixture.get_bytes(&tampered).await.0, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_file_url_for_pasted_tender_is_bad_request() {
    let fixture = TestFixture::new().await;
    let id = paste_tender(&fixture, None).await;
    assert_status!(
        fixture.get(&format!("/api/v1/tenders/{}/file-url", id)).await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_reprocess_idempotency() {
    let fixture = TestFixture::new().await;
    create_customer(&fixture, "acme").await;
    let id = paste_tender(&fixture, None).await;
    let path = format!("/api/v1/tenders/{}/reprocess", id);
    let requests_before = fixture.llm.request_count();

    let first = fixture
        .post_with_headers(
            &path,
            json!({ "customer_id": "acme" }),
            &[("Idempotency-Key", "k-1")],
        )
        .await;
    assert_status!(first, StatusCode::OK);
    assert_eq!(first.body["tender"]["customer_id"], "acme");
    assert_eq!(first.body["customer"]["id"], "acme");
    assert_eq!(fixture.llm.request_count(), requests_before + 1);

    let replay = fixture
        .post_with_headers(
            &path,
            json!({ "customer_id": "acme" }),
            &[("Idempotency-Key", "k-1")],
        )
        .await;
    assert_status!(replay, StatusCode::OK);
    assert_eq!(replay.body, first.body);
    assert_eq!(fixture.llm.request_count(), requests_before + 1);

    let conflict = fixture
        .post_with_headers(
            &path,
            json!({ "customer_id": null }),
            &[("Idempotency-Key", "k-1")],
        )
        .await;
    assert_status!(conflict, StatusCode::CONFLICT);
    assert_eq!(conflict.body["error"], "idempotency_conflict");
}

#[tokio::test]
async fn test_reprocess_while_locked_is_conflict() {
    let fixture = TestFixture::new().await;
    let id = paste_tender(&fixture, None).await;

    let _guard = fixture
        .state
        .service()
        .locks()
        .acquire(&id, "bob", "save_final")
        .unwrap();

    let response = fixture
        .post(&format!("/api/v1/tenders/{}/reprocess", id), json!({}))
        .await;
    assert_status!(response, StatusCode::CONFLICT);
    assert_eq!(response.body["error"], "tender_locked");
    assert_eq!(response.body["holder"], "bob");
    assert_eq!(response.body["reason"], "save_final");
}

// =============================================================================
// Review, learning and rules
// =============================================================================

#[tokio::test]
async fn test_save_final_proposes_rule_and_admin_approves() {
    let fixture = TestFixture::with_config(TestConfig::with_api_keys()).await;
    let response = fixture
        .post_with_headers(
            "/api/v1/customers",
            json!({ "id": "acme", "name": "Acme Foods" }),
            &[("Authorization", "Bearer user-key")],
        )
        .await;
    assert_status!(response, StatusCode::CREATED);

    let created = fixture
        .post_with_headers(
            "/api/v1/tenders",
            json!({ "text": fixtures::SAMPLE_TENDER, "customer_id": "acme" }),
            &[("Authorization", "Bearer user-key")],
        )
        .await;
    let id = created.body["id"].as_str().unwrap().to_string();

    let mut edited = fixtures::sample_shipment();
    edited.reference_numbers[0].ref_type = RefSubtype::Bol;
    let saved = fixture
        .post_with_headers(
            &format!("/api/v1/tenders/{}/final", id),
            json!({ "shipment": edited }),
            &[("Authorization", "Bearer user-key")],
        )
        .await;
    assert_status!(saved, StatusCode::OK);
    assert_eq!(saved.body["suggested_rules"][0]["target"], "bol");

    let rules = fixture
        .get_with_key("/api/v1/customers/acme/rules", API_KEY)
        .await;
    let rule = &rules.body["rules"][0];
    assert_eq!(rule["status"], "proposed");
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let action = json!({ "rule_id": rule_id, "action": "approve" });
    let forbidden = fixture
        .post_with_headers(
            "/api/v1/customers/acme/rules/action",
            action.clone(),
            &[("Authorization", "Bearer user-key")],
        )
        .await;
    assert_status!(forbidden, StatusCode::FORBIDDEN);

    let admin_auth = format!("Bearer {}", ADMIN_API_KEY);
    let approved = fixture
        .post_with_headers(
            "/api/v1/customers/acme/rules/action",
            action.clone(),
            &[("Authorization", admin_auth.as_str())],
        )
        .await;
    assert_status!(approved, StatusCode::OK);
    assert_eq!(approved.body["rules"][0]["status"], "active");

    let again = fixture
        .post_with_headers(
            "/api/v1/customers/acme/rules/action",
            action,
            &[("Authorization", admin_auth.as_str())],
        )
        .await;
    assert_status!(again, StatusCode::CONFLICT);
    assert_eq!(again.body["error"], "invalid_state_transition");
    assert_eq!(again.body["current"], "active");

    let events = fixture.wait_for_audit("rule_status_changed").await;
    assert_eq!(events[0]["user_id"], "api_key_admin");
}

#[tokio::test]
async fn test_customer_lookup() {
    let fixture = TestFixture::new().await;
    create_customer(&fixture, "acme").await;

    let response = fixture.get("/api/v1/customers/acme").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["name"], "Customer acme");
    assert_eq!(response.body["version"], 1);

    assert_status!(
        fixture.get("/api/v1/customers/nobody").await,
        StatusCode::NOT_FOUND
    );
    assert_status!(
        fixture
            .post("/api/v1/customers", json!({ "name": "" }))
            .await,
        StatusCode::BAD_REQUEST
    );
}

// =============================================================================
// Batches and export
// =============================================================================

#[tokio::test]
async fn test_batch_processes_in_order_and_isolates_failures() {
    let fixture = TestFixture::new().await;
    let tender = fixtures::SAMPLE_TENDER.as_bytes();
    let other = b"Pickup: Memphis, TN 38103\nDelivery: Atlanta, GA 30303\nPO# 7788";

    let response = fixture
        .post_files(
            "/api/v1/batches",
            &[("a.txt", tender), ("blank.txt", b"   "), ("c.txt", other)],
            None,
        )
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["items"].as_array().unwrap().len(), 3);
    let batch_id = response.body["id"].as_str().unwrap().to_string();

    let batch = fixture.wait_for_batch(&batch_id).await;
    assert_eq!(batch["status"], "completed_with_errors");
    let items = batch["items"].as_array().unwrap();
    assert_eq!(items[0]["file_name"], "a.txt");
    assert_eq!(items[0]["status"], "completed");
    assert_eq!(items[1]["status"], "failed");
    assert!(items[1]["error"].is_string());
    assert_eq!(items[2]["status"], "completed");

    let listed = fixture
        .get(&format!("/api/v1/tenders?batch_id={}", batch_id))
        .await;
    assert_eq!(listed.body["tenders"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_rejects_unknown_customer_and_empty_upload() {
    let fixture = TestFixture::new().await;

    let unknown = fixture
        .post_files("/api/v1/batches", &[("a.txt", b"PO# 1")], Some("ghost"))
        .await;
    assert_status!(unknown, StatusCode::NOT_FOUND);

    let empty = fixture.post_files("/api/v1/batches", &[], None).await;
    assert_status!(empty, StatusCode::BAD_REQUEST);

    assert_status!(
        fixture.get("/api/v1/batches/missing").await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_export_to_unconfigured_provider_is_not_found() {
    let fixture = TestFixture::new().await;
    let id = paste_tender(&fixture, None).await;

    let response = fixture
        .post(
            &format!("/api/v1/tenders/{}/export/mcleod/dry-run", id),
            json!({}),
        )
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "unknown_provider");
}

#[tokio::test]
async fn test_audit_query_by_tender() {
    let fixture = TestFixture::new().await;
    let id = paste_tender(&fixture, None).await;
    fixture.wait_for_audit("tender_created").await;

    let response = fixture
        .get(&format!("/api/v1/audit?tender_id={}&limit=50", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["limit"], 50);
    let events = response.body["events"].as_array().unwrap();
    assert!(events.iter().all(|e| e["tender_id"] == id.as_str()));
    assert!(events.iter().any(|e| e["event_type"] == "tender_created"));
}
