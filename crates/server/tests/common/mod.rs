//! Common test utilities for in-process API testing.
//!
//! [`TestFixture`] builds the real router over temp-dir SQLite stores and
//! file storage, with a scriptable [`MockLlmClient`] behind the classifier.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tenderdesk_core::classifier::ShipmentClassifier;
use tenderdesk_core::config::AuthConfig;
use tenderdesk_core::ratelimit::RateLimitConfig;
use tenderdesk_core::storage::StorageConfig;
use tenderdesk_core::retry::RetryPolicy;
use tenderdesk_core::testing::MockLlmClient;
use tenderdesk_core::{
    create_audit_system, create_authenticator, load_config_from_str, AuditStore, AuthMethod,
    BatchProcessor, Config, FsObjectStorage, SqliteAuditStore, SqliteBatchStore,
    SqliteCustomerStore, SqliteTenderStore, TenderService, TenderServiceConfig,
};
use tenderdesk_server::api::create_router;
use tenderdesk_server::state::AppState;

/// Re-export fixtures for test convenience
pub use tenderdesk_core::testing::fixtures;

pub const API_KEY: &str = "user-key";
pub const ADMIN_API_KEY: &str = "admin-key";
pub const SIGNING_SECRET: &str = "test-signing-secret";

pub struct TestFixture {
    pub router: Router,
    pub llm: Arc<MockLlmClient>,
    pub state: Arc<AppState>,
    /// Holds the database and stored files
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Knobs for [`TestFixture::with_config`].
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Require API keys instead of running open.
    pub api_keys: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_keys: false,
            rate_limit: RateLimitConfig {
                window_secs: 60,
                max_requests: 10_000,
            },
        }
    }
}

impl TestConfig {
    pub fn with_api_keys() -> Self {
        Self {
            api_keys: true,
            ..Default::default()
        }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config: Config =
            load_config_from_str("[auth]\nmethod = \"none\"\n").expect("base config parses");
        if test_config.api_keys {
            config.auth = AuthConfig {
                method: AuthMethod::ApiKey,
                api_key: Some(API_KEY.to_string()),
                admin_api_key: Some(ADMIN_API_KEY.to_string()),
            };
        }
        config.database.path = db_path.clone();
        config.rate_limit = test_config.rate_limit;
        config.storage = StorageConfig {
            root: temp_dir.path().join("files"),
            public_base_url: "http://tenderdesk.test".to_string(),
            signing_secret: SIGNING_SECRET.to_string(),
            url_ttl_secs: 300,
        };
        config.retry = RetryPolicy {
            retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 0.0,
        };

        let authenticator =
            Arc::from(create_authenticator(&config.auth).expect("Failed to create authenticator"));

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let llm = Arc::new(MockLlmClient::with_default_response(
            fixtures::SAMPLE_LLM_RESPONSE,
        ));

        let service = Arc::new(
            TenderService::new(
                Arc::new(SqliteTenderStore::new(&db_path).expect("tender store")),
                Arc::new(SqliteCustomerStore::new(&db_path).expect("customer store")),
                Arc::new(FsObjectStorage::from_config(&config.storage)),
                TenderServiceConfig::from_config(&config),
            )
            .with_classifier(Arc::new(ShipmentClassifier::new(llm.clone())))
            .with_audit(audit_handle.clone()),
        );

        let (batches, _worker) = BatchProcessor::start(
            Arc::clone(&service),
            Arc::new(SqliteBatchStore::new(&db_path).expect("batch store")),
            Some(audit_handle),
            16,
        );

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            audit_store,
            service,
            batches,
        ));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            llm,
            state,
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.send(Request::builder().method("GET").uri(path), Body::empty())
            .await
    }

    pub async fn get_with_key(&self, path: &str, key: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method("GET")
                .uri(path)
                .header("Authorization", format!("Bearer {}", key)),
            Body::empty(),
        )
        .await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.post_with_headers(path, body, &[]).await
    }

    pub async fn post_with_headers(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder, Body::from(serde_json::to_vec(&body).unwrap()))
            .await
    }

    /// POST a multipart form with `(file_name, bytes)` parts named `file`
    /// and an optional `customer_id` field.
    pub async fn post_files(
        &self,
        path: &str,
        files: &[(&str, &[u8])],
        customer_id: Option<&str>,
    ) -> TestResponse {
        let boundary = "tenderdesk-test-boundary";
        let mut body = Vec::new();
        if let Some(customer_id) = customer_id {
            body.extend_from_slice(
                format!(
                    "--{b}\r\nContent-Disposition: form-data; name=\"customer_id\"\r\n\r\n{c}\r\n",
                    b = boundary,
                    c = customer_id
                )
                .as_bytes(),
            );
        }
        for (file_name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n",
                    b = boundary,
                    f = file_name
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        self.send(
            Request::builder().method("POST").uri(path).header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", boundary),
            ),
            Body::from(body),
        )
        .await
    }

    /// Fetch raw bytes, for file downloads.
    pub async fn get_bytes(&self, path: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    async fn send(&self, builder: axum::http::request::Builder, body: Body) -> TestResponse {
        let request = builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Poll a batch until it leaves the queued/processing states.
    pub async fn wait_for_batch(&self, batch_id: &str) -> Value {
        for _ in 0..200 {
            let response = self.get(&format!("/api/v1/batches/{}", batch_id)).await;
            let status = response.body["status"].as_str().unwrap_or_default().to_string();
            if status == "completed" || status == "completed_with_errors" {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("batch {} did not finish", batch_id);
    }

    /// Poll the audit log until an event of `event_type` shows up.
    pub async fn wait_for_audit(&self, event_type: &str) -> Vec<Value> {
        for _ in 0..100 {
            let response = self
                .get(&format!("/api/v1/audit?event_type={}", event_type))
                .await;
            if let Some(events) = response.body["events"].as_array() {
                if !events.is_empty() {
                    return events.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no {} audit event recorded", event_type);
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
