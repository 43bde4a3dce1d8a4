//! Test helper module for invoicing-service integration tests.
//!
//! Spawns the full HTTP application on an ephemeral port with a recording
//! email provider, a recording realtime publisher and a fixed clock. The store
//! is in memory by default; [`TestApp::spawn_on_postgres`] runs against the
//! database named by `TEST_DATABASE_URL`.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, Utc};
use invoicing_service::{
    config::InvoicingConfig,
    middleware::IdentityClaims,
    services::{
        providers::{EmailMessage, MockEmailProvider, RecordingPublisher},
        FixedClock, InvoiceStore, MemoryStore, PgStore, StaticPdfRenderer,
    },
    startup::{Application, Dependencies},
};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::{Method, Response};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

pub const TEST_JWT_SECRET: &str = "test-secret";
pub const ADMIN_ID: &str = "user_admin";
pub const ADMIN_EMAIL: &str = "admin@payflux.com";
pub const CLIENT_ID: &str = "user_client";
pub const CLIENT_EMAIL: &str = "client@acme.test";
pub const OTHER_CLIENT_ID: &str = "user_other";
pub const OTHER_CLIENT_EMAIL: &str = "other@globex.test";

/// Business date the clock is pinned to.
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
}

pub fn days_from_today(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}

/// Decimal fields serialize as strings.
pub fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

pub fn token(sub: &str, email: &str, name: &str) -> String {
    let claims = IdentityClaims {
        sub: sub.to_string(),
        email: email.to_string(),
        name: Some(name.to_string()),
        exp: Utc::now().timestamp() + 3600,
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("Failed to sign test token")
}

pub fn admin_token() -> String {
    token(ADMIN_ID, ADMIN_EMAIL, "Alice Admin")
}

pub fn client_token() -> String {
    token(CLIENT_ID, CLIENT_EMAIL, "ACME Corp")
}

pub fn other_client_token() -> String {
    token(OTHER_CLIENT_ID, OTHER_CLIENT_EMAIL, "Globex")
}

/// Test application with a running HTTP server.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<dyn InvoiceStore>,
    pub email: Arc<MockEmailProvider>,
    pub realtime: Arc<RecordingPublisher>,
    pub pdf: Arc<StaticPdfRenderer>,
    pub clock: Arc<FixedClock>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(configure: impl FnOnce(&mut InvoicingConfig)) -> Self {
        Self::spawn_with_store(Arc::new(MemoryStore::new()), configure).await
    }

    /// Spawn on a migrated, emptied Postgres database. Returns `None` when
    /// `TEST_DATABASE_URL` is not set.
    pub async fn spawn_on_postgres() -> Option<Self> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let store = PgStore::connect(&url, 5, 1)
            .await
            .expect("Failed to connect to test database");
        store
            .run_migrations()
            .await
            .expect("Failed to run migrations");
        cleanup_test_data(&store)
            .await
            .expect("Failed to cleanup test data");

        Some(Self::spawn_with_store(Arc::new(store), |_| {}).await)
    }

    async fn spawn_with_store(
        store: Arc<dyn InvoiceStore>,
        configure: impl FnOnce(&mut InvoicingConfig),
    ) -> Self {
        let mut config = InvoicingConfig::for_tests();
        config.auth.admin_emails = ADMIN_EMAIL.to_string();
        configure(&mut config);

        let email = Arc::new(MockEmailProvider::new());
        let realtime = Arc::new(RecordingPublisher::new());
        let pdf = Arc::new(StaticPdfRenderer::new());
        let clock = Arc::new(FixedClock::on(today()));

        let deps = Dependencies {
            store: store.clone(),
            email: email.clone(),
            realtime: realtime.clone(),
            pdf: pdf.clone(),
            clock: clock.clone(),
        };

        let application = Application::build_with(config, deps)
            .await
            .expect("Failed to build application");
        let address = format!("http://127.0.0.1:{}", application.port());
        tokio::spawn(application.run_until_stopped(std::future::pending()));

        Self {
            address,
            client: reqwest::Client::new(),
            store,
            email,
            realtime,
            pdf,
            clock,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut request = self
            .client
            .request(method, format!("{}{}", self.address, path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.expect("Failed to execute request")
    }

    pub async fn get(&self, path: &str, token: &str) -> Response {
        self.request(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> Response {
        self.request(Method::POST, path, Some(token), Some(body)).await
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> Response {
        self.request(Method::PUT, path, Some(token), Some(body)).await
    }

    pub async fn delete(&self, path: &str, token: &str) -> Response {
        self.request(Method::DELETE, path, Some(token), None).await
    }

    /// Sign in with `token` so the user exists locally. Returns `/api/me`.
    pub async fn sign_in(&self, token: &str) -> Value {
        let response = self.get("/api/me", token).await;
        assert_eq!(response.status(), 200);
        response.json().await.unwrap()
    }

    /// Sign in the admin and the default client.
    pub async fn sign_in_all(&self) {
        self.sign_in(&admin_token()).await;
        self.sign_in(&client_token()).await;
    }

    /// Create a complete invoice for the default client. `extra` fields are
    /// merged over the defaults.
    pub async fn create_invoice(&self, extra: Value) -> Value {
        let mut body = serde_json::json!({
            "user_id": CLIENT_ID,
            "name": "Prestation juin",
            "issuer_name": "PayFlux SAS",
            "client_name": "ACME Corp",
            "client_email": CLIENT_EMAIL,
            "lines": [
                { "description": "Développement", "quantity": "2", "unit_price": "50.00" },
                { "description": "Recette", "quantity": "1", "unit_price": "100.00" }
            ]
        });
        if let (Some(base), Value::Object(extra)) = (body.as_object_mut(), extra) {
            base.extend(extra);
        }

        let response = self.post("/api/invoices/full", &admin_token(), body).await;
        assert_eq!(response.status(), 201, "create failed");
        let outcome: Value = response.json().await.unwrap();
        outcome["invoice"].clone()
    }

    pub async fn change_status(&self, id: &str, body: Value) -> Response {
        self.post(&format!("/api/invoices/{}/status", id), &admin_token(), body)
            .await
    }

    /// Wait until at least `count` emails were accepted, or give up after 2s.
    pub async fn wait_for_emails(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..100 {
            let sent = self.email.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        self.email.sent()
    }

    /// Give queued notifications time to go out before asserting on absence.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    }

    pub fn emails_with_subject(&self, prefix: &str) -> Vec<EmailMessage> {
        self.email
            .sent()
            .into_iter()
            .filter(|m| m.subject.starts_with(prefix))
            .collect()
    }
}

/// Empty every table, children first.
pub async fn cleanup_test_data(store: &PgStore) -> Result<(), sqlx::Error> {
    sqlx::query(
        "TRUNCATE messages, conversations, invoice_lines, invoices, invoice_sequences, \
         categories, users",
    )
    .execute(store.pool())
    .await?;
    Ok(())
}
