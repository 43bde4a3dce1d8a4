use super::{EmailMessage, EmailProvider, ProviderError, ProviderResponse};
use crate::config::EmailConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transactional email over the Resend HTTP API.
pub struct ResendProvider {
    client: Client,
    api_key: Secret<String>,
    base_url: String,
    from: String,
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: Option<String>,
}

impl ResendProvider {
    pub fn new(config: &EmailConfig) -> Result<Self, ProviderError> {
        let api_key = config.resend_api_key.clone().ok_or_else(|| {
            ProviderError::Configuration("RESEND_API_KEY is not set".to_string())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.resend_base_url.trim_end_matches('/').to_string(),
            from: format!("{} <{}>", config.from_name, config.from_email),
        })
    }
}

fn classify(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("Resend rejected credentials: {}", body))
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::InvalidRecipient(format!("Resend refused message: {}", body))
        }
        s if s.is_server_error() => {
            ProviderError::SendFailed(format!("Resend returned {}: {}", s, body))
        }
        s => ProviderError::Configuration(format!("Resend returned {}: {}", s, body)),
    }
}

#[async_trait]
impl EmailProvider for ResendProvider {
    async fn send(&self, email: &EmailMessage) -> Result<ProviderResponse, ProviderError> {
        let request = ResendRequest {
            from: &self.from,
            to: [email.to.as_str()],
            subject: &email.subject,
            html: email.body_html.as_deref(),
            text: email.body_text.as_deref(),
            reply_to: email.reply_to.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/emails", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(format!("Failed to reach Resend: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify(status, body));
        }

        let parsed: ResendResponse = response.json().await.map_err(|e| {
            ProviderError::SendFailed(format!("Failed to parse Resend response: {}", e))
        })?;

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email sent via Resend"
        );

        Ok(ProviderResponse::success(parsed.id))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "resend"
    }
}
