use super::{EmailMessage, EmailProvider, ProviderError, ProviderResponse};
use crate::config::EmailConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use secrecy::ExposeSecret;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct SmtpProvider {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    pub fn new(config: &EmailConfig) -> Result<Self, ProviderError> {
        let smtp = &config.smtp;

        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| ProviderError::Configuration(format!("Invalid from address: {}", e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
            .map_err(|e| {
                ProviderError::Configuration(format!("Failed to create SMTP relay: {}", e))
            })?
            .port(smtp.port);

        if !smtp.user.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp.user.clone(),
                smtp.password.expose_secret().clone(),
            ));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }

    fn build_message(&self, email: &EmailMessage) -> Result<Message, ProviderError> {
        let to_mailbox: Mailbox = email
            .to
            .parse()
            .map_err(|e| ProviderError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let mut message_builder = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(&email.subject);

        if let Some(reply_to) = &email.reply_to {
            let reply_mailbox: Mailbox = reply_to.parse().map_err(|e| {
                ProviderError::Configuration(format!("Invalid reply-to address: {}", e))
            })?;
            message_builder = message_builder.reply_to(reply_mailbox);
        }

        let built = match (&email.body_text, &email.body_html) {
            (Some(text), Some(html)) => message_builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.clone()),
                    ),
            ),
            (Some(text), None) => message_builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone()),
            (None, Some(html)) => message_builder
                .header(ContentType::TEXT_HTML)
                .body(html.clone()),
            (None, None) => {
                return Err(ProviderError::SendFailed(
                    "Email must have either text or HTML body".to_string(),
                ));
            }
        };

        built.map_err(|e| ProviderError::Configuration(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailMessage) -> Result<ProviderResponse, ProviderError> {
        let message = self.build_message(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| ProviderError::SendFailed(format!("Failed to send email: {}", e)))?;

        let provider_id = response.message().next().map(|s| s.to_string());

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email sent via SMTP"
        );

        Ok(ProviderResponse::success(provider_id))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.transport.test_connection().await.map_err(|e| {
            ProviderError::Connection(format!("SMTP connection test failed: {}", e))
        })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Mock email provider for tests and local runs.
///
/// Keeps every accepted message so tests can assert on recipients and subjects.
/// `fail_next(n)` makes the next `n` sends fail with a transient error.
#[derive(Default)]
pub struct MockEmailProvider {
    send_count: AtomicU64,
    failures_pending: AtomicUsize,
    fail_always: AtomicBool,
    sent: Mutex<Vec<EmailMessage>>,
}

impl MockEmailProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose every send fails permanently.
    pub fn failing() -> Self {
        let provider = Self::default();
        provider.fail_always.store(true, Ordering::SeqCst);
        provider
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    pub fn send_count(&self) -> u64 {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == recipient)
            .collect()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn send(&self, email: &EmailMessage) -> Result<ProviderResponse, ProviderError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(ProviderError::InvalidRecipient(format!(
                "mock rejects {}",
                email.to
            )));
        }

        let pending = self.failures_pending.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures_pending.store(pending - 1, Ordering::SeqCst);
            return Err(ProviderError::Connection("mock connection reset".to_string()));
        }

        let count = self.send_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }

        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "[MOCK] Email would be sent"
        );

        Ok(ProviderResponse::success(Some(format!("mock-email-{}", count))))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> EmailMessage {
        EmailMessage {
            to: "client@acme.test".into(),
            subject: "Nouvelle facture".into(),
            body_text: Some("Bonjour".into()),
            body_html: None,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn mock_records_messages() {
        let provider = MockEmailProvider::new();
        let response = provider.send(&message()).await.unwrap();

        assert!(response.success);
        assert_eq!(provider.send_count(), 1);
        assert_eq!(provider.sent_to("client@acme.test").len(), 1);
    }

    #[tokio::test]
    async fn mock_fails_transiently_then_recovers() {
        let provider = MockEmailProvider::new();
        provider.fail_next(1);

        let err = provider.send(&message()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(provider.send(&message()).await.is_ok());
    }

    #[tokio::test]
    async fn failing_mock_is_permanent() {
        let provider = MockEmailProvider::failing();
        let err = provider.send(&message()).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(provider.send_count(), 0);
    }
}
