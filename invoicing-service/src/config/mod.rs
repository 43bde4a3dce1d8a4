//! Invoicing service configuration.
//!
//! The HTTP port comes from the layered `service_core` config. Everything else
//! is read from environment variables; outside production missing keys fall
//! back to development defaults, in production they are required.

use crate::lifecycle::TransitionPolicy;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config::{self as core_config, get_env, get_optional_env};
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct InvoicingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    /// Bearer secret for `/cron/*`. When unset the check is skipped.
    pub cron_secret: Option<Secret<String>>,
    pub email: EmailConfig,
    pub realtime: RealtimeConfig,
    pub pdf: PdfConfig,
    pub rules: InvoiceRules,
    pub notification_queue_size: usize,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    /// `None` runs the service on the in-memory store.
    pub url: Option<Secret<String>>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 shared secret.
    pub jwt_secret: Option<Secret<String>>,
    /// PEM file with the RS256 public key. Takes precedence over the secret.
    pub jwt_public_key_path: Option<String>,
    pub jwt_issuer: Option<String>,
    /// Comma-separated, case-insensitive.
    pub admin_emails: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProviderKind {
    Smtp,
    Resend,
    Mock,
}

impl FromStr for EmailProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" => Ok(EmailProviderKind::Smtp),
            "resend" => Ok(EmailProviderKind::Resend),
            "mock" => Ok(EmailProviderKind::Mock),
            other => Err(AppError::ConfigError(anyhow::anyhow!(
                "EMAIL_PROVIDER must be smtp, resend or mock, got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone)]
pub struct EmailConfig {
    pub provider: EmailProviderKind,
    pub from_email: String,
    pub from_name: String,
    pub smtp: SmtpConfig,
    pub resend_api_key: Option<Secret<String>>,
    pub resend_base_url: String,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
}

#[derive(Clone)]
pub struct RealtimeConfig {
    /// HTTP endpoint receiving `{channel, event, data}`. Unset disables publishing.
    pub endpoint: Option<String>,
    pub secret: Option<Secret<String>>,
}

#[derive(Debug, Clone)]
pub struct PdfConfig {
    pub renderer_url: Option<String>,
}

/// Business rules applied by the engine.
#[derive(Debug, Clone)]
pub struct InvoiceRules {
    pub payment_terms_days: i64,
    pub default_vat_rate: Decimal,
    pub transition_policy: TransitionPolicy,
    /// Base for links in emails, without trailing slash.
    pub app_base_url: String,
    /// Retry budget per email when a scan delivers inline.
    pub scan_retry_window: Duration,
}

impl Default for InvoiceRules {
    fn default() -> Self {
        Self {
            payment_terms_days: 30,
            default_vat_rate: Decimal::from(20),
            transition_policy: TransitionPolicy::Permissive,
            app_base_url: "https://payflux.com".to_string(),
            scan_retry_window: Duration::from_secs(10),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, raw: String) -> Result<T, AppError> {
    raw.trim().parse().map_err(|_| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}'", key, raw))
    })
}

fn secret(key: &str) -> Option<Secret<String>> {
    get_optional_env(key).map(Secret::new)
}

impl InvoicingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        let database_url = if is_prod {
            Some(Secret::new(get_env("DATABASE_URL", None, true)?))
        } else {
            secret("DATABASE_URL")
        };

        let email_provider = get_env(
            "EMAIL_PROVIDER",
            Some(if is_prod { "smtp" } else { "mock" }),
            false,
        )?
        .parse()?;

        Ok(InvoicingConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("invoicing-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    get_env("DATABASE_MAX_CONNECTIONS", Some("10"), false)?,
                )?,
                min_connections: parse_or(
                    "DATABASE_MIN_CONNECTIONS",
                    get_env("DATABASE_MIN_CONNECTIONS", Some("1"), false)?,
                )?,
            },
            auth: AuthConfig {
                jwt_secret: secret("AUTH_JWT_SECRET"),
                jwt_public_key_path: get_optional_env("AUTH_JWT_PUBLIC_KEY_PATH"),
                jwt_issuer: get_optional_env("AUTH_JWT_ISSUER"),
                admin_emails: get_env("ADMIN_EMAILS", Some(""), false)?,
            },
            cron_secret: secret("CRON_SECRET"),
            email: EmailConfig {
                provider: email_provider,
                from_email: get_env("FROM_EMAIL", Some("noreply@payflux.com"), is_prod)?,
                from_name: get_env("FROM_NAME", Some("PayFlux"), false)?,
                smtp: SmtpConfig {
                    host: get_env("SMTP_HOST", Some("localhost"), false)?,
                    port: parse_or("SMTP_PORT", get_env("SMTP_PORT", Some("587"), false)?)?,
                    user: get_env("SMTP_USER", Some(""), false)?,
                    password: Secret::new(get_env("SMTP_PASSWORD", Some(""), false)?),
                },
                resend_api_key: secret("RESEND_API_KEY"),
                resend_base_url: get_env(
                    "RESEND_BASE_URL",
                    Some("https://api.resend.com"),
                    false,
                )?,
            },
            realtime: RealtimeConfig {
                endpoint: get_optional_env("REALTIME_ENDPOINT"),
                secret: secret("REALTIME_SECRET"),
            },
            pdf: PdfConfig {
                renderer_url: get_optional_env("PDF_RENDERER_URL"),
            },
            rules: InvoiceRules {
                payment_terms_days: parse_or(
                    "INVOICE_PAYMENT_TERMS_DAYS",
                    get_env("INVOICE_PAYMENT_TERMS_DAYS", Some("30"), false)?,
                )?,
                default_vat_rate: parse_or(
                    "INVOICE_DEFAULT_VAT_RATE",
                    get_env("INVOICE_DEFAULT_VAT_RATE", Some("20"), false)?,
                )?,
                transition_policy: get_env(
                    "STATUS_TRANSITION_POLICY",
                    Some("permissive"),
                    false,
                )?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                app_base_url: get_env("APP_BASE_URL", Some("https://payflux.com"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                scan_retry_window: Duration::from_secs(parse_or(
                    "SCAN_RETRY_WINDOW_SECS",
                    get_env("SCAN_RETRY_WINDOW_SECS", Some("10"), false)?,
                )?),
            },
            notification_queue_size: parse_or(
                "NOTIFICATION_QUEUE_SIZE",
                get_env("NOTIFICATION_QUEUE_SIZE", Some("256"), false)?,
            )?,
        })
    }

    pub fn is_production(&self) -> bool {
        env::var("ENVIRONMENT").map(|e| e == "prod").unwrap_or(false)
    }
}

impl InvoicingConfig {
    /// Development defaults: in-memory store, mock email, no realtime, no PDF.
    pub fn for_tests() -> Self {
        InvoicingConfig {
            common: core_config::Config {
                port: 0,
                environment: "test".to_string(),
            },
            service_name: "invoicing-service".to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
                min_connections: 1,
            },
            auth: AuthConfig {
                jwt_secret: Some(Secret::new("test-secret".to_string())),
                jwt_public_key_path: None,
                jwt_issuer: None,
                admin_emails: String::new(),
            },
            cron_secret: None,
            email: EmailConfig {
                provider: EmailProviderKind::Mock,
                from_email: "noreply@payflux.com".to_string(),
                from_name: "PayFlux".to_string(),
                smtp: SmtpConfig {
                    host: "localhost".to_string(),
                    port: 587,
                    user: String::new(),
                    password: Secret::new(String::new()),
                },
                resend_api_key: None,
                resend_base_url: "https://api.resend.com".to_string(),
            },
            realtime: RealtimeConfig {
                endpoint: None,
                secret: None,
            },
            pdf: PdfConfig { renderer_url: None },
            rules: InvoiceRules::default(),
            notification_queue_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_provider_kind_parses() {
        assert_eq!(
            "Resend".parse::<EmailProviderKind>().unwrap(),
            EmailProviderKind::Resend
        );
        assert!("sendgrid".parse::<EmailProviderKind>().is_err());
    }

    #[test]
    fn default_rules_match_business_defaults() {
        let rules = InvoiceRules::default();
        assert_eq!(rules.payment_terms_days, 30);
        assert_eq!(rules.default_vat_rate, Decimal::from(20));
        assert_eq!(rules.transition_policy, TransitionPolicy::Permissive);
        assert_eq!(rules.scan_retry_window, Duration::from_secs(10));
    }
}
