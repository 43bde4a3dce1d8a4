//! Wiring of stores, providers and services into a running server.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use secrecy::ExposeSecret;
use service_core::error::AppError;

use crate::config::{EmailProviderKind, InvoicingConfig};
use crate::middleware::IdentityVerifier;
use crate::services::providers::{
    EmailProvider, HttpRealtimePublisher, MockEmailProvider, NoopPublisher, RealtimePublisher,
    ResendProvider, SmtpProvider,
};
use crate::services::{
    AccountService, AdminAllowList, CategoryService, ChatService, Clock, DisabledPdfRenderer,
    HttpPdfRenderer, InvoiceEngine, InvoiceStore, MemoryStore, NotificationDispatcher, Notifier,
    PdfRenderer, PgStore, SystemClock,
};
use crate::{build_router, AppState};

/// External collaborators of the service. Tests swap these for fakes.
pub struct Dependencies {
    pub store: Arc<dyn InvoiceStore>,
    pub email: Arc<dyn EmailProvider>,
    pub realtime: Arc<dyn RealtimePublisher>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub clock: Arc<dyn Clock>,
}

fn provider_config_error(what: &str, err: impl std::fmt::Display) -> AppError {
    AppError::ConfigError(anyhow::anyhow!("{}: {}", what, err))
}

impl Dependencies {
    /// Build the production collaborators described by the configuration.
    pub async fn from_config(config: &InvoicingConfig) -> Result<Self, AppError> {
        let store: Arc<dyn InvoiceStore> = match &config.database.url {
            Some(url) => {
                let store = PgStore::connect(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await?;
                store.run_migrations().await?;
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let email: Arc<dyn EmailProvider> = match config.email.provider {
            EmailProviderKind::Smtp => Arc::new(
                SmtpProvider::new(&config.email)
                    .map_err(|e| provider_config_error("SMTP provider", e))?,
            ),
            EmailProviderKind::Resend => Arc::new(
                ResendProvider::new(&config.email)
                    .map_err(|e| provider_config_error("Resend provider", e))?,
            ),
            EmailProviderKind::Mock => Arc::new(MockEmailProvider::new()),
        };

        let realtime: Arc<dyn RealtimePublisher> = match &config.realtime.endpoint {
            Some(endpoint) => Arc::new(
                HttpRealtimePublisher::new(endpoint.clone(), config.realtime.secret.clone())
                    .map_err(|e| provider_config_error("Realtime publisher", e))?,
            ),
            None => Arc::new(NoopPublisher),
        };

        let pdf: Arc<dyn PdfRenderer> = match &config.pdf.renderer_url {
            Some(url) => Arc::new(
                HttpPdfRenderer::new(url.clone())
                    .map_err(|e| provider_config_error("PDF renderer", e))?,
            ),
            None => Arc::new(DisabledPdfRenderer),
        };

        Ok(Self {
            store,
            email,
            realtime,
            pdf,
            clock: Arc::new(SystemClock),
        })
    }
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    pub async fn build(config: InvoicingConfig) -> Result<Self, AppError> {
        let deps = Dependencies::from_config(&config).await?;
        Self::build_with(config, deps).await
    }

    /// Bind the listener and assemble the state around the given collaborators.
    pub async fn build_with(config: InvoicingConfig, deps: Dependencies) -> Result<Self, AppError> {
        let verifier = IdentityVerifier::new(&config.auth)?;
        let email_provider = deps.email.name();

        let base_url = config.rules.app_base_url.clone();
        let dispatcher = Arc::new(NotificationDispatcher::start(
            Arc::new(Notifier::new(deps.email.clone(), base_url.clone())),
            config.notification_queue_size,
        ));
        // Scans deliver inline, so a cron request must not wait out the full backoff.
        let scan_notifier = Arc::new(
            Notifier::new(deps.email, base_url).with_retry_window(config.rules.scan_retry_window),
        );

        let engine = InvoiceEngine::new(
            deps.store.clone(),
            scan_notifier,
            dispatcher.clone(),
            deps.pdf,
            deps.clock.clone(),
            config.rules.clone(),
        );
        let accounts = AccountService::new(
            deps.store.clone(),
            AdminAllowList::parse(&config.auth.admin_emails),
            deps.clock.clone(),
        );
        let categories = CategoryService::new(deps.store.clone());
        let chat = ChatService::new(
            deps.store.clone(),
            deps.realtime,
            dispatcher.clone(),
            deps.clock,
        );

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to bind {}: {}", addr, e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AppError::InternalError(e.into()))?
            .port();

        tracing::info!(
            port,
            email_provider,
            policy = ?config.rules.transition_policy,
            "Invoicing service assembled"
        );

        let state = AppState {
            config,
            store: deps.store,
            engine,
            accounts,
            categories,
            chat,
            verifier,
            dispatcher,
            email_provider,
        };

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until `shutdown` resolves, then drain the notification worker
    /// and close the store.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> Result<(), AppError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let store = self.state.store.clone();
        let dispatcher = self.state.dispatcher.clone();
        let app = build_router(self.state)?;

        tracing::info!(port = self.port, "Listening");

        service_core::axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        dispatcher.shutdown().await;
        store.close().await;
        tracing::info!("Service shutdown complete");
        Ok(())
    }
}
