pub mod config;
pub mod dtos;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use service_core::axum::{
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::InvoicingConfig;
use crate::middleware::IdentityVerifier;
use crate::services::{
    AccountService, CategoryService, ChatService, InvoiceEngine, InvoiceStore,
    NotificationDispatcher,
};

#[derive(Clone)]
pub struct AppState {
    pub config: InvoicingConfig,
    pub store: Arc<dyn InvoiceStore>,
    pub engine: InvoiceEngine,
    pub accounts: AccountService,
    pub categories: CategoryService,
    pub chat: ChatService,
    pub verifier: IdentityVerifier,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub email_provider: &'static str,
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let invoice_routes = Router::new()
        .route(
            "/api/invoices",
            get(handlers::invoices::list_invoices).post(handlers::invoices::create_invoice),
        )
        .route(
            "/api/invoices/full",
            post(handlers::invoices::create_full_invoice),
        )
        .route(
            "/api/invoices/:id",
            get(handlers::invoices::get_invoice)
                .put(handlers::invoices::update_invoice)
                .delete(handlers::invoices::delete_invoice),
        )
        .route(
            "/api/invoices/:id/status",
            post(handlers::invoices::change_status),
        )
        .route("/api/invoices/:id/pdf", get(handlers::invoices::invoice_pdf))
        .route("/api/invoices/:id/pay", post(handlers::invoices::pay_invoice))
        .route(
            "/api/invoices/:id/dispute",
            post(handlers::invoices::dispute_invoice),
        )
        .route("/api/stats", get(handlers::invoices::stats));

    let account_routes = Router::new()
        .route("/api/me", get(handlers::users::get_me))
        .route("/api/users", get(handlers::users::list_users))
        .route("/api/users/:id", service_core::axum::routing::delete(handlers::users::delete_user))
        .route("/api/users/:id/role", put(handlers::users::set_role))
        .route(
            "/api/categories",
            get(handlers::categories::list_categories).post(handlers::categories::create_category),
        )
        .route(
            "/api/categories/:id",
            put(handlers::categories::update_category)
                .delete(handlers::categories::delete_category),
        );

    let chat_routes = Router::new()
        .route(
            "/api/conversations",
            get(handlers::chat::list_conversations).post(handlers::chat::open_conversation),
        )
        .route(
            "/api/conversations/:id",
            get(handlers::chat::get_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            post(handlers::chat::send_message),
        )
        .route(
            "/api/conversations/:id/read",
            post(handlers::chat::mark_read),
        )
        .route("/api/messages/unread", get(handlers::chat::unread_count));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/cron/overdue", get(handlers::cron::overdue))
        .route("/cron/reminders", get(handlers::cron::reminders))
        .merge(invoice_routes)
        .merge(account_routes)
        .merge(chat_routes)
        // MatchedPath is only available inside the routed service.
        .route_layer(from_fn(metrics_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::PUT,
                    service_core::axum::http::Method::DELETE,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                ]),
        );

    Ok(app)
}
