//! Services module for invoicing-service.

pub mod accounts;
pub mod categories;
pub mod chat;
pub mod clock;
pub mod database;
pub mod engine;
pub mod memory;
pub mod metrics;
pub mod notifications;
pub mod pdf;
pub mod providers;
pub mod store;
pub mod templates;

pub use accounts::{AccountService, AdminAllowList, Identity};
pub use categories::CategoryService;
pub use chat::ChatService;
pub use clock::{Clock, FixedClock, SystemClock};
pub use database::PgStore;
pub use engine::InvoiceEngine;
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use notifications::{Notification, NotificationDispatcher, Notifier};
pub use pdf::{DisabledPdfRenderer, HttpPdfRenderer, PdfRenderer, StaticPdfRenderer};
pub use store::InvoiceStore;
