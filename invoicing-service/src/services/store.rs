//! Persistence seam.
//!
//! The engine and the HTTP layer only talk to [`InvoiceStore`]. [`PgStore`] is
//! the production backend; [`MemoryStore`] backs tests and local runs without a
//! database.
//!
//! [`PgStore`]: super::database::PgStore
//! [`MemoryStore`]: super::memory::MemoryStore

use crate::models::{
    Category, CategoryInput, CategorySummary, Conversation, ConversationSummary, Invoice,
    InvoiceFilter, InvoiceLine, InvoiceStats, LineInput, Message, NewInvoice, PaymentStatus, Role,
    User, UserSummary,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    /// Release pooled resources. Called once on shutdown.
    async fn close(&self);

    // Users

    async fn find_user(&self, id: &str) -> Result<Option<User>, AppError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn insert_user(&self, user: &User) -> Result<User, AppError>;
    async fn list_users(&self) -> Result<Vec<UserSummary>, AppError>;
    async fn set_user_role(&self, id: &str, role: Role) -> Result<User, AppError>;
    /// Fails with `Conflict` while the user still owns invoices.
    async fn delete_user(&self, id: &str) -> Result<(), AppError>;

    // Categories

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, AppError>;
    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError>;
    async fn insert_category(&self, input: &CategoryInput) -> Result<Category, AppError>;
    async fn update_category(&self, id: Uuid, input: &CategoryInput)
        -> Result<Category, AppError>;
    /// Fails with `Conflict` while any invoice references the category.
    async fn delete_category(&self, id: Uuid) -> Result<(), AppError>;

    // Invoices

    /// Allocate the next number for `year` and insert the invoice with its lines,
    /// atomically.
    async fn insert_invoice(
        &self,
        invoice: NewInvoice,
        lines: Vec<LineInput>,
        year: i32,
    ) -> Result<(Invoice, Vec<InvoiceLine>), AppError>;

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError>;
    async fn get_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLine>, AppError>;
    /// Newest first.
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, AppError>;

    /// Persist every mutable column of `invoice`. When `lines` is given the
    /// stored lines are replaced in the same transaction.
    async fn save_invoice(
        &self,
        invoice: &Invoice,
        lines: Option<Vec<LineInput>>,
    ) -> Result<Invoice, AppError>;

    async fn delete_invoice(&self, id: Uuid) -> Result<(), AppError>;

    /// Sent invoices whose payment status is one of `statuses`.
    async fn list_sent_with_payment(
        &self,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<Invoice>, AppError>;

    /// Set a sent invoice to OVERDUE if its payment status is still one of
    /// `outstanding`. Returns false when the invoice no longer qualifies.
    async fn mark_overdue(&self, id: Uuid, outstanding: &[PaymentStatus])
        -> Result<bool, AppError>;

    /// Stamp the day a scheduled notice was sent.
    async fn record_notice(&self, id: Uuid, noticed_on: NaiveDate) -> Result<(), AppError>;

    async fn invoice_stats(
        &self,
        user_id: Option<&str>,
        month_start: NaiveDate,
        last_month_start: NaiveDate,
    ) -> Result<InvoiceStats, AppError>;

    // Chat

    async fn find_conversation(
        &self,
        client_id: &str,
        invoice_id: Option<Uuid>,
    ) -> Result<Option<Conversation>, AppError>;
    async fn insert_conversation(&self, conversation: &Conversation)
        -> Result<Conversation, AppError>;
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError>;
    /// Ordered by `last_message_at`, most recent first. `None` lists everyone's.
    async fn list_conversations(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, AppError>;
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, AppError>;
    /// Insert and bump the conversation's `last_message_at`.
    async fn insert_message(&self, message: &Message) -> Result<Message, AppError>;
    /// Mark messages addressed to `receiver_id` as read; returns how many changed.
    async fn mark_read(&self, conversation_id: Uuid, receiver_id: &str) -> Result<u64, AppError>;
    async fn unread_count(&self, receiver_id: &str) -> Result<i64, AppError>;
}

