//! Domain models for invoicing-service.

mod category;
mod conversation;
mod invoice;
mod status;
mod user;

pub use category::{Category, CategoryInput, CategorySummary};
pub use conversation::{
    Conversation, ConversationDetail, ConversationSummary, Message, DEFAULT_SUBJECT,
};
pub use invoice::{
    Invoice, InvoiceDetail, InvoiceFilter, InvoiceLine, InvoicePatch, InvoiceStats, LineInput,
    NewInvoice,
};
pub use status::{InvoiceLifecycle, LegacyInvoiceStatus, PaymentStatus, UnknownStatus};
pub use user::{Role, User, UserSummary};
