//! In-memory [`InvoiceStore`].
//!
//! Intended for tests and local development. Every operation takes the single
//! lock for its whole duration, which gives the same atomicity as the SQL
//! transactions in [`PgStore`](super::database::PgStore).

use super::store::InvoiceStore;
use crate::lifecycle::numbering::{format_invoice_number, year_prefix};
use crate::models::{
    Category, CategoryInput, CategorySummary, Conversation, ConversationSummary, Invoice,
    InvoiceFilter, InvoiceLine, InvoiceLifecycle, InvoiceStats, LineInput, Message, NewInvoice,
    PaymentStatus, Role, User, UserSummary,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<String, User>,
    categories: HashMap<Uuid, Category>,
    invoices: HashMap<Uuid, Invoice>,
    lines: HashMap<Uuid, Vec<InvoiceLine>>,
    sequences: HashMap<i32, i64>,
    conversations: HashMap<Uuid, Conversation>,
    messages: Vec<Message>,
}

impl Tables {
    fn invoice_count_for_user(&self, user_id: &str) -> i64 {
        self.invoices
            .values()
            .filter(|i| i.user_id == user_id)
            .count() as i64
    }

    fn invoice_count_for_category(&self, category_id: Uuid) -> i64 {
        self.invoices
            .values()
            .filter(|i| i.category_id == Some(category_id))
            .count() as i64
    }

    fn next_sequence(&mut self, year: i32) -> i64 {
        let prefix = year_prefix(year);
        let existing = self
            .invoices
            .values()
            .filter(|i| i.invoice_number.starts_with(&prefix))
            .count() as i64;
        let value = self.sequences.entry(year).or_insert(existing);
        *value += 1;
        *value
    }

    fn replace_lines(&mut self, invoice_id: Uuid, lines: Vec<LineInput>) -> Vec<InvoiceLine> {
        let stored: Vec<InvoiceLine> = lines
            .into_iter()
            .enumerate()
            .map(|(pos, line)| line.into_line(invoice_id, pos as i32))
            .collect();
        self.lines.insert(invoice_id, stored.clone());
        stored
    }

    fn category_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.categories
            .values()
            .any(|c| c.name == name && Some(c.id) != except)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, AppError> {
        self.tables
            .read()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, AppError> {
        self.tables
            .write()
            .map_err(|_| AppError::InternalError(anyhow::anyhow!("store lock poisoned")))
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {} not found", what, id))
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.read().map(|_| ())
    }

    async fn close(&self) {}

    async fn find_user(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.id)
            || tables
                .users
                .values()
                .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "User with email '{}' already exists",
                user.email
            )));
        }
        tables.users.insert(user.id.clone(), user.clone());
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<UserSummary>, AppError> {
        let tables = self.read()?;
        let mut users: Vec<UserSummary> = tables
            .users
            .values()
            .map(|u| UserSummary {
                user: u.clone(),
                invoice_count: tables.invoice_count_for_user(&u.id),
            })
            .collect();
        users.sort_by(|a, b| b.user.created_at.cmp(&a.user.created_at));
        Ok(users)
    }

    async fn set_user_role(&self, id: &str, role: Role) -> Result<User, AppError> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(id).ok_or_else(|| not_found("User", id))?;
        user.role = role;
        Ok(user.clone())
    }

    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let mut tables = self.write()?;
        if !tables.users.contains_key(id) {
            return Err(not_found("User", id));
        }
        if tables.invoice_count_for_user(id) > 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "User {} still owns invoices",
                id
            )));
        }
        tables.users.remove(id);
        let removed: Vec<Uuid> = tables
            .conversations
            .values()
            .filter(|c| c.client_id == id)
            .map(|c| c.id)
            .collect();
        for conversation_id in &removed {
            tables.conversations.remove(conversation_id);
        }
        tables
            .messages
            .retain(|m| !removed.contains(&m.conversation_id));
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, AppError> {
        let tables = self.read()?;
        let mut categories: Vec<CategorySummary> = tables
            .categories
            .values()
            .map(|c| CategorySummary {
                category: c.clone(),
                invoice_count: tables.invoice_count_for_category(c.id),
            })
            .collect();
        categories.sort_by(|a, b| a.category.name.cmp(&b.category.name));
        Ok(categories)
    }

    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError> {
        Ok(self.read()?.categories.get(&id).cloned())
    }

    async fn insert_category(&self, input: &CategoryInput) -> Result<Category, AppError> {
        let mut tables = self.write()?;
        if tables.category_name_taken(&input.name, None) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Category '{}' already exists",
                input.name
            )));
        }
        let category = Category {
            id: Uuid::new_v4(),
            name: input.name.clone(),
            description: input.description.clone(),
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn update_category(
        &self,
        id: Uuid,
        input: &CategoryInput,
    ) -> Result<Category, AppError> {
        let mut tables = self.write()?;
        if tables.category_name_taken(&input.name, Some(id)) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Category '{}' already exists",
                input.name
            )));
        }
        let category = tables
            .categories
            .get_mut(&id)
            .ok_or_else(|| not_found("Category", id))?;
        category.name = input.name.clone();
        category.description = input.description.clone();
        Ok(category.clone())
    }

    async fn delete_category(&self, id: Uuid) -> Result<(), AppError> {
        let mut tables = self.write()?;
        if !tables.categories.contains_key(&id) {
            return Err(not_found("Category", id));
        }
        let referenced = tables.invoice_count_for_category(id);
        if referenced > 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Category is used by {} invoice(s)",
                referenced
            )));
        }
        tables.categories.remove(&id);
        Ok(())
    }

    async fn insert_invoice(
        &self,
        invoice: NewInvoice,
        lines: Vec<LineInput>,
        year: i32,
    ) -> Result<(Invoice, Vec<InvoiceLine>), AppError> {
        let mut tables = self.write()?;
        if !tables.users.contains_key(&invoice.user_id) {
            return Err(not_found("User", &invoice.user_id));
        }
        let sequence = tables.next_sequence(year);
        let invoice = invoice.into_invoice(format_invoice_number(year, sequence));
        let lines = tables.replace_lines(invoice.id, lines);
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok((invoice, lines))
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        Ok(self.read()?.invoices.get(&id).cloned())
    }

    async fn get_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLine>, AppError> {
        Ok(self
            .read()?
            .lines
            .get(&invoice_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, AppError> {
        let tables = self.read()?;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        invoices.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.invoice_number.cmp(&a.invoice_number))
        });
        Ok(invoices)
    }

    async fn save_invoice(
        &self,
        invoice: &Invoice,
        lines: Option<Vec<LineInput>>,
    ) -> Result<Invoice, AppError> {
        let mut tables = self.write()?;
        let stored = tables
            .invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| not_found("Invoice", invoice.id))?;
        // Number and ownership are fixed at creation.
        let mut updated = invoice.clone();
        updated.invoice_number = stored.invoice_number.clone();
        updated.user_id = stored.user_id.clone();
        updated.created_at = stored.created_at;
        updated.last_notice_on = stored.last_notice_on;
        *stored = updated.clone();
        if let Some(lines) = lines {
            tables.replace_lines(invoice.id, lines);
        }
        Ok(updated)
    }

    async fn delete_invoice(&self, id: Uuid) -> Result<(), AppError> {
        let mut tables = self.write()?;
        if tables.invoices.remove(&id).is_none() {
            return Err(not_found("Invoice", id));
        }
        tables.lines.remove(&id);
        for conversation in tables.conversations.values_mut() {
            if conversation.invoice_id == Some(id) {
                conversation.invoice_id = None;
            }
        }
        Ok(())
    }

    async fn list_sent_with_payment(
        &self,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<Invoice>, AppError> {
        let tables = self.read()?;
        let mut invoices: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|i| {
                i.lifecycle == InvoiceLifecycle::Sent && statuses.contains(&i.payment_status)
            })
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.due_date.cmp(&b.due_date));
        Ok(invoices)
    }

    async fn mark_overdue(
        &self,
        id: Uuid,
        outstanding: &[PaymentStatus],
    ) -> Result<bool, AppError> {
        let mut tables = self.write()?;
        let invoice = tables
            .invoices
            .get_mut(&id)
            .ok_or_else(|| not_found("Invoice", id))?;
        if invoice.lifecycle != InvoiceLifecycle::Sent
            || !outstanding.contains(&invoice.payment_status)
        {
            return Ok(false);
        }
        invoice.payment_status = PaymentStatus::Overdue;
        Ok(true)
    }

    async fn record_notice(&self, id: Uuid, noticed_on: NaiveDate) -> Result<(), AppError> {
        let mut tables = self.write()?;
        let invoice = tables
            .invoices
            .get_mut(&id)
            .ok_or_else(|| not_found("Invoice", id))?;
        invoice.last_notice_on = Some(noticed_on);
        Ok(())
    }

    async fn invoice_stats(
        &self,
        user_id: Option<&str>,
        month_start: NaiveDate,
        last_month_start: NaiveDate,
    ) -> Result<InvoiceStats, AppError> {
        let tables = self.read()?;
        let scoped = tables
            .invoices
            .values()
            .filter(|i| user_id.map_or(true, |u| i.user_id == u));
        Ok(InvoiceStats::collect(scoped, month_start, last_month_start))
    }

    async fn find_conversation(
        &self,
        client_id: &str,
        invoice_id: Option<Uuid>,
    ) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .read()?
            .conversations
            .values()
            .find(|c| c.client_id == client_id && c.invoice_id == invoice_id)
            .cloned())
    }

    async fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, AppError> {
        let mut tables = self.write()?;
        if !tables.users.contains_key(&conversation.client_id) {
            return Err(not_found("User", &conversation.client_id));
        }
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation.clone())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        Ok(self.read()?.conversations.get(&id).cloned())
    }

    async fn list_conversations(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let tables = self.read()?;
        let mut conversations: Vec<ConversationSummary> = tables
            .conversations
            .values()
            .filter(|c| client_id.map_or(true, |id| c.client_id == id))
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                last_message: tables
                    .messages
                    .iter()
                    .filter(|m| m.conversation_id == c.id)
                    .max_by_key(|m| m.created_at)
                    .cloned(),
            })
            .collect();
        conversations.sort_by(|a, b| {
            b.conversation
                .last_message_at
                .cmp(&a.conversation.last_message_at)
        });
        Ok(conversations)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, AppError> {
        let tables = self.read()?;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn insert_message(&self, message: &Message) -> Result<Message, AppError> {
        let mut tables = self.write()?;
        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| not_found("Conversation", message.conversation_id))?;
        conversation.last_message_at = message.created_at;
        tables.messages.push(message.clone());
        Ok(message.clone())
    }

    async fn mark_read(&self, conversation_id: Uuid, receiver_id: &str) -> Result<u64, AppError> {
        let mut tables = self.write()?;
        let mut changed = 0;
        for message in tables.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id
                && !m.is_read
                && m.receiver_id.as_deref() == Some(receiver_id)
        }) {
            message.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn unread_count(&self, receiver_id: &str) -> Result<i64, AppError> {
        Ok(self
            .read()?
            .messages
            .iter()
            .filter(|m| !m.is_read && m.receiver_id.as_deref() == Some(receiver_id))
            .count() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn client() -> User {
        User {
            id: "user_1".into(),
            email: "client@acme.test".into(),
            name: "Client".into(),
            role: Role::Client,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn new_invoice(user_id: &str) -> NewInvoice {
        let now = Utc.with_ymd_and_hms(2025, 5, 2, 10, 0, 0).unwrap();
        NewInvoice {
            id: Uuid::new_v4(),
            name: "Maintenance".into(),
            issuer_name: String::new(),
            issuer_address: String::new(),
            client_name: "Client".into(),
            client_address: String::new(),
            client_email: "client@acme.test".into(),
            client_phone: String::new(),
            notes: None,
            category_id: None,
            invoice_date: now.date_naive(),
            due_date: now.date_naive(),
            vat_active: false,
            vat_rate: Decimal::from(20),
            total_ht: Decimal::ZERO,
            total_tva: Decimal::ZERO,
            total_ttc: Decimal::ZERO,
            lifecycle: InvoiceLifecycle::Draft,
            payment_status: PaymentStatus::Pending,
            user_id: user_id.into(),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn numbers_increase_within_a_year_and_restart_next_year() {
        let store = MemoryStore::new();
        store.insert_user(&client()).await.unwrap();

        let (a, _) = store
            .insert_invoice(new_invoice("user_1"), vec![], 2025)
            .await
            .unwrap();
        let (b, _) = store
            .insert_invoice(new_invoice("user_1"), vec![], 2025)
            .await
            .unwrap();
        let (c, _) = store
            .insert_invoice(new_invoice("user_1"), vec![], 2026)
            .await
            .unwrap();

        assert_eq!(a.invoice_number, "INV-2025-00001");
        assert_eq!(b.invoice_number, "INV-2025-00002");
        assert_eq!(c.invoice_number, "INV-2026-00001");
    }

    #[tokio::test]
    async fn category_in_use_cannot_be_deleted() {
        let store = MemoryStore::new();
        store.insert_user(&client()).await.unwrap();
        let category = store
            .insert_category(&CategoryInput {
                name: "Web".into(),
                description: None,
            })
            .await
            .unwrap();

        let mut invoice = new_invoice("user_1");
        invoice.category_id = Some(category.id);
        store.insert_invoice(invoice, vec![], 2025).await.unwrap();

        let err = store.delete_category(category.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn saving_with_lines_replaces_them() {
        let store = MemoryStore::new();
        store.insert_user(&client()).await.unwrap();
        let (invoice, lines) = store
            .insert_invoice(
                new_invoice("user_1"),
                vec![LineInput::new("Audit", Decimal::ONE, Decimal::TEN)],
                2025,
            )
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);

        store
            .save_invoice(
                &invoice,
                Some(vec![
                    LineInput::new("Design", Decimal::TWO, Decimal::TEN),
                    LineInput::new("Dev", Decimal::ONE, Decimal::ONE_HUNDRED),
                ]),
            )
            .await
            .unwrap();

        let stored = store.get_lines(invoice.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].description, "Design");
        assert_eq!(stored[1].position, 1);
    }

    #[tokio::test]
    async fn mark_overdue_leaves_settled_invoices_alone() {
        let store = MemoryStore::new();
        store.insert_user(&client()).await.unwrap();
        let mut sent = new_invoice("user_1");
        sent.lifecycle = InvoiceLifecycle::Sent;
        let (open, _) = store.insert_invoice(sent.clone(), vec![], 2025).await.unwrap();
        sent.id = Uuid::new_v4();
        sent.payment_status = PaymentStatus::Paid;
        let (paid, _) = store.insert_invoice(sent, vec![], 2025).await.unwrap();
        let outstanding = [PaymentStatus::Pending, PaymentStatus::Partial, PaymentStatus::Overdue];

        assert!(store.mark_overdue(open.id, &outstanding).await.unwrap());
        assert!(!store.mark_overdue(paid.id, &outstanding).await.unwrap());

        let day = Utc.with_ymd_and_hms(2025, 5, 9, 0, 0, 0).unwrap().date_naive();
        store.record_notice(paid.id, day).await.unwrap();
        let paid = store.get_invoice(paid.id).await.unwrap().unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(paid.last_notice_on, Some(day));

        let open = store.get_invoice(open.id).await.unwrap().unwrap();
        assert_eq!(open.payment_status, PaymentStatus::Overdue);
    }
}
