//! PostgreSQL store for invoicing-service.

use super::metrics::DB_QUERY_DURATION;
use super::store::InvoiceStore;
use crate::lifecycle::numbering::{format_invoice_number, year_prefix};
use crate::models::{
    Category, CategoryInput, CategorySummary, Conversation, ConversationSummary, Invoice,
    InvoiceFilter, InvoiceLifecycle, InvoiceLine, InvoiceStats, LineInput, Message, NewInvoice,
    PaymentStatus, Role, User, UserSummary,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const INVOICE_COLUMNS: &str = "id, invoice_number, name, issuer_name, issuer_address, \
    client_name, client_address, client_email, client_phone, notes, category_id, \
    invoice_date, due_date, sent_at, vat_active, vat_rate, total_ht, total_tva, total_ttc, \
    lifecycle, payment_status, user_id, last_notice_on, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, content, is_read, created_at";

/// Statuses are TEXT columns; rows are parsed into the typed model here.
#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    invoice_number: String,
    name: String,
    issuer_name: String,
    issuer_address: String,
    client_name: String,
    client_address: String,
    client_email: String,
    client_phone: String,
    notes: Option<String>,
    category_id: Option<Uuid>,
    invoice_date: NaiveDate,
    due_date: NaiveDate,
    sent_at: Option<DateTime<Utc>>,
    vat_active: bool,
    vat_rate: Decimal,
    total_ht: Decimal,
    total_tva: Decimal,
    total_ttc: Decimal,
    lifecycle: String,
    payment_status: String,
    user_id: String,
    last_notice_on: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = AppError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        Ok(Invoice {
            lifecycle: row.lifecycle.parse().map_err(corrupt_row)?,
            payment_status: row.payment_status.parse().map_err(corrupt_row)?,
            id: row.id,
            invoice_number: row.invoice_number,
            name: row.name,
            issuer_name: row.issuer_name,
            issuer_address: row.issuer_address,
            client_name: row.client_name,
            client_address: row.client_address,
            client_email: row.client_email,
            client_phone: row.client_phone,
            notes: row.notes,
            category_id: row.category_id,
            invoice_date: row.invoice_date,
            due_date: row.due_date,
            sent_at: row.sent_at,
            vat_active: row.vat_active,
            vat_rate: row.vat_rate,
            total_ht: row.total_ht,
            total_tva: row.total_tva,
            total_ttc: row.total_ttc,
            user_id: row.user_id,
            last_notice_on: row.last_notice_on,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LineRow {
    id: Uuid,
    invoice_id: Uuid,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    position: i32,
}

impl From<LineRow> for InvoiceLine {
    fn from(row: LineRow) -> Self {
        InvoiceLine {
            id: row.id,
            invoice_id: row.invoice_id,
            description: row.description,
            quantity: row.quantity,
            unit_price: row.unit_price,
            position: row.position,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    role: String,
    created_at: DateTime<Utc>,
    #[sqlx(default)]
    invoice_count: Option<i64>,
}

impl UserRow {
    fn into_user(self) -> Result<(User, i64), AppError> {
        let count = self.invoice_count.unwrap_or(0);
        Ok((
            User {
                role: self.role.parse::<Role>().map_err(corrupt_row)?,
                id: self.id,
                email: self.email,
                name: self.name,
                created_at: self.created_at,
            },
            count,
        ))
    }
}

#[derive(Debug, FromRow)]
struct CategoryRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    #[sqlx(default)]
    invoice_count: Option<i64>,
}

impl CategoryRow {
    fn into_category(self) -> (Category, i64) {
        (
            Category {
                id: self.id,
                name: self.name,
                description: self.description,
            },
            self.invoice_count.unwrap_or(0),
        )
    }
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: Uuid,
    client_id: String,
    invoice_id: Option<Uuid>,
    subject: String,
    last_message_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            client_id: row.client_id,
            invoice_id: row.invoice_id,
            subject: row.subject,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: String,
    receiver_id: Option<String>,
    content: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total_invoices: i64,
    paid_invoices: i64,
    pending_invoices: i64,
    overdue_invoices: i64,
    total_revenue: Decimal,
    outstanding_amount: Decimal,
    invoices_this_month: i64,
    invoices_last_month: i64,
}

fn corrupt_row(err: impl std::fmt::Display) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Corrupt row: {}", err))
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation())
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))
    }

    /// Bump the per-year counter. The first allocation of a year seeds it from
    /// the invoices already numbered in that year.
    async fn next_sequence(
        tx: &mut Transaction<'static, Postgres>,
        year: i32,
    ) -> Result<i64, AppError> {
        let (value,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO invoice_sequences (year, last_value)
            VALUES ($1, (SELECT COUNT(*) FROM invoices WHERE invoice_number LIKE $2) + 1)
            ON CONFLICT (year) DO UPDATE SET last_value = invoice_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(year)
        .bind(format!("{}%", year_prefix(year)))
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error("Failed to allocate invoice number"))?;
        Ok(value)
    }

    async fn insert_lines(
        tx: &mut Transaction<'static, Postgres>,
        invoice_id: Uuid,
        lines: Vec<LineInput>,
    ) -> Result<Vec<InvoiceLine>, AppError> {
        let mut stored = Vec::with_capacity(lines.len());
        for (position, line) in lines.into_iter().enumerate() {
            let line = line.into_line(invoice_id, position as i32);
            sqlx::query(
                r#"
                INSERT INTO invoice_lines (id, invoice_id, description, quantity, unit_price, position)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(line.id)
            .bind(line.invoice_id)
            .bind(&line.description)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.position)
            .execute(&mut **tx)
            .await
            .map_err(db_error("Failed to insert invoice line"))?;
            stored.push(line);
        }
        Ok(stored)
    }
}

#[async_trait]
impl InvoiceStore for PgStore {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self) {
        info!("Closing PostgreSQL connection pool");
        self.pool.close().await;
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn find_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get user"))?;

        row.map(|r| r.into_user().map(|(u, _)| u)).transpose()
    }

    #[instrument(skip(self))]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, role, created_at FROM users WHERE LOWER(email) = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get user by email"))?;

        row.map(|r| r.into_user().map(|(u, _)| u)).transpose()
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    async fn insert_user(&self, user: &User) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_user"])
            .start_timer();

        sqlx::query(
            "INSERT INTO users (id, email, name, role, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "User with email '{}' already exists",
                    user.email
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create user: {}", e)),
        })?;

        timer.observe_duration();
        info!(user_id = %user.id, role = user.role.as_str(), "User created");
        Ok(user.clone())
    }

    #[instrument(skip(self))]
    async fn list_users(&self) -> Result<Vec<UserSummary>, AppError> {
        let rows = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT u.id, u.email, u.name, u.role, u.created_at,
                   (SELECT COUNT(*) FROM invoices i WHERE i.user_id = u.id) AS invoice_count
            FROM users u
            ORDER BY u.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list users"))?;

        rows.into_iter()
            .map(|r| {
                r.into_user()
                    .map(|(user, invoice_count)| UserSummary {
                        user,
                        invoice_count,
                    })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn set_user_role(&self, id: &str, role: Role) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING id, email, name, role, created_at",
        )
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to update user role"))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("User {} not found", id)))?;

        info!(user_id = %id, role = role.as_str(), "User role updated");
        row.into_user().map(|(u, _)| u)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::Conflict(anyhow::anyhow!("User {} still owns invoices", id))
                } else {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to delete user: {}", e))
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("User {} not found", id)));
        }
        info!(user_id = %id, "User deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Categories
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<CategorySummary>, AppError> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT c.id, c.name, c.description,
                   (SELECT COUNT(*) FROM invoices i WHERE i.category_id = c.id) AS invoice_count
            FROM categories c
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list categories"))?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let (category, invoice_count) = r.into_category();
                CategorySummary {
                    category,
                    invoice_count,
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_category(&self, id: Uuid) -> Result<Option<Category>, AppError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, description FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get category"))?;

        Ok(row.map(|r| r.into_category().0))
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn insert_category(&self, input: &CategoryInput) -> Result<Category, AppError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            INSERT INTO categories (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING id, name, description
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Category '{}' already exists", input.name))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create category: {}", e)),
        })?;

        Ok(row.into_category().0)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn update_category(
        &self,
        id: Uuid,
        input: &CategoryInput,
    ) -> Result<Category, AppError> {
        let row = sqlx::query_as::<_, CategoryRow>(
            r#"
            UPDATE categories SET name = $2, description = $3
            WHERE id = $1
            RETURNING id, name, description
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Category '{}' already exists", input.name))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to update category: {}", e)),
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Category {} not found", id)))?;

        Ok(row.into_category().0)
    }

    #[instrument(skip(self))]
    async fn delete_category(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::Conflict(anyhow::anyhow!("Category is used by invoices"))
                } else {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to delete category: {}", e))
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Category {} not found",
                id
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Invoices
    // -------------------------------------------------------------------------

    #[instrument(skip(self, invoice, lines), fields(invoice_id = %invoice.id, year = year))]
    async fn insert_invoice(
        &self,
        invoice: NewInvoice,
        lines: Vec<LineInput>,
        year: i32,
    ) -> Result<(Invoice, Vec<InvoiceLine>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;
        let sequence = Self::next_sequence(&mut tx, year).await?;
        let invoice = invoice.into_invoice(format_invoice_number(year, sequence));

        sqlx::query(&format!(
            "INSERT INTO invoices ({INVOICE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22, $23, $24, $25)"
        ))
        .bind(invoice.id)
        .bind(&invoice.invoice_number)
        .bind(&invoice.name)
        .bind(&invoice.issuer_name)
        .bind(&invoice.issuer_address)
        .bind(&invoice.client_name)
        .bind(&invoice.client_address)
        .bind(&invoice.client_email)
        .bind(&invoice.client_phone)
        .bind(&invoice.notes)
        .bind(invoice.category_id)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.sent_at)
        .bind(invoice.vat_active)
        .bind(invoice.vat_rate)
        .bind(invoice.total_ht)
        .bind(invoice.total_tva)
        .bind(invoice.total_ttc)
        .bind(invoice.lifecycle.as_str())
        .bind(invoice.payment_status.as_str())
        .bind(&invoice.user_id)
        .bind(invoice.last_notice_on)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow::anyhow!("Client or category not found"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create invoice: {}", e))
            }
        })?;

        let lines = Self::insert_lines(&mut tx, invoice.id, lines).await?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invoice"))?;
        timer.observe_duration();

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            "Invoice created"
        );

        Ok((invoice, lines))
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get invoice"))?;

        timer.observe_duration();
        row.map(Invoice::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn get_lines(&self, invoice_id: Uuid) -> Result<Vec<InvoiceLine>, AppError> {
        let rows = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT id, invoice_id, description, quantity, unit_price, position
            FROM invoice_lines
            WHERE invoice_id = $1
            ORDER BY position
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to get invoice lines"))?;

        Ok(rows.into_iter().map(InvoiceLine::from).collect())
    }

    #[instrument(skip(self, filter))]
    async fn list_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE ($1::text IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR lifecycle = $2)
              AND ($3::text IS NULL OR payment_status = $3)
              AND ($4::uuid IS NULL OR category_id = $4)
              AND ($5::text IS NULL
                   OR invoice_number ILIKE $5
                   OR name ILIKE $5
                   OR client_name ILIKE $5
                   OR client_email ILIKE $5)
            ORDER BY created_at DESC, invoice_number DESC
            "#
        ))
        .bind(&filter.user_id)
        .bind(filter.lifecycle.map(|l| l.as_str()))
        .bind(filter.payment_status.map(|p| p.as_str()))
        .bind(filter.category_id)
        .bind(search)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list invoices"))?;

        timer.observe_duration();
        rows.into_iter().map(Invoice::try_from).collect()
    }

    #[instrument(skip(self, invoice, lines), fields(invoice_id = %invoice.id))]
    async fn save_invoice(
        &self,
        invoice: &Invoice,
        lines: Option<Vec<LineInput>>,
    ) -> Result<Invoice, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_invoice"])
            .start_timer();

        let mut tx = self.begin().await?;

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            UPDATE invoices SET
                name = $2, issuer_name = $3, issuer_address = $4,
                client_name = $5, client_address = $6, client_email = $7, client_phone = $8,
                notes = $9, category_id = $10, invoice_date = $11, due_date = $12,
                sent_at = $13, vat_active = $14, vat_rate = $15,
                total_ht = $16, total_tva = $17, total_ttc = $18,
                lifecycle = $19, payment_status = $20, updated_at = $21
            WHERE id = $1
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice.id)
        .bind(&invoice.name)
        .bind(&invoice.issuer_name)
        .bind(&invoice.issuer_address)
        .bind(&invoice.client_name)
        .bind(&invoice.client_address)
        .bind(&invoice.client_email)
        .bind(&invoice.client_phone)
        .bind(&invoice.notes)
        .bind(invoice.category_id)
        .bind(invoice.invoice_date)
        .bind(invoice.due_date)
        .bind(invoice.sent_at)
        .bind(invoice.vat_active)
        .bind(invoice.vat_rate)
        .bind(invoice.total_ht)
        .bind(invoice.total_tva)
        .bind(invoice.total_ttc)
        .bind(invoice.lifecycle.as_str())
        .bind(invoice.payment_status.as_str())
        .bind(invoice.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow::anyhow!("Category not found"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update invoice: {}", e))
            }
        })?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Invoice {} not found", invoice.id)))?;

        if let Some(lines) = lines {
            sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = $1")
                .bind(invoice.id)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to clear invoice lines"))?;
            Self::insert_lines(&mut tx, invoice.id, lines).await?;
        }

        tx.commit()
            .await
            .map_err(db_error("Failed to commit invoice update"))?;
        timer.observe_duration();

        Invoice::try_from(row)
    }

    #[instrument(skip(self))]
    async fn delete_invoice(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete invoice"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Invoice {} not found",
                id
            )));
        }
        info!(invoice_id = %id, "Invoice deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_sent_with_payment(
        &self,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<Invoice>, AppError> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE lifecycle = $1 AND payment_status = ANY($2)
            ORDER BY due_date
            "#
        ))
        .bind(InvoiceLifecycle::Sent.as_str())
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list sent invoices"))?;

        rows.into_iter().map(Invoice::try_from).collect()
    }

    #[instrument(skip(self, outstanding))]
    async fn mark_overdue(
        &self,
        id: Uuid,
        outstanding: &[PaymentStatus],
    ) -> Result<bool, AppError> {
        let outstanding: Vec<&str> = outstanding.iter().map(|s| s.as_str()).collect();
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET payment_status = $2
            WHERE id = $1 AND lifecycle = $3 AND payment_status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(PaymentStatus::Overdue.as_str())
        .bind(InvoiceLifecycle::Sent.as_str())
        .bind(&outstanding)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark invoice overdue"))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn record_notice(&self, id: Uuid, noticed_on: NaiveDate) -> Result<(), AppError> {
        sqlx::query("UPDATE invoices SET last_notice_on = $2 WHERE id = $1")
            .bind(id)
            .bind(noticed_on)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to record notice"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn invoice_stats(
        &self,
        user_id: Option<&str>,
        month_start: NaiveDate,
        last_month_start: NaiveDate,
    ) -> Result<InvoiceStats, AppError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) AS total_invoices,
                COUNT(*) FILTER (WHERE payment_status = 'PAID') AS paid_invoices,
                COUNT(*) FILTER (WHERE lifecycle = 'SENT'
                                   AND payment_status IN ('PENDING', 'PARTIAL')) AS pending_invoices,
                COUNT(*) FILTER (WHERE payment_status = 'OVERDUE') AS overdue_invoices,
                COALESCE(SUM(total_ttc) FILTER (WHERE payment_status = 'PAID'), 0) AS total_revenue,
                COALESCE(SUM(total_ttc) FILTER (WHERE lifecycle = 'SENT'
                                   AND payment_status IN ('PENDING', 'PARTIAL')), 0) AS outstanding_amount,
                COUNT(*) FILTER (WHERE created_at::date >= $2) AS invoices_this_month,
                COUNT(*) FILTER (WHERE created_at::date >= $3
                                   AND created_at::date < $2) AS invoices_last_month
            FROM invoices
            WHERE ($1::text IS NULL OR user_id = $1)
            "#,
        )
        .bind(user_id)
        .bind(month_start)
        .bind(last_month_start)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to compute invoice stats"))?;

        Ok(InvoiceStats {
            total_invoices: row.total_invoices,
            paid_invoices: row.paid_invoices,
            pending_invoices: row.pending_invoices,
            overdue_invoices: row.overdue_invoices,
            total_revenue: row.total_revenue,
            outstanding_amount: row.outstanding_amount,
            invoices_this_month: row.invoices_this_month,
            invoices_last_month: row.invoices_last_month,
        })
    }

    // -------------------------------------------------------------------------
    // Chat
    // -------------------------------------------------------------------------

    #[instrument(skip(self))]
    async fn find_conversation(
        &self,
        client_id: &str,
        invoice_id: Option<Uuid>,
    ) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, client_id, invoice_id, subject, last_message_at, created_at
            FROM conversations
            WHERE client_id = $1 AND invoice_id IS NOT DISTINCT FROM $2
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find conversation"))?;

        Ok(row.map(Conversation::from))
    }

    #[instrument(skip(self, conversation), fields(conversation_id = %conversation.id))]
    async fn insert_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<Conversation, AppError> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, client_id, invoice_id, subject, last_message_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(conversation.id)
        .bind(&conversation.client_id)
        .bind(conversation.invoice_id)
        .bind(&conversation.subject)
        .bind(conversation.last_message_at)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::NotFound(anyhow::anyhow!("Client or invoice not found"))
            } else {
                AppError::DatabaseError(anyhow::anyhow!("Failed to create conversation: {}", e))
            }
        })?;

        Ok(conversation.clone())
    }

    #[instrument(skip(self))]
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, client_id, invoice_id, subject, last_message_at, created_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to get conversation"))?;

        Ok(row.map(Conversation::from))
    }

    #[instrument(skip(self))]
    async fn list_conversations(
        &self,
        client_id: Option<&str>,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let conversations = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT id, client_id, invoice_id, subject, last_message_at, created_at
            FROM conversations
            WHERE ($1::text IS NULL OR client_id = $1)
            ORDER BY last_message_at DESC
            "#,
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list conversations"))?;

        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let latest = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT DISTINCT ON (conversation_id) {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_id = ANY($1)
            ORDER BY conversation_id, created_at DESC
            "#
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load latest messages"))?;

        let mut latest: std::collections::HashMap<Uuid, Message> = latest
            .into_iter()
            .map(|m| (m.conversation_id, Message::from(m)))
            .collect();

        Ok(conversations
            .into_iter()
            .map(|c| {
                let last_message = latest.remove(&c.id);
                ConversationSummary {
                    conversation: c.into(),
                    last_message,
                }
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, AppError> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 ORDER BY created_at"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list messages"))?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id))]
    async fn insert_message(&self, message: &Message) -> Result<Message, AppError> {
        let mut tx = self.begin().await?;

        let bumped = sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
            .bind(message.conversation_id)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to bump conversation"))?;
        if bumped.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Conversation {} not found",
                message.conversation_id
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.content)
        .bind(message.is_read)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert message"))?;

        tx.commit()
            .await
            .map_err(db_error("Failed to commit message"))?;
        Ok(message.clone())
    }

    #[instrument(skip(self))]
    async fn mark_read(&self, conversation_id: Uuid, receiver_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE messages SET is_read = TRUE
            WHERE conversation_id = $1 AND receiver_id = $2 AND is_read = FALSE
            "#,
        )
        .bind(conversation_id)
        .bind(receiver_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to mark messages read"))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn unread_count(&self, receiver_id: &str) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND is_read = FALSE",
        )
        .bind(receiver_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count unread messages"))?;

        Ok(count)
    }
}
