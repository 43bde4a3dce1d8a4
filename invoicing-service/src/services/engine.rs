//! Invoice Lifecycle Engine.
//!
//! Orchestrates the pure rules in [`crate::lifecycle`] against the store, the
//! clock and the notification channels. Every write goes through the store
//! first; notifications are only scheduled once the write has succeeded.

use super::clock::Clock;
use super::metrics::{INVOICES_CREATED_TOTAL, SCAN_RUNS_TOTAL, STATUS_TRANSITIONS_TOTAL};
use super::notifications::{InvoiceNotice, Notification, NotificationDispatcher, Notifier};
use super::pdf::{InvoicePdfData, PdfRenderer};
use super::providers::ProviderError;
use super::store::InvoiceStore;
use crate::config::InvoiceRules;
use crate::dtos::{
    FullInvoiceRequest, InvoiceListItem, InvoiceOutcome, InvoiceView, QuickInvoiceRequest,
    ScanReport, ScanResult, StatusChangeRequest, UpdateInvoiceRequest,
};
use crate::lifecycle::schedule::{
    days_overdue, days_remaining, is_overdue_candidate, is_overdue_notice_day,
    is_upcoming_candidate, noticed_today, OVERDUE_SCAN_STATUSES, UPCOMING_SCAN_STATUSES,
};
use crate::lifecycle::totals::validate_vat_rate;
use crate::lifecycle::{
    compute_totals, plan_transition, StatusChange, TransitionEffect, TransitionPlan,
};
use crate::models::{
    Invoice, InvoiceDetail, InvoiceFilter, InvoiceLifecycle, InvoiceStats, LineInput,
    NewInvoice, PaymentStatus, User,
};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

#[derive(Clone)]
pub struct InvoiceEngine {
    store: Arc<dyn InvoiceStore>,
    notifier: Arc<Notifier>,
    dispatcher: Arc<NotificationDispatcher>,
    pdf: Arc<dyn PdfRenderer>,
    clock: Arc<dyn Clock>,
    rules: InvoiceRules,
}

fn validate_lines(lines: &[LineInput]) -> Result<(), AppError> {
    for line in lines {
        line.validate()?;
    }
    Ok(())
}

fn invoice_not_found(id: Uuid) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Invoice {} not found", id))
}

fn first_of_month(date: NaiveDate) -> Result<NaiveDate, AppError> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("invalid date {}", date)))
}

fn provider_error(err: ProviderError) -> AppError {
    match err {
        ProviderError::NotEnabled(msg) => AppError::ServiceUnavailable(msg),
        other => AppError::BadGateway(other.to_string()),
    }
}

impl InvoiceEngine {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        notifier: Arc<Notifier>,
        dispatcher: Arc<NotificationDispatcher>,
        pdf: Arc<dyn PdfRenderer>,
        clock: Arc<dyn Clock>,
        rules: InvoiceRules,
    ) -> Self {
        Self {
            store,
            notifier,
            dispatcher,
            pdf,
            clock,
            rules,
        }
    }

    async fn load(&self, id: Uuid) -> Result<Invoice, AppError> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or_else(|| invoice_not_found(id))
    }

    /// Clients only ever see their own invoices; anything else looks missing.
    async fn load_visible(&self, id: Uuid, viewer: &User) -> Result<Invoice, AppError> {
        let invoice = self.load(id).await?;
        if !viewer.role.is_admin() && invoice.user_id != viewer.id {
            return Err(invoice_not_found(id));
        }
        Ok(invoice)
    }

    async fn ensure_category(&self, category_id: Option<Uuid>) -> Result<(), AppError> {
        if let Some(id) = category_id {
            if self.store.get_category(id).await?.is_none() {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Category {} not found",
                    id
                )));
            }
        }
        Ok(())
    }

    async fn detail(&self, invoice: Invoice) -> Result<InvoiceView, AppError> {
        let lines = self.store.get_lines(invoice.id).await?;
        let category_name = match invoice.category_id {
            Some(id) => self.store.get_category(id).await?.map(|c| c.name),
            None => None,
        };
        Ok(InvoiceDetail {
            invoice,
            lines,
            category_name,
        }
        .into())
    }

    fn plan(
        &self,
        invoice: &Invoice,
        change: StatusChange,
        force: bool,
    ) -> Result<TransitionPlan, AppError> {
        plan_transition(
            invoice,
            change,
            self.rules.transition_policy,
            force,
            self.clock.now(),
        )
        .map_err(|e| AppError::Conflict(anyhow::Error::new(e)))
    }

    fn count_transitions(before: &Invoice, after: &Invoice) {
        if before.lifecycle != after.lifecycle {
            STATUS_TRANSITIONS_TOTAL
                .with_label_values(&["lifecycle", after.lifecycle.as_str()])
                .inc();
        }
        if before.payment_status != after.payment_status {
            STATUS_TRANSITIONS_TOTAL
                .with_label_values(&["payment", after.payment_status.as_str()])
                .inc();
        }
    }

    /// Queue the notifications implied by a committed transition. Returns the
    /// ones actually queued.
    fn schedule_effects(
        &self,
        invoice: &Invoice,
        effects: &[TransitionEffect],
    ) -> Vec<TransitionEffect> {
        if effects.is_empty() {
            return Vec::new();
        }
        if !invoice.has_client_email() {
            tracing::info!(
                invoice_id = %invoice.id,
                invoice_number = %invoice.invoice_number,
                "No client email, transition notifications skipped"
            );
            return Vec::new();
        }

        let notice = InvoiceNotice::from(invoice);
        effects
            .iter()
            .copied()
            .filter(|effect| {
                let notification = match effect {
                    TransitionEffect::InvoiceSent => Notification::InvoiceSent(notice.clone()),
                    TransitionEffect::PaymentConfirmed => Notification::PaymentConfirmed {
                        notice: notice.clone(),
                        paid_on: self.clock.today(),
                    },
                };
                self.dispatcher.enqueue(notification)
            })
            .collect()
    }

    async fn resolve_owner(
        &self,
        client_id: Option<&str>,
        client_email: Option<&str>,
    ) -> Result<User, AppError> {
        if let Some(id) = client_id.map(str::trim).filter(|s| !s.is_empty()) {
            return self
                .store
                .find_user(id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client {} not found", id)));
        }
        if let Some(email) = client_email.map(str::trim).filter(|s| !s.is_empty()) {
            return self
                .store
                .find_user_by_email(email)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("No client with email {}", email))
                });
        }
        Err(AppError::BadRequest(anyhow::anyhow!(
            "client_id or client_email is required"
        )))
    }

    /// Create an empty draft for an existing client.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_invoice(&self, request: QuickInvoiceRequest) -> Result<InvoiceView, AppError> {
        request.validate()?;
        let client = self
            .resolve_owner(request.client_id.as_deref(), request.client_email.as_deref())
            .await?;

        let now = self.clock.now();
        let today = now.date_naive();
        let new_invoice = NewInvoice {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            issuer_name: String::new(),
            issuer_address: String::new(),
            client_name: client.name.clone(),
            client_address: String::new(),
            client_email: client.email.clone(),
            client_phone: String::new(),
            notes: None,
            category_id: None,
            invoice_date: today,
            due_date: today + Duration::days(self.rules.payment_terms_days),
            vat_active: false,
            vat_rate: self.rules.default_vat_rate,
            total_ht: Decimal::ZERO,
            total_tva: Decimal::ZERO,
            total_ttc: Decimal::ZERO,
            lifecycle: InvoiceLifecycle::Draft,
            payment_status: PaymentStatus::Pending,
            user_id: client.id.clone(),
            created_at: now,
        };

        let (invoice, _) = self
            .store
            .insert_invoice(new_invoice, Vec::new(), today.year())
            .await?;
        INVOICES_CREATED_TOTAL.with_label_values(&["quick"]).inc();

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            user_id = %invoice.user_id,
            "Invoice created"
        );
        self.detail(invoice).await
    }

    /// Create a complete invoice with lines in one call.
    #[instrument(skip(self, caller, request), fields(caller = %caller.id))]
    pub async fn create_full_invoice(
        &self,
        caller: &User,
        request: FullInvoiceRequest,
    ) -> Result<InvoiceOutcome, AppError> {
        request.validate()?;
        validate_lines(&request.lines)?;
        let vat_rate = request.vat_rate.unwrap_or(self.rules.default_vat_rate);
        validate_vat_rate(vat_rate)?;
        self.ensure_category(request.category_id).await?;

        let owner_id = match request.user_id.as_deref() {
            Some(id) => self.resolve_owner(Some(id), None).await?.id,
            None => caller.id.clone(),
        };

        let now = self.clock.now();
        let today = now.date_naive();
        let totals = compute_totals(
            request.lines.iter().map(|l| (l.quantity, l.unit_price)),
            request.vat_active,
            vat_rate,
        );
        let invoice_date = request.invoice_date.unwrap_or(today);

        let new_invoice = NewInvoice {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            issuer_name: request.issuer_name,
            issuer_address: request.issuer_address,
            client_name: request.client_name,
            client_address: request.client_address,
            client_email: request.client_email.trim().to_string(),
            client_phone: request.client_phone,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
            category_id: request.category_id,
            invoice_date,
            due_date: request
                .due_date
                .unwrap_or(invoice_date + Duration::days(self.rules.payment_terms_days)),
            vat_active: request.vat_active,
            vat_rate,
            total_ht: totals.total_ht,
            total_tva: totals.total_tva,
            total_ttc: totals.total_ttc,
            lifecycle: InvoiceLifecycle::Draft,
            payment_status: PaymentStatus::Pending,
            user_id: owner_id,
            created_at: now,
        };

        let (mut invoice, _) = self
            .store
            .insert_invoice(new_invoice, request.lines, today.year())
            .await?;
        INVOICES_CREATED_TOTAL.with_label_values(&["full"]).inc();
        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            total_ttc = %invoice.total_ttc,
            "Invoice created with lines"
        );

        // Initial statuses other than DRAFT/PENDING are applied as a regular
        // transition so that sent_at and notifications follow the same rules.
        let change =
            StatusChange::requested(request.lifecycle, request.payment_status, request.status);
        let mut scheduled = Vec::new();
        if !change.is_empty() {
            let before = invoice.clone();
            let plan = self.plan(&invoice, change, true)?;
            plan.apply(&mut invoice);
            if invoice != before {
                invoice.updated_at = now;
                invoice = self.store.save_invoice(&invoice, None).await?;
                Self::count_transitions(&before, &invoice);
                scheduled = self.schedule_effects(&invoice, &plan.effects);
            }
        }

        Ok(InvoiceOutcome {
            invoice: self.detail(invoice).await?,
            scheduled,
        })
    }

    /// Apply a partial edit, optionally with a new line list and statuses,
    /// and save it in one write.
    #[instrument(skip(self, request), fields(invoice_id = %id))]
    pub async fn update_invoice(
        &self,
        id: Uuid,
        request: UpdateInvoiceRequest,
    ) -> Result<InvoiceOutcome, AppError> {
        if let Some(lines) = &request.lines {
            validate_lines(lines)?;
        }
        if let Some(rate) = request.patch.vat_rate {
            validate_vat_rate(rate)?;
        }
        self.ensure_category(request.patch.category_id).await?;

        let before = self.load(id).await?;
        let mut invoice = before.clone();
        request.patch.apply(&mut invoice);
        invoice.client_email = invoice.client_email.trim().to_string();

        let amounts: Vec<(Decimal, Decimal)> = match &request.lines {
            Some(lines) => lines.iter().map(|l| (l.quantity, l.unit_price)).collect(),
            None => self
                .store
                .get_lines(id)
                .await?
                .iter()
                .map(|l| (l.quantity, l.unit_price))
                .collect(),
        };
        let totals = compute_totals(amounts, invoice.vat_active, invoice.vat_rate);
        invoice.total_ht = totals.total_ht;
        invoice.total_tva = totals.total_tva;
        invoice.total_ttc = totals.total_ttc;

        let change =
            StatusChange::requested(request.lifecycle, request.payment_status, request.status);
        let plan = if change.is_empty() {
            None
        } else {
            let plan = self.plan(&invoice, change, request.force)?;
            plan.apply(&mut invoice);
            Some(plan)
        };

        invoice.updated_at = self.clock.now();
        let saved = self.store.save_invoice(&invoice, request.lines).await?;
        Self::count_transitions(&before, &saved);

        let scheduled = match plan {
            Some(plan) => self.schedule_effects(&saved, &plan.effects),
            None => Vec::new(),
        };

        tracing::info!(
            invoice_id = %saved.id,
            total_ttc = %saved.total_ttc,
            lifecycle = %saved.lifecycle,
            payment_status = %saved.payment_status,
            "Invoice updated"
        );

        Ok(InvoiceOutcome {
            invoice: self.detail(saved).await?,
            scheduled,
        })
    }

    #[instrument(skip(self, request), fields(invoice_id = %id))]
    pub async fn change_status(
        &self,
        id: Uuid,
        request: StatusChangeRequest,
    ) -> Result<InvoiceOutcome, AppError> {
        let change =
            StatusChange::requested(request.lifecycle, request.payment_status, request.status);
        if change.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "lifecycle or payment_status is required"
            )));
        }

        let before = self.load(id).await?;
        let plan = self.plan(&before, change, request.force)?;
        let mut invoice = before.clone();
        plan.apply(&mut invoice);
        invoice.updated_at = self.clock.now();

        let saved = self.store.save_invoice(&invoice, None).await?;
        Self::count_transitions(&before, &saved);
        let scheduled = self.schedule_effects(&saved, &plan.effects);

        tracing::info!(
            invoice_id = %saved.id,
            from_lifecycle = %before.lifecycle,
            to_lifecycle = %saved.lifecycle,
            from_payment = %before.payment_status,
            to_payment = %saved.payment_status,
            forced = request.force,
            scheduled = scheduled.len(),
            "Invoice status changed"
        );

        Ok(InvoiceOutcome {
            invoice: self.detail(saved).await?,
            scheduled,
        })
    }

    #[instrument(skip(self, viewer), fields(invoice_id = %id))]
    pub async fn get_invoice(&self, id: Uuid, viewer: &User) -> Result<InvoiceView, AppError> {
        let invoice = self.load_visible(id, viewer).await?;
        self.detail(invoice).await
    }

    /// Newest first. Clients are always scoped to their own invoices.
    #[instrument(skip(self, viewer, filter), fields(viewer = %viewer.id))]
    pub async fn list_invoices(
        &self,
        viewer: &User,
        mut filter: InvoiceFilter,
    ) -> Result<Vec<InvoiceListItem>, AppError> {
        if !viewer.role.is_admin() {
            filter.user_id = Some(viewer.id.clone());
        }
        let invoices = self.store.list_invoices(&filter).await?;
        Ok(invoices.into_iter().map(InvoiceListItem::from).collect())
    }

    #[instrument(skip(self), fields(invoice_id = %id))]
    pub async fn delete_invoice(&self, id: Uuid) -> Result<(), AppError> {
        self.store.delete_invoice(id).await?;
        tracing::info!(invoice_id = %id, "Invoice deleted");
        Ok(())
    }

    /// Dashboard figures for the viewer (everything for admins).
    pub async fn stats(&self, viewer: &User) -> Result<InvoiceStats, AppError> {
        let month_start = first_of_month(self.clock.today())?;
        let last_month_start = first_of_month(month_start - Duration::days(1))?;
        let scope = (!viewer.role.is_admin()).then_some(viewer.id.as_str());
        self.store
            .invoice_stats(scope, month_start, last_month_start)
            .await
    }

    /// Render the invoice through the external PDF service.
    #[instrument(skip(self, viewer), fields(invoice_id = %id))]
    pub async fn render_pdf(
        &self,
        id: Uuid,
        viewer: &User,
    ) -> Result<(InvoicePdfData, Vec<u8>), AppError> {
        let view = self.get_invoice(id, viewer).await?;
        let data = InvoicePdfData::new(
            &view.detail.invoice,
            &view.detail.lines,
            view.detail.category_name.clone(),
        );
        let bytes = self.pdf.render(&data).await.map_err(|e| {
            tracing::error!(invoice_id = %id, error = %e, "PDF rendering failed");
            provider_error(e)
        })?;
        Ok((data, bytes))
    }

    /// Online payment and disputes need a payment gateway, which is not wired.
    pub async fn payment_action(
        &self,
        id: Uuid,
        viewer: &User,
        action: &str,
    ) -> Result<(), AppError> {
        let invoice = self.load_visible(id, viewer).await?;
        if invoice.user_id != viewer.id {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Only the invoiced client can {} this invoice",
                action
            )));
        }
        Err(AppError::NotImplemented(format!(
            "Invoice {} is not available yet",
            action
        )))
    }

    /// Daily overdue scan: marks due invoices OVERDUE and emails the client on
    /// the configured notice days.
    #[instrument(skip(self))]
    pub async fn run_overdue_scan(&self) -> Result<ScanReport, AppError> {
        SCAN_RUNS_TOTAL.with_label_values(&["overdue"]).inc();
        let today = self.clock.today();
        let candidates: Vec<Invoice> = self
            .store
            .list_sent_with_payment(&OVERDUE_SCAN_STATUSES)
            .await?
            .into_iter()
            .filter(|invoice| is_overdue_candidate(invoice, today))
            .collect();

        tracing::info!(%today, candidates = candidates.len(), "Overdue scan started");

        let mut results = Vec::new();
        for invoice in &candidates {
            let days = days_overdue(invoice.due_date, today);
            if !is_overdue_notice_day(days) {
                tracing::debug!(
                    invoice_number = %invoice.invoice_number,
                    days_overdue = days,
                    "Not a notice day"
                );
                continue;
            }
            if noticed_today(invoice, today) {
                tracing::info!(
                    invoice_number = %invoice.invoice_number,
                    "Overdue notice already sent today"
                );
                continue;
            }

            let error = match self.notify_overdue(invoice, days, today).await {
                Ok(true) => None,
                Ok(false) => continue,
                Err(e) => Some(e),
            };
            results.push(ScanResult {
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                client_email: invoice.client_email.clone(),
                days_overdue: Some(days),
                days_remaining: None,
                success: error.is_none(),
                error,
            });
        }

        Ok(ScanReport {
            success: true,
            message: format!(
                "Processed {} overdue invoice notifications (out of {} overdue invoices)",
                results.len(),
                candidates.len()
            ),
            date: today,
            candidates: candidates.len(),
            results,
        })
    }

    /// Returns `Ok(false)` when the invoice was settled since it was listed.
    async fn notify_overdue(
        &self,
        invoice: &Invoice,
        days: i64,
        today: NaiveDate,
    ) -> Result<bool, String> {
        let still_outstanding = self
            .store
            .mark_overdue(invoice.id, &OVERDUE_SCAN_STATUSES)
            .await
            .map_err(|e| {
                tracing::error!(invoice_id = %invoice.id, error = %e, "Failed to mark invoice overdue");
                e.to_string()
            })?;
        if !still_outstanding {
            tracing::info!(
                invoice_number = %invoice.invoice_number,
                "Invoice no longer outstanding, overdue notice skipped"
            );
            return Ok(false);
        }
        if invoice.payment_status != PaymentStatus::Overdue {
            STATUS_TRANSITIONS_TOTAL
                .with_label_values(&["payment", PaymentStatus::Overdue.as_str()])
                .inc();
        }

        self.notifier
            .deliver(&Notification::OverdueNotice {
                notice: InvoiceNotice::from(invoice),
                days_overdue: days,
            })
            .await
            .map_err(|e| e.to_string())?;

        if let Err(e) = self.store.record_notice(invoice.id, today).await {
            tracing::warn!(invoice_id = %invoice.id, error = %e, "Notice sent but not recorded");
        }
        Ok(true)
    }

    /// Daily reminder scan for invoices due in exactly three days.
    #[instrument(skip(self))]
    pub async fn run_upcoming_scan(&self) -> Result<ScanReport, AppError> {
        SCAN_RUNS_TOTAL.with_label_values(&["upcoming"]).inc();
        let today = self.clock.today();
        let candidates: Vec<Invoice> = self
            .store
            .list_sent_with_payment(&UPCOMING_SCAN_STATUSES)
            .await?
            .into_iter()
            .filter(|invoice| is_upcoming_candidate(invoice, today))
            .collect();

        tracing::info!(%today, candidates = candidates.len(), "Reminder scan started");

        let mut results = Vec::new();
        for invoice in &candidates {
            if noticed_today(invoice, today) {
                continue;
            }
            let remaining = days_remaining(invoice.due_date, today);
            let outcome = self
                .notifier
                .deliver(&Notification::PaymentReminder {
                    notice: InvoiceNotice::from(invoice),
                    days_remaining: remaining,
                })
                .await;

            let error = match outcome {
                Ok(_) => {
                    if let Err(e) = self.store.record_notice(invoice.id, today).await {
                        tracing::warn!(invoice_id = %invoice.id, error = %e, "Reminder sent but not recorded");
                    }
                    None
                }
                Err(e) => Some(e.to_string()),
            };

            results.push(ScanResult {
                invoice_id: invoice.id,
                invoice_number: invoice.invoice_number.clone(),
                client_email: invoice.client_email.clone(),
                days_overdue: None,
                days_remaining: Some(remaining),
                success: error.is_none(),
                error,
            });
        }

        Ok(ScanReport {
            success: true,
            message: format!("Processed {} payment reminders", results.len()),
            date: today,
            candidates: candidates.len(),
            results,
        })
    }
}
