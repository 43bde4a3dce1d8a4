//! French email templates for client notifications.

use super::notifications::{InvoiceNotice, Notification};
use super::providers::EmailMessage;
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// `1234.5` -> `1 234,50 €` (non-breaking space as group separator).
pub fn format_eur(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((&text, "00"));

    let mut grouped = String::new();
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('\u{a0}');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped},{frac_part}\u{a0}€")
}

/// `2025-03-15` -> `15 mars 2025`.
pub fn format_date_fr(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

fn plural(n: i64) -> &'static str {
    if n > 1 {
        "s"
    } else {
        ""
    }
}

fn invoice_url(base_url: &str, notice: &InvoiceNotice) -> String {
    format!("{}/invoices/{}", base_url, notice.invoice_id)
}

fn pdf_url(base_url: &str, notice: &InvoiceNotice) -> String {
    format!("{}/api/invoices/{}/pdf", base_url, notice.invoice_id)
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(title: &str, paragraphs: &[String], button: Option<(&str, &str)>) -> String {
    let mut html = format!(
        "<!DOCTYPE html><html lang=\"fr\"><body style=\"font-family:Arial,sans-serif;color:#1e293b\">\
         <h1 style=\"font-size:20px\">{}</h1>",
        escape_html(title)
    );
    for p in paragraphs {
        html.push_str(&format!("<p>{}</p>", escape_html(p)));
    }
    if let Some((label, href)) = button {
        html.push_str(&format!(
            "<p><a href=\"{}\" style=\"background:#2563eb;color:#fff;padding:10px 16px;\
             border-radius:6px;text-decoration:none\">{}</a></p>",
            escape_html(href),
            escape_html(label)
        ));
    }
    html.push_str("<p>Cordialement,<br/>L'équipe PayFlux</p></body></html>");
    html
}

fn text(paragraphs: &[String], link: Option<&str>) -> String {
    let mut out = paragraphs.join("\n\n");
    if let Some(link) = link {
        out.push_str("\n\n");
        out.push_str(link);
    }
    out.push_str("\n\nCordialement,\nL'équipe PayFlux");
    out
}

/// Render a notification into a ready-to-send email.
pub fn render(notification: &Notification, base_url: &str) -> EmailMessage {
    let (to, subject, title, paragraphs, button) = match notification {
        Notification::InvoiceSent(notice) => (
            notice.client_email.clone(),
            format!("Nouvelle facture {} - PayFlux", notice.invoice_number),
            "Nouvelle facture disponible".to_string(),
            vec![
                format!("Bonjour {},", notice.client_name),
                format!(
                    "Votre facture {} d'un montant de {} est disponible.",
                    notice.invoice_number,
                    format_eur(notice.total_ttc)
                ),
                format!(
                    "Date d'échéance : {}.",
                    format_date_fr(notice.due_date)
                ),
                format!("PDF : {}", pdf_url(base_url, notice)),
            ],
            Some(("Voir la facture", invoice_url(base_url, notice))),
        ),
        Notification::PaymentConfirmed { notice, paid_on } => (
            notice.client_email.clone(),
            format!("✅ Paiement confirmé - Facture {}", notice.invoice_number),
            "Paiement reçu".to_string(),
            vec![
                format!("Bonjour {},", notice.client_name),
                format!(
                    "Nous confirmons la réception de votre paiement de {} pour la facture {}.",
                    format_eur(notice.total_ttc),
                    notice.invoice_number
                ),
                format!("Date du paiement : {}.", format_date_fr(*paid_on)),
                format!("PDF : {}", pdf_url(base_url, notice)),
            ],
            Some(("Voir la facture", invoice_url(base_url, notice))),
        ),
        Notification::PaymentReminder {
            notice,
            days_remaining,
        } => (
            notice.client_email.clone(),
            format!(
                "🔔 Rappel - Facture {} à échéance dans {} jours",
                notice.invoice_number, days_remaining
            ),
            "Rappel d'échéance".to_string(),
            vec![
                format!("Bonjour {},", notice.client_name),
                format!(
                    "Votre facture {} d'un montant de {} arrive à échéance le {}, dans {} jour{}.",
                    notice.invoice_number,
                    format_eur(notice.total_ttc),
                    format_date_fr(notice.due_date),
                    days_remaining,
                    plural(*days_remaining)
                ),
                "Si vous avez déjà effectué le paiement, merci de ne pas tenir compte de ce message."
                    .to_string(),
            ],
            Some(("Régler la facture", invoice_url(base_url, notice))),
        ),
        Notification::OverdueNotice {
            notice,
            days_overdue,
        } => (
            notice.client_email.clone(),
            format!(
                "⚠️ URGENT - Facture {} en retard de {} jour{}",
                notice.invoice_number,
                days_overdue,
                plural(*days_overdue)
            ),
            "Facture en retard de paiement".to_string(),
            vec![
                format!("Bonjour {},", notice.client_name),
                format!(
                    "Nous constatons que le paiement de votre facture {} n'a pas encore été reçu.",
                    notice.invoice_number
                ),
                format!(
                    "Montant dû : {}. Échéance dépassée depuis le {} ({} jour{}).",
                    format_eur(notice.total_ttc),
                    format_date_fr(notice.due_date),
                    days_overdue,
                    plural(*days_overdue)
                ),
                "Si vous avez déjà effectué le paiement, merci de nous en informer immédiatement."
                    .to_string(),
                format!("PDF : {}", pdf_url(base_url, notice)),
            ],
            Some(("Régler maintenant", invoice_url(base_url, notice))),
        ),
        Notification::NewMessage {
            to,
            recipient_name,
            sender_name,
            preview,
            conversation_id,
        } => (
            to.clone(),
            format!("💬 Nouveau message de {}", sender_name),
            "Nouveau message".to_string(),
            vec![
                format!("Bonjour {},", recipient_name),
                format!("{} vous a envoyé un message :", sender_name),
                format!("« {} »", preview),
            ],
            Some((
                "Répondre",
                format!("{}/messages/{}", base_url, conversation_id),
            )),
        ),
    };

    let button_ref = button.as_ref().map(|(label, href)| (*label, href.as_str()));
    EmailMessage {
        to,
        body_html: Some(layout(&title, &paragraphs, button_ref)),
        body_text: Some(text(&paragraphs, button_ref.map(|(_, href)| href))),
        subject,
        reply_to: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn notice() -> InvoiceNotice {
        InvoiceNotice {
            invoice_id: Uuid::nil(),
            invoice_number: "INV-2025-00007".into(),
            client_name: "ACME".into(),
            client_email: "billing@acme.test".into(),
            total_ttc: dec!(1234.5),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
        }
    }

    #[test]
    fn formats_euros_french_style() {
        assert_eq!(format_eur(dec!(1234.5)), "1\u{a0}234,50\u{a0}€");
        assert_eq!(format_eur(dec!(12)), "12,00\u{a0}€");
        assert_eq!(format_eur(dec!(1000000)), "1\u{a0}000\u{a0}000,00\u{a0}€");
    }

    #[test]
    fn formats_dates_in_french() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(format_date_fr(date), "1 août 2025");
    }

    #[test]
    fn overdue_subject_pluralises_days() {
        let one = render(
            &Notification::OverdueNotice {
                notice: notice(),
                days_overdue: 1,
            },
            "https://payflux.com",
        );
        assert_eq!(one.subject, "⚠️ URGENT - Facture INV-2025-00007 en retard de 1 jour");

        let seven = render(
            &Notification::OverdueNotice {
                notice: notice(),
                days_overdue: 7,
            },
            "https://payflux.com",
        );
        assert_eq!(
            seven.subject,
            "⚠️ URGENT - Facture INV-2025-00007 en retard de 7 jours"
        );
        assert_eq!(seven.to, "billing@acme.test");
    }

    #[test]
    fn invoice_sent_links_to_invoice_and_pdf() {
        let email = render(&Notification::InvoiceSent(notice()), "https://app.test");
        assert_eq!(email.subject, "Nouvelle facture INV-2025-00007 - PayFlux");
        let body = email.body_text.unwrap();
        assert!(body.contains(&format!("https://app.test/invoices/{}", Uuid::nil())));
        assert!(body.contains(&format!("https://app.test/api/invoices/{}/pdf", Uuid::nil())));
    }

    #[test]
    fn message_preview_is_escaped_in_html() {
        let email = render(
            &Notification::NewMessage {
                to: "admin@payflux.com".into(),
                recipient_name: "Admin".into(),
                sender_name: "Client".into(),
                preview: "<b>bonjour</b>".into(),
                conversation_id: Uuid::nil(),
            },
            "https://payflux.com",
        );
        assert_eq!(email.subject, "💬 Nouveau message de Client");
        assert!(email.body_html.unwrap().contains("&lt;b&gt;bonjour&lt;/b&gt;"));
    }
}
