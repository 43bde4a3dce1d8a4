//! Daily overdue and reminder scans.

mod common;

use common::{admin_token, days_from_today, TestApp, CLIENT_EMAIL};
use reqwest::Method;
use secrecy::Secret;
use serde_json::{json, Value};
use std::time::Duration;

const OVERDUE_SUBJECT: &str = "⚠️ URGENT";
const REMINDER_SUBJECT: &str = "🔔 Rappel";

async fn sent_invoice_due_in(app: &TestApp, days: i64) -> Value {
    app.create_invoice(json!({
        "lifecycle": "SENT",
        "invoice_date": days_from_today(days - 30).to_string(),
        "due_date": days_from_today(days).to_string(),
    }))
    .await
}

async fn run(app: &TestApp, path: &str) -> Value {
    let response = app.request(Method::GET, path, None, None).await;
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn overdue_scan_fires_on_notice_days_only() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let seven = sent_invoice_due_in(&app, -7).await;
    let eight = sent_invoice_due_in(&app, -8).await;

    let report = run(&app, "/cron/overdue").await;

    assert_eq!(report["success"], true);
    assert_eq!(report["candidates"], 2);
    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["invoice_id"], seven["id"]);
    assert_eq!(results[0]["days_overdue"], 7);
    assert_eq!(results[0]["success"], true);
    assert_eq!(
        report["message"],
        "Processed 1 overdue invoice notifications (out of 2 overdue invoices)"
    );

    let notices = app.emails_with_subject(OVERDUE_SUBJECT);
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].to, CLIENT_EMAIL);
    assert!(notices[0].subject.ends_with("en retard de 7 jours"));

    let notified: Value = app
        .get(
            &format!("/api/invoices/{}", seven["id"].as_str().unwrap()),
            &admin_token(),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(notified["payment_status"], "OVERDUE");
    assert_eq!(notified["display_status"]["label"], "En retard");

    let skipped: Value = app
        .get(
            &format!("/api/invoices/{}", eight["id"].as_str().unwrap()),
            &admin_token(),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(skipped["payment_status"], "PENDING");
}

#[tokio::test]
async fn overdue_scan_is_idempotent_within_a_day() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    sent_invoice_due_in(&app, -1).await;

    let first = run(&app, "/cron/overdue").await;
    let second = run(&app, "/cron/overdue").await;

    assert_eq!(first["results"].as_array().unwrap().len(), 1);
    assert!(second["results"].as_array().unwrap().is_empty());
    assert_eq!(app.emails_with_subject(OVERDUE_SUBJECT).len(), 1);
    assert!(app.emails_with_subject(OVERDUE_SUBJECT)[0]
        .subject
        .ends_with("en retard de 1 jour"));
}

#[tokio::test]
async fn overdue_scan_ignores_paid_and_unsent_invoices() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    app.create_invoice(json!({
        "lifecycle": "SENT",
        "payment_status": "PAID",
        "due_date": days_from_today(-7).to_string(),
    }))
    .await;
    app.create_invoice(json!({ "due_date": days_from_today(-7).to_string() }))
        .await;

    let report = run(&app, "/cron/overdue").await;

    assert_eq!(report["candidates"], 0);
    assert!(app.emails_with_subject(OVERDUE_SUBJECT).is_empty());
}

#[tokio::test]
async fn reminder_scan_targets_invoices_due_in_three_days() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let three = sent_invoice_due_in(&app, 3).await;
    sent_invoice_due_in(&app, 4).await;

    let report = run(&app, "/cron/reminders").await;

    let results = report["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["invoice_id"], three["id"]);
    assert_eq!(results[0]["days_remaining"], 3);

    let reminders = app.emails_with_subject(REMINDER_SUBJECT);
    assert_eq!(reminders.len(), 1);
    assert!(reminders[0].subject.ends_with("à échéance dans 3 jours"));

    let again = run(&app, "/cron/reminders").await;
    assert!(again["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn cron_requires_the_configured_secret() {
    let app = TestApp::spawn_with(|config| {
        config.cron_secret = Some(Secret::new("cron-token".to_string()));
    })
    .await;

    let missing = app
        .request(Method::GET, "/cron/overdue", None, None)
        .await;
    assert_eq!(missing.status(), 401);

    let wrong = app
        .request(Method::GET, "/cron/reminders", Some("not-it"), None)
        .await;
    assert_eq!(wrong.status(), 401);

    let right = app
        .request(Method::GET, "/cron/overdue", Some("cron-token"), None)
        .await;
    assert_eq!(right.status(), 200);
}

#[tokio::test]
async fn payment_recorded_while_a_notice_is_sent_is_kept() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = sent_invoice_due_in(&app, -7).await;
    let id = invoice["id"].as_str().unwrap();
    app.wait_for_emails(1).await;
    app.email.fail_next(2);

    let scan = run(&app, "/cron/overdue");
    let pay = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        app.change_status(id, json!({ "payment_status": "PAID" }))
            .await
            .status()
    };
    let (report, paid) = tokio::join!(scan, pay);

    assert_eq!(paid, 200);
    assert_eq!(report["results"][0]["success"], true);
    let stored: Value = app
        .get(&format!("/api/invoices/{}", id), &admin_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stored["payment_status"], "PAID");
}
