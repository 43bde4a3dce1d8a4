//! Status transitions and the notifications they trigger.

mod common;

use common::{admin_token, TestApp, CLIENT_EMAIL};
use invoicing_service::lifecycle::TransitionPolicy;
use serde_json::{json, Value};

const SENT_SUBJECT: &str = "Nouvelle facture";
const PAID_SUBJECT: &str = "✅ Paiement confirmé";

#[tokio::test]
async fn sending_stamps_sent_at_once_and_emails_the_client() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;
    let id = invoice["id"].as_str().unwrap();
    assert!(invoice["sent_at"].is_null());

    let response = app.change_status(id, json!({ "lifecycle": "SENT" })).await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    let sent_at = outcome["invoice"]["sent_at"].clone();
    assert!(sent_at.is_string());
    assert_eq!(outcome["scheduled"], json!(["invoice_sent"]));

    let emails = app.wait_for_emails(1).await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, CLIENT_EMAIL);
    assert!(emails[0].subject.starts_with(SENT_SUBJECT));
    assert!(emails[0].subject.contains("INV-2025-00001"));

    // Back to draft and sent again: the first timestamp stays.
    app.clock.advance(chrono::Duration::days(2));
    app.change_status(id, json!({ "lifecycle": "DRAFT" })).await;
    let again: Value = app
        .change_status(id, json!({ "lifecycle": "SENT" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["invoice"]["sent_at"], sent_at);
    assert_eq!(again["scheduled"], json!([]));

    app.settle().await;
    assert_eq!(app.emails_with_subject(SENT_SUBJECT).len(), 1);
}

#[tokio::test]
async fn sent_to_sent_sends_nothing() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({ "lifecycle": "SENT" })).await;
    let id = invoice["id"].as_str().unwrap();
    app.wait_for_emails(1).await;

    let outcome: Value = app
        .change_status(id, json!({ "lifecycle": "SENT" }))
        .await
        .json()
        .await
        .unwrap();
    app.settle().await;

    assert_eq!(outcome["scheduled"], json!([]));
    assert_eq!(app.emails_with_subject(SENT_SUBJECT).len(), 1);
}

#[tokio::test]
async fn payment_confirmation_is_sent_exactly_once() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({ "lifecycle": "SENT" })).await;
    let id = invoice["id"].as_str().unwrap();

    let paid: Value = app
        .change_status(id, json!({ "payment_status": "PAID" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(paid["scheduled"], json!(["payment_confirmed"]));
    assert_eq!(paid["invoice"]["display_status"]["label"], "Payée");

    let repeat: Value = app
        .change_status(id, json!({ "payment_status": "PAID" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(repeat["scheduled"], json!([]));

    app.wait_for_emails(2).await;
    app.settle().await;
    let confirmations = app.emails_with_subject(PAID_SUBJECT);
    assert_eq!(confirmations.len(), 1);
    assert!(confirmations[0].subject.ends_with("INV-2025-00001"));
}

#[tokio::test]
async fn blank_client_email_skips_notifications() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({ "client_email": "   " })).await;
    let id = invoice["id"].as_str().unwrap();

    let outcome: Value = app
        .change_status(id, json!({ "lifecycle": "SENT", "payment_status": "PAID" }))
        .await
        .json()
        .await
        .unwrap();
    app.settle().await;

    assert_eq!(outcome["invoice"]["lifecycle"], "SENT");
    assert_eq!(outcome["invoice"]["payment_status"], "PAID");
    assert_eq!(outcome["scheduled"], json!([]));
    assert!(app.email.sent().is_empty());
}

#[tokio::test]
async fn status_change_saved_with_an_edit_notifies_once() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;
    let id = invoice["id"].as_str().unwrap();

    let response = app
        .put(
            &format!("/api/invoices/{}", id),
            &admin_token(),
            json!({ "notes": "Merci", "lifecycle": "SENT" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["invoice"]["notes"], "Merci");
    assert_eq!(outcome["invoice"]["lifecycle"], "SENT");

    app.wait_for_emails(1).await;
    app.settle().await;
    assert_eq!(app.emails_with_subject(SENT_SUBJECT).len(), 1);
}

#[tokio::test]
async fn empty_status_change_is_rejected() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;

    let response = app
        .change_status(invoice["id"].as_str().unwrap(), json!({}))
        .await;

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_status_is_rejected() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;

    let response = app
        .change_status(
            invoice["id"].as_str().unwrap(),
            json!({ "payment_status": "LOST" }),
        )
        .await;

    assert_eq!(response.status(), 422);
}

#[tokio::test]
async fn strict_policy_refuses_unlisted_moves_unless_forced() {
    let app = TestApp::spawn_with(|config| {
        config.rules.transition_policy = TransitionPolicy::Strict;
    })
    .await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;
    let id = invoice["id"].as_str().unwrap();

    let refused = app
        .change_status(id, json!({ "lifecycle": "CLOSED" }))
        .await;
    assert_eq!(refused.status(), 409);

    let forced = app
        .change_status(id, json!({ "lifecycle": "CLOSED", "force": true }))
        .await;
    assert_eq!(forced.status(), 200);
    let outcome: Value = forced.json().await.unwrap();
    assert_eq!(outcome["invoice"]["lifecycle"], "CLOSED");
}

#[tokio::test]
async fn single_status_on_an_edit_sets_both_axes() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;
    let id = invoice["id"].as_str().unwrap();

    let response = app
        .put(
            &format!("/api/invoices/{}", id),
            &admin_token(),
            json!({ "notes": "Réglée par virement", "status": "PAID" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();

    assert_eq!(outcome["invoice"]["lifecycle"], "SENT");
    assert_eq!(outcome["invoice"]["payment_status"], "PAID");
    assert!(outcome["invoice"]["sent_at"].is_string());
    assert_eq!(
        outcome["scheduled"],
        json!(["invoice_sent", "payment_confirmed"])
    );
}

#[tokio::test]
async fn single_status_on_a_status_change() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let invoice = app.create_invoice(json!({})).await;
    let id = invoice["id"].as_str().unwrap();

    let overdue: Value = app
        .change_status(id, json!({ "status": "OVERDUE" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(overdue["invoice"]["lifecycle"], "SENT");
    assert_eq!(overdue["invoice"]["payment_status"], "OVERDUE");

    // An explicit axis wins over the single status.
    let closed: Value = app
        .change_status(id, json!({ "status": "PAID", "lifecycle": "CLOSED" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(closed["invoice"]["lifecycle"], "CLOSED");
    assert_eq!(closed["invoice"]["payment_status"], "PAID");

    let unknown = app.change_status(id, json!({ "status": "ARCHIVED" })).await;
    assert_eq!(unknown.status(), 422);
}
