//! The same HTTP flows against `PgStore`.
//!
//! Needs `TEST_DATABASE_URL`; each test returns early without it. Tests share
//! one database and empty it on spawn, so they run serially.

mod common;

use common::{admin_token, client_token, days_from_today, dec, TestApp};
use reqwest::Method;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use serial_test::serial;

async fn postgres_app() -> Option<TestApp> {
    let app = TestApp::spawn_on_postgres().await?;
    app.sign_in_all().await;
    Some(app)
}

#[tokio::test]
#[serial]
async fn numbering_continues_after_the_counter_is_lost() {
    let Some(app) = postgres_app().await else {
        return;
    };

    let first = app.create_invoice(json!({})).await;
    let second = app.create_invoice(json!({})).await;
    assert_eq!(first["invoice_number"], "INV-2025-00001");
    assert_eq!(second["invoice_number"], "INV-2025-00002");

    // A database migrated from count()+1 numbering has no counter row yet.
    let url = std::env::var("TEST_DATABASE_URL").unwrap();
    let pool = sqlx::PgPool::connect(&url).await.unwrap();
    sqlx::query("DELETE FROM invoice_sequences")
        .execute(&pool)
        .await
        .unwrap();

    let third = app.create_invoice(json!({})).await;
    assert_eq!(third["invoice_number"], "INV-2025-00003");
}

#[tokio::test]
#[serial]
async fn update_replaces_lines_and_totals_in_one_save() {
    let Some(app) = postgres_app().await else {
        return;
    };
    let invoice = app.create_invoice(json!({})).await;
    let path = format!("/api/invoices/{}", invoice["id"].as_str().unwrap());

    let response = app
        .put(
            &path,
            &admin_token(),
            json!({
                "vat_active": true,
                "lines": [
                    { "description": "Audit", "quantity": "3", "unit_price": "120.00" }
                ]
            }),
        )
        .await;
    assert_eq!(response.status(), 200);

    let stored: Value = app.get(&path, &admin_token()).await.json().await.unwrap();
    assert_eq!(stored["lines"].as_array().unwrap().len(), 1);
    assert_eq!(stored["lines"][0]["description"], "Audit");
    assert_eq!(dec(&stored["total_ht"]), dec!(360));
    assert_eq!(dec(&stored["total_tva"]), dec!(72));
    assert_eq!(dec(&stored["total_ttc"]), dec!(432));

    // A rejected edit leaves the stored lines alone.
    let rejected = app
        .put(
            &path,
            &admin_token(),
            json!({ "lines": [{ "description": "", "quantity": "1", "unit_price": "1" }] }),
        )
        .await;
    assert_eq!(rejected.status(), 422);
    let unchanged: Value = app.get(&path, &admin_token()).await.json().await.unwrap();
    assert_eq!(unchanged["lines"][0]["description"], "Audit");
}

#[tokio::test]
#[serial]
async fn overdue_scan_selects_and_stamps_in_the_database() {
    let Some(app) = postgres_app().await else {
        return;
    };
    let seven = app
        .create_invoice(json!({
            "lifecycle": "SENT",
            "due_date": days_from_today(-7).to_string(),
        }))
        .await;
    app.create_invoice(json!({
        "lifecycle": "SENT",
        "due_date": days_from_today(-8).to_string(),
    }))
    .await;
    app.create_invoice(json!({ "due_date": days_from_today(-7).to_string() }))
        .await;

    let first: Value = app
        .request(Method::GET, "/cron/overdue", None, None)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["candidates"], 2);
    assert_eq!(first["results"].as_array().unwrap().len(), 1);
    assert_eq!(first["results"][0]["invoice_id"], seven["id"]);

    let second: Value = app
        .request(Method::GET, "/cron/overdue", None, None)
        .await
        .json()
        .await
        .unwrap();
    assert!(second["results"].as_array().unwrap().is_empty());

    let stored: Value = app
        .get(
            &format!("/api/invoices/{}", seven["id"].as_str().unwrap()),
            &admin_token(),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stored["payment_status"], "OVERDUE");
}

#[tokio::test]
#[serial]
async fn referenced_category_cannot_be_deleted() {
    let Some(app) = postgres_app().await else {
        return;
    };
    let category: Value = app
        .post("/api/categories", &admin_token(), json!({ "name": "Conseil" }))
        .await
        .json()
        .await
        .unwrap();
    let invoice = app
        .create_invoice(json!({ "category_id": category["id"] }))
        .await;
    let path = format!("/api/categories/{}", category["id"].as_str().unwrap());

    assert_eq!(app.delete(&path, &admin_token()).await.status(), 409);

    app.delete(
        &format!("/api/invoices/{}", invoice["id"].as_str().unwrap()),
        &admin_token(),
    )
    .await;
    assert_eq!(app.delete(&path, &admin_token()).await.status(), 204);
}

#[tokio::test]
#[serial]
async fn filters_and_stats_are_scoped_to_the_caller() {
    let Some(app) = postgres_app().await else {
        return;
    };
    app.create_invoice(json!({ "name": "Hébergement" })).await;
    app.create_invoice(json!({ "name": "Formation", "lifecycle": "SENT" }))
        .await;
    app.create_invoice(json!({
        "name": "Maintenance",
        "lifecycle": "SENT",
        "payment_status": "PAID",
    }))
    .await;

    let found: Value = app
        .get("/api/invoices?search=forma&lifecycle=SENT", &client_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["name"], "Formation");

    let stats: Value = app
        .get("/api/stats", &client_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_invoices"], 3);
    assert_eq!(stats["paid_invoices"], 1);
    assert_eq!(stats["pending_invoices"], 1);
    assert_eq!(dec(&stats["total_revenue"]), dec!(200));
    assert_eq!(dec(&stats["outstanding_amount"]), dec!(200));
    assert_eq!(stats["invoices_this_month"], 3);
}
