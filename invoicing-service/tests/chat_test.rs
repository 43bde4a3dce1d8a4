//! Client/admin messaging, realtime fan-out and unread counters.

mod common;

use common::{
    admin_token, client_token, other_client_token, TestApp, ADMIN_ID, CLIENT_EMAIL, CLIENT_ID,
};
use invoicing_service::services::chat::{
    conversation_channel, user_channel, MESSAGE_NOTIFICATION_EVENT, NEW_MESSAGE_EVENT,
};
use serde_json::{json, Value};
use uuid::Uuid;

async fn open_as_client(app: &TestApp, body: Value) -> Value {
    let response = app
        .post("/api/conversations", &client_token(), body)
        .await;
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

#[tokio::test]
async fn opening_twice_returns_the_same_thread() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;

    let first = open_as_client(&app, json!({})).await;
    let second = open_as_client(&app, json!({ "subject": "Autre sujet" })).await;

    assert_eq!(first["id"], second["id"]);
    assert_eq!(first["client_id"], CLIENT_ID);
    assert_eq!(first["subject"], "Nouvelle conversation");
}

#[tokio::test]
async fn threads_about_an_invoice_must_use_the_clients_invoice() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    app.sign_in(&other_client_token()).await;
    let invoice = app.create_invoice(json!({})).await;

    let own = app
        .post(
            "/api/conversations",
            &client_token(),
            json!({ "invoice_id": invoice["id"] }),
        )
        .await;
    assert_eq!(own.status(), 200);

    let foreign = app
        .post(
            "/api/conversations",
            &other_client_token(),
            json!({ "invoice_id": invoice["id"] }),
        )
        .await;
    assert_eq!(foreign.status(), 404);
}

#[tokio::test]
async fn admin_must_name_the_client() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;

    let missing = app
        .post("/api/conversations", &admin_token(), json!({}))
        .await;
    assert_eq!(missing.status(), 400);

    let named = app
        .post(
            "/api/conversations",
            &admin_token(),
            json!({ "client_id": CLIENT_ID, "subject": "Relance" }),
        )
        .await;
    assert_eq!(named.status(), 200);
    let conversation: Value = named.json().await.unwrap();
    assert_eq!(conversation["client_id"], CLIENT_ID);
}

#[tokio::test]
async fn admin_reply_reaches_the_client() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let conversation = open_as_client(&app, json!({})).await;
    let id = conversation["id"].as_str().unwrap();
    let messages_path = format!("/api/conversations/{}/messages", id);

    let response = app
        .post(
            &messages_path,
            &admin_token(),
            json!({ "content": "Votre facture est disponible." }),
        )
        .await;
    assert_eq!(response.status(), 201);
    let message: Value = response.json().await.unwrap();
    assert_eq!(message["sender_id"], ADMIN_ID);
    assert_eq!(message["receiver_id"], CLIENT_ID);
    assert_eq!(message["is_read"], false);

    let conversation_id = Uuid::parse_str(id).unwrap();
    let thread_events = app
        .realtime
        .on_channel(&conversation_channel(conversation_id));
    assert_eq!(thread_events.len(), 1);
    assert_eq!(thread_events[0].event, NEW_MESSAGE_EVENT);

    let user_events = app.realtime.on_channel(&user_channel(CLIENT_ID));
    assert_eq!(user_events.len(), 1);
    assert_eq!(user_events[0].event, MESSAGE_NOTIFICATION_EVENT);
    assert_eq!(user_events[0].data["senderName"], "Alice Admin");
    assert_eq!(user_events[0].data["preview"], "Votre facture est disponible.");

    let emails = app.wait_for_emails(1).await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].to, CLIENT_EMAIL);
    assert_eq!(emails[0].subject, "💬 Nouveau message de Alice Admin");

    let unread: Value = app
        .get("/api/messages/unread", &client_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(unread["unread"], 1);

    let read: Value = app
        .post(
            &format!("/api/conversations/{}/read", id),
            &client_token(),
            json!({}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(read["updated"], 1);

    let unread: Value = app
        .get("/api/messages/unread", &client_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(unread["unread"], 0);
}

#[tokio::test]
async fn thread_lists_messages_in_order() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let conversation = open_as_client(&app, json!({})).await;
    let id = conversation["id"].as_str().unwrap();
    let messages_path = format!("/api/conversations/{}/messages", id);

    app.post(
        &messages_path,
        &client_token(),
        json!({ "content": "Bonjour", "receiver_id": ADMIN_ID }),
    )
    .await;
    app.clock.advance(chrono::Duration::minutes(5));
    app.post(&messages_path, &admin_token(), json!({ "content": "Bonjour !" }))
        .await;

    let detail: Value = app
        .get(&format!("/api/conversations/{}", id), &client_token())
        .await
        .json()
        .await
        .unwrap();
    let messages = detail["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "Bonjour");
    assert_eq!(messages[1]["content"], "Bonjour !");

    let listed: Value = app
        .get("/api/conversations", &admin_token())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["last_message"]["content"], "Bonjour !");
}

#[tokio::test]
async fn outsiders_cannot_read_or_post() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    app.sign_in(&other_client_token()).await;
    let conversation = open_as_client(&app, json!({})).await;
    let id = conversation["id"].as_str().unwrap();

    let read = app
        .get(&format!("/api/conversations/{}", id), &other_client_token())
        .await;
    assert_eq!(read.status(), 403);

    let post = app
        .post(
            &format!("/api/conversations/{}/messages", id),
            &other_client_token(),
            json!({ "content": "Intrusion" }),
        )
        .await;
    assert_eq!(post.status(), 403);

    let listed: Value = app
        .get("/api/conversations", &other_client_token())
        .await
        .json()
        .await
        .unwrap();
    assert!(listed.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let app = TestApp::spawn().await;
    app.sign_in_all().await;
    let conversation = open_as_client(&app, json!({})).await;

    let response = app
        .post(
            &format!(
                "/api/conversations/{}/messages",
                conversation["id"].as_str().unwrap()
            ),
            &client_token(),
            json!({ "content": "" }),
        )
        .await;

    assert_eq!(response.status(), 422);
}
