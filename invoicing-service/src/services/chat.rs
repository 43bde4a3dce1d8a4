//! Client/admin messaging with realtime fan-out.
//!
//! Each new message is published on `conversation-<id>` (event `new-message`)
//! and, when it has a receiver, on `user-<receiver>` (event
//! `new-message-notification`). Publishing and the follow-up email are best
//! effort: failures are logged and never fail the send.

use super::clock::Clock;
use super::metrics::REALTIME_FAILURES_TOTAL;
use super::notifications::{Notification, NotificationDispatcher};
use super::providers::RealtimePublisher;
use super::store::InvoiceStore;
use crate::dtos::{ConversationRequest, MessageRequest};
use crate::models::{
    Conversation, ConversationDetail, ConversationSummary, Message, User, DEFAULT_SUBJECT,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

pub const NEW_MESSAGE_EVENT: &str = "new-message";
pub const MESSAGE_NOTIFICATION_EVENT: &str = "new-message-notification";
const PREVIEW_CHARS: usize = 50;

pub fn conversation_channel(id: Uuid) -> String {
    format!("conversation-{}", id)
}

pub fn user_channel(user_id: &str) -> String {
    format!("user-{}", user_id)
}

/// First 50 characters, never splitting a code point.
pub fn preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn InvoiceStore>,
    publisher: Arc<dyn RealtimePublisher>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        publisher: Arc<dyn RealtimePublisher>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            dispatcher,
            clock,
        }
    }

    async fn load_for(&self, id: Uuid, caller: &User) -> Result<Conversation, AppError> {
        let conversation = self
            .store
            .get_conversation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Conversation {} not found", id)))?;
        if !conversation.is_participant(&caller.id, caller.role.is_admin()) {
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Not a participant of this conversation"
            )));
        }
        Ok(conversation)
    }

    /// Existing thread for (client, invoice), or a new one.
    #[instrument(skip(self, caller, request), fields(caller = %caller.id))]
    pub async fn open(
        &self,
        caller: &User,
        request: ConversationRequest,
    ) -> Result<Conversation, AppError> {
        let client_id = if caller.role.is_admin() {
            let id = request
                .client_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("client_id is required")))?;
            self.store
                .find_user(id)
                .await?
                .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Client {} not found", id)))?
                .id
        } else {
            caller.id.clone()
        };

        if let Some(invoice_id) = request.invoice_id {
            let invoice = self.store.get_invoice(invoice_id).await?;
            if invoice.map_or(true, |i| i.user_id != client_id) {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Invoice {} not found",
                    invoice_id
                )));
            }
        }

        if let Some(existing) = self
            .store
            .find_conversation(&client_id, request.invoice_id)
            .await?
        {
            return Ok(existing);
        }

        let now = self.clock.now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            client_id,
            invoice_id: request.invoice_id,
            subject: request
                .subject
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            last_message_at: now,
            created_at: now,
        };
        let conversation = self.store.insert_conversation(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id, "Conversation opened");
        Ok(conversation)
    }

    /// All threads for admins, own threads for clients. Most recent first.
    pub async fn list(&self, caller: &User) -> Result<Vec<ConversationSummary>, AppError> {
        let scope = (!caller.role.is_admin()).then_some(caller.id.as_str());
        self.store.list_conversations(scope).await
    }

    pub async fn get(&self, id: Uuid, caller: &User) -> Result<ConversationDetail, AppError> {
        let conversation = self.load_for(id, caller).await?;
        let messages = self.store.list_messages(id).await?;
        Ok(ConversationDetail {
            conversation,
            messages,
        })
    }

    #[instrument(skip(self, sender, request), fields(conversation_id = %id, sender = %sender.id))]
    pub async fn send(
        &self,
        id: Uuid,
        sender: &User,
        request: MessageRequest,
    ) -> Result<Message, AppError> {
        request.validate()?;
        let conversation = self.load_for(id, sender).await?;

        let content = request.content.trim().to_string();
        if content.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Message content is empty"
            )));
        }

        // Admin replies go to the client unless addressed explicitly.
        let receiver_id = request
            .receiver_id
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .or_else(|| {
                (sender.role.is_admin() && sender.id != conversation.client_id)
                    .then(|| conversation.client_id.clone())
            });

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: id,
            sender_id: sender.id.clone(),
            receiver_id,
            content,
            is_read: false,
            created_at: self.clock.now(),
        };
        let message = self.store.insert_message(&message).await?;

        let payload = serde_json::to_value(&message).unwrap_or(Value::Null);
        self.publish(&conversation_channel(id), NEW_MESSAGE_EVENT, payload)
            .await;

        if let Some(receiver_id) = &message.receiver_id {
            let snippet = preview(&message.content);
            self.publish(
                &user_channel(receiver_id),
                MESSAGE_NOTIFICATION_EVENT,
                json!({
                    "conversationId": id,
                    "senderId": sender.id,
                    "senderName": sender.name,
                    "preview": snippet,
                }),
            )
            .await;

            match self.store.find_user(receiver_id).await {
                Ok(Some(receiver)) => {
                    self.dispatcher.enqueue(Notification::NewMessage {
                        to: receiver.email,
                        recipient_name: receiver.name,
                        sender_name: sender.name.clone(),
                        preview: snippet,
                        conversation_id: id,
                    });
                }
                Ok(None) => {
                    tracing::warn!(receiver_id = %receiver_id, "Message receiver is unknown");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to look up message receiver");
                }
            }
        }

        tracing::info!(message_id = %message.id, "Message sent");
        Ok(message)
    }

    async fn publish(&self, channel: &str, event: &str, payload: Value) {
        if let Err(e) = self.publisher.publish(channel, event, payload).await {
            REALTIME_FAILURES_TOTAL.inc();
            tracing::warn!(channel, event, error = %e, "Realtime publish failed");
        }
    }

    /// Mark the caller's incoming messages in this thread as read.
    pub async fn mark_read(&self, id: Uuid, caller: &User) -> Result<u64, AppError> {
        self.load_for(id, caller).await?;
        self.store.mark_read(id, &caller.id).await
    }

    pub async fn unread_count(&self, caller: &User) -> Result<i64, AppError> {
        self.store.unread_count(&caller.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_fifty_characters() {
        let long = "é".repeat(80);
        assert_eq!(preview(&long).chars().count(), 50);
        assert_eq!(preview("court"), "court");
    }

    #[test]
    fn channel_names() {
        let id = Uuid::nil();
        assert_eq!(
            conversation_channel(id),
            "conversation-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(user_channel("user_42"), "user-user_42");
    }
}
