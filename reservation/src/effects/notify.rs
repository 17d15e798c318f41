use std::sync::{Arc, Mutex};

use abi::{ReservationId, ReservationRecord, UserId};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::EffectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub reservation_id: ReservationId,
}

impl Notification {
    pub fn reservation_confirmed(record: &ReservationRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            title: "Reservation confirmed".to_string(),
            body: format!(
                "{} on {} at {} is booked for {} minutes.",
                record.resource_id,
                record.date.format("%Y-%m-%d"),
                record.time.format("%H:%M"),
                record.duration_minutes
            ),
            reservation_id: record.id,
        }
    }
}

/// Delivers a notification to one user (in-app record plus push).
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn dispatch(&self, notification: &Notification) -> Result<(), EffectError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), EffectError> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct PushMessage<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: serde_json::Value,
    sound: &'static str,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: Vec<PushTicket>,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Client for an Expo-compatible push API.
#[derive(Debug, Clone)]
pub struct PushClient {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl PushClient {
    pub fn new(url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            access_token,
        }
    }

    /// Send one message per device token in a single batch.
    pub async fn send(&self, tokens: &[String], notification: &Notification) -> Result<(), EffectError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let data = serde_json::json!({ "reservationId": notification.reservation_id });
        let messages: Vec<_> = tokens
            .iter()
            .map(|to| PushMessage {
                to,
                title: &notification.title,
                body: &notification.body,
                data: data.clone(),
                sound: "default",
            })
            .collect();

        let mut request = self.client.post(&self.url).json(&messages);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        debug!(count = messages.len(), user_id = %notification.user_id, "sending push batch");
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EffectError::Push(format!("push API returned {status}: {body}")));
        }

        let response: PushResponse = response.json().await?;
        let failed: Vec<_> = response
            .data
            .iter()
            .filter(|ticket| ticket.status == "error")
            .map(|ticket| ticket.message.clone().unwrap_or_else(|| "unknown error".into()))
            .collect();
        if !failed.is_empty() {
            return Err(EffectError::Push(format!(
                "{} of {} tickets failed: {}",
                failed.len(),
                messages.len(),
                failed.join("; ")
            )));
        }
        Ok(())
    }
}

/// In-app record in `rsvp.notifications`, then push to the user's devices.
#[derive(Debug, Clone)]
pub struct PgNotifier {
    pool: PgPool,
    push: Option<PushClient>,
}

impl PgNotifier {
    pub fn new(pool: PgPool, push: Option<PushClient>) -> Self {
        Self { pool, push }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), EffectError> {
        sqlx::query(
            "INSERT INTO rsvp.notifications (id, user_id, title, body, reservation_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(&notification.user_id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.reservation_id)
        .execute(&self.pool)
        .await?;

        let Some(push) = &self.push else {
            return Ok(());
        };
        let tokens: Vec<String> =
            sqlx::query_scalar("SELECT token FROM rsvp.push_tokens WHERE user_id = $1")
                .bind(&notification.user_id)
                .fetch_all(&self.pool)
                .await?;
        push.send(&tokens, notification).await?;
        info!(user_id = %notification.user_id, devices = tokens.len(), "notification dispatched");
        Ok(())
    }
}
