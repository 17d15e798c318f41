pub mod chat;
pub mod notify;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use abi::{ReservationRecord, SideEffectReport, Visibility};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use chat::{ChatRoom, ChatService, InMemoryChat, MemberRole, PgChat};
pub use notify::{InMemoryNotifier, Notification, Notifier, PgNotifier, PushClient};

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("chat: {0}")]
    Chat(String),

    #[error("notification: {0}")]
    Notification(String),

    #[error("push delivery: {0}")]
    Push(String),

    #[error("{0} did not finish within {1:?}")]
    TimedOut(&'static str, Duration),

    #[error("{0} task panicked")]
    Panicked(&'static str),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Fires the follow-up actions of a committed reservation.
///
/// Each effect runs in its own task under `timeout`. Failures end up as
/// reasons in the returned [`SideEffectReport`] and are never propagated.
#[derive(Clone)]
pub struct SideEffectOrchestrator {
    chat: Arc<dyn ChatService>,
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl SideEffectOrchestrator {
    pub fn new(chat: impl ChatService, notifier: impl Notifier, timeout: Duration) -> Self {
        Self::from_shared(Arc::new(chat), Arc::new(notifier), timeout)
    }

    pub fn from_shared(
        chat: Arc<dyn ChatService>,
        notifier: Arc<dyn Notifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            chat,
            notifier,
            timeout,
        }
    }

    pub async fn run(&self, record: &ReservationRecord) -> SideEffectReport {
        let chat_task = (record.visibility == Visibility::Shared).then(|| {
            let chat = self.chat.clone();
            let slot = record.slot_key();
            let user_id = record.user_id.clone();
            spawn_effect("chat", self.timeout, async move {
                chat.join_slot_room(&slot, &user_id).await
            })
        });

        let notifier = self.notifier.clone();
        let notification = Notification::reservation_confirmed(record);
        let notify_task = spawn_effect("notification", self.timeout, async move {
            notifier.dispatch(&notification).await
        });

        let chat = async {
            match chat_task {
                Some(task) => Some(settle("chat", task).await),
                None => None,
            }
        };
        let (chat, notified) = tokio::join!(chat, settle("notification", notify_task));

        let mut report = SideEffectReport::default();
        match chat {
            Some(Ok(room)) => {
                info!(id = %record.id, room_id = %room.id, role = %room.role, "chat room joined");
                report.chat_created = true;
                report.chat_room_id = Some(room.id);
            }
            Some(Err(e)) => {
                warn!(id = %record.id, error = %e, "chat side effect failed");
                report.chat_error = Some(e.to_string());
            }
            None => {}
        }
        match notified {
            Ok(()) => report.notification_dispatched = true,
            Err(e) => {
                warn!(id = %record.id, error = %e, "notification side effect failed");
                report.notification_error = Some(e.to_string());
            }
        }
        report
    }
}

fn spawn_effect<T, F>(
    name: &'static str,
    timeout: Duration,
    effect: F,
) -> JoinHandle<Result<T, EffectError>>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EffectError>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::timeout(timeout, effect)
            .await
            .unwrap_or(Err(EffectError::TimedOut(name, timeout)))
    })
}

async fn settle<T>(
    name: &'static str,
    task: JoinHandle<Result<T, EffectError>>,
) -> Result<T, EffectError> {
    task.await.unwrap_or(Err(EffectError::Panicked(name)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use abi::{ReservationRequestBuilder, ReservationStatus, SlotKey};
    use async_trait::async_trait;

    fn record(visibility: Visibility) -> ReservationRecord {
        let rsvp = ReservationRequestBuilder::default()
            .user_id("alice")
            .resource_id("court-a")
            .date("2025-06-01")
            .time("18:00")
            .duration_minutes(60)
            .party_size(4)
            .visibility(visibility)
            .build()
            .unwrap();
        let slot = rsvp.validate().unwrap();
        ReservationRecord::confirmed(&rsvp, &slot)
    }

    struct FailingChat;

    #[async_trait]
    impl ChatService for FailingChat {
        async fn join_slot_room(&self, _slot: &SlotKey, _user_id: &str) -> Result<ChatRoom, EffectError> {
            Err(EffectError::Chat("service unavailable".into()))
        }
    }

    struct PanickingNotifier;

    #[async_trait]
    impl Notifier for PanickingNotifier {
        async fn dispatch(&self, _notification: &Notification) -> Result<(), EffectError> {
            panic!("boom")
        }
    }

    #[derive(Default)]
    struct StuckChat {
        called: AtomicBool,
    }

    #[async_trait]
    impl ChatService for StuckChat {
        async fn join_slot_room(&self, _slot: &SlotKey, _user_id: &str) -> Result<ChatRoom, EffectError> {
            self.called.store(true, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn shared_reservation_should_get_room_and_notification() {
        let chat = InMemoryChat::new();
        let notifier = InMemoryNotifier::new();
        let effects = SideEffectOrchestrator::new(chat.clone(), notifier.clone(), Duration::from_secs(1));
        let record = record(Visibility::Shared);

        let report = effects.run(&record).await;
        assert!(report.chat_created);
        assert!(report.chat_room_id.is_some());
        assert!(report.notification_dispatched);
        assert_eq!(chat.members(&record.slot_key()), vec![("alice".to_string(), MemberRole::Admin)]);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn private_reservation_should_skip_chat() {
        let chat = InMemoryChat::new();
        let notifier = InMemoryNotifier::new();
        let effects = SideEffectOrchestrator::new(chat.clone(), notifier.clone(), Duration::from_secs(1));
        let record = record(Visibility::Private);

        let report = effects.run(&record).await;
        assert!(!report.chat_created);
        assert_eq!(report.chat_error, None);
        assert!(report.notification_dispatched);
        assert!(chat.members(&record.slot_key()).is_empty());
    }

    #[tokio::test]
    async fn chat_failure_should_not_block_notification() {
        let notifier = InMemoryNotifier::new();
        let effects = SideEffectOrchestrator::new(FailingChat, notifier.clone(), Duration::from_secs(1));
        let record = record(Visibility::Shared);

        let report = effects.run(&record).await;
        assert!(!report.chat_created);
        assert_eq!(report.chat_error.as_deref(), Some("chat: service unavailable"));
        assert!(report.notification_dispatched);
        assert_eq!(notifier.sent()[0].reservation_id, record.id);
        assert_eq!(record.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn panicking_notifier_should_be_captured() {
        let effects =
            SideEffectOrchestrator::new(InMemoryChat::new(), PanickingNotifier, Duration::from_secs(1));

        let report = effects.run(&record(Visibility::Shared)).await;
        assert!(report.chat_created);
        assert!(!report.notification_dispatched);
        assert_eq!(report.notification_error.as_deref(), Some("notification task panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_chat_should_time_out() {
        let chat = Arc::new(StuckChat::default());
        let effects = SideEffectOrchestrator::from_shared(
            chat.clone(),
            Arc::new(InMemoryNotifier::new()),
            Duration::from_millis(500),
        );

        let report = effects.run(&record(Visibility::Shared)).await;
        assert!(chat.called.load(Ordering::SeqCst));
        assert!(!report.chat_created);
        assert_eq!(
            report.chat_error.as_deref(),
            Some("chat did not finish within 500ms")
        );
        assert!(report.notification_dispatched);
    }
}
