mod effects;
mod lock;
mod manager;
mod oracle;
mod rate_limit;
mod store;

use std::sync::Arc;
use std::time::Duration;

use abi::{Error, ReservationId, ReservationRecord, ReservationRequest};
use async_trait::async_trait;

pub use effects::{
    ChatRoom, ChatService, EffectError, InMemoryChat, InMemoryNotifier, MemberRole, Notification,
    Notifier, PgChat, PgNotifier, PushClient, SideEffectOrchestrator,
};
pub use lock::SlotGuard;
pub(crate) use lock::SlotLocks;
pub use rate_limit::{
    InMemoryRateLimitStore, RateLimitDecision, RateLimitStore, RateLimiter, WindowSnapshot,
    DEFAULT_CLEANUP_INTERVAL, UNKNOWN_KEY,
};
pub use store::{InMemoryStore, PgStore, ReservationStore, ResourceCatalog, SlotTransaction, StaticCatalog};

/// Admission controller: the only writer of reservation records.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn ReservationStore>,
    catalog: Arc<dyn ResourceCatalog>,
    locks: SlotLocks,
    lock_timeout: Duration,
}

#[async_trait]
pub trait Rsvp {
    /// make a reservation; the slot never ends up with more confirmed records than its capacity
    async fn reserve(&self, rsvp: ReservationRequest) -> Result<ReservationRecord, Error>;
    /// cancel a confirmed reservation (record is kept with status cancelled)
    async fn cancel(&self, id: ReservationId) -> Result<ReservationRecord, Error>;
    /// get reservation by id
    async fn get(&self, id: ReservationId) -> Result<ReservationRecord, Error>;
}
