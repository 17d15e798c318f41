use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use abi::{SlotKey, UserId};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::EffectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Admin,
    Member,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Admin => f.write_str("admin"),
            MemberRole::Member => f.write_str("member"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRoom {
    pub id: String,
    /// false when an existing room for the slot was reused
    pub created: bool,
    pub role: MemberRole,
}

/// Group messaging for shared reservations.
#[async_trait]
pub trait ChatService: Send + Sync + 'static {
    /// Create the slot's room, or reuse the one that exists, and add `user_id` to it.
    /// Whoever creates the room joins as admin.
    async fn join_slot_room(&self, slot: &SlotKey, user_id: &str) -> Result<ChatRoom, EffectError>;
}

#[derive(Debug, Clone)]
struct Room {
    id: String,
    members: Vec<(UserId, MemberRole)>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryChat {
    rooms: Arc<Mutex<HashMap<SlotKey, Room>>>,
}

impl InMemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, slot: &SlotKey) -> Vec<(UserId, MemberRole)> {
        self.rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(slot)
            .map(|room| room.members.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatService for InMemoryChat {
    async fn join_slot_room(&self, slot: &SlotKey, user_id: &str) -> Result<ChatRoom, EffectError> {
        let mut rooms = self
            .rooms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let created = !rooms.contains_key(slot);
        let room = rooms.entry(slot.clone()).or_insert_with(|| Room {
            id: Uuid::new_v4().to_string(),
            members: Vec::new(),
        });

        let existing = room
            .members
            .iter()
            .find(|(member, _)| member == user_id)
            .map(|(_, role)| *role);
        let role = match existing {
            Some(role) => role,
            None => {
                let role = if created {
                    MemberRole::Admin
                } else {
                    MemberRole::Member
                };
                room.members.push((user_id.to_string(), role));
                role
            }
        };

        Ok(ChatRoom {
            id: room.id.clone(),
            created,
            role,
        })
    }
}

/// Rooms in `rsvp.chat_rooms`, one per slot, members in `rsvp.chat_members`.
#[derive(Debug, Clone)]
pub struct PgChat {
    pool: PgPool,
}

impl PgChat {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatService for PgChat {
    async fn join_slot_room(&self, slot: &SlotKey, user_id: &str) -> Result<ChatRoom, EffectError> {
        let mut tx = self.pool.begin().await?;

        let created: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO rsvp.chat_rooms (id, resource_id, slot_date, slot_time, name) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (resource_id, slot_date, slot_time) DO NOTHING RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(&slot.resource_id)
        .bind(slot.date)
        .bind(slot.time)
        .bind(format!(
            "{} {} {}",
            slot.resource_id,
            slot.date.format("%Y-%m-%d"),
            slot.time.format("%H:%M")
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let room_id: Uuid = match created {
            Some(id) => id,
            None => {
                sqlx::query_scalar(
                    "SELECT id FROM rsvp.chat_rooms \
                     WHERE resource_id = $1 AND slot_date = $2 AND slot_time = $3",
                )
                .bind(&slot.resource_id)
                .bind(slot.date)
                .bind(slot.time)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let role = if created.is_some() {
            MemberRole::Admin
        } else {
            MemberRole::Member
        };
        sqlx::query(
            "INSERT INTO rsvp.chat_members (room_id, user_id, role) VALUES ($1, $2, $3) \
             ON CONFLICT (room_id, user_id) DO NOTHING",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(role.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ChatRoom {
            id: room_id.to_string(),
            created: created.is_some(),
            role,
        })
    }
}
