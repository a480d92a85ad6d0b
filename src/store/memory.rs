use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, RwLock};

use super::RoomStore;
use crate::error::{StoreError, StoreResult};
use crate::types::{PlayerDoc, PlayerRecord, RoomDoc, RoomUpdate};

struct RoomEntry {
    room: watch::Sender<Option<RoomDoc>>,
    players: watch::Sender<Vec<PlayerRecord>>,
}

impl RoomEntry {
    fn new() -> Self {
        let (room, _) = watch::channel(None);
        let (players, _) = watch::channel(Vec::new());
        Self { room, players }
    }
}

/// In-process shared room store.
///
/// Backs the relay server and every test. Subscribing to a code that has no
/// document yet is allowed and yields `None` until the room is created.
pub struct MemoryStore {
    rooms: RwLock<HashMap<String, RoomEntry>>,
    join_seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            join_seq: AtomicU64::new(1),
        }
    }

    /// Drop every subscription to `code` as if the connection was lost
    pub async fn disconnect(&self, code: &str) {
        if self.rooms.write().await.remove(code).is_some() {
            tracing::info!("Store connection for room {} dropped", code);
        }
    }

    async fn with_existing_room<T>(
        &self,
        code: &str,
        f: impl FnOnce(&RoomEntry) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let rooms = self.rooms.read().await;
        let entry = rooms
            .get(code)
            .filter(|e| e.room.borrow().is_some())
            .ok_or_else(|| StoreError::RoomNotFound(code.to_string()))?;
        f(entry)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create_room(&self, code: &str, doc: RoomDoc) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(code.to_string()).or_insert_with(RoomEntry::new);
        if entry.room.borrow().is_some() {
            return Err(StoreError::RoomExists(code.to_string()));
        }
        entry.room.send_replace(Some(doc));
        tracing::info!("Room {} created", code);
        Ok(())
    }

    async fn get_room(&self, code: &str) -> StoreResult<Option<RoomDoc>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(code).and_then(|e| e.room.borrow().clone()))
    }

    async fn update_room(&self, code: &str, update: RoomUpdate) -> StoreResult<()> {
        self.with_existing_room(code, |entry| {
            entry.room.send_modify(|doc| {
                if let Some(doc) = doc {
                    doc.phase = update.phase;
                    doc.winner_id = update.winner_id;
                }
            });
            Ok(())
        })
        .await
    }

    async fn delete_room(&self, code: &str) -> StoreResult<()> {
        self.with_existing_room(code, |entry| {
            entry.room.send_replace(None);
            entry.players.send_replace(Vec::new());
            Ok(())
        })
        .await?;
        tracing::info!("Room {} deleted", code);
        Ok(())
    }

    async fn put_player(&self, code: &str, id: &str, doc: PlayerDoc) -> StoreResult<()> {
        self.with_existing_room(code, |entry| {
            entry.players.send_modify(|players| {
                let now = Utc::now();
                match players.iter_mut().find(|p| p.id == id) {
                    Some(existing) => {
                        existing.name = doc.name;
                        existing.photo = doc.photo;
                        existing.updated_at = now;
                    }
                    None => players.push(PlayerRecord {
                        id: id.to_string(),
                        name: doc.name,
                        photo: doc.photo,
                        joined_at: self.join_seq.fetch_add(1, Ordering::SeqCst),
                        updated_at: now,
                    }),
                }
            });
            Ok(())
        })
        .await
    }

    async fn update_photo(&self, code: &str, id: &str, photo: Option<String>) -> StoreResult<()> {
        self.with_existing_room(code, |entry| {
            let mut found = false;
            entry.players.send_if_modified(|players| {
                if let Some(p) = players.iter_mut().find(|p| p.id == id) {
                    p.photo = photo;
                    p.updated_at = Utc::now();
                    found = true;
                }
                found
            });
            if found {
                Ok(())
            } else {
                Err(StoreError::PlayerNotFound(id.to_string()))
            }
        })
        .await
    }

    async fn remove_player(&self, code: &str, id: &str) -> StoreResult<()> {
        self.with_existing_room(code, |entry| {
            let removed = entry.players.send_if_modified(|players| {
                let before = players.len();
                players.retain(|p| p.id != id);
                players.len() != before
            });
            if removed {
                Ok(())
            } else {
                Err(StoreError::PlayerNotFound(id.to_string()))
            }
        })
        .await
    }

    async fn watch_room(&self, code: &str) -> StoreResult<watch::Receiver<Option<RoomDoc>>> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(code.to_string()).or_insert_with(RoomEntry::new);
        Ok(entry.room.subscribe())
    }

    async fn watch_players(&self, code: &str) -> StoreResult<watch::Receiver<Vec<PlayerRecord>>> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(code.to_string()).or_insert_with(RoomEntry::new);
        Ok(entry.players.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomPhase;

    fn player(name: &str) -> PlayerDoc {
        PlayerDoc {
            name: name.to_string(),
            photo: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_update_room() {
        let store = MemoryStore::new();
        store.create_room("ABCD", RoomDoc::new("host".to_string())).await.unwrap();
        assert_eq!(
            store.create_room("ABCD", RoomDoc::new("other".to_string())).await,
            Err(StoreError::RoomExists("ABCD".to_string()))
        );

        store.update_room("ABCD", RoomUpdate::spinning()).await.unwrap();
        let doc = store.get_room("ABCD").await.unwrap().unwrap();
        assert_eq!(doc.phase, RoomPhase::Spinning);
        assert_eq!(doc.host_id, "host");
    }

    #[tokio::test]
    async fn test_writes_to_missing_room_fail() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update_room("NONE", RoomUpdate::spinning()).await,
            Err(StoreError::RoomNotFound(_))
        ));
        assert!(store.put_player("NONE", "p", player("P")).await.is_err());
        assert_eq!(store.get_room("NONE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watch_sees_latest_and_deletion() {
        let store = MemoryStore::new();
        let mut rx = store.watch_room("ROOM").await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        store.create_room("ROOM", RoomDoc::new("h".to_string())).await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_some());

        store.delete_room("ROOM").await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_players_keep_arrival_order_and_photos() {
        let store = MemoryStore::new();
        store.create_room("ROOM", RoomDoc::new("h".to_string())).await.unwrap();
        store.put_player("ROOM", "a", player("A")).await.unwrap();
        store.put_player("ROOM", "b", player("B")).await.unwrap();
        store
            .update_photo("ROOM", "a", Some("data:image/jpeg;base64,AA==".to_string()))
            .await
            .unwrap();

        let rx = store.watch_players("ROOM").await.unwrap();
        let players = rx.borrow().clone();
        assert_eq!(players.len(), 2);
        assert!(players[0].joined_at < players[1].joined_at);
        assert!(players[0].photo.is_some());

        store.remove_player("ROOM", "a").await.unwrap();
        assert!(matches!(
            store.update_photo("ROOM", "a", None).await,
            Err(StoreError::PlayerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_closes_subscriptions() {
        let store = MemoryStore::new();
        store.create_room("ROOM", RoomDoc::new("h".to_string())).await.unwrap();
        let mut rx = store.watch_room("ROOM").await.unwrap();

        store.disconnect("ROOM").await;
        assert!(rx.changed().await.is_err());
    }
}
