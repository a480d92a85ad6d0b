//! Shared room store boundary.
//!
//! The store is the only channel between devices. Documents are written
//! atomically, and subscribers receive whole-document snapshots through
//! `watch` receivers: `None` means the room document does not exist (or was
//! deleted), a closed receiver means the store connection is gone.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StoreResult;
use crate::types::{PlayerDoc, PlayerRecord, RoomDoc, RoomUpdate};

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create the room document. Fails with `RoomExists` on a code collision.
    async fn create_room(&self, code: &str, doc: RoomDoc) -> StoreResult<()>;

    async fn get_room(&self, code: &str) -> StoreResult<Option<RoomDoc>>;

    /// Overwrite the phase/outcome fields of the room document in one write
    async fn update_room(&self, code: &str, update: RoomUpdate) -> StoreResult<()>;

    /// Delete the room document, signalling closure to every subscriber
    async fn delete_room(&self, code: &str) -> StoreResult<()>;

    /// Create or replace a player document
    async fn put_player(&self, code: &str, id: &str, doc: PlayerDoc) -> StoreResult<()>;

    /// Replace the photo field of an existing player document
    async fn update_photo(&self, code: &str, id: &str, photo: Option<String>) -> StoreResult<()>;

    async fn remove_player(&self, code: &str, id: &str) -> StoreResult<()>;

    async fn watch_room(&self, code: &str) -> StoreResult<watch::Receiver<Option<RoomDoc>>>;

    async fn watch_players(&self, code: &str) -> StoreResult<watch::Receiver<Vec<PlayerRecord>>>;
}
