//! Local camera boundary and the throttled photo upload loop.
//!
//! The engine never sees raw frames. A [`FrameSource`] hands over encoded
//! JPEG stills, which are shipped as data URLs into the participant's own
//! player document at most once per capture interval.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, StoreError};
use crate::session::SessionContext;

pub const JPEG_DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[async_trait]
pub trait FrameSource: Send {
    /// Grab the latest still as JPEG bytes. `Ok(None)` while the camera has
    /// nothing to show yet.
    async fn grab(&mut self) -> Result<Option<Vec<u8>>, CaptureError>;
}

/// Wrap JPEG bytes as a data URL suitable for the `photo` field
pub fn encode_jpeg(bytes: &[u8]) -> String {
    format!("{}{}", JPEG_DATA_URL_PREFIX, STANDARD.encode(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    NoFrame,
    /// The camera failed; logged and skipped
    CaptureFailed,
}

pub struct PhotoUploader<S> {
    source: S,
    ctx: SessionContext,
    interval: Duration,
}

impl<S: FrameSource + 'static> PhotoUploader<S> {
    pub fn new(source: S, ctx: SessionContext, config: &CaptureConfig) -> Self {
        Self {
            source,
            ctx,
            interval: config.interval,
        }
    }

    /// Capture one frame and write it to the player document
    pub async fn upload_once(&mut self) -> Result<UploadOutcome, StoreError> {
        let bytes = match self.source.grab().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(UploadOutcome::NoFrame),
            Err(e) => {
                tracing::warn!("Frame capture failed: {}", e);
                return Ok(UploadOutcome::CaptureFailed);
            }
        };

        self.ctx
            .store
            .update_photo(&self.ctx.room, &self.ctx.participant, Some(encode_jpeg(&bytes)))
            .await?;
        tracing::trace!("Uploaded {} byte frame", bytes.len());
        Ok(UploadOutcome::Uploaded)
    }

    /// Upload continuously while `camera` reads true.
    ///
    /// Ends when the camera switch is dropped or the player/room is gone.
    pub fn spawn(mut self, mut camera: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let enabled = *camera.borrow_and_update();

                tokio::select! {
                    _ = ticker.tick(), if enabled => {
                        match self.upload_once().await {
                            Ok(_) => {}
                            Err(
                                e @ (StoreError::RoomNotFound(_)
                                | StoreError::PlayerNotFound(_)
                                | StoreError::Disconnected),
                            ) => {
                                tracing::info!("Stopping photo uploads: {}", e);
                                break;
                            }
                            // Network hiccups are expected; try again next tick
                            Err(e) => tracing::warn!("Photo upload failed: {}", e),
                        }
                    }
                    changed = camera.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        tracing::debug!("Camera toggled: {}", *camera.borrow());
                    }
                }
            }

            tracing::debug!("Photo uploader for {} stopped", self.ctx.participant);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::{join_room, open_room};
    use crate::store::{MemoryStore, RoomStore};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedSource {
        frames: VecDeque<Result<Option<Vec<u8>>, CaptureError>>,
        grabs: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<Option<Vec<u8>>, CaptureError>>) -> Self {
            Self {
                frames: frames.into(),
                grabs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn grab(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            self.frames.pop_front().unwrap_or(Ok(Some(vec![0xff, 0xd8, 0xff])))
        }
    }

    async fn player() -> (Arc<dyn RoomStore>, SessionContext) {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(EngineConfig::default());
        let host = open_room(store.clone(), "h".to_string(), config.clone()).await.unwrap();
        let ctx = join_room(store.clone(), &host.room, "p".to_string(), "Pat", config)
            .await
            .unwrap();
        (store, ctx)
    }

    async fn photo(store: &Arc<dyn RoomStore>, ctx: &SessionContext) -> Option<String> {
        let rx = store.watch_players(&ctx.room).await.unwrap();
        let players = rx.borrow().clone();
        players.into_iter().find(|p| p.id == ctx.participant)?.photo
    }

    #[test]
    fn test_encode_jpeg_data_url() {
        assert_eq!(encode_jpeg(&[0xff, 0xd8]), "data:image/jpeg;base64,/9g=");
    }

    #[tokio::test]
    async fn test_upload_once_outcomes() {
        let (store, ctx) = player().await;
        let source = ScriptedSource::new(vec![
            Ok(None),
            Err(CaptureError::Unavailable("permission denied".to_string())),
            Ok(Some(b"jpeg".to_vec())),
        ]);
        let mut uploader = PhotoUploader::new(source, ctx.clone(), &CaptureConfig::default());

        assert_eq!(uploader.upload_once().await, Ok(UploadOutcome::NoFrame));
        assert_eq!(uploader.upload_once().await, Ok(UploadOutcome::CaptureFailed));
        assert_eq!(photo(&store, &ctx).await, None);

        assert_eq!(uploader.upload_once().await, Ok(UploadOutcome::Uploaded));
        assert_eq!(photo(&store, &ctx).await, Some(encode_jpeg(b"jpeg")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uploads_are_throttled_and_pausable() {
        let (store, ctx) = player().await;
        let source = ScriptedSource::new(Vec::new());
        let grabs = source.grabs.clone();
        let (camera_tx, camera_rx) = watch::channel(true);

        let task = PhotoUploader::new(source, ctx.clone(), &CaptureConfig::default())
            .spawn(camera_rx);

        // ticks at 0, 400 and 800ms
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(grabs.load(Ordering::SeqCst), 3);
        assert!(photo(&store, &ctx).await.is_some());

        camera_tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(grabs.load(Ordering::SeqCst), 3);

        // leaving the room ends the loop on the next upload
        ctx.leave().await.unwrap();
        camera_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
