//! Saved-session file so a participant can get back into a room after a
//! restart.
//!
//! Written on open/join, removed on leave, host exit and room closure.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::types::{ParticipantId, Role, RoomCode};

/// Schema version for the saved-session file
/// Version 1: code, role, participant id
/// Version 2: player display name, for re-registering after a restart
pub const SESSION_SCHEMA_VERSION: u32 = 2;

const DEFAULT_SESSION_FILE: &str = ".camspin_session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub schema_version: u32,
    /// Save timestamp (ISO8601)
    pub saved_at: String,
    pub code: RoomCode,
    pub role: Role,
    pub participant_id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SavedSession {
    pub fn new(code: RoomCode, role: Role, participant_id: ParticipantId) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            code,
            role,
            participant_id,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.schema_version > SESSION_SCHEMA_VERSION {
            return Err(format!(
                "Session file schema {} is newer than supported {}",
                self.schema_version, SESSION_SCHEMA_VERSION
            ));
        }
        if self.code.trim().is_empty() {
            return Err("Session file has an empty room code".to_string());
        }
        Ok(())
    }
}

/// Location of the saved-session file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path from `CAMSPIN_SESSION_FILE`, defaulting to the working directory
    pub fn from_env() -> Self {
        let path = std::env::var("CAMSPIN_SESSION_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_FILE.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn save(&self, session: &SavedSession) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.path, json).await?;
        tracing::debug!("Saved session for room {} to {:?}", session.code, self.path);
        Ok(())
    }

    /// Load the saved session. Missing, unreadable or invalid files yield `None`.
    pub async fn load(&self) -> Option<SavedSession> {
        let json = match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read session file {:?}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_str::<SavedSession>(&json) {
            Ok(session) => match session.validate() {
                Ok(()) => Some(session),
                Err(e) => {
                    tracing::warn!("Ignoring session file {:?}: {}", self.path, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to parse session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Remove the saved session. Removing a missing file is a no-op.
    pub async fn forget(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!("Forgot saved session {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_path_from_env() {
        std::env::remove_var("CAMSPIN_SESSION_FILE");
        assert_eq!(SessionFile::from_env().path(), Path::new(DEFAULT_SESSION_FILE));

        std::env::set_var("CAMSPIN_SESSION_FILE", " /tmp/spin.json ");
        assert_eq!(SessionFile::from_env().path(), Path::new("/tmp/spin.json"));
        std::env::remove_var("CAMSPIN_SESSION_FILE");
    }

    #[tokio::test]
    async fn test_save_load_forget() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        assert_eq!(file.load().await, None);

        let session =
            SavedSession::new("AB3D".to_string(), Role::Player, "p1".to_string()).with_name("Pat");
        file.save(&session).await.unwrap();
        assert_eq!(file.load().await, Some(session));

        file.forget().await.unwrap();
        assert_eq!(file.load().await, None);
        // forgetting twice is fine
        file.forget().await.unwrap();
    }

    #[tokio::test]
    async fn test_version_one_file_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let v1 = r#"{"schema_version":1,"saved_at":"2024-01-01T00:00:00Z","code":"QRST","role":"host","participant_id":"h"}"#;
        tokio::fs::write(&path, v1).await.unwrap();

        let saved = SessionFile::new(&path).load().await.unwrap();
        assert_eq!(saved.role, Role::Host);
        assert_eq!(saved.name, None);
    }

    #[tokio::test]
    async fn test_garbage_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        assert_eq!(SessionFile::new(&path).load().await, None);
    }

    #[tokio::test]
    async fn test_future_schema_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = SessionFile::new(dir.path().join("session.json"));
        let mut session = SavedSession::new("WXYZ".to_string(), Role::Host, "h".to_string());
        session.schema_version = SESSION_SCHEMA_VERSION + 1;
        file.save(&session).await.unwrap();

        assert!(session.validate().is_err());
        assert_eq!(file.load().await, None);
    }
}
