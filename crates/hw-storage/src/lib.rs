use anyhow::{Context, Result};
use async_trait::async_trait;
use hw_api_types::NetworkId;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// What survives a restart: the last confirmed session, nothing more.
/// Rehydration treats this as a hint to re-verify, never as a live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMarker {
    pub address: String,
    pub network: NetworkId,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_marker(&self) -> Result<Option<SessionMarker>>;
    async fn save_marker(&self, marker: &SessionMarker) -> Result<()>;
    async fn clear_marker(&self) -> Result<()>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    marker: RwLock<Option<SessionMarker>>,
}

impl InMemorySessionStore {
    pub fn with_marker(marker: SessionMarker) -> Self {
        Self {
            marker: RwLock::new(Some(marker)),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_marker(&self) -> Result<Option<SessionMarker>> {
        let guard = self.marker.read().await;
        Ok(guard.clone())
    }

    async fn save_marker(&self, marker: &SessionMarker) -> Result<()> {
        let mut guard = self.marker.write().await;
        *guard = Some(marker.clone());
        Ok(())
    }

    async fn clear_marker(&self) -> Result<()> {
        let mut guard = self.marker.write().await;
        *guard = None;
        Ok(())
    }
}

pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load_marker(&self) -> Result<Option<SessionMarker>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session marker at {}", self.path.display())
                });
            }
        };
        let marker = serde_json::from_slice(&raw).with_context(|| {
            format!("session marker at {} is not valid json", self.path.display())
        })?;
        Ok(Some(marker))
    }

    async fn save_marker(&self, marker: &SessionMarker) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("failed to create marker directory {}", parent.display())
                })?;
            }
        }
        let raw = serde_json::to_vec_pretty(marker).context("failed to encode session marker")?;
        tokio::fs::write(&self.path, raw).await.with_context(|| {
            format!("failed to write session marker at {}", self.path.display())
        })
    }

    async fn clear_marker(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove session marker at {}", self.path.display())
            }),
        }
    }
}
