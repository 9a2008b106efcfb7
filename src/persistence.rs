//! Boundary to the versioned screen document held by the backend.
//!
//! Writes carry the version the client last observed. The backend is the
//! only arbiter: a stale version is answered with [`PersistenceError::Conflict`].

use crate::ir::{RawNode, Version};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

/// A persisted screen: the nested node list plus its revision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub version: Version,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("version conflict: wrote against {expected}, server holds {current}")]
    Conflict { expected: Version, current: Version },
    #[error("screen not found")]
    NotFound,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
    #[error("malformed screen document: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, PersistenceError::Conflict { .. })
    }
}

pub trait PersistenceClient: Send + Sync + 'static {
    fn fetch_screen(&self) -> impl Future<Output = Result<RemoteDocument, PersistenceError>> + Send;

    fn replace_screen_nodes(
        &self,
        nodes: Vec<RawNode>,
        expected: Version,
    ) -> impl Future<Output = Result<RemoteDocument, PersistenceError>> + Send;
}

/// In-process backend with the same precondition rules as the real service.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    document: Mutex<Option<RemoteDocument>>,
}

impl MemoryPersistence {
    pub fn new(nodes: Vec<RawNode>, version: Version) -> Self {
        Self {
            document: Mutex::new(Some(RemoteDocument { version, nodes })),
        }
    }

    pub fn snapshot(&self) -> Option<RemoteDocument> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes as another editor would, bumping the version unconditionally.
    pub fn write_elsewhere(&self, nodes: Vec<RawNode>) -> Option<Version> {
        let mut guard = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let document = guard.as_mut()?;
        document.nodes = nodes;
        document.version = document.version.next();
        Some(document.version)
    }

    pub fn delete(&self) {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl PersistenceClient for MemoryPersistence {
    async fn fetch_screen(&self) -> Result<RemoteDocument, PersistenceError> {
        self.snapshot().ok_or(PersistenceError::NotFound)
    }

    async fn replace_screen_nodes(
        &self,
        nodes: Vec<RawNode>,
        expected: Version,
    ) -> Result<RemoteDocument, PersistenceError> {
        let mut guard = self.document.lock().unwrap_or_else(PoisonError::into_inner);
        let document = guard.as_mut().ok_or(PersistenceError::NotFound)?;
        accept_write(document, nodes, expected)?;
        Ok(document.clone())
    }
}

fn accept_write(
    document: &mut RemoteDocument,
    nodes: Vec<RawNode>,
    expected: Version,
) -> Result<(), PersistenceError> {
    if document.version != expected {
        return Err(PersistenceError::Conflict {
            expected,
            current: document.version,
        });
    }
    document.nodes = nodes;
    document.version = document.version.next();
    Ok(())
}

/// Screen document stored as a JSON file (`{ "version": n, "nodes": [...] }`).
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty screen at version 0 unless the file already exists.
    pub async fn create_if_missing(&self) -> Result<bool, PersistenceError> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        self.write(&RemoteDocument::default()).await?;
        Ok(true)
    }

    async fn read(&self) -> Result<RemoteDocument, PersistenceError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound);
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write(&self, document: &RemoteDocument) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!(path = %self.path.display(), version = %document.version, "screen written");
        Ok(())
    }
}

impl PersistenceClient for FilePersistence {
    async fn fetch_screen(&self) -> Result<RemoteDocument, PersistenceError> {
        self.read().await
    }

    async fn replace_screen_nodes(
        &self,
        nodes: Vec<RawNode>,
        expected: Version,
    ) -> Result<RemoteDocument, PersistenceError> {
        let mut document = self.read().await?;
        accept_write(&mut document, nodes, expected)?;
        self.write(&document).await?;
        Ok(document)
    }
}
