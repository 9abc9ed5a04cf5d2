//! Canned response blobs
//!
//! Some responses are replayed from pre-recorded packets because their
//! schema is unknown or the field-built layout does not match what the
//! legacy client expects. The handshake engine only asks a
//! [`BlobRepository`] for a blob by name; where the bytes come from is the
//! repository's concern.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::BlobError;

/// Names of the canned blobs the frontend knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobName {
    SessionEncryptionChanged,
    AchievementDatabaseDump,
    EntityEnterGameWorld,
    MarkFirstGameFrame,
    ModifyCommunityMember,
    QueryIsRegionAvailable,
    MarkFirstGameFrame2,
}

impl BlobName {
    /// Every known blob
    pub const ALL: [BlobName; 7] = [
        BlobName::SessionEncryptionChanged,
        BlobName::AchievementDatabaseDump,
        BlobName::EntityEnterGameWorld,
        BlobName::MarkFirstGameFrame,
        BlobName::ModifyCommunityMember,
        BlobName::QueryIsRegionAvailable,
        BlobName::MarkFirstGameFrame2,
    ];

    /// Stable name used in logs and errors
    pub fn key(&self) -> &'static str {
        match self {
            Self::SessionEncryptionChanged => "session-encryption-changed",
            Self::AchievementDatabaseDump => "achievement-database-dump",
            Self::EntityEnterGameWorld => "entity-enter-game-world",
            Self::MarkFirstGameFrame => "mark-first-game-frame",
            Self::ModifyCommunityMember => "modify-community-member",
            Self::QueryIsRegionAvailable => "query-is-region-available",
            Self::MarkFirstGameFrame2 => "mark-first-game-frame-2",
        }
    }

    /// File name of the recorded packet
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::SessionEncryptionChanged => "SessionEncryptionChanged.bin",
            Self::AchievementDatabaseDump => "NetMessageAchievementDatabaseDump.bin",
            Self::EntityEnterGameWorld => "NetMessageEntityEnterGameWorld.bin",
            Self::MarkFirstGameFrame => "NetMessageMarkFirstGameFrame.bin",
            Self::ModifyCommunityMember => "NetMessageModifyCommunityMember.bin",
            Self::QueryIsRegionAvailable => "NetMessageQueryIsRegionAvailable.bin",
            Self::MarkFirstGameFrame2 => "NetMessageMarkFirstGameFrame2.bin",
        }
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Source of canned response payloads
pub trait BlobRepository: Send + Sync {
    /// Look up a blob by name
    fn lookup(&self, name: BlobName) -> Result<Bytes, BlobError>;
}

/// In-memory blob repository
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<BlobName, Bytes>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a blob
    pub fn insert(&mut self, name: BlobName, bytes: impl Into<Bytes>) {
        self.blobs.insert(name, bytes.into());
    }

    /// Builder-style insert
    pub fn with(mut self, name: BlobName, bytes: impl Into<Bytes>) -> Self {
        self.insert(name, bytes);
        self
    }

    /// Number of blobs held
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store holds no blobs
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobRepository for MemoryBlobStore {
    fn lookup(&self, name: BlobName) -> Result<Bytes, BlobError> {
        self.blobs
            .get(&name)
            .cloned()
            .ok_or(BlobError::NotFound(name.key()))
    }
}

/// Blob repository backed by the recorded packet files in a directory
///
/// Files are read once at startup; lookups never touch the filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    root: PathBuf,
    store: MemoryBlobStore,
}

impl DirectoryBlobStore {
    /// Load every known blob found under `root`
    ///
    /// Missing files are logged and later fail their lookup; only an
    /// unreadable existing file is an error.
    pub async fn load(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut store = MemoryBlobStore::new();

        for name in BlobName::ALL {
            let path = root.join(name.file_name());
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!(blob = %name, size = bytes.len(), "Loaded canned blob");
                    store.insert(name, bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(blob = %name, path = %path.display(), "Canned blob missing");
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            root = %root.display(),
            loaded = store.len(),
            known = BlobName::ALL.len(),
            "Canned blob store ready"
        );

        Ok(Self { root, store })
    }

    /// Directory the blobs were loaded from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of blobs loaded
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no blobs were found
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl BlobRepository for DirectoryBlobStore {
    fn lookup(&self, name: BlobName) -> Result<Bytes, BlobError> {
        self.store.lookup(name)
    }
}
