//! On-disk proposal cache.
//!
//! Layout per entry:
//!
//! ```text
//! <root>/<network>/<ref_id>/
//!   proposal.txt     combined proposal + inlined document text
//!   metadata.json    {network, refId, proposalFile, attachments[], refreshedAt}
//!   files/ images/ video/ audio/ other/
//! ```
//!
//! An entry is either complete or absent. `refresh` deletes the old tree,
//! builds the new one in a hidden staging directory beside it and renames it
//! into place after `metadata.json` is written. Mutations of one key are
//! serialized through a keyed lock table; different keys proceed in
//! parallel. There is no cross-process locking.

pub mod keys;
pub mod locks;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::attachments::{Attachment, AttachmentStore};
use crate::error::{GovbriefError, Result};
use crate::links::{Category, extract_links};
use crate::notify::CompletionNotifier;
use crate::source::ContentSource;

pub use keys::CacheKey;
pub use locks::{KeyLockGuard, KeyedLocks};

pub const PROPOSAL_FILE: &str = "proposal.txt";
pub const METADATA_FILE: &str = "metadata.json";

/// Persisted record describing one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub network: String,
    pub ref_id: String,
    pub proposal_file: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub refreshed_at: DateTime<Utc>,
}

/// A fully present cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub dir: PathBuf,
    pub proposal_path: PathBuf,
    pub attachments: Vec<Attachment>,
    pub refreshed_at: DateTime<Utc>,
}

impl CacheEntry {
    fn from_metadata(key: CacheKey, dir: PathBuf, meta: CacheMetadata) -> Result<Self> {
        if !is_contained_relative(&meta.proposal_file) {
            return Err(GovbriefError::CacheCorrupt {
                path: dir.join(METADATA_FILE).display().to_string(),
                message: format!("proposal file '{}' escapes the entry", meta.proposal_file),
            });
        }
        Ok(Self {
            proposal_path: dir.join(&meta.proposal_file),
            key,
            dir,
            attachments: meta.attachments,
            refreshed_at: meta.refreshed_at,
        })
    }

    pub fn attachment_path(&self, attachment: &Attachment) -> PathBuf {
        self.dir.join(&attachment.file)
    }

    pub fn attachments_in(&self, category: Category) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .filter(move |a| a.category == category)
    }
}

/// Cached proposal text together with the entry it was read from
#[derive(Debug, Clone)]
pub struct ProposalContent {
    pub entry: CacheEntry,
    pub text: String,
}

fn is_contained_relative(file: &str) -> bool {
    let path = Path::new(file);
    !file.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

pub struct CacheManager {
    root: PathBuf,
    source: Arc<dyn ContentSource>,
    store: AttachmentStore,
    locks: KeyedLocks,
    notifier: Option<Arc<dyn CompletionNotifier>>,
}

impl CacheManager {
    pub fn new(
        root: impl Into<PathBuf>,
        source: Arc<dyn ContentSource>,
        store: AttachmentStore,
    ) -> Self {
        Self {
            root: root.into(),
            source,
            store,
            locks: KeyedLocks::new(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompletionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(&key.network).join(&key.ref_id)
    }

    /// Rebuild the entry from scratch. Any previous entry for the key is
    /// deleted first, so a failed refresh leaves the key absent.
    pub async fn refresh(&self, network: &str, ref_id: &str) -> Result<CacheEntry> {
        let key = CacheKey::new(network, ref_id);
        let entry = {
            let _guard = self.locks.acquire(&key.as_path_fragment()).await;
            self.refresh_locked(&key).await?
        };
        self.notify_refreshed(&entry).await;
        Ok(entry)
    }

    /// Cached entry if present, otherwise a fresh one. Unreadable or
    /// unparseable metadata is reported, never silently replaced.
    pub async fn ensure_entry(&self, network: &str, ref_id: &str) -> Result<CacheEntry> {
        let key = CacheKey::new(network, ref_id);
        if let Some(entry) = self.read_entry(&key).await? {
            return Ok(entry);
        }

        let entry = {
            let _guard = self.locks.acquire(&key.as_path_fragment()).await;
            // another caller may have refreshed while we waited
            if let Some(entry) = self.read_entry(&key).await? {
                return Ok(entry);
            }
            info!("No cached entry for {}, refreshing", key);
            self.refresh_locked(&key).await?
        };
        self.notify_refreshed(&entry).await;
        Ok(entry)
    }

    /// Proposal text of the entry, refreshing once if the text file vanished
    pub async fn get_proposal_content(
        &self,
        network: &str,
        ref_id: &str,
    ) -> Result<ProposalContent> {
        let entry = self.ensure_entry(network, ref_id).await?;
        match tokio::fs::read_to_string(&entry.proposal_path).await {
            Ok(text) => Ok(ProposalContent { entry, text }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Proposal text missing for {} ({}), forcing refresh",
                    entry.key,
                    entry.proposal_path.display()
                );
                let entry = self.refresh(network, ref_id).await?;
                let text = tokio::fs::read_to_string(&entry.proposal_path).await?;
                Ok(ProposalContent { entry, text })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read persisted metadata without refreshing; `None` when absent
    pub async fn load_entry(&self, network: &str, ref_id: &str) -> Result<Option<CacheEntry>> {
        self.read_entry(&CacheKey::new(network, ref_id)).await
    }

    /// Delete an entry. Returns whether anything was removed.
    pub async fn invalidate(&self, network: &str, ref_id: &str) -> Result<bool> {
        let key = CacheKey::new(network, ref_id);
        let _guard = self.locks.acquire(&key.as_path_fragment()).await;
        let removed = remove_dir_if_exists(&self.entry_dir(&key)).await?;
        if removed {
            info!("Invalidated cache entry {}", key);
        }
        Ok(removed)
    }

    async fn read_entry(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let dir = self.entry_dir(key);
        let path = dir.join(METADATA_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GovbriefError::CacheCorrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        let meta: CacheMetadata =
            serde_json::from_slice(&bytes).map_err(|e| GovbriefError::CacheCorrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        CacheEntry::from_metadata(key.clone(), dir, meta).map(Some)
    }

    /// Caller holds the key lock
    async fn refresh_locked(&self, key: &CacheKey) -> Result<CacheEntry> {
        let dir = self.entry_dir(key);
        let network_dir = self.root.join(&key.network);

        if remove_dir_if_exists(&dir).await? {
            debug!("Removed previous cache tree for {}", key);
        }
        tokio::fs::create_dir_all(&network_dir).await?;
        self.remove_stale_staging(key, &network_dir).await;

        let staging = network_dir.join(format!(
            "{}{}",
            staging_prefix(key),
            uuid::Uuid::new_v4().simple()
        ));
        let meta = match self.build_entry(key, &staging).await {
            Ok(meta) => meta,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                    debug!("Staging cleanup for {} failed: {}", key, cleanup);
                }
                warn!("Refresh of {} failed: {}", key, e);
                return Err(e);
            }
        };
        tokio::fs::rename(&staging, &dir).await?;

        info!(
            "Refreshed {} with {} attachments",
            key,
            meta.attachments.len()
        );
        CacheEntry::from_metadata(key.clone(), dir, meta)
    }

    async fn build_entry(&self, key: &CacheKey, staging: &Path) -> Result<CacheMetadata> {
        tokio::fs::create_dir_all(staging).await?;
        for category in Category::ALL {
            tokio::fs::create_dir_all(staging.join(category.subdir())).await?;
        }

        let proposal = self
            .source
            .fetch_proposal(&key.network, &key.ref_id)
            .await?;
        let links = extract_links(&proposal);
        debug!("Found {} links in {}", links.len(), key);

        let batch = self.store.process(&links, staging).await?;
        let combined = batch.combined_text(&proposal);
        tokio::fs::write(staging.join(PROPOSAL_FILE), combined.as_bytes()).await?;

        let meta = CacheMetadata {
            network: key.network.clone(),
            ref_id: key.ref_id.clone(),
            proposal_file: PROPOSAL_FILE.to_string(),
            attachments: batch.attachments,
            refreshed_at: Utc::now(),
        };
        tokio::fs::write(
            staging.join(METADATA_FILE),
            serde_json::to_vec_pretty(&meta)?,
        )
        .await?;
        Ok(meta)
    }

    /// Staging directories left behind by an interrupted refresh of this key
    async fn remove_stale_staging(&self, key: &CacheKey, network_dir: &Path) {
        let prefix = staging_prefix(key);
        let Ok(mut entries) = tokio::fs::read_dir(network_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                debug!("Removing stale staging dir {}", entry.path().display());
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!(
                        "Could not remove stale staging dir {}: {}",
                        entry.path().display(),
                        e
                    );
                }
            }
        }
    }

    async fn notify_refreshed(&self, entry: &CacheEntry) {
        if let Some(notifier) = &self.notifier {
            notifier.cache_refreshed(entry).await;
        }
    }
}

fn staging_prefix(key: &CacheKey) -> String {
    format!(".{}.staging-", key.ref_id)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
