//! Completion hooks for whatever presents results (a chat bot, a dashboard)

use async_trait::async_trait;
use tracing::info;

use crate::analysis::ResultBundle;
use crate::cache::CacheEntry;

/// Receives finished work. Called after the cache lock for the key has been
/// released, so implementations may read the cache.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn cache_refreshed(&self, _entry: &CacheEntry) {}

    async fn analysis_finished(&self, _bundle: &ResultBundle) {}
}

/// Logs completions through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn cache_refreshed(&self, entry: &CacheEntry) {
        info!(
            "Cache entry {} refreshed at {} with {} attachments",
            entry.key,
            entry.refreshed_at.to_rfc3339(),
            entry.attachments.len()
        );
    }

    async fn analysis_finished(&self, bundle: &ResultBundle) {
        info!(
            "Analysis {} for {}/{} done: {} succeeded, {} absent{}",
            bundle.run_id,
            bundle.network,
            bundle.ref_id,
            bundle.succeeded(),
            bundle.absent(),
            if bundle.timed_out { " (timed out)" } else { "" }
        );
    }
}
