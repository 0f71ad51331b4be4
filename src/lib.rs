pub mod analysis;
pub mod attachments;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod links;
pub mod notify;
pub mod source;

use std::sync::Arc;

use crate::analysis::Orchestrator;
use crate::attachments::AttachmentStore;
use crate::cache::CacheManager;
use crate::clients::{AnalysisClient, ChatCompletionsClient};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::SafeFetcher;
use crate::links::LinkClassifier;
use crate::notify::CompletionNotifier;
use crate::source::{ContentSource, HttpContentSource};

/// Fully wired services for one process
pub struct Services {
    pub fetcher: Arc<SafeFetcher>,
    pub cache: Arc<CacheManager>,
    pub orchestrator: Orchestrator,
}

impl Services {
    /// Production wiring: HTTP content source, `pdftotext`, chat-completions
    /// provider
    pub fn from_config(config: &Config, notifier: Arc<dyn CompletionNotifier>) -> Result<Self> {
        let source: Arc<dyn ContentSource> =
            Arc::new(HttpContentSource::from_config(&config.source)?);
        let client: Arc<dyn AnalysisClient> = Arc::new(ChatCompletionsClient::from_config(
            &config.analysis,
            config.runtime.analysis_api_key.clone(),
        )?);
        Self::with_collaborators(config, source, client, notifier)
    }

    /// Wiring with caller-supplied collaborators
    pub fn with_collaborators(
        config: &Config,
        source: Arc<dyn ContentSource>,
        client: Arc<dyn AnalysisClient>,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Result<Self> {
        let fetcher = Arc::new(SafeFetcher::from_config(config)?);
        let store = AttachmentStore::new(
            Arc::clone(&fetcher),
            LinkClassifier::from_config(&config.fetch),
            config.limits.clone(),
        );
        let cache = Arc::new(
            CacheManager::new(config.cache.root.clone(), source, store)
                .with_notifier(Arc::clone(&notifier)),
        );
        let orchestrator = Orchestrator::new(client, &config.analysis).with_notifier(notifier);
        Ok(Self {
            fetcher,
            cache,
            orchestrator,
        })
    }
}
