//! Attachment downloading and text extraction for a cache refresh.
//!
//! Links are processed in extraction order. Documents are turned into text
//! (PDF through an external extractor, hosted documents through their export
//! URL, everything else through a text sniff) and binaries are stored as-is
//! under a size cap. A failed download or extraction is logged and skipped;
//! only local disk errors abort the batch.

pub mod export;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Limits;
use crate::error::{GovbriefError, Result};
use crate::fetch::{Fetched, SafeFetcher};
use crate::links::{Category, LinkClassifier, url_extension};

pub use export::ExportResolver;
pub use pdf::{PdfTextExtractor, PdftotextExtractor};
pub use text::{looks_like_text, truncate_text};

/// How a document's text was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionKind {
    Pdf,
    DocExport,
    Text,
}

/// One stored attachment of a cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub category: Category,
    /// Path relative to the entry directory, always `/`-separated
    pub file: String,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ExtractionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Extracted document text destined for the combined proposal file
#[derive(Debug, Clone)]
pub struct InlineDocument {
    pub file: String,
    pub source_url: String,
    pub text: String,
}

/// Everything one pass over a proposal's links produced
#[derive(Debug, Default)]
pub struct AttachmentBatch {
    pub attachments: Vec<Attachment>,
    pub documents: Vec<InlineDocument>,
    pub skipped: usize,
    pub failed: usize,
}

impl AttachmentBatch {
    /// Proposal text with each document inlined and other files listed
    pub fn combined_text(&self, proposal: &str) -> String {
        let mut out = proposal.trim_end().to_string();
        for doc in &self.documents {
            out.push_str(&format!(
                "\n\n--- Attachment: {} (source: {}) ---\n{}",
                doc.file,
                doc.source_url,
                doc.text.trim()
            ));
        }
        let others: Vec<&Attachment> = self
            .attachments
            .iter()
            .filter(|a| a.category != Category::Document)
            .collect();
        if !others.is_empty() {
            out.push_str("\n\n--- Other attachments ---");
            for a in others {
                out.push_str(&format!(
                    "\n- {} ({}, source: {})",
                    a.file, a.category, a.source_url
                ));
            }
        }
        out.push('\n');
        out
    }
}

struct ExtractedDocument {
    text: String,
    kind: ExtractionKind,
    content_type: Option<String>,
}

pub struct AttachmentStore {
    fetcher: Arc<SafeFetcher>,
    classifier: LinkClassifier,
    limits: Limits,
    pdf: Arc<dyn PdfTextExtractor>,
    exports: ExportResolver,
}

impl AttachmentStore {
    pub fn new(fetcher: Arc<SafeFetcher>, classifier: LinkClassifier, limits: Limits) -> Self {
        Self {
            fetcher,
            classifier,
            limits,
            pdf: Arc::new(PdftotextExtractor::new()),
            exports: ExportResolver::new(),
        }
    }

    pub fn with_pdf_extractor(mut self, pdf: Arc<dyn PdfTextExtractor>) -> Self {
        self.pdf = pdf;
        self
    }

    pub fn fetcher(&self) -> &SafeFetcher {
        &self.fetcher
    }

    pub fn classifier(&self) -> &LinkClassifier {
        &self.classifier
    }

    fn cap_for(&self, category: Category) -> usize {
        match category {
            Category::Document => self.limits.max_documents,
            _ => self.limits.max_per_binary_category,
        }
    }

    /// Download and store `links` under `entry_dir`, whose category
    /// subdirectories must already exist.
    pub async fn process(&self, links: &[String], entry_dir: &Path) -> Result<AttachmentBatch> {
        let mut batch = AttachmentBatch::default();
        let mut attempts: HashMap<Category, usize> = HashMap::new();
        let mut stored: HashMap<Category, usize> = HashMap::new();

        for url in links {
            if self.classifier.should_skip(url, &self.fetcher).await {
                batch.skipped += 1;
                continue;
            }
            let category = self.classifier.classify(url);
            let tried = attempts.entry(category).or_default();
            if *tried >= self.cap_for(category) {
                debug!("Cap reached for {}, skipping {}", category, url);
                batch.skipped += 1;
                continue;
            }
            *tried += 1;
            let index = stored.get(&category).copied().unwrap_or(0) + 1;

            let outcome = match category {
                Category::Document => self.store_document(url, index, entry_dir).await,
                _ => self.store_binary(url, category, index, entry_dir).await,
            };
            match outcome {
                Ok((attachment, inline)) => {
                    *stored.entry(category).or_default() += 1;
                    debug!("Stored {} from {}", attachment.file, url);
                    batch.attachments.push(attachment);
                    if let Some(doc) = inline {
                        batch.documents.push(doc);
                    }
                }
                Err(err @ GovbriefError::Io { .. }) => return Err(err),
                Err(err) => {
                    batch.failed += 1;
                    warn!(url = %url, category = %category, error = %err, "Skipping attachment");
                }
            }
        }

        info!(
            "Processed {} links: {} stored, {} skipped, {} failed",
            links.len(),
            batch.attachments.len(),
            batch.skipped,
            batch.failed
        );
        Ok(batch)
    }

    async fn store_document(
        &self,
        url: &str,
        index: usize,
        entry_dir: &Path,
    ) -> Result<(Attachment, Option<InlineDocument>)> {
        let files_dir = entry_dir.join(Category::Document.subdir());
        let doc = self
            .acquire_document(url, &files_dir)
            .await
            .map_err(into_skippable)?;

        let file = format!(
            "{}/{}-{:02}.txt",
            Category::Document.subdir(),
            Category::Document.file_prefix(),
            index
        );
        tokio::fs::write(entry_dir.join(&file), doc.text.as_bytes()).await?;

        let attachment = Attachment {
            category: Category::Document,
            file: file.clone(),
            source_url: url.to_string(),
            content_type: doc.content_type,
            kind: Some(doc.kind),
            size_bytes: Some(doc.text.len() as u64),
        };
        let inline = InlineDocument {
            file,
            source_url: url.to_string(),
            text: doc.text,
        };
        Ok((attachment, Some(inline)))
    }

    async fn store_binary(
        &self,
        url: &str,
        category: Category,
        index: usize,
        entry_dir: &Path,
    ) -> Result<(Attachment, Option<InlineDocument>)> {
        let fetched = self
            .fetcher
            .fetch(url, self.limits.max_binary_bytes)
            .await?;
        let ext = binary_extension(url, fetched.content_type.as_deref());
        let file = format!(
            "{}/{}-{:02}.{}",
            category.subdir(),
            category.file_prefix(),
            index,
            ext
        );
        tokio::fs::write(entry_dir.join(&file), &fetched.bytes).await?;

        let attachment = Attachment {
            category,
            file,
            source_url: url.to_string(),
            content_type: fetched.content_type,
            kind: None,
            size_bytes: Some(fetched.bytes.len() as u64),
        };
        Ok((attachment, None))
    }

    async fn acquire_document(&self, url: &str, scratch: &Path) -> Result<ExtractedDocument> {
        let is_pdf_link = url::Url::parse(url)
            .ok()
            .and_then(|u| url_extension(&u))
            .is_some_and(|ext| ext == "pdf");
        if is_pdf_link {
            let fetched = self.fetcher.fetch(url, self.limits.max_binary_bytes).await?;
            return self.extract_pdf(fetched, scratch).await;
        }

        if let Some((export_url, rule)) = self.exports.resolve(url) {
            debug!("Resolved {} via {} to {}", url, rule, export_url);
            let fetched = self
                .fetcher
                .fetch(&export_url, self.limits.max_binary_bytes)
                .await?;
            if is_pdf(&fetched) {
                return self.extract_pdf(fetched, scratch).await;
            }
            return self.decode_text(
                fetched,
                ExtractionKind::DocExport,
                self.limits.document_text_chars,
            );
        }

        let fetched = self
            .fetcher
            .fetch(url, self.limits.generic_fetch_bytes)
            .await?;
        if is_pdf(&fetched) {
            return self.extract_pdf(fetched, scratch).await;
        }
        self.decode_text(fetched, ExtractionKind::Text, self.limits.generic_text_chars)
    }

    async fn extract_pdf(&self, fetched: Fetched, scratch: &Path) -> Result<ExtractedDocument> {
        let raw = self.pdf.extract(&fetched.bytes, scratch).await?;
        let text = self.finish_text(&raw, self.limits.document_text_chars)?;
        Ok(ExtractedDocument {
            text,
            kind: ExtractionKind::Pdf,
            content_type: fetched
                .content_type
                .or_else(|| Some("application/pdf".to_string())),
        })
    }

    fn decode_text(
        &self,
        fetched: Fetched,
        kind: ExtractionKind,
        max_chars: usize,
    ) -> Result<ExtractedDocument> {
        if !looks_like_text(&fetched.bytes) {
            return Err(GovbriefError::ExtractionFailed {
                message: format!("{} does not look like text", fetched.final_url),
            });
        }
        let raw = String::from_utf8_lossy(&fetched.bytes);
        let text = self.finish_text(&raw, max_chars)?;
        Ok(ExtractedDocument {
            text,
            kind,
            content_type: fetched.content_type,
        })
    }

    fn finish_text(&self, raw: &str, max_chars: usize) -> Result<String> {
        let len = text::meaningful_len(raw);
        if len < self.limits.min_extracted_chars {
            return Err(GovbriefError::ExtractionFailed {
                message: format!(
                    "only {} characters extracted (minimum {})",
                    len, self.limits.min_extracted_chars
                ),
            });
        }
        Ok(truncate_text(raw.trim(), max_chars))
    }
}

/// Scratch-file errors inside extraction are per-attachment failures
fn into_skippable(err: GovbriefError) -> GovbriefError {
    match err {
        GovbriefError::Io { message } => GovbriefError::ExtractionFailed { message },
        other => other,
    }
}

fn is_pdf(fetched: &Fetched) -> bool {
    fetched.content_type.as_deref() == Some("application/pdf")
        || fetched.bytes.starts_with(b"%PDF-")
}

/// URL suffix when it is short and plausible, otherwise the content type
pub fn binary_extension(url: &str, content_type: Option<&str>) -> String {
    if let Some(ext) = url::Url::parse(url).ok().and_then(|u| url_extension(&u))
        && (1..=5).contains(&ext.len())
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return ext;
    }
    let from_type = match content_type.unwrap_or_default() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "text/plain" => "txt",
        _ => "bin",
    };
    from_type.to_string()
}
