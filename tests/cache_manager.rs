use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use govbrief::attachments::{AttachmentStore, ExtractionKind, PdfTextExtractor};
use govbrief::cache::{CacheEntry, CacheManager, METADATA_FILE, PROPOSAL_FILE};
use govbrief::config::Limits;
use govbrief::error::{GovbriefError, Result};
use govbrief::fetch::{FetchPolicy, IpRange, SafeFetcher};
use govbrief::links::{Category, LinkClassifier};
use govbrief::notify::CompletionNotifier;
use govbrief::source::ContentSource;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeSource {
    text: Mutex<Option<String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeSource {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: Mutex::new(Some(text.to_string())),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        })
    }

    fn set(&self, text: Option<&str>) {
        *self.text.lock().unwrap() = text.map(str::to_string);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    async fn fetch_proposal(&self, _network: &str, _ref_id: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let text = self.text.lock().unwrap().clone();
        text.ok_or_else(|| GovbriefError::ContentSource {
            message: "upstream unavailable".into(),
        })
    }
}

struct FakePdf;

#[async_trait]
impl PdfTextExtractor for FakePdf {
    async fn extract(&self, pdf: &[u8], _scratch_dir: &Path) -> Result<String> {
        assert!(pdf.starts_with(b"%PDF-"));
        Ok("Budget line item for audit work. ".repeat(10))
    }
}

#[derive(Default)]
struct CountingNotifier {
    refreshed: AtomicUsize,
}

#[async_trait]
impl CompletionNotifier for CountingNotifier {
    async fn cache_refreshed(&self, _entry: &CacheEntry) {
        self.refreshed.fetch_add(1, Ordering::SeqCst);
    }
}

fn long_text(topic: &str) -> String {
    format!("{topic}: milestone one delivers the indexer, milestone two the UI. ").repeat(6)
}

async fn attachment_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plan.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(long_text("Plan")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/budget.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.4 fake".to_vec())
                .insert_header("content-type", "application/pdf"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chart.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;
    server
}

/// Extraction that yields almost nothing, like a scanned PDF
struct NearlyEmptyPdf;

#[async_trait]
impl PdfTextExtractor for NearlyEmptyPdf {
    async fn extract(&self, _pdf: &[u8], _scratch_dir: &Path) -> Result<String> {
        Ok("  p1\n".to_string())
    }
}

fn manager(root: &Path, source: Arc<FakeSource>) -> CacheManager {
    manager_with_pdf(root, source, Arc::new(FakePdf))
}

fn manager_with_pdf(
    root: &Path,
    source: Arc<FakeSource>,
    pdf: Arc<dyn PdfTextExtractor>,
) -> CacheManager {
    let ten = IpRange::new("10.0.0.0".parse().unwrap(), 8).unwrap();
    let fetcher = Arc::new(SafeFetcher::new(
        FetchPolicy::default().with_blocked_ranges(vec![ten]),
    ));
    let store = AttachmentStore::new(fetcher, LinkClassifier::default(), Limits::default())
        .with_pdf_extractor(pdf);
    CacheManager::new(root, source, store)
}

#[tokio::test]
async fn refresh_builds_full_layout() {
    let server = attachment_server().await;
    let root = tempfile::tempdir().unwrap();
    let proposal = format!(
        "Fund the indexer.\nPlan: {0}/plan.txt\nBudget: {0}/budget.pdf\nChart: {0}/chart.png\n\
         Thread: https://twitter.com/someone/status/1\nInternal: http://10.0.0.5/secret.pdf",
        server.uri()
    );
    let source = FakeSource::new(&proposal);
    let cache = manager(root.path(), Arc::clone(&source));

    let entry = cache.refresh("Polkadot", "42").await.unwrap();
    let dir = root.path().join("polkadot").join("42");
    assert_eq!(entry.dir, dir);
    for sub in ["files", "images", "video", "audio", "other"] {
        assert!(dir.join(sub).is_dir(), "missing {sub}/");
    }
    assert!(dir.join(PROPOSAL_FILE).is_file());
    assert!(dir.join(METADATA_FILE).is_file());

    let files: Vec<&str> = entry.attachments.iter().map(|a| a.file.as_str()).collect();
    assert_eq!(
        files,
        vec!["files/doc-01.txt", "files/doc-02.txt", "images/image-01.png"]
    );
    assert_eq!(entry.attachments[1].kind, Some(ExtractionKind::Pdf));
    assert_eq!(entry.attachments_in(Category::Image).count(), 1);
    let image = entry.attachment_path(&entry.attachments[2]);
    assert_eq!(image, dir.join("images/image-01.png"));
    assert_eq!(std::fs::read(&image).unwrap()[..4], [0x89, b'P', b'N', b'G']);

    let text = std::fs::read_to_string(dir.join(PROPOSAL_FILE)).unwrap();
    assert!(text.starts_with("Fund the indexer."));
    assert!(text.contains(&format!(
        "--- Attachment: files/doc-01.txt (source: {}/plan.txt) ---",
        server.uri()
    )));
    assert!(text.contains("Budget line item"));
    assert!(text.contains("images/image-01.png"));

    let meta: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.join(METADATA_FILE)).unwrap()).unwrap();
    assert_eq!(meta["network"], "polkadot");
    assert_eq!(meta["refId"], "42");
    assert_eq!(meta["proposalFile"], "proposal.txt");
    assert_eq!(meta["attachments"][2]["category"], "image");
    assert!(meta["refreshedAt"].is_string());

    // skip-listed and private links never reached the network
    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(paths.len(), 3);
}

#[tokio::test]
async fn binary_category_cap_bounds_downloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img-\d+\.png$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89, b'P', b'N', b'G'])
                .insert_header("content-type", "image/png"),
        )
        .mount(&server)
        .await;
    let root = tempfile::tempdir().unwrap();
    let proposal = (1..=15)
        .map(|i| format!("{}/img-{i}.png", server.uri()))
        .collect::<Vec<_>>()
        .join("\n");
    let cache = manager(root.path(), FakeSource::new(&proposal));

    let entry = cache.refresh("polkadot", "88").await.unwrap();
    let limit = Limits::default().max_per_binary_category;
    assert_eq!(entry.attachments_in(Category::Image).count(), limit);
    assert_eq!(
        entry.attachments.last().unwrap().file,
        format!("images/image-{limit:02}.png")
    );
    assert!(!entry.dir.join("images/image-13.png").exists());
    assert_eq!(server.received_requests().await.unwrap().len(), limit);
}

#[tokio::test]
async fn short_extractions_are_not_stored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/scan.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 scan".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/note.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("TBD"))
        .mount(&server)
        .await;
    let root = tempfile::tempdir().unwrap();
    let proposal = format!("Scan: {0}/scan.pdf\nNote: {0}/note.txt", server.uri());
    let cache = manager_with_pdf(
        root.path(),
        FakeSource::new(&proposal),
        Arc::new(NearlyEmptyPdf),
    );

    let entry = cache.refresh("polkadot", "89").await.unwrap();
    assert!(entry.attachments.is_empty());
    assert!(!entry.dir.join("files/doc-01.txt").exists());
    let text = std::fs::read_to_string(&entry.proposal_path).unwrap();
    assert!(!text.contains("--- Attachment:"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn ensure_entry_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new("A proposal without links.");
    let cache = manager(root.path(), Arc::clone(&source));

    let first = cache.get_proposal_content("kusama", "7").await.unwrap();
    let second = cache.get_proposal_content("kusama", "7").await.unwrap();
    assert_eq!(first.text, second.text);
    assert_eq!(first.entry.refreshed_at, second.entry.refreshed_at);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn refresh_removes_stale_attachments() {
    let server = attachment_server().await;
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new(&format!("See {}/plan.txt", server.uri()));
    let cache = manager(root.path(), Arc::clone(&source));

    cache.refresh("polkadot", "9").await.unwrap();
    let doc = root.path().join("polkadot/9/files/doc-01.txt");
    assert!(doc.is_file());

    source.set(Some("Link removed in the edited proposal."));
    let entry = cache.refresh("polkadot", "9").await.unwrap();
    assert!(!doc.exists());
    assert!(entry.attachments.is_empty());
}

#[tokio::test]
async fn missing_proposal_text_heals_with_one_refresh() {
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new("Original text.");
    let cache = manager(root.path(), Arc::clone(&source));

    let entry = cache.ensure_entry("polkadot", "3").await.unwrap();
    std::fs::remove_file(&entry.proposal_path).unwrap();

    let content = cache.get_proposal_content("polkadot", "3").await.unwrap();
    assert_eq!(content.text.trim(), "Original text.");
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn corrupt_metadata_is_reported_not_replaced() {
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new("Text.");
    let cache = manager(root.path(), Arc::clone(&source));

    cache.ensure_entry("polkadot", "5").await.unwrap();
    let meta = root.path().join("polkadot/5").join(METADATA_FILE);
    std::fs::write(&meta, b"{ not json").unwrap();

    let err = cache.ensure_entry("polkadot", "5").await.unwrap_err();
    assert!(matches!(err, GovbriefError::CacheCorrupt { .. }));
    assert_eq!(err.presenter_state(), "refresh-failed");
    assert_eq!(source.calls(), 1);
    assert_eq!(std::fs::read(&meta).unwrap(), b"{ not json");
}

#[tokio::test]
async fn failed_refresh_leaves_key_absent() {
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new("First version.");
    let cache = manager(root.path(), Arc::clone(&source));
    cache.refresh("polkadot", "11").await.unwrap();

    source.set(None);
    let err = cache.refresh("polkadot", "11").await.unwrap_err();
    assert!(matches!(err, GovbriefError::ContentSource { .. }));
    assert!(cache.load_entry("polkadot", "11").await.unwrap().is_none());

    let leftovers: Vec<_> = std::fs::read_dir(root.path().join("polkadot"))
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "staging or entry dirs left behind");
}

#[tokio::test]
async fn stale_staging_dirs_are_cleared() {
    let root = tempfile::tempdir().unwrap();
    let stale = root.path().join("polkadot/.12.staging-deadbeef");
    let unrelated = root.path().join("polkadot/.123.staging-cafe");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::create_dir_all(&unrelated).unwrap();

    let cache = manager(root.path(), FakeSource::new("Text."));
    cache.refresh("polkadot", "12").await.unwrap();
    assert!(!stale.exists());
    assert!(unrelated.exists());
}

#[tokio::test]
async fn concurrent_ensures_refresh_once() {
    let root = tempfile::tempdir().unwrap();
    let source = FakeSource::new("Shared text.");
    let cache = Arc::new(manager(root.path(), Arc::clone(&source)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.ensure_entry("polkadot", "77").await.map(|e| e.refreshed_at)
        }));
    }
    let mut stamps = Vec::new();
    for h in handles {
        stamps.push(h.await.unwrap().unwrap());
    }
    assert_eq!(source.calls(), 1);
    assert!(stamps.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn load_and_invalidate() {
    let root = tempfile::tempdir().unwrap();
    let notifier = Arc::new(CountingNotifier::default());
    let cache = manager(root.path(), FakeSource::new("Text."))
        .with_notifier(Arc::clone(&notifier) as Arc<dyn CompletionNotifier>);

    assert!(cache.load_entry("polkadot", "1").await.unwrap().is_none());
    cache.ensure_entry("polkadot", "1").await.unwrap();
    cache.ensure_entry("polkadot", "1").await.unwrap();
    assert_eq!(notifier.refreshed.load(Ordering::SeqCst), 1);
    assert!(cache.load_entry("polkadot", "1").await.unwrap().is_some());

    assert!(cache.invalidate("polkadot", "1").await.unwrap());
    assert!(!cache.invalidate("polkadot", "1").await.unwrap());
    assert!(cache.load_entry("polkadot", "1").await.unwrap().is_none());
}
