//! Direct-export URLs for links on document-hosting services

use regex::Regex;

/// One pattern that turns a share link into a plain-text export link
struct ExportRule {
    name: &'static str,
    pattern: Regex,
    build: fn(&str) -> String,
}

/// Ordered rules; the first match wins, so more specific patterns go first
pub struct ExportResolver {
    rules: Vec<ExportRule>,
}

impl Default for ExportResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportResolver {
    pub fn new() -> Self {
        let rule = |name: &'static str, pattern: &str, build: fn(&str) -> String| ExportRule {
            name,
            pattern: Regex::new(pattern).expect("export pattern should compile"),
            build,
        };
        Self {
            rules: vec![
                // Published documents: /document/d/e/<id>/pub
                rule(
                    "published-document",
                    r"(?i)^https?://docs\.google\.com/document/d/e/([A-Za-z0-9_-]+)",
                    |id| format!("https://docs.google.com/document/d/e/{id}/pub?output=txt"),
                ),
                rule(
                    "standard-document",
                    r"(?i)^https?://docs\.google\.com/document/(?:u/\d+/)?d/([A-Za-z0-9_-]+)",
                    |id| format!("https://docs.google.com/document/d/{id}/export?format=txt"),
                ),
                rule(
                    "query-parameter",
                    r"(?i)^https?://(?:docs|drive)\.google\.com/[^?#]*\?(?:[^#]*&)?id=([A-Za-z0-9_-]+)",
                    |id| format!("https://drive.google.com/uc?export=download&id={id}"),
                ),
                rule(
                    "drive-file",
                    r"(?i)^https?://drive\.google\.com/file/d/([A-Za-z0-9_-]+)",
                    |id| format!("https://drive.google.com/uc?export=download&id={id}"),
                ),
            ],
        }
    }

    /// Export URL and the name of the rule that produced it
    pub fn resolve(&self, url: &str) -> Option<(String, &'static str)> {
        self.rules.iter().find_map(|rule| {
            rule.pattern
                .captures(url)
                .and_then(|caps| caps.get(1))
                .map(|id| ((rule.build)(id.as_str()), rule.name))
        })
    }
}
