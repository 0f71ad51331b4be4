use std::fmt;

use serde::{Deserialize, Serialize};

const UNKNOWN_SEGMENT: &str = "unknown";

/// Filesystem-safe identity of one cached proposal
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub network: String,
    pub ref_id: String,
}

impl CacheKey {
    pub fn new(network: &str, ref_id: &str) -> Self {
        Self {
            network: sanitize_network(network),
            ref_id: sanitize_ref_id(ref_id),
        }
    }

    /// `network/ref_id`, also used as the lock-table key
    pub fn as_path_fragment(&self) -> String {
        format!("{}/{}", self.network, self.ref_id)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.ref_id)
    }
}

/// Lower-case, keep `[a-z0-9_-]`, map other characters to `-`, collapse runs
/// of `-`. Empty results become `unknown`.
pub fn sanitize_network(raw: &str) -> String {
    sanitize(&raw.trim().to_lowercase(), |c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
    })
}

/// Same rules as the network segment but case is preserved
pub fn sanitize_ref_id(raw: &str) -> String {
    sanitize(raw.trim(), |c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn sanitize(raw: &str, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let mapped = if keep(c) { c } else { '-' };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('-');
    // an all-underscore segment carries no name either
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        UNKNOWN_SEGMENT.to_string()
    } else {
        trimmed.to_string()
    }
}
