//! Text/binary sniffing and truncation helpers

const SNIFF_SAMPLE_BYTES: usize = 1000;
const MAX_CONTROL_BYTES: usize = 50;
const MIN_PRINTABLE_RATIO: f64 = 0.7;

/// Heuristic check that `bytes` hold text rather than a binary format.
///
/// Only the first 1000 bytes are sampled. Any NUL byte, 50 or more control
/// bytes, or a printable share of 0.7 or less marks the sample as binary.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SNIFF_SAMPLE_BYTES)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return false;
    }

    let mut control = 0usize;
    let mut printable = 0usize;
    for &b in sample {
        match b {
            b'\t' | b'\n' | b'\r' => printable += 1,
            0x20..=0x7e => printable += 1,
            // UTF-8 lead and continuation bytes
            0x80..=0xff => printable += 1,
            _ => control += 1,
        }
    }
    if control >= MAX_CONTROL_BYTES {
        return false;
    }
    (printable as f64 / sample.len() as f64) > MIN_PRINTABLE_RATIO
}

/// Cut `text` to at most `max_chars` characters, appending a marker when cut
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + 64);
            out.push_str(&text[..byte_idx]);
            out.push_str(&format!("\n\n[... truncated at {max_chars} characters ...]"));
            out
        }
    }
}

/// Character count of `text` ignoring surrounding whitespace
pub fn meaningful_len(text: &str) -> usize {
    text.trim().chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_utf8_text_pass() {
        assert!(looks_like_text(b"Treasury proposal\nSpend 100 DOT on tooling.\r\n"));
        assert!(looks_like_text("Prüfung der Ausgaben – Übersicht".as_bytes()));
    }

    #[test]
    fn nul_byte_is_binary() {
        assert!(!looks_like_text(b"hello\0world"));
    }

    #[test]
    fn many_control_bytes_are_binary() {
        let mut bytes = vec![b'a'; 900];
        bytes.extend(std::iter::repeat_n(0x01u8, 50));
        assert!(!looks_like_text(&bytes));

        let mut fewer = vec![b'a'; 900];
        fewer.extend(std::iter::repeat_n(0x01u8, 49));
        assert!(looks_like_text(&fewer));
    }

    #[test]
    fn low_printable_ratio_is_binary() {
        // 40 control bytes in a 100 byte sample: under the count limit, over the ratio
        let mut bytes = vec![b'a'; 60];
        bytes.extend(std::iter::repeat_n(0x02u8, 40));
        assert!(!looks_like_text(&bytes));
    }

    #[test]
    fn only_first_thousand_bytes_are_sampled() {
        let mut bytes = vec![b'a'; 1000];
        bytes.push(0);
        assert!(looks_like_text(&bytes));
    }

    #[test]
    fn empty_is_not_text() {
        assert!(!looks_like_text(b""));
    }

    #[test]
    fn truncation_appends_marker_on_char_boundary() {
        let text = "äöü".repeat(10);
        let cut = truncate_text(&text, 4);
        assert!(cut.starts_with("äöüä"));
        assert!(cut.contains("[... truncated at 4 characters ...]"));
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("exact", 5), "exact");
    }
}
