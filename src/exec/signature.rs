// src/exec/signature.rs

//! Line-by-line scan of an output stream for known fault signatures.
//!
//! The error tail attached to a failed result is bounded, and a driver
//! assertion is usually followed by a long backtrace that pushes it out of
//! that tail. Scanning every complete line as it arrives keeps the first
//! matching line regardless of how much output follows it.

use std::sync::{Arc, Mutex};

use regex::RegexSet;

use crate::progress::LineBuffer;

/// Longest matched line kept, in characters.
const MAX_MATCH_CHARS: usize = 300;

#[derive(Debug)]
pub struct SignatureScan {
    signatures: Arc<RegexSet>,
    lines: LineBuffer,
    hit: Arc<Mutex<Option<String>>>,
}

impl SignatureScan {
    pub fn new(signatures: Arc<RegexSet>, hit: Arc<Mutex<Option<String>>>) -> Self {
        Self {
            signatures,
            lines: LineBuffer::default(),
            hit,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        for line in self.lines.push(chunk) {
            self.check(&line);
        }
    }

    /// Check the partial line left at end of stream.
    pub fn finish(&mut self) {
        if let Some(line) = self.lines.flush() {
            self.check(&line);
        }
    }

    fn check(&self, line: &str) {
        if !self.signatures.is_match(line) {
            return;
        }
        if let Ok(mut hit) = self.hit.lock() {
            if hit.is_none() {
                *hit = Some(line.trim().chars().take(MAX_MATCH_CHARS).collect());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan() -> (SignatureScan, Arc<Mutex<Option<String>>>) {
        let set = RegexSet::new([r"GGML_ASSERT", r"(?i)cuda error"]).unwrap();
        let hit = Arc::new(Mutex::new(None));
        (SignatureScan::new(Arc::new(set), Arc::clone(&hit)), hit)
    }

    #[test]
    fn keeps_first_matching_line_across_chunks() {
        let (mut scan, hit) = scan();
        scan.feed(b"loading model\nGGML_ASS");
        scan.feed(b"ERT: ggml-cuda.cu:1234: fail\n");
        scan.feed(b"CUDA error: device lost\n");
        assert_eq!(
            hit.lock().unwrap().as_deref(),
            Some("GGML_ASSERT: ggml-cuda.cu:1234: fail")
        );
    }

    #[test]
    fn unterminated_last_line_is_checked() {
        let (mut scan, hit) = scan();
        scan.feed(b"CUDA Error: out of memory");
        assert!(hit.lock().unwrap().is_none());
        scan.finish();
        assert_eq!(hit.lock().unwrap().as_deref(), Some("CUDA Error: out of memory"));
    }

    #[test]
    fn ordinary_output_leaves_no_match() {
        let (mut scan, hit) = scan();
        scan.feed(b"input.wav: invalid data found\n");
        scan.finish();
        assert!(hit.lock().unwrap().is_none());
    }
}
