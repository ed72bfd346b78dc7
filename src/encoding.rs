//! Best-effort text encoding detection for files other tools may have written.

use encoding_rs::{Encoding, UTF_8};
use std::{fs, path::Path};
use tracing::{debug, warn};

const MIN_CONFIDENCE: f32 = 0.5;

/// Raw guess from a statistical detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub charset: String,
    pub confidence: f32,
}

pub trait CharsetProbe: Send + Sync {
    fn probe(&self, bytes: &[u8]) -> Option<Detection>;
}

/// Detector backed by the `chardet` port of the universal charset detector.
#[derive(Debug, Default, Clone, Copy)]
pub struct Chardet;

impl CharsetProbe for Chardet {
    fn probe(&self, bytes: &[u8]) -> Option<Detection> {
        let (charset, confidence, _language) = chardet::detect(&bytes.to_vec());
        if charset.is_empty() {
            return None;
        }
        let charset = chardet::charset2encoding(&charset).to_string();
        Some(Detection {
            charset,
            confidence,
        })
    }
}

pub fn detect(probe: &dyn CharsetProbe, bytes: &[u8]) -> &'static Encoding {
    let Some(detection) = probe.probe(bytes) else {
        debug!("no encoding detected, using utf-8");
        return UTF_8;
    };
    debug!(
        "detected {} with confidence {:.2}",
        detection.charset, detection.confidence
    );
    if detection.charset.eq_ignore_ascii_case("ascii") {
        return UTF_8;
    }
    if detection.confidence <= MIN_CONFIDENCE {
        return UTF_8;
    }
    match Encoding::for_label(detection.charset.as_bytes()) {
        Some(encoding) => encoding,
        None => {
            debug!("unknown encoding label {}, using utf-8", detection.charset);
            UTF_8
        }
    }
}

/// Detects the encoding of a file on disk. Missing or unreadable files are utf-8.
pub fn detect_file(probe: &dyn CharsetProbe, path: &Path) -> &'static Encoding {
    match fs::read(path) {
        Ok(bytes) => detect(probe, &bytes),
        Err(_) => UTF_8,
    }
}

/// Decodes with `encoding`, letting a byte order mark take precedence. Lossy.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("replaced undecodable bytes while reading as {}", used.name());
    }
    text.into_owned()
}

/// Detects and decodes in one step.
pub fn read_text(probe: &dyn CharsetProbe, bytes: &[u8]) -> (String, &'static Encoding) {
    let encoding = detect(probe, bytes);
    (decode(bytes, encoding), encoding)
}
