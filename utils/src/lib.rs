//! # Capture Pipeline Utilities
//!
//! Content identity (hashing/fingerprinting) and capture id generation.
//!
//! # Identity schemes
//!
//! - `text-sha256:<hex>`: SHA-256 over canonicalized normalized text. Used for
//!   email bodies and any other text payload.
//! - `audio-fp:<hex>`: SHA-256 over the payload length plus its first
//!   `prefix_len` bytes. Cheap enough to compute on large audio files before
//!   transcription.
//!
//! Both are deterministic for identical input.

use capture_core::{CaptureId, ContentIdentity};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const TEXT_SCHEME: &str = "text-sha256";
pub const AUDIO_SCHEME: &str = "audio-fp";

/// Bytes of audio read into the fingerprint by default (4 MiB).
pub const DEFAULT_FINGERPRINT_BYTES: usize = 4 * 1024 * 1024;

/// Compute SHA-256 hash of content string
///
/// # Examples
///
/// ```
/// use utils::compute_content_hash;
///
/// let hash = compute_content_hash("hello world");
/// assert_eq!(hash.len(), 64);
/// ```
#[must_use]
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical text form used for hashing.
///
/// Line endings become `\n`, trailing whitespace is stripped from every line,
/// and leading/trailing blank lines are dropped.
#[must_use]
pub fn canonicalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().map(str::trim_end).collect();

    let first = lines.iter().position(|line| !line.is_empty());
    let last = lines.iter().rposition(|line| !line.is_empty());
    match (first, last) {
        (Some(first), Some(last)) => lines[first..=last].join("\n"),
        _ => String::new()
    }
}

/// Full-content identity for normalized text.
#[must_use]
pub fn text_identity(text: &str) -> ContentIdentity {
    ContentIdentity::new(format!(
        "{TEXT_SCHEME}:{}",
        compute_content_hash(&canonicalize_text(text))
    ))
}

/// Partial-byte fingerprint for binary audio.
///
/// Mixes in the total length so two files sharing a prefix but differing in
/// size never collide.
#[must_use]
pub fn audio_fingerprint(payload: &[u8], prefix_len: usize) -> ContentIdentity {
    let mut hasher = Sha256::new();
    hasher.update((payload.len() as u64).to_le_bytes());
    hasher.update(&payload[..payload.len().min(prefix_len)]);
    ContentIdentity::new(format!("{AUDIO_SCHEME}:{}", hex::encode(hasher.finalize())))
}

/// Time-ordered capture identifier (UUID v7).
#[must_use]
pub fn generate_capture_id() -> CaptureId {
    CaptureId::new(Uuid::now_v7().to_string())
}
