//! Deterministic Markdown for exported captures.
//!
//! Output depends only on fields that are fixed once a capture is processed,
//! so rendering the same capture twice yields identical bytes. Crash recovery
//! relies on that to recognise an orphaned file as its own.

use capture_core::{Capture, ErrorKind, Stage};

pub fn file_name(capture: &Capture, extension: &str) -> String {
    format!("{}.{extension}", capture.id)
}

pub fn render(capture: &Capture) -> Vec<u8> {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("capture_id: {}\n", capture.id));
    out.push_str(&format!("source: {}\n", capture.source));
    out.push_str(&format!("external_id: {}\n", quoted(&capture.external_id)));
    if let Some(identity) = &capture.content_identity {
        out.push_str(&format!("content_identity: {identity}\n"));
    }
    out.push_str(&format!("discovered_at: {}\n", timestamp(capture.discovered_at)));
    if capture.is_placeholder {
        out.push_str("placeholder: true\n");
    }
    out.push_str("---\n\n");

    let body = capture.raw_content.as_deref().unwrap_or_default().trim_end();
    out.push_str(body);
    out.push('\n');
    out.into_bytes()
}

/// Body stored for a capture whose content could not be produced.
pub fn placeholder_body(
    capture: &Capture,
    stage: Stage,
    kind: ErrorKind,
    attempts: u32,
    message: &str
) -> String {
    format!(
        "> [!warning] Capture could not be processed\n\
         > The {source} item `{external_id}` failed at {stage} with {kind} \
         after {attempts} attempt(s).\n\
         > Last error: {message}\n",
        source = capture.source,
        external_id = capture.external_id,
        message = message.lines().next().unwrap_or_default()
    )
}

fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value.escape_default()))
}

fn timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture_core::{CaptureId, CaptureStatus, ContentIdentity, Source};

    fn capture() -> Capture {
        Capture {
            id: CaptureId::new("0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b"),
            source: Source::Voice,
            external_id: "Voice Memos/2024-06-01 \"idea\".m4a".to_string(),
            payload_ref: "icloud://memo-1".to_string(),
            content_identity: Some(ContentIdentity::new("audio-fp:abc")),
            raw_content: Some("Remember to call Sam.\n\n".to_string()),
            is_placeholder: false,
            status: CaptureStatus::Processed,
            attempt_count: 2,
            last_attempt_at: Some(5),
            source_metadata: serde_json::Value::Null,
            quarantine_reason: None,
            dlq_cleared_through: 0,
            discovered_at: 1_717_200_000_000,
            created_at: 1,
            updated_at: 2
        }
    }

    #[test]
    fn test_render_is_deterministic_and_ignores_bookkeeping() {
        let a = capture();
        let mut b = capture();
        b.attempt_count = 0;
        b.updated_at = 99;
        assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn test_render_front_matter() {
        let text = String::from_utf8(render(&capture())).unwrap();
        assert!(text.starts_with("---\ncapture_id: 0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b\n"));
        assert!(text.contains("external_id: \"Voice Memos/2024-06-01 \\\"idea\\\".m4a\"\n"));
        assert!(text.contains("discovered_at: 2024-06-01T00:00:00.000Z\n"));
        assert!(text.ends_with("---\n\nRemember to call Sam.\n"));
        assert!(!text.contains("placeholder"));
    }

    #[test]
    fn test_placeholder_body_mentions_failure() {
        let body = placeholder_body(
            &capture(),
            Stage::Transcribe,
            ErrorKind::ResourceCorrupt,
            1,
            "invalid audio header\nstack..."
        );
        assert!(body.contains("failed at transcribe with ResourceCorrupt after 1 attempt(s)"));
        assert!(body.contains("Last error: invalid audio header\n"));
        assert!(!body.contains("stack"));
    }
}
