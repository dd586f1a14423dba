//! Ingestion boundary for translation pipeline producers.
//!
//! Producers push raw result payloads over their own connections. This
//! module is the only place those payloads are parsed and validated;
//! anything malformed is refused here, with the raw payload logged, so
//! bad pipeline output never reaches a room task.

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::protocol::messages;
use crate::relay::event::Event;

/// Parse a raw translation-result payload into a relay event.
///
/// `producer` becomes the event's sender identity.
pub fn parse_translation(payload: &[u8], producer: &str) -> Result<Event> {
    let msg: messages::TranslationResult = parse_payload(payload, "translation result")?;

    if msg.room_id.is_empty() {
        return reject(payload, "translation result without room_id");
    }
    if msg.sentence.is_empty() {
        return reject(payload, "translation result with empty sentence");
    }

    Ok(Event::translation(
        msg.room_id,
        producer,
        msg.sentence,
        msg.completed_at,
    ))
}

/// Parse a raw video-ready payload into a relay event.
pub fn parse_video(payload: &[u8], producer: &str) -> Result<Event> {
    let msg: messages::VideoReady = parse_payload(payload, "video notification")?;

    if msg.room_id.is_empty() {
        return reject(payload, "video notification without room_id");
    }
    if msg.url.is_empty() {
        return reject(payload, "video notification with empty url");
    }

    Ok(Event::video(msg.room_id, producer, msg.url, msg.recorded_at))
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| {
        warn!(
            raw = %String::from_utf8_lossy(payload),
            error = %e,
            "dropping malformed {what} payload"
        );
        RelayError::invalid_event(format!("malformed {what}: {e}"))
    })
}

fn reject<T>(payload: &[u8], reason: &str) -> Result<T> {
    warn!(raw = %String::from_utf8_lossy(payload), "dropping {reason}");
    Err(RelayError::invalid_event(reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::event::EventBody;

    #[test]
    fn test_parse_translation() {
        let payload =
            br#"{"room_id":"r1","sentence":"good morning","completed_at":1700000000123}"#;

        let event = parse_translation(payload, "sign-pipeline").unwrap();
        assert_eq!(event.room_id, "r1");
        assert_eq!(event.sender, "sign-pipeline");
        assert_eq!(event.origin_ts, 1700000000123);
        assert!(event.is_result());
        match event.body {
            EventBody::TranslationResult { ref sentence } => {
                assert_eq!(sentence, "good morning")
            }
            ref other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parse_video() {
        let payload =
            br#"{"room_id":"r1","url":"https://cdn/v/1.mp4","recorded_at":1700000000456}"#;

        let event = parse_video(payload, "renderer").unwrap();
        assert_eq!(event.room_id, "r1");
        assert!(event.is_result());
        match event.body {
            EventBody::VideoReady { ref url } => assert_eq!(url, "https://cdn/v/1.mp4"),
            ref other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_is_refused() {
        assert!(parse_translation(b"not json at all", "p").is_err());
        assert!(parse_video(b"{\"room_id\":", "p").is_err());
    }

    #[test]
    fn test_missing_fields_are_refused() {
        // Valid JSON, wrong shape.
        assert!(parse_translation(br#"{"sentence":"hi"}"#, "p").is_err());
        assert!(parse_video(br#"{"room_id":"r1"}"#, "p").is_err());
    }

    #[test]
    fn test_empty_fields_are_refused() {
        assert!(
            parse_translation(br#"{"room_id":"","sentence":"hi","completed_at":1}"#, "p").is_err()
        );
        assert!(
            parse_translation(br#"{"room_id":"r1","sentence":"","completed_at":1}"#, "p").is_err()
        );
        assert!(parse_video(br#"{"room_id":"r1","url":"","recorded_at":1}"#, "p").is_err());
    }

    #[test]
    fn test_same_sentence_fingerprints_match_across_cycles() {
        let first = parse_translation(
            br#"{"room_id":"r1","sentence":"hello","completed_at":100}"#,
            "p",
        )
        .unwrap();
        let second = parse_translation(
            br#"{"room_id":"r1","sentence":"hello","completed_at":2000}"#,
            "p",
        )
        .unwrap();

        // The dedup fingerprint tracks the sentence, not the cycle time.
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
