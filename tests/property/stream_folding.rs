//! Property-based tests for reply folding and retry timing.
//!
//! Uses proptest to verify:
//! 1. A delta stream followed by `assistant_done` folds into exactly one
//!    transcript entry whose text is the concatenation of the deltas.
//! 2. The normalizer's stream buffer always equals the deltas seen since the
//!    last flush.
//! 3. Arbitrary inbound text never panics the normalizer.
//! 4. Backoff delays never decrease and never exceed the cap.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use proptest::prelude::*;
use recipechat::normalize::{Inbound, Normalizer};
use recipechat::transcript::{Role, Transcript};
use recipechat::transport::backoff::ReconnectConfig;
use recipechat_proto::envelope::InboundEnvelope;
use recipechat_proto::message::ChatMessage;

/// Strategy for generating delta chunks, including empty ones.
fn arb_chunks() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(".{0,16}", 1..24)
}

proptest! {
    #[test]
    fn deltas_fold_into_one_entry(chunks in arb_chunks()) {
        let mut transcript = Transcript::new();
        for chunk in &chunks {
            transcript.apply(&ChatMessage::delta(chunk.clone()));
        }
        transcript.apply(&ChatMessage::AssistantDone);

        prop_assert_eq!(transcript.len(), 1);
        let entry = &transcript.entries()[0];
        prop_assert_eq!(entry.role, Role::Assistant);
        prop_assert_eq!(&entry.text, &chunks.concat());
        prop_assert!(transcript.active_stream().is_none());
    }

    #[test]
    fn consecutive_streams_stay_separate(first in arb_chunks(), second in arb_chunks()) {
        let mut transcript = Transcript::new();
        for chunk in &first {
            transcript.apply(&ChatMessage::delta(chunk.clone()));
        }
        transcript.apply(&ChatMessage::AssistantDone);
        for chunk in &second {
            transcript.apply(&ChatMessage::delta(chunk.clone()));
        }

        prop_assert_eq!(transcript.len(), 2);
        prop_assert_eq!(&transcript.entries()[0].text, &first.concat());
        prop_assert_eq!(&transcript.entries()[1].text, &second.concat());
        prop_assert_eq!(transcript.active_stream(), Some(1));
    }

    #[test]
    fn stream_buffer_tracks_deltas(chunks in arb_chunks()) {
        let mut normalizer = Normalizer::new();
        let mut expected = String::new();
        for chunk in &chunks {
            let out = normalizer.apply(InboundEnvelope::AssistantDelta { text: chunk.clone() });
            prop_assert_eq!(out, ChatMessage::delta(chunk.clone()));
            expected.push_str(chunk);
            prop_assert_eq!(normalizer.stream_text(), Some(expected.as_str()));
        }
        prop_assert_eq!(normalizer.apply(InboundEnvelope::AssistantDone), ChatMessage::AssistantDone);
        prop_assert!(!normalizer.is_streaming());
    }

    #[test]
    fn arbitrary_text_never_panics(raw in ".{0,256}") {
        let mut normalizer = Normalizer::new();
        let message = normalizer.normalize(Inbound::from(raw));
        prop_assert!(!matches!(message, ChatMessage::User(_)));
    }

    #[test]
    fn arbitrary_typed_objects_never_panic(kind in "[a-z_]{0,24}", payload in ".{0,64}") {
        let raw = serde_json::json!({ "type": kind, "text": payload, "message": payload }).to_string();
        let mut normalizer = Normalizer::new();
        let message = normalizer.normalize(Inbound::from(raw));
        prop_assert!(!matches!(message, ChatMessage::User(_)));
    }

    #[test]
    fn backoff_is_monotonic_and_capped(
        initial_ms in 1u64..2_000,
        cap_ms in 1u64..60_000,
        attempts in 1u32..64,
    ) {
        let policy = ReconnectConfig::default()
            .initial_delay(Duration::from_millis(initial_ms))
            .max_delay(Duration::from_millis(cap_ms));
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_delay);
            previous = delay;
        }
        prop_assert_eq!(
            policy.delay_for_attempt(0),
            Duration::from_millis(initial_ms.min(cap_ms))
        );
    }
}
