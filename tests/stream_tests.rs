//! Tests for the stream decoder and the markdown renderer that consumes its
//! output: split-read invariance, follow-up limits, rendering of partial text.

use proptest::prelude::*;

use surgical_review::markdown::render_markdown;
use surgical_review::stream::{limit_follow_ups, parse_frame, ChatEvent, FrameDecoder, MAX_FOLLOW_UPS};

const BODY: &str = concat!(
    "data: {\"type\":\"init\",\"message\":\"connected\"}\n\n",
    "data: {\"type\":\"message\",\"content\":\"Bleeding was controlled \"}\n\n",
    "data: {\"type\":\"message\",\"content\":\"with **bipolar** cautery. 出血量少\"}\n\n",
    ": keep-alive\n\n",
    "data: {\"type\":\"complete\",\"follow_up_questions\":[\"Why?\",\"How?\"]}\n\n",
);

fn decode_in_pieces(body: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut decoder = FrameDecoder::new();
    let mut blocks = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        let cut = cut.clamp(start, body.len());
        blocks.extend(decoder.push(&body[start..cut]));
        start = cut;
    }
    blocks.extend(decoder.push(&body[start..]));
    blocks.extend(decoder.finish());
    blocks
}

proptest! {
    #[test]
    fn prop_split_reads_yield_same_blocks(mut cuts in proptest::collection::vec(0usize..BODY.len(), 0..8)) {
        cuts.sort_unstable();
        let whole = decode_in_pieces(BODY.as_bytes(), &[]);
        let pieces = decode_in_pieces(BODY.as_bytes(), &cuts);
        prop_assert_eq!(whole, pieces);
    }

    #[test]
    fn prop_crlf_framing_matches_lf(cut in 0usize..BODY.len()) {
        let crlf = BODY.replace('\n', "\r\n");
        let cut = cut.min(crlf.len());
        let lf = decode_in_pieces(BODY.as_bytes(), &[]);
        let split = decode_in_pieces(crlf.as_bytes(), &[cut]);
        prop_assert_eq!(lf, split);
    }
}

#[test]
fn test_body_decodes_to_expected_events() {
    let events: Vec<ChatEvent> = decode_in_pieces(BODY.as_bytes(), &[])
        .iter()
        .filter_map(|b| parse_frame(b).unwrap())
        .collect();
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], ChatEvent::Init { .. }));
    match &events[2] {
        ChatEvent::Message { content } => assert!(content.ends_with("出血量少")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        events[3],
        ChatEvent::Complete { follow_up_questions: vec!["Why?".to_string(), "How?".to_string()] }
    );
}

#[test]
fn test_multibyte_char_split_across_reads() {
    let bytes = BODY.as_bytes();
    let at = BODY.find("出").unwrap() + 1;
    let blocks = decode_in_pieces(bytes, &[at]);
    assert!(blocks.iter().any(|b| b.contains("出血量少")));
}

#[test]
fn test_five_follow_ups_keep_first_three() {
    let five: Vec<String> = (1..=5).map(|i| format!("q{}", i)).collect();
    let kept = limit_follow_ups(&five);
    assert_eq!(kept.len(), MAX_FOLLOW_UPS);
    assert_eq!(kept, vec!["q1", "q2", "q3"]);
}

#[test]
fn test_malformed_frame_is_an_error_not_a_panic() {
    assert!(parse_frame("data: {\"type\":\"message\",\"content\":").is_err());
    assert_eq!(parse_frame(": comment").unwrap(), None);
}

#[test]
fn test_concatenated_messages_render_like_whole_text() {
    let html = render_markdown(&["A", "B"].concat());
    assert_eq!(html, render_markdown("AB"));
}

#[test]
fn test_partial_markdown_renders_without_losing_text() {
    let partial = "Use **bipo";
    let html = render_markdown(partial);
    assert!(html.contains("bipo"), "{}", html);
}

#[test]
fn test_render_escapes_script() {
    let html = render_markdown("<script>alert(1)</script>");
    assert!(!html.contains("<script>"));
    assert!(html.contains("&lt;script&gt;"));
}
