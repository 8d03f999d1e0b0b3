//! Unit tests for inbound record reassembly.

use std::time::Duration;

use proptest::prelude::*;
use rstest::{fixture, rstest};
use tokio::time::Instant;

use super::*;
use crate::message::Command;

const ROLL: &str = r##"{"type":"command","path":"roll","data":"3d6","requester":"#12"}"##;
const REPLY: &str = r#"{"type":"process","pid":4,"name":"Bob"}"#;
const SPACED: &str = r##"{"type":"command","path":"job/create","data":"It  broke badly","requester":"#3"}"##;

#[fixture]
fn reassembler() -> FrameReassembler { FrameReassembler::default() }

fn roll() -> Message {
    Message::Command(
        Command::new("roll")
            .with_data("3d6")
            .with_requester("#12"),
    )
}

#[rstest]
fn whole_record_decodes_in_one_chunk(mut reassembler: FrameReassembler) {
    let messages: Vec<_> = reassembler.feed(&format!("{ROLL}\n")).collect();
    assert_eq!(messages, vec![roll()]);
    assert!(!reassembler.has_pending());
}

#[rstest]
#[case("\n")]
#[case("\r\n")]
#[case("\r")]
fn line_endings_are_normalised(mut reassembler: FrameReassembler, #[case] ending: &str) {
    let chunk = format!("{ROLL}{ending}{REPLY}{ending}");
    let messages: Vec<_> = reassembler.feed(&chunk).collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0], roll());
    assert_eq!(messages[1].kind(), "process");
}

#[rstest]
fn record_split_mid_token_is_joined(mut reassembler: FrameReassembler) {
    let (head, tail) = ROLL.split_at(20);
    assert_eq!(reassembler.feed(head).count(), 0);
    assert_eq!(reassembler.pending(), head);
    let messages: Vec<_> = reassembler.feed(tail).collect();
    assert_eq!(messages, vec![roll()]);
    assert!(!reassembler.has_pending());
}

#[rstest]
fn record_split_across_lines_is_joined(mut reassembler: FrameReassembler) {
    let (head, tail) = ROLL.split_at(31);
    let chunk = format!("{head}\n{tail}\n");
    let messages: Vec<_> = reassembler.feed(&chunk).collect();
    assert_eq!(messages, vec![roll()]);
}

#[rstest]
fn blank_lines_are_skipped(mut reassembler: FrameReassembler) {
    let messages: Vec<_> = reassembler.feed(&format!("\n\n  \n{ROLL}\n\n")).collect();
    assert_eq!(messages.len(), 1);
    assert!(!reassembler.has_pending());
}

#[rstest]
#[case(&[r#"{"type":"command","path":"roll"#, " ", r#"3d6"}"#, "\n"][..], "roll 3d6")]
#[case(&[r#"{"type":"command","path":"a"#, " ", " ", r#"b"}"#, "\n"][..], "a  b")]
#[case(&[r#"{"type":"command","path":"a"#, "  ", r#"b"}"#, "\n"][..], "a  b")]
fn whitespace_chunk_inside_fragment_is_kept(
    mut reassembler: FrameReassembler,
    #[case] chunks: &[&str],
    #[case] path: &str,
) {
    let start = Instant::now();
    let mut decoded = Vec::new();
    for chunk in chunks {
        decoded.extend(reassembler.feed_at(chunk, start));
    }
    assert_eq!(decoded, vec![Message::Command(Command::new(path))]);
    assert!(!reassembler.has_pending());
}

#[rstest]
fn whitespace_between_records_is_not_carried(mut reassembler: FrameReassembler) {
    assert_eq!(reassembler.feed(" ").count(), 0);
    assert!(!reassembler.has_pending());
    let messages: Vec<_> = reassembler.feed(&format!("{ROLL}\n")).collect();
    assert_eq!(messages, vec![roll()]);
}

#[rstest]
fn complete_line_supersedes_carried_fragment(mut reassembler: FrameReassembler) {
    assert_eq!(reassembler.feed(r#"{"type":"comm"#).count(), 0);
    let messages: Vec<_> = reassembler.feed(&format!("\n{ROLL}\n")).collect();
    assert_eq!(messages, vec![roll()]);
    assert!(!reassembler.has_pending());
}

#[rstest]
#[case("[1,2,3]")]
#[case("42")]
#[case("\"text\"")]
#[case("not json at all")]
fn non_object_text_is_carried(mut reassembler: FrameReassembler, #[case] line: &str) {
    assert_eq!(reassembler.feed(line).count(), 0);
    assert_eq!(reassembler.pending(), line);
}

#[rstest]
fn unsupported_object_is_dropped_without_carry(mut reassembler: FrameReassembler) {
    let chunk = format!("{{\"type\":\"emote\",\"text\":\"waves\"}}\n{ROLL}\n");
    let messages: Vec<_> = reassembler.feed(&chunk).collect();
    assert_eq!(messages, vec![roll()]);
    assert!(!reassembler.has_pending());
}

#[rstest]
fn fragment_is_discarded_after_quiescence(mut reassembler: FrameReassembler) {
    let start = Instant::now();
    let (head, tail) = ROLL.split_at(20);
    assert_eq!(reassembler.feed_at(head, start).count(), 0);

    let late = start + DEFAULT_QUIESCENCE + Duration::from_millis(1);
    assert_eq!(reassembler.feed_at(tail, late).count(), 0);
    assert_eq!(reassembler.pending(), tail);
}

#[rstest]
fn fragment_survives_within_quiescence(mut reassembler: FrameReassembler) {
    let start = Instant::now();
    let (head, middle) = ROLL.split_at(10);
    let (middle, tail) = middle.split_at(10);
    let step = DEFAULT_QUIESCENCE / 2;

    assert_eq!(reassembler.feed_at(head, start).count(), 0);
    assert_eq!(reassembler.feed_at(middle, start + step).count(), 0);
    let messages: Vec<_> = reassembler.feed_at(tail, start + step * 3).collect();
    assert_eq!(messages, vec![roll()]);
}

#[test]
fn oversized_fragment_is_discarded() {
    let mut reassembler = FrameReassembler::new(ReassemblerConfig::default().max_fragment_len(16));
    assert_eq!(reassembler.feed("{\"type\":").count(), 0);
    assert_eq!(reassembler.feed("\"command\",\"path\"").count(), 0);
    assert_eq!(reassembler.pending(), "\"command\",\"path\"");

    assert_eq!(reassembler.feed(&"x".repeat(17)).count(), 0);
    assert!(!reassembler.has_pending());
}

#[rstest]
fn clear_discards_pending_text(mut reassembler: FrameReassembler) {
    assert_eq!(reassembler.feed("{\"type\"").count(), 0);
    reassembler.clear();
    assert!(!reassembler.has_pending());
}

#[rstest]
fn dropping_frames_early_discards_remaining_lines(mut reassembler: FrameReassembler) {
    let chunk = format!("{ROLL}\n{REPLY}\n");
    let first = reassembler.feed(&chunk).next();
    assert_eq!(first, Some(roll()));
    assert_eq!(reassembler.feed("").count(), 0);
}

#[test]
fn config_clamps_zero_length() {
    assert_eq!(ReassemblerConfig::default().max_fragment_len(0).max_fragment_len, 1);
}

proptest! {
    #[test]
    fn chunking_does_not_change_decoded_sequence(
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let stream = format!("{ROLL}\n{SPACED}\n{REPLY}\n{SPACED}\n");
        let mut points: Vec<usize> = cuts
            .iter()
            .map(|cut| cut.index(stream.len() + 1))
            .collect();
        points.sort_unstable();
        points.dedup();

        let start = Instant::now();
        let mut reassembler = FrameReassembler::default();
        let mut decoded = Vec::new();
        let mut previous = 0;
        for point in points.into_iter().chain(std::iter::once(stream.len())) {
            decoded.extend(reassembler.feed_at(&stream[previous..point], start));
            previous = point;
        }

        let mut whole = FrameReassembler::default();
        let expected: Vec<_> = whole.feed_at(&stream, start).collect();
        prop_assert_eq!(expected.len(), 4);
        prop_assert_eq!(decoded, expected);
        prop_assert!(!reassembler.has_pending());
    }
}
