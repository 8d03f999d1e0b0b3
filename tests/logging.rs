//! Warnings emitted for records the bridge drops or cannot act on.

use log::Level;
use mudbridge::{
    dispatch::Dispatcher,
    message::{Message, ProcessReply},
    process::Pid,
    reassembler::{FrameReassembler, ReassemblerConfig},
    synchronizer::Synchronizer,
};
use mudbridge_testing::{LoggerHandle, RecordingContext, logger};
use rstest::rstest;
use serial_test::serial;

fn assert_logged(logger: &mut LoggerHandle, needle: &str) {
    let messages = logger.drain_at(Level::Warn);
    assert!(
        messages.iter().any(|message| message.contains(needle)),
        "expected a warning containing {needle:?}, got {messages:?}"
    );
}

#[rstest]
#[serial(bridge_logs)]
fn unknown_process_reply_is_logged(mut logger: LoggerHandle) {
    logger.clear();
    let dispatcher: Dispatcher<RecordingContext> = Dispatcher::new();
    let mut ctx = RecordingContext::named("Mud");
    let reply = ProcessReply::new(Pid::new(9).expect("non-zero"));
    dispatcher.dispatch(&mut ctx, Message::Process(reply));
    assert_logged(&mut logger, "trigger for unknown process");
}

#[rstest]
#[serial(bridge_logs)]
fn unsupported_record_shape_is_logged(mut logger: LoggerHandle) {
    logger.clear();
    let mut reassembler = FrameReassembler::default();
    assert_eq!(reassembler.feed("{\"type\":\"login\"}\n").count(), 0);
    assert_logged(&mut logger, "dropping record of unsupported shape");
}

#[rstest]
#[serial(bridge_logs)]
fn oversized_fragment_is_logged(mut logger: LoggerHandle) {
    logger.clear();
    let mut reassembler = FrameReassembler::new(ReassemblerConfig::default().max_fragment_len(8));
    assert_eq!(reassembler.feed("{\"type\":\"command\"").count(), 0);
    assert!(!reassembler.has_pending());
    assert_logged(&mut logger, "fragment exceeds maximum length");
}

#[rstest]
#[serial(bridge_logs)]
#[tokio::test(flavor = "current_thread")]
async fn panicking_task_is_logged(mut logger: LoggerHandle) {
    logger.clear();
    let mut barrier: Synchronizer<(), (), String> = Synchronizer::new();
    barrier
        .add_function(|_: &(), _reporter| panic!("dice fell off the table"), None)
        .expect("idle");
    barrier.run(&()).expect("run");
    assert_logged(&mut logger, "synchronizer task panicked");
}
