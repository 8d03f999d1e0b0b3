//! End-to-end coverage of a dice command that waits on a correlated reply.

use std::time::Duration;

use mudbridge::{
    config::BridgeConfig,
    connection::{Bridge, MudContext},
    dispatch::{Context, Dispatched, Dispatcher},
    message::{Command, Message, ProcessReply},
    process::{Pid, TriggerOutcome},
};
use mudbridge_testing::{RecordingContext, chunks_of, command_line, drive_mud, process_line};
use rstest::rstest;
use serde_json::json;

#[test]
fn roll_command_resumes_parent_after_child_reply() {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add(r"^roll\b", [("mud", ".*")], |ctx: &mut RecordingContext, matched| {
            ctx.hits.push(matched.argument(0).unwrap_or_default().to_owned());
            let requester = matched.requester().unwrap_or_default().to_owned();
            let parent = ctx
                .processes
                .create(
                    |table, fired| {
                        let mut hits = fired.payload;
                        hits.push_str(" fired");
                        assert!(table.get(fired.pid).is_some());
                        assert!(fired.incoming.is_none());
                        assert_eq!(hits, "#123 total=11 fired");
                    },
                    requester,
                )
                .expect("parent pid");
            ctx.processes
                .spawn(
                    parent,
                    |table, fired| {
                        let total = fired
                            .incoming
                            .as_ref()
                            .and_then(|reply| reply.get("total"))
                            .and_then(serde_json::Value::as_u64)
                            .unwrap_or_default();
                        let ancestor = fired.ancestor.expect("child has a parent");
                        if let Some(payload) = table.payload_mut(ancestor) {
                            payload.push_str(&format!(" total={total}"));
                        }
                    },
                    String::new(),
                )
                .expect("child pid");
        })
        .expect("route");

    let mut ctx = RecordingContext::named("Mud");
    let command = Command::new("roll 3d6")
        .with_data("3d6")
        .with_requester("#123");
    assert_eq!(
        dispatcher.dispatch(&mut ctx, Message::Command(command)),
        Dispatched::Handled(0)
    );
    assert_eq!(ctx.hits, vec!["3d6"]);

    let parent = Pid::new(1).expect("non-zero");
    let child = Pid::new(2).expect("non-zero");
    assert_eq!(ctx.processes.children(parent), Some(&[child][..]));

    let reply = ProcessReply::new(child).with_field("total", 11);
    assert_eq!(
        dispatcher.dispatch(&mut ctx, Message::Process(reply)),
        Dispatched::Correlated(TriggerOutcome::Fired)
    );
    assert!(ctx.processes().get(parent).is_none());
    assert!(ctx.processes().get(child).is_none());
    assert!(ctx.processes().is_empty());
}

fn dice_routes() -> Dispatcher<MudContext<String>> {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add(
            r"^roll\b",
            [("mud", r"^(\d+)d(\d+)$")],
            |ctx: &mut MudContext<String>, matched| {
                let Some(requester) = matched.requester().map(str::to_owned) else {
                    return;
                };
                let dice = matched.data().to_owned();
                let outbox = ctx.outbox().clone();
                let mush = ctx.instructions();
                let fields = [mush.name_of(&requester, false)];
                let result = ctx.request(&fields, requester, move |_, fired| {
                    let name = fired
                        .incoming
                        .as_ref()
                        .and_then(|reply| reply.get("name"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("Someone")
                        .to_owned();
                    outbox.send(mush.emit_to_user(&fired.payload, &format!("{name} rolls {dice}.")));
                });
                if result.is_err() {
                    ctx.emit_to_user(matched.requester().unwrap_or_default(), "Busy, try again.");
                }
            },
        )
        .expect("route");
    dispatcher
}

#[rstest]
#[case(1024)]
#[case(7)]
#[case(1)]
#[tokio::test]
async fn roll_round_trip_over_stream(#[case] chunk_size: usize) {
    let stream = [
        command_line("roll", "3d6", "#12"),
        process_line(1, [("name", json!("Bob"))]),
        command_line("dance", "", "#12"),
    ]
    .concat();

    let lines = drive_mud(dice_routes(), &BridgeConfig::default(), chunks_of(&stream, chunk_size))
        .await
        .expect("drive");

    assert_eq!(
        lines,
        vec![
            "think u(TOJSON,type:process,pid:1,name:[name(#12)])",
            "@pemit #12=Bob rolls 3d6.",
            "@pemit #12=[+dance] Command not found.",
        ]
    );
}

#[tokio::test]
async fn reply_for_finished_process_is_ignored() {
    let stream = [
        command_line("roll", "2d4", "#5"),
        process_line(1, [("name", json!("Ann"))]),
        process_line(1, [("name", json!("Ann"))]),
    ]
    .concat();

    let lines = drive_mud(dice_routes(), &BridgeConfig::default(), vec![stream])
        .await
        .expect("drive");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1], "@pemit #5=Ann rolls 2d4.");
}

#[tokio::test]
async fn bridge_stops_on_cancellation() {
    let (outbox, _rx) = mudbridge::outbound::Outbox::channel();
    let config = BridgeConfig::default();
    let context: MudContext<String> = MudContext::new(&config, outbox);
    let mut bridge = Bridge::new(dice_routes(), context, &config);
    let token = bridge.shutdown_token();

    let (_client, server) = tokio::io::duplex(64);
    let run = bridge.run(server);
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("run stops once cancelled")
        .expect("clean stop");
}

#[test]
fn feed_dispatches_records_split_across_chunks() {
    let (outbox, mut rx) = mudbridge::outbound::Outbox::channel();
    let config = BridgeConfig::default();
    let mut bridge = Bridge::new(dice_routes(), MudContext::new(&config, outbox), &config);

    let stream = command_line("roll", "1d20", "#9");
    let (head, tail) = stream.split_at(25);
    assert_eq!(bridge.feed(head), 0);
    assert_eq!(bridge.feed(tail), 1);
    assert_eq!(bridge.context_mut().processes().len(), 1);
    assert_eq!(
        rx.try_recv().expect("request sent"),
        "think u(TOJSON,type:process,pid:1,name:[name(#9)])"
    );
}
