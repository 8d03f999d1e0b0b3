//! Unit tests for command routing and reply correlation.

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::{message::ProcessReply, process::Pid};

#[derive(Default)]
struct Ctx {
    name: &'static str,
    groups: Vec<&'static str>,
    processes: ProcessTable<Vec<String>, Reply>,
    hits: Vec<String>,
    misses: Vec<String>,
}

impl Context for Ctx {
    type Payload = Vec<String>;

    fn name(&self) -> &str { self.name }

    fn processes(&mut self) -> &mut ProcessTable<Vec<String>, Reply> { &mut self.processes }

    fn route_miss(&mut self, command: &Command) { self.misses.push(command.path.clone()); }

    fn authorize(&self, _command: &Command, access: &[String]) -> bool {
        access
            .iter()
            .all(|group| self.groups.contains(&group.as_str()))
    }
}

#[fixture]
fn mud() -> Ctx {
    Ctx {
        name: "Mud",
        ..Ctx::default()
    }
}

fn record(tag: &'static str) -> impl Fn(&mut Ctx, RouteMatch<'_>) + Send + Sync + 'static {
    move |ctx, matched| {
        let args: Vec<_> = matched.arguments.iter().flatten().cloned().collect();
        ctx.hits.push(format!("{tag}:{}", args.join(",")));
    }
}

fn command(path: &str, data: &str) -> Message {
    Message::Command(Command::new(path).with_data(data).with_requester("#1"))
}

#[rstest]
fn first_matching_route_wins(mut mud: Ctx) {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add("^roll", [("mud", r"^(\d+)d(\d+)$")], record("dice"))
        .expect("route")
        .add("^roll$", [("mud", "(.*)")], record("fallback"))
        .expect("route");

    assert_eq!(
        dispatcher.dispatch(&mut mud, command("roll", "3d6")),
        Dispatched::Handled(0)
    );
    assert_eq!(
        dispatcher.dispatch(&mut mud, command("roll", "lots")),
        Dispatched::Handled(1)
    );
    assert_eq!(mud.hits, vec!["dice:3d6,3,6", "fallback:lots,lots"]);
    assert!(mud.misses.is_empty());
}

#[rstest]
fn routes_without_the_context_are_skipped(mut mud: Ctx) {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add("^who$", [("web", ".*")], record("web"))
        .expect("route")
        .add("^who$", [("MUD", ".*")], record("mud"))
        .expect("route");

    assert_eq!(
        dispatcher.dispatch(&mut mud, command("who", "")),
        Dispatched::Handled(1)
    );
    assert_eq!(mud.hits, vec!["mud:"]);
}

#[rstest]
fn unmatched_command_calls_route_miss(mut mud: Ctx) {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .add("^roll$", [("mud", r"^\d+d\d+$")], record("dice"))
        .expect("route");

    assert_eq!(
        dispatcher.dispatch(&mut mud, command("roll", "many")),
        Dispatched::Missed
    );
    assert_eq!(
        dispatcher.dispatch(&mut mud, command("dance", "")),
        Dispatched::Missed
    );
    assert_eq!(mud.misses, vec!["roll", "dance"]);
    assert!(mud.hits.is_empty());
}

#[rstest]
fn access_groups_gate_routes(mut mud: Ctx) {
    let mut dispatcher = Dispatcher::new();
    let staff_only = Route::builder()
        .path("^locus/adddefender$")
        .and_then(|b| b.context("mud", "^(\\w+)$"))
        .and_then(|b| b.access("staff"))
        .and_then(|b| b.access("werewolf"))
        .map(|b| b.handler(record("admin")))
        .and_then(crate::route::RouteBuilder::build)
        .expect("route");
    dispatcher.register(staff_only);

    mud.groups = vec!["staff"];
    assert_eq!(
        dispatcher.dispatch(&mut mud, command("locus/adddefender", "Bob")),
        Dispatched::Missed
    );

    mud.groups = vec!["werewolf", "staff"];
    assert_eq!(
        dispatcher.dispatch(&mut mud, command("locus/adddefender", "Bob")),
        Dispatched::Handled(0)
    );
    assert_eq!(mud.hits, vec!["admin:Bob,Bob"]);
}

#[rstest]
fn process_reply_resumes_waiting_callback(mut mud: Ctx) {
    let pid = mud
        .processes
        .create(
            |_table, fired| {
                let name = fired
                    .incoming
                    .as_ref()
                    .and_then(|reply| reply.get("name"))
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_owned();
                assert_eq!(fired.payload, vec!["#1".to_owned()]);
                assert_eq!(name, "Bob");
            },
            vec!["#1".to_owned()],
        )
        .expect("pid");

    let dispatcher = Dispatcher::<Ctx>::new();
    let reply = Message::Process(ProcessReply::new(pid).with_field("name", json!("Bob")));
    assert_eq!(
        dispatcher.dispatch(&mut mud, reply),
        Dispatched::Correlated(TriggerOutcome::Fired)
    );
    assert!(mud.processes.is_empty());
}

#[rstest]
fn reply_for_unknown_process_is_dropped(mut mud: Ctx) {
    let dispatcher = Dispatcher::<Ctx>::new();
    let pid = Pid::new(99).expect("non-zero");
    assert_eq!(
        dispatcher.dispatch(&mut mud, Message::Process(ProcessReply::new(pid))),
        Dispatched::Correlated(TriggerOutcome::Unknown)
    );
    assert!(mud.misses.is_empty());
}

#[test]
fn add_propagates_route_errors() {
    let mut dispatcher = Dispatcher::<Ctx>::new();
    assert!(matches!(
        dispatcher.add("(", [("mud", ".*")], record("x")),
        Err(RouteError::InvalidPattern { .. })
    ));
    assert!(matches!(
        dispatcher.add("^x$", Vec::<(&str, &str)>::new(), record("x")),
        Err(RouteError::NoContexts)
    ));
    assert!(dispatcher.is_empty());
}
