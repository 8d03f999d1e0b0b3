//! A [`Context`] that records what the dispatcher did.

use mudbridge::{
    dispatch::Context,
    message::{Command, Reply},
    process::ProcessTable,
    route::RouteMatch,
};

/// In-memory context collecting handler hits, misses and sent lines.
#[derive(Debug)]
pub struct RecordingContext {
    /// Context name compared with route declarations.
    pub name: String,
    /// Access groups the requester holds.
    pub groups: Vec<String>,
    /// Process table for correlated requests.
    pub processes: ProcessTable<String, Reply>,
    /// `tag:arguments` entries appended by [`RecordingContext::record`].
    pub hits: Vec<String>,
    /// Paths of commands that matched no route.
    pub misses: Vec<String>,
}

impl RecordingContext {
    /// Create a context called `name` with no access groups.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            groups: Vec::new(),
            processes: ProcessTable::new(),
            hits: Vec::new(),
            misses: Vec::new(),
        }
    }

    /// Grant an access group.
    #[must_use]
    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_owned());
        self
    }

    /// Handler that appends `tag:` followed by the matched arguments.
    pub fn record(tag: &'static str) -> impl Fn(&mut Self, RouteMatch<'_>) + Send + Sync + 'static {
        move |ctx, matched| {
            let arguments: Vec<&str> = matched.arguments.iter().flatten().map(String::as_str).collect();
            ctx.hits.push(format!("{tag}:{}", arguments.join(",")));
        }
    }
}

impl Default for RecordingContext {
    fn default() -> Self { Self::named("Mud") }
}

impl Context for RecordingContext {
    type Payload = String;

    fn name(&self) -> &str { &self.name }

    fn processes(&mut self) -> &mut ProcessTable<String, Reply> { &mut self.processes }

    fn route_miss(&mut self, command: &Command) { self.misses.push(command.path.clone()); }

    fn authorize(&self, _command: &Command, access: &[String]) -> bool {
        access.iter().all(|group| self.groups.contains(group))
    }
}
