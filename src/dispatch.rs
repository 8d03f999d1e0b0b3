//! Routing of decoded records.
//!
//! The [`Dispatcher`] owns the registered routes. Commands are matched
//! against them in registration order; process replies are handed to the
//! context's [`ProcessTable`] to resume the waiting handler.

use tracing::{debug, trace};

use crate::{
    message::{Command, Message, Reply},
    metrics,
    process::{ProcessTable, TriggerOutcome},
    route::{Route, RouteError, RouteMatch},
};

/// Connection-scoped state handed to route handlers.
///
/// Implementors name the context routes declare patterns for, own the
/// process table used to correlate requests, and decide what happens when a
/// command matches no route.
pub trait Context {
    /// Payload stored alongside each pending process.
    type Payload;

    /// Name of this context, for example `Mud`. Compared case-insensitively
    /// with the contexts a route declares.
    fn name(&self) -> &str;

    /// Process table correlating outstanding requests.
    fn processes(&mut self) -> &mut ProcessTable<Self::Payload, Reply>;

    /// Called when no route matched `command`.
    fn route_miss(&mut self, command: &Command);

    /// Whether the requester of `command` may use a route requiring the
    /// `access` groups. Grants everything unless overridden.
    fn authorize(&self, command: &Command, access: &[String]) -> bool {
        let _ = (command, access);
        true
    }
}

/// What [`Dispatcher::dispatch`] did with a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// The route at this registration index handled the command.
    Handled(usize),
    /// No route matched the command.
    Missed,
    /// A process reply was delivered to the process table.
    Correlated(TriggerOutcome),
}

/// Ordered collection of routes.
///
/// # Examples
///
/// ```
/// use mudbridge::{
///     dispatch::{Context, Dispatched, Dispatcher},
///     message::{Command, Message, Reply},
///     process::ProcessTable,
/// };
///
/// #[derive(Default)]
/// struct Mud {
///     processes: ProcessTable<(), Reply>,
///     said: Vec<String>,
/// }
///
/// impl Context for Mud {
///     type Payload = ();
///     fn name(&self) -> &str { "Mud" }
///     fn processes(&mut self) -> &mut ProcessTable<(), Reply> { &mut self.processes }
///     fn route_miss(&mut self, _command: &Command) {}
/// }
///
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.add("^say$", [("mud", "^(.+)$")], |ctx: &mut Mud, matched| {
///     ctx.said.extend(matched.argument(1).map(str::to_owned));
/// })?;
///
/// let mut ctx = Mud::default();
/// let outcome = dispatcher.dispatch(&mut ctx, Message::Command(Command::new("say").with_data("hi")));
/// assert_eq!(outcome, Dispatched::Handled(0));
/// assert_eq!(ctx.said, vec!["hi"]);
/// # Ok::<(), mudbridge::route::RouteError>(())
/// ```
pub struct Dispatcher<C> {
    routes: Vec<Route<C>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self { Self { routes: Vec::new() } }
}

impl<C> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes)
            .finish()
    }
}

impl<C: Context> Dispatcher<C> {
    /// Create a dispatcher with no routes.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize { self.routes.len() }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.routes.is_empty() }

    /// Registered routes in match order.
    #[must_use]
    pub fn routes(&self) -> &[Route<C>] { &self.routes }

    /// Append a built route. Earlier routes take precedence.
    pub fn register(&mut self, route: Route<C>) -> &mut Self {
        debug!(%route, "registered route");
        self.routes.push(route);
        self
    }

    /// Build and register a route in one call.
    ///
    /// # Errors
    ///
    /// Returns any [`RouteError`] raised while building the route.
    pub fn add<'p, I, F>(&mut self, path: &str, contexts: I, handler: F) -> Result<&mut Self, RouteError>
    where
        I: IntoIterator<Item = (&'p str, &'p str)>,
        F: Fn(&mut C, RouteMatch<'_>) + Send + Sync + 'static,
    {
        let mut builder = Route::builder().path(path)?;
        for (name, pattern) in contexts {
            builder = builder.context(name, pattern)?;
        }
        let route = builder.handler(handler).build()?;
        Ok(self.register(route))
    }

    /// Route one decoded record.
    pub fn dispatch(&self, ctx: &mut C, message: Message) -> Dispatched {
        match message {
            Message::Command(command) => self.dispatch_command(ctx, &command),
            Message::Process(reply) => {
                trace!(pid = %reply.pid, "correlating process reply");
                Dispatched::Correlated(ctx.processes().trigger(reply.pid, Some(reply.fields)))
            }
        }
    }

    fn dispatch_command(&self, ctx: &mut C, command: &Command) -> Dispatched {
        let found = self.routes.iter().enumerate().find_map(|(index, route)| {
            let matched = route.matches(ctx.name(), command)?;
            ctx.authorize(command, route.access())
                .then_some((index, route, matched))
        });
        match found {
            Some((index, route, matched)) => {
                debug!(path = %command.path, index, "command matched route");
                route.handle(ctx, matched);
                Dispatched::Handled(index)
            }
            None => {
                debug!(path = %command.path, context = ctx.name(), "no route for command");
                metrics::inc_route_misses();
                ctx.route_miss(command);
                Dispatched::Missed
            }
        }
    }
}

#[cfg(test)]
mod tests;
