//! Command routes.
//!
//! A [`Route`] pairs a path pattern with one argument pattern per context
//! (for example `mud`) and a handler. Routes are assembled with
//! [`RouteBuilder`], which validates every part before the route can be
//! registered with a [`Dispatcher`](crate::dispatch::Dispatcher).

use std::{collections::BTreeMap, fmt, sync::Arc};

use regex::Regex;
use thiserror::Error;

use crate::message::Command;

/// Handler invoked with the connection context and the match details.
pub type Handler<C> = Arc<dyn Fn(&mut C, RouteMatch<'_>) + Send + Sync>;

/// Errors raised while assembling a [`Route`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouteError {
    /// A path or context pattern failed to compile.
    #[error("invalid pattern for {target}: {source}")]
    InvalidPattern {
        /// `path` or the context name the pattern belongs to.
        target: String,
        /// Underlying compilation error.
        #[source]
        source: regex::Error,
    },
    /// Context names must be non-empty ASCII alphanumerics or underscores.
    #[error("invalid context name {0:?}")]
    InvalidContextName(String),
    /// The same context was declared twice.
    #[error("context {0:?} declared more than once")]
    DuplicateContext(String),
    /// Access groups must be non-empty and free of whitespace.
    #[error("invalid access group {0:?}")]
    InvalidAccessGroup(String),
    /// No path pattern was supplied.
    #[error("route has no path")]
    MissingPath,
    /// No handler was supplied.
    #[error("route has no handler")]
    MissingHandler,
    /// The route declares no context, so it could never match.
    #[error("route declares no contexts")]
    NoContexts,
}

/// Details of a successful match, handed to the route's handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// The routed command.
    pub command: &'a Command,
    /// Lowercase name of the context the command arrived through.
    pub context: &'a str,
    /// Capture groups of the context pattern; index 0 is the whole match.
    pub arguments: Vec<Option<String>>,
}

impl RouteMatch<'_> {
    /// Capture group `index`, if it participated in the match.
    #[must_use]
    pub fn argument(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Option::as_deref)
    }

    /// Player who issued the command.
    #[must_use]
    pub fn requester(&self) -> Option<&str> { self.command.requester.as_deref() }

    /// Command path as received.
    #[must_use]
    pub fn path(&self) -> &str { &self.command.path }

    /// Raw argument text as received.
    #[must_use]
    pub fn data(&self) -> &str { self.command.data() }
}

/// A validated command route.
pub struct Route<C> {
    path: Regex,
    contexts: BTreeMap<String, Regex>,
    access: Vec<String>,
    handler: Handler<C>,
}

impl<C> Clone for Route<C> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            contexts: self.contexts.clone(),
            access: self.access.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<C> fmt::Debug for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path.as_str())
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

impl<C> fmt::Display for Route<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.path.as_str())?;
        for (name, pattern) in &self.contexts {
            write!(f, " {name}:/{}/", pattern.as_str())?;
        }
        Ok(())
    }
}

impl<C> Route<C> {
    /// Start building a route.
    #[must_use]
    pub fn builder() -> RouteBuilder<C> { RouteBuilder::default() }

    /// Path pattern.
    #[must_use]
    pub fn path(&self) -> &Regex { &self.path }

    /// Names of the contexts this route serves.
    pub fn contexts(&self) -> impl Iterator<Item = &str> { self.contexts.keys().map(String::as_str) }

    /// Access groups required by this route.
    #[must_use]
    pub fn access(&self) -> &[String] { &self.access }

    /// Match `command` arriving through the context called `context`.
    ///
    /// Context names compare case-insensitively. Access groups are not
    /// consulted here.
    #[must_use]
    pub fn matches<'a>(&'a self, context: &str, command: &'a Command) -> Option<RouteMatch<'a>> {
        if !self.path.is_match(&command.path) {
            return None;
        }
        let (name, pattern) = self
            .contexts
            .get_key_value(context.to_ascii_lowercase().as_str())?;
        let captures = pattern.captures(command.data())?;
        Some(RouteMatch {
            command,
            context: name,
            arguments: captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_owned()))
                .collect(),
        })
    }

    /// Invoke the handler.
    pub fn handle(&self, ctx: &mut C, matched: RouteMatch<'_>) { (self.handler)(ctx, matched); }
}

/// Builder for [`Route`].
///
/// # Examples
///
/// ```
/// use mudbridge::route::Route;
///
/// struct Ctx;
///
/// let route = Route::<Ctx>::builder()
///     .path("^roll$")?
///     .context("mud", r"^(\d+)d(\d+)$")?
///     .handler(|_ctx, matched| {
///         let _dice = matched.argument(1);
///     })
///     .build()?;
/// assert_eq!(route.contexts().collect::<Vec<_>>(), vec!["mud"]);
/// # Ok::<(), mudbridge::route::RouteError>(())
/// ```
pub struct RouteBuilder<C> {
    path: Option<Regex>,
    contexts: BTreeMap<String, Regex>,
    access: Vec<String>,
    handler: Option<Handler<C>>,
}

impl<C> Default for RouteBuilder<C> {
    fn default() -> Self {
        Self {
            path: None,
            contexts: BTreeMap::new(),
            access: Vec::new(),
            handler: None,
        }
    }
}

fn compile(target: &str, pattern: &str) -> Result<Regex, RouteError> {
    Regex::new(pattern).map_err(|source| RouteError::InvalidPattern {
        target: target.to_owned(),
        source,
    })
}

impl<C> RouteBuilder<C> {
    /// Set the path pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] if `pattern` does not compile.
    pub fn path(mut self, pattern: &str) -> Result<Self, RouteError> {
        self.path = Some(compile("path", pattern)?);
        Ok(self)
    }

    /// Declare the argument pattern for a context.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidContextName`],
    /// [`RouteError::DuplicateContext`] or [`RouteError::InvalidPattern`].
    pub fn context(mut self, name: &str, pattern: &str) -> Result<Self, RouteError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(RouteError::InvalidContextName(name.to_owned()));
        }
        let key = name.to_ascii_lowercase();
        if self.contexts.contains_key(&key) {
            return Err(RouteError::DuplicateContext(key));
        }
        let regex = compile(&key, pattern)?;
        self.contexts.insert(key, regex);
        Ok(self)
    }

    /// Require an access group.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidAccessGroup`] for empty names or names
    /// containing whitespace.
    pub fn access(mut self, group: &str) -> Result<Self, RouteError> {
        if group.is_empty() || group.chars().any(char::is_whitespace) {
            return Err(RouteError::InvalidAccessGroup(group.to_owned()));
        }
        if !self.access.iter().any(|existing| existing == group) {
            self.access.push(group.to_owned());
        }
        Ok(self)
    }

    /// Set the handler.
    #[must_use]
    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut C, RouteMatch<'_>) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Validate and assemble the route.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::MissingPath`], [`RouteError::MissingHandler`] or
    /// [`RouteError::NoContexts`] when a required part is absent.
    pub fn build(self) -> Result<Route<C>, RouteError> {
        let path = self.path.ok_or(RouteError::MissingPath)?;
        let handler = self.handler.ok_or(RouteError::MissingHandler)?;
        if self.contexts.is_empty() {
            return Err(RouteError::NoContexts);
        }
        Ok(Route {
            path,
            contexts: self.contexts,
            access: self.access,
            handler,
        })
    }
}
