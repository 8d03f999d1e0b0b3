//! Correlation tree for requests issued to the remote server.
//!
//! The remote end has no notion of a call returning. Instead, each request the
//! bridge sends carries a [`Pid`] which the server echoes in its reply. A
//! [`ProcessTable`] owns those identifiers together with the callback that
//! resumes the handler once the reply arrives.
//!
//! Processes form a tree. A handler may [`spawn`](ProcessTable::spawn) child
//! processes under a parent; the parent then acts as a join point and fires
//! only once every child has fired or been destroyed. Teardown always proceeds
//! leaf to root, and a process is destroyed as soon as its callback returns.
//!
//! Identifiers come from a bounded namespace `[1, max_pid]` and are recycled
//! once their process is gone, so they stay small enough for the server to
//! echo verbatim.

use std::{collections::HashMap, fmt, num::NonZeroU32};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::metrics;

/// Largest identifier handed out by default.
pub const MAX_PID: NonZeroU32 = NonZeroU32::MAX;

/// Identifier naming a live process.
///
/// Identifiers are never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(NonZeroU32);

impl Pid {
    /// Construct a [`Pid`], returning `None` for zero.
    #[must_use]
    pub const fn new(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Return the raw identifier.
    #[must_use]
    pub const fn get(self) -> u32 { self.0.get() }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl From<Pid> for u32 {
    fn from(pid: Pid) -> Self { pid.get() }
}

impl TryFrom<u64> for Pid {
    type Error = ProcessError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .ok()
            .and_then(Pid::new)
            .ok_or(ProcessError::InvalidPid(value))
    }
}

impl TryFrom<u32> for Pid {
    type Error = ProcessError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Pid::new(value).ok_or(ProcessError::InvalidPid(u64::from(value)))
    }
}

impl std::str::FromStr for Pid {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| ProcessError::MalformedPid(s.to_owned()))?;
        Pid::try_from(value)
    }
}

impl Serialize for Pid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.get())
    }
}

impl<'de> Deserialize<'de> for Pid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PidVisitor;

        impl de::Visitor<'_> for PidVisitor {
            type Value = Pid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-zero 32-bit process identifier")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Pid, E> {
                Pid::try_from(value).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Pid, E> {
                let value = u64::try_from(value).map_err(|_| E::custom("negative pid"))?;
                self.visit_u64(value)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Pid, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PidVisitor)
    }
}

/// Errors raised by [`ProcessTable`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProcessError {
    /// Zero or out-of-range identifier.
    #[error("{0} is not a valid process identifier")]
    InvalidPid(u64),
    /// Identifier text that is not a number.
    #[error("malformed process identifier: {0:?}")]
    MalformedPid(String),
    /// Every identifier in the namespace is in use.
    #[error("all {0} process identifiers are in use")]
    Exhausted(u32),
    /// The referenced process does not exist.
    #[error("process {0} does not exist")]
    UnknownProcess(Pid),
    /// The referenced process is already firing and cannot gain children.
    #[error("process {0} has already been triggered")]
    AlreadyTriggered(Pid),
}

/// Values handed to a process callback when it fires.
#[derive(Debug)]
pub struct Triggered<P, I> {
    /// Identifier of the firing process.
    pub pid: Pid,
    /// Parent of the firing process, if any.
    pub ancestor: Option<Pid>,
    /// Payload supplied when the process was created.
    pub payload: P,
    /// Data that triggered the process; `None` when it fired as a join.
    pub incoming: Option<I>,
}

/// Callback invoked exactly once when a process fires.
pub type ProcessCallback<P, I> = Box<dyn FnOnce(&mut ProcessTable<P, I>, Triggered<P, I>) + Send>;

/// Result of [`ProcessTable::trigger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The callback ran and the process was destroyed.
    Fired,
    /// The process still has children; it fires once they are gone.
    Deferred,
    /// The process had already been triggered; nothing happened.
    Ignored,
    /// No process with that identifier exists.
    Unknown,
}

enum State<I> {
    Pending,
    Waiting(Option<I>),
    Firing,
}

struct Entry<P, I> {
    callback: Option<ProcessCallback<P, I>>,
    payload: Option<P>,
    ancestor: Option<Pid>,
    children: Vec<Pid>,
    state: State<I>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Join {
    /// The last child fired; the parent joins whether or not it was triggered.
    ChildFired,
    /// The last child was destroyed; only a waiting parent joins.
    ChildDestroyed,
}

/// Read-only view of a live process.
pub struct ProcessView<'a, P> {
    pid: Pid,
    payload: Option<&'a P>,
    ancestor: Option<Pid>,
    children: &'a [Pid],
    waiting: bool,
}

impl<P> ProcessView<'_, P> {
    /// Identifier of the process.
    #[must_use]
    pub fn pid(&self) -> Pid { self.pid }

    /// Payload, or `None` while the process is firing.
    #[must_use]
    pub fn payload(&self) -> Option<&P> { self.payload }

    /// Parent identifier.
    #[must_use]
    pub fn ancestor(&self) -> Option<Pid> { self.ancestor }

    /// Children in spawn order.
    #[must_use]
    pub fn children(&self) -> &[Pid] { self.children }

    /// Whether the process was triggered and is waiting for its children.
    #[must_use]
    pub fn is_waiting(&self) -> bool { self.waiting }
}

/// Owner of all in-flight correlated operations.
///
/// `P` is the payload type stored alongside each process and `I` is the type
/// of the data that triggers it.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use mudbridge::process::{ProcessTable, TriggerOutcome};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let mut table = ProcessTable::<&str, u32>::new();
///
/// let log = Arc::clone(&seen);
/// let parent = table
///     .create(
///         move |_, fired| log.lock().expect("lock").push(fired.payload),
///         "parent",
///     )
///     .expect("pid available");
/// let child = table
///     .spawn(parent, |_, _| {}, "child")
///     .expect("parent is live");
///
/// assert_eq!(table.trigger(child, Some(11)), TriggerOutcome::Fired);
/// assert_eq!(*seen.lock().expect("lock"), vec!["parent"]);
/// assert!(table.is_empty());
/// ```
pub struct ProcessTable<P, I> {
    entries: HashMap<Pid, Entry<P, I>>,
    next: u32,
    max_pid: NonZeroU32,
}

impl<P, I> Default for ProcessTable<P, I> {
    fn default() -> Self { Self::new() }
}

impl<P, I> fmt::Debug for ProcessTable<P, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTable")
            .field("live", &self.entries.len())
            .field("next", &self.next)
            .field("max_pid", &self.max_pid)
            .finish()
    }
}

impl<P, I> ProcessTable<P, I> {
    /// Create a table using the full `[1, u32::MAX]` identifier space.
    #[must_use]
    pub fn new() -> Self { Self::with_max_pid(MAX_PID) }

    /// Create a table whose identifiers never exceed `max_pid`.
    #[must_use]
    pub fn with_max_pid(max_pid: NonZeroU32) -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
            max_pid,
        }
    }

    /// Largest identifier this table hands out.
    #[must_use]
    pub fn max_pid(&self) -> NonZeroU32 { self.max_pid }

    /// Number of live processes.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no process is live.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Whether `pid` names a live process.
    #[must_use]
    pub fn contains(&self, pid: Pid) -> bool { self.entries.contains_key(&pid) }

    /// Identifiers of every live process, in ascending order.
    #[must_use]
    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<_> = self.entries.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Look up a live process.
    ///
    /// A missing process is logged at debug level; late replies make this
    /// common.
    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<ProcessView<'_, P>> {
        let Some(entry) = self.entries.get(&pid) else {
            debug!(%pid, "lookup for unknown process");
            return None;
        };
        Some(ProcessView {
            pid,
            payload: entry.payload.as_ref(),
            ancestor: entry.ancestor,
            children: &entry.children,
            waiting: matches!(entry.state, State::Waiting(_)),
        })
    }

    /// Borrow the payload of a live process.
    #[must_use]
    pub fn payload(&self, pid: Pid) -> Option<&P> {
        self.entries.get(&pid).and_then(|entry| entry.payload.as_ref())
    }

    /// Mutably borrow the payload of a live process.
    pub fn payload_mut(&mut self, pid: Pid) -> Option<&mut P> {
        self.entries.get_mut(&pid).and_then(|entry| entry.payload.as_mut())
    }

    /// Parent of a live process.
    #[must_use]
    pub fn ancestor(&self, pid: Pid) -> Option<Pid> {
        self.entries.get(&pid).and_then(|entry| entry.ancestor)
    }

    /// Children of a live process, in spawn order.
    #[must_use]
    pub fn children(&self, pid: Pid) -> Option<&[Pid]> {
        self.entries.get(&pid).map(|entry| entry.children.as_slice())
    }

    /// Borrow a handle for operating on one process.
    pub fn process_mut(&mut self, pid: Pid) -> Option<ProcessMut<'_, P, I>> {
        self.contains(pid).then_some(ProcessMut { table: self, pid })
    }

    /// Register a new root process.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Exhausted`] when every identifier is in use.
    pub fn create<F>(&mut self, callback: F, payload: P) -> Result<Pid, ProcessError>
    where
        F: FnOnce(&mut ProcessTable<P, I>, Triggered<P, I>) + Send + 'static,
    {
        self.insert(Box::new(callback), payload, None)
    }

    /// Register a child of `parent`.
    ///
    /// The parent stays pending and becomes a join point: it fires once this
    /// child, and every sibling, has fired or been destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::UnknownProcess`] if `parent` is not live,
    /// [`ProcessError::AlreadyTriggered`] if `parent` is currently firing, or
    /// [`ProcessError::Exhausted`] when no identifier is free.
    pub fn spawn<F>(&mut self, parent: Pid, callback: F, payload: P) -> Result<Pid, ProcessError>
    where
        F: FnOnce(&mut ProcessTable<P, I>, Triggered<P, I>) + Send + 'static,
    {
        match self.entries.get(&parent) {
            None => return Err(ProcessError::UnknownProcess(parent)),
            Some(entry) if matches!(entry.state, State::Firing) => {
                return Err(ProcessError::AlreadyTriggered(parent));
            }
            Some(_) => {}
        }
        let pid = self.insert(Box::new(callback), payload, Some(parent))?;
        if let Some(entry) = self.entries.get_mut(&parent) {
            entry.children.push(pid);
        }
        Ok(pid)
    }

    /// Deliver `incoming` to a process.
    ///
    /// A process without children fires immediately: its callback runs once
    /// and the process is destroyed. If that leaves its parent without
    /// children, the parent fires next. A process that still has children
    /// stores `incoming` and fires once the last child is gone.
    ///
    /// Unknown identifiers are logged and ignored because the server may
    /// answer late or twice.
    pub fn trigger(&mut self, pid: Pid, incoming: Option<I>) -> TriggerOutcome {
        let Some(entry) = self.entries.get_mut(&pid) else {
            warn!(%pid, "trigger for unknown process");
            metrics::inc_unknown_pids();
            return TriggerOutcome::Unknown;
        };
        if !matches!(entry.state, State::Pending) {
            warn!(%pid, "process triggered more than once");
            return TriggerOutcome::Ignored;
        }
        if !entry.children.is_empty() {
            debug!(%pid, children = entry.children.len(), "process waiting for children");
            entry.state = State::Waiting(incoming);
            return TriggerOutcome::Deferred;
        }
        self.fire(pid, incoming);
        TriggerOutcome::Fired
    }

    /// Destroy a process and all of its descendants without running their
    /// callbacks.
    ///
    /// If the process was the last child of a waiting parent, that parent
    /// fires. Returns `false` for unknown identifiers and for a process whose
    /// own callback is running; such a process is removed once the callback
    /// returns.
    pub fn destroy(&mut self, pid: Pid) -> bool {
        match self.entries.get(&pid) {
            None => return false,
            Some(entry) if matches!(entry.state, State::Firing) => return false,
            Some(_) => {}
        }
        if let Some(ancestor) = self.teardown(pid) {
            self.join(ancestor, Join::ChildDestroyed);
        }
        true
    }

    fn insert(
        &mut self,
        callback: ProcessCallback<P, I>,
        payload: P,
        ancestor: Option<Pid>,
    ) -> Result<Pid, ProcessError> {
        let pid = self.allocate()?;
        self.entries.insert(
            pid,
            Entry {
                callback: Some(callback),
                payload: Some(payload),
                ancestor,
                children: Vec::new(),
                state: State::Pending,
            },
        );
        debug!(%pid, ancestor = ancestor.map(Pid::get), "process created");
        Ok(pid)
    }

    /// Next free identifier, wrapping to 1 and skipping live ones.
    fn allocate(&mut self) -> Result<Pid, ProcessError> {
        let max = self.max_pid.get();
        if self.entries.len() >= max as usize {
            return Err(ProcessError::Exhausted(max));
        }
        loop {
            let candidate = self.next;
            self.next = if candidate >= max { 1 } else { candidate + 1 };
            let Some(pid) = Pid::new(candidate) else {
                continue;
            };
            if !self.entries.contains_key(&pid) {
                return Ok(pid);
            }
            trace!(%pid, "pid in use, probing");
        }
    }

    fn fire(&mut self, pid: Pid, incoming: Option<I>) {
        let Some(entry) = self.entries.get_mut(&pid) else {
            return;
        };
        entry.state = State::Firing;
        let callback = entry.callback.take();
        let payload = entry.payload.take();
        let ancestor = entry.ancestor;

        debug!(%pid, "process fired");
        if let (Some(callback), Some(payload)) = (callback, payload) {
            callback(
                self,
                Triggered {
                    pid,
                    ancestor,
                    payload,
                    incoming,
                },
            );
        }

        // The callback may have torn down this process by destroying an
        // ancestor; in that case there is nothing left to join.
        if self.entries.contains_key(&pid)
            && let Some(ancestor) = self.teardown(pid)
        {
            self.join(ancestor, Join::ChildFired);
        }
    }

    fn join(&mut self, pid: Pid, cause: Join) {
        let Some(entry) = self.entries.get_mut(&pid) else {
            return;
        };
        if !entry.children.is_empty() {
            return;
        }
        let incoming = match std::mem::replace(&mut entry.state, State::Pending) {
            State::Waiting(incoming) => incoming,
            State::Pending if cause == Join::ChildFired => None,
            other => {
                entry.state = other;
                return;
            }
        };
        debug!(%pid, "children resolved, joining");
        self.fire(pid, incoming);
    }

    /// Remove `pid` and its descendants, children first. Returns the live
    /// ancestor the process was detached from.
    fn teardown(&mut self, pid: Pid) -> Option<Pid> {
        let children = match self.entries.get_mut(&pid) {
            Some(entry) => std::mem::take(&mut entry.children),
            None => return None,
        };
        for child in children {
            self.teardown(child);
        }
        let entry = self.entries.remove(&pid)?;
        debug!(%pid, "process destroyed");
        let ancestor = entry.ancestor?;
        let parent = self.entries.get_mut(&ancestor)?;
        parent.children.retain(|child| *child != pid);
        Some(ancestor)
    }
}

/// Mutable handle to a single live process.
pub struct ProcessMut<'a, P, I> {
    table: &'a mut ProcessTable<P, I>,
    pid: Pid,
}

impl<P, I> ProcessMut<'_, P, I> {
    /// Identifier of the process.
    #[must_use]
    pub fn pid(&self) -> Pid { self.pid }

    /// Payload of the process.
    #[must_use]
    pub fn payload(&self) -> Option<&P> { self.table.payload(self.pid) }

    /// Mutable payload of the process.
    pub fn payload_mut(&mut self) -> Option<&mut P> { self.table.payload_mut(self.pid) }

    /// Spawn a child of this process.
    ///
    /// # Errors
    ///
    /// See [`ProcessTable::spawn`].
    pub fn spawn<F>(&mut self, callback: F, payload: P) -> Result<Pid, ProcessError>
    where
        F: FnOnce(&mut ProcessTable<P, I>, Triggered<P, I>) + Send + 'static,
    {
        self.table.spawn(self.pid, callback, payload)
    }

    /// Trigger this process, consuming the handle.
    pub fn trigger(self, incoming: Option<I>) -> TriggerOutcome {
        self.table.trigger(self.pid, incoming)
    }

    /// Destroy this process, consuming the handle.
    pub fn destroy(self) -> bool { self.table.destroy(self.pid) }
}
