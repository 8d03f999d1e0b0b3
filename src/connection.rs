//! Connection driver.
//!
//! A [`Bridge`] reads text from the remote server, reassembles it into
//! records and dispatches each record, in stream order, against its
//! context. [`MudContext`] is the stock context for a MUSH connection and
//! [`serve`] wires both to a duplex stream.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::BridgeConfig,
    dispatch::{Context, Dispatcher},
    error::{BridgeError, Result},
    instructions::Mush,
    message::{Command, Reply},
    outbound::{Outbox, spawn_writer},
    process::{Pid, ProcessError, ProcessTable, Triggered},
    reassembler::FrameReassembler,
};

/// Message sent to a player whose command matched no route.
pub const ROUTE_MISS_MESSAGE: &str = "Command not found.";

/// Stock [`Context`] for a MUSH connection.
///
/// Holds the process table for correlated requests and an [`Outbox`] for
/// instructions. Process payloads are chosen by the application.
#[derive(Debug)]
pub struct MudContext<P> {
    name: String,
    processes: ProcessTable<P, Reply>,
    outbox: Outbox,
    instructions: Mush,
    config: BridgeConfig,
}

impl<P> MudContext<P> {
    /// Create a context that sends through `outbox`.
    #[must_use]
    pub fn new(config: &BridgeConfig, outbox: Outbox) -> Self {
        Self {
            name: config.context_name.clone(),
            processes: ProcessTable::with_max_pid(config.max_pid),
            outbox,
            instructions: Mush,
            config: config.clone(),
        }
    }

    /// Handle for queueing instructions. Clone it into process callbacks
    /// that need to reply.
    #[must_use]
    pub fn outbox(&self) -> &Outbox { &self.outbox }

    /// Instruction set used to build softcode.
    #[must_use]
    pub fn instructions(&self) -> Mush { self.instructions }

    /// Configuration the context was created with.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig { &self.config }

    /// Queue a raw instruction.
    pub fn send(&self, instruction: impl Into<String>) -> bool { self.outbox.send(instruction) }

    /// Send `message` privately to `dbref`.
    pub fn emit_to_user(&self, dbref: &str, message: &str) -> bool {
        self.send(self.instructions.emit_to_user(dbref, message))
    }

    /// Send `message` to everyone near `dbref`.
    pub fn emit_around_user(&self, dbref: &str, message: &str) -> bool {
        self.send(self.instructions.emit_around_user(dbref, message))
    }

    /// Echo of a command path through the configured prefix and template.
    #[must_use]
    pub fn echo(&self, path: &str) -> String { self.config.echo(path) }

    /// Register a root process and ask the server to evaluate `fields` for
    /// it. The callback runs once the reply arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::Exhausted`] when no identifier is free.
    pub fn request<F, S>(&mut self, fields: &[S], payload: P, callback: F) -> std::result::Result<Pid, ProcessError>
    where
        F: FnOnce(&mut ProcessTable<P, Reply>, Triggered<P, Reply>) + Send + 'static,
        S: AsRef<str>,
    {
        let pid = self.processes.create(callback, payload)?;
        self.send(self.instructions.request(pid, fields));
        Ok(pid)
    }

    /// Like [`request`](Self::request) but registers the process as a child
    /// of `parent`, which fires once all of its children have.
    ///
    /// # Errors
    ///
    /// Returns any [`ProcessError`] raised by [`ProcessTable::spawn`].
    pub fn request_under<F, S>(
        &mut self,
        parent: Pid,
        fields: &[S],
        payload: P,
        callback: F,
    ) -> std::result::Result<Pid, ProcessError>
    where
        F: FnOnce(&mut ProcessTable<P, Reply>, Triggered<P, Reply>) + Send + 'static,
        S: AsRef<str>,
    {
        let pid = self.processes.spawn(parent, callback, payload)?;
        self.send(self.instructions.request(pid, fields));
        Ok(pid)
    }
}

impl<P> Context for MudContext<P> {
    type Payload = P;

    fn name(&self) -> &str { &self.name }

    fn processes(&mut self) -> &mut ProcessTable<P, Reply> { &mut self.processes }

    fn route_miss(&mut self, command: &Command) {
        let Some(requester) = command.requester.as_deref() else {
            warn!(path = %command.path, "unrouted command has no requester");
            return;
        };
        let message = format!("{} {ROUTE_MISS_MESSAGE}", self.echo(&command.path));
        self.emit_to_user(requester, &message);
    }
}

/// Drain complete UTF-8 text from `buf`, leaving an incomplete trailing
/// sequence for the next read. Invalid sequences become U+FFFD.
fn take_text(buf: &mut BytesMut) -> String {
    let mut text = String::with_capacity(buf.len());
    loop {
        match std::str::from_utf8(buf) {
            Ok(valid) => {
                text.push_str(valid);
                buf.clear();
                return text;
            }
            Err(error) => {
                let valid = error.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&buf[..valid]));
                let Some(invalid) = error.error_len() else {
                    buf.advance(valid);
                    return text;
                };
                warn!(bytes = invalid, "replacing invalid UTF-8 from server");
                text.push(char::REPLACEMENT_CHARACTER);
                buf.advance(valid + invalid);
            }
        }
    }
}

/// Drives one connection: reads, reassembles and dispatches.
pub struct Bridge<C> {
    dispatcher: Dispatcher<C>,
    reassembler: FrameReassembler,
    context: C,
    read_buffer: usize,
    shutdown: CancellationToken,
}

impl<C: Context> Bridge<C> {
    /// Create a bridge over `context` using `dispatcher`'s routes.
    #[must_use]
    pub fn new(dispatcher: Dispatcher<C>, context: C, config: &BridgeConfig) -> Self {
        Self {
            dispatcher,
            reassembler: FrameReassembler::new(config.reassembler.clone()),
            context,
            read_buffer: config.read_buffer.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop [`run`](Self::run) when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Context handed to handlers.
    #[must_use]
    pub fn context(&self) -> &C { &self.context }

    /// Mutable access to the context.
    pub fn context_mut(&mut self) -> &mut C { &mut self.context }

    /// Routes in use.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<C> { &self.dispatcher }

    /// Consume the bridge, returning its context.
    pub fn into_context(self) -> C { self.context }

    /// Reassemble `chunk` and dispatch every complete record in order.
    /// Returns the number of records dispatched.
    pub fn feed(&mut self, chunk: &str) -> usize {
        let mut dispatched = 0;
        for message in self.reassembler.feed(chunk) {
            self.dispatcher.dispatch(&mut self.context, message);
            dispatched += 1;
        }
        dispatched
    }

    /// Read from `reader` until end of stream or cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if reading fails.
    pub async fn run<R>(&mut self, mut reader: R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = BytesMut::with_capacity(self.read_buffer);
        loop {
            buf.reserve(self.read_buffer);
            let read = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!("bridge cancelled");
                    break;
                }
                read = reader.read_buf(&mut buf) => read?,
            };
            if read == 0 {
                if !buf.is_empty() {
                    warn!(bytes = buf.len(), "discarding incomplete UTF-8 at end of stream");
                }
                break;
            }
            let text = take_text(&mut buf);
            if !text.is_empty() {
                self.feed(&text);
            }
        }
        debug!("bridge stopped reading");
        Ok(())
    }
}

impl<C> std::fmt::Debug for Bridge<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("reassembler", &self.reassembler)
            .field("read_buffer", &self.read_buffer)
            .finish_non_exhaustive()
    }
}

/// Bridge `stream` with a [`MudContext`] until the server closes it or
/// `shutdown` is cancelled.
///
/// Queued output is flushed before returning. The writer finishes once
/// every [`Outbox`] clone, including those captured by pending callbacks
/// and handler tasks, has been dropped.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] for an invalid configuration and
/// [`BridgeError::Io`] if reading or writing fails.
pub async fn serve<P, S>(
    stream: S,
    dispatcher: Dispatcher<MudContext<P>>,
    config: &BridgeConfig,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    config.validate()?;
    let (reader, writer) = tokio::io::split(stream);
    let (outbox, rx) = Outbox::channel();
    let writer = spawn_writer(writer, rx);

    info!(context = %config.context_name, routes = dispatcher.len(), "bridge started");
    let mut bridge = Bridge::new(dispatcher, MudContext::new(config, outbox), config).with_shutdown(shutdown);
    let read = bridge.run(reader).await;
    drop(bridge);

    let written = writer
        .await
        .map_err(|error| BridgeError::Io(std::io::Error::other(error)))?;
    read?;
    written?;
    info!("bridge finished");
    Ok(())
}
