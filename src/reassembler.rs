//! Inbound helper that turns raw text chunks into decoded records.
//!
//! The remote server forwards partial writes, so one logical record may be
//! split across reads or even across lines. [`FrameReassembler`] keeps a
//! single carry-over buffer of text that has not decoded yet and retries it
//! against each new line. The buffer is discarded once it has been idle for
//! longer than the quiescence window, or when it grows past the configured
//! cap, so a truncated fragment cannot corrupt decoding indefinitely.
//!
//! Undecodable text is never reported as an error: a partial record is
//! ordinary input.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::{
    message::Message,
    metrics::{self, DiscardReason},
};

/// Default idle time after which a carried fragment is discarded.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(100);

/// Default cap on the length of the carry-over buffer in bytes.
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 64 * 1024;

/// Configuration for [`FrameReassembler`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mudbridge::reassembler::ReassemblerConfig;
///
/// let config = ReassemblerConfig::default()
///     .quiescence(Duration::from_millis(250))
///     .max_fragment_len(8 * 1024);
///
/// assert_eq!(config.quiescence, Duration::from_millis(250));
/// assert_eq!(config.max_fragment_len, 8 * 1024);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassemblerConfig {
    /// Idle time after which the carry-over buffer is discarded.
    ///
    /// Default: 100 milliseconds.
    pub quiescence: Duration,

    /// Maximum length of the carry-over buffer in bytes.
    ///
    /// Default: 64 KiB.
    pub max_fragment_len: usize,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            quiescence: DEFAULT_QUIESCENCE,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
        }
    }
}

impl ReassemblerConfig {
    /// Set the quiescence window.
    #[must_use]
    pub fn quiescence(mut self, window: Duration) -> Self {
        self.quiescence = window;
        self
    }

    /// Set the maximum carry-over length. Clamped to at least one byte.
    #[must_use]
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len.max(1);
        self
    }
}

enum Decoded {
    Message(Message),
    Foreign,
    Incomplete,
}

fn decode(text: &str) -> Decoded {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return Decoded::Incomplete;
    };
    if !value.is_object() {
        return Decoded::Incomplete;
    }
    match Message::deserialize(value) {
        Ok(message) => Decoded::Message(message),
        Err(error) => {
            warn!(%error, "dropping record of unsupported shape");
            Decoded::Foreign
        }
    }
}

/// Stateful decoder for newline-delimited JSON records.
///
/// # Examples
///
/// ```
/// use mudbridge::{message::Message, reassembler::FrameReassembler};
///
/// let mut reassembler = FrameReassembler::default();
/// assert_eq!(reassembler.feed(r#"{"type":"command","pa"#).count(), 0);
///
/// let messages: Vec<Message> = reassembler.feed("th\":\"who\"}\n").collect();
/// assert_eq!(messages.len(), 1);
/// assert!(!reassembler.has_pending());
/// ```
#[derive(Debug, Default)]
pub struct FrameReassembler {
    config: ReassemblerConfig,
    carry: String,
    touched: Option<Instant>,
}

impl FrameReassembler {
    /// Create a reassembler with the given configuration.
    #[must_use]
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            carry: String::new(),
            touched: None,
        }
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ReassemblerConfig { &self.config }

    /// Whether undecoded text is being carried over.
    #[must_use]
    pub fn has_pending(&self) -> bool { !self.carry.is_empty() }

    /// Undecoded text carried over from earlier chunks.
    #[must_use]
    pub fn pending(&self) -> &str { &self.carry }

    /// Discard any carried text.
    pub fn clear(&mut self) {
        self.carry.clear();
        self.touched = None;
    }

    /// Feed a chunk using the current time.
    ///
    /// The returned iterator decodes lazily; drain it before feeding the next
    /// chunk, since dropping it early discards the chunk's remaining lines.
    pub fn feed(&mut self, chunk: &str) -> Frames<'_> { self.feed_at(chunk, Instant::now()) }

    /// Feed a chunk using an explicit clock reading.
    ///
    /// Accepting an explicit `now` keeps quiescence tests deterministic.
    pub fn feed_at(&mut self, chunk: &str, now: Instant) -> Frames<'_> {
        if let Some(touched) = self.touched
            && self.has_pending()
            && now.saturating_duration_since(touched) > self.config.quiescence
        {
            trace!(len = self.carry.len(), "discarding stale fragment");
            metrics::inc_discarded(DiscardReason::Stale);
            self.carry.clear();
        }
        self.touched = Some(now);

        let normalised = chunk.replace("\r\n", "\n").replace('\r', "\n");
        let lines: Vec<String> = normalised
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        Frames {
            reassembler: self,
            lines: lines.into_iter(),
        }
    }

    fn accept(&mut self, line: &str) -> Option<Message> {
        // Whitespace between records is noise; inside a fragment it is content.
        if !self.has_pending() && line.trim().is_empty() {
            return None;
        }
        if self.has_pending() {
            let mut joined = String::with_capacity(self.carry.len() + line.len());
            joined.push_str(&self.carry);
            joined.push_str(line);
            match decode(&joined) {
                Decoded::Message(message) => {
                    self.carry.clear();
                    return Some(message);
                }
                Decoded::Foreign => {
                    metrics::inc_discarded(DiscardReason::Foreign);
                    self.carry.clear();
                    return None;
                }
                Decoded::Incomplete => {}
            }
        }

        match decode(line) {
            Decoded::Message(message) => {
                self.abandon_carry();
                Some(message)
            }
            Decoded::Foreign => {
                metrics::inc_discarded(DiscardReason::Foreign);
                self.abandon_carry();
                None
            }
            Decoded::Incomplete => {
                self.retain(line);
                None
            }
        }
    }

    fn abandon_carry(&mut self) {
        if self.has_pending() {
            trace!(len = self.carry.len(), "abandoning superseded fragment");
            metrics::inc_discarded(DiscardReason::Superseded);
            self.carry.clear();
        }
    }

    fn retain(&mut self, line: &str) {
        let limit = self.config.max_fragment_len;
        if self.carry.len() + line.len() > limit {
            warn!(
                carried = self.carry.len(),
                incoming = line.len(),
                limit,
                "fragment exceeds maximum length, discarding"
            );
            metrics::inc_discarded(DiscardReason::Oversized);
            self.carry.clear();
            if line.len() > limit {
                return;
            }
        }
        trace!(len = line.len(), "carrying undecoded text");
        self.carry.push_str(line);
    }
}

/// Lazy sequence of records decoded from one chunk.
#[must_use = "undrained lines are discarded when the iterator is dropped"]
pub struct Frames<'a> {
    reassembler: &'a mut FrameReassembler,
    lines: std::vec::IntoIter<String>,
}

impl Iterator for Frames<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        for line in self.lines.by_ref() {
            if let Some(message) = self.reassembler.accept(&line) {
                metrics::inc_frames();
                return Some(message);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) { (0, Some(self.lines.len())) }
}

#[cfg(test)]
mod tests;
