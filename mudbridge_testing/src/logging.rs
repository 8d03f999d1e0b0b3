//! Shared capture of `log` records.

use std::sync::{Mutex, MutexGuard, OnceLock};

use logtest::Logger;
use rstest::fixture;

/// Exclusive handle to the process-wide [`Logger`].
///
/// `logtest` installs a single global logger, so tests that inspect records
/// take this handle to keep their captures apart.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global logger, starting it on first use.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self { guard }
    }

    /// Discard every captured record.
    pub fn clear(&mut self) { while self.guard.pop().is_some() {} }

    /// Drain captured records at `level` or more severe, returning their
    /// messages in capture order.
    pub fn drain_at(&mut self, level: log::Level) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(record) = self.guard.pop() {
            if record.level() <= level {
                messages.push(record.args().to_owned());
            }
        }
        messages
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
