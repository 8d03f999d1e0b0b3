//! Connection configuration.
//!
//! [`BridgeConfig`] collects the tunables of one bridged connection. Every
//! setter consumes and returns the config so values can be chained from
//! [`BridgeConfig::default`].

use std::{num::NonZeroU32, time::Duration};

use crate::{
    error::BridgeError,
    process::MAX_PID,
    reassembler::ReassemblerConfig,
};

/// Default number of bytes requested per read.
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// Placeholder replaced by the echoed command in [`BridgeConfig::output_template`].
pub const TEMPLATE_PLACEHOLDER: &str = "%s";

/// Configuration for one bridged connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use mudbridge::config::BridgeConfig;
///
/// let config = BridgeConfig::default()
///     .context_name("Mud")
///     .command_prefix("@")
///     .quiescence(Duration::from_millis(50));
/// config.validate().expect("valid");
/// assert_eq!(config.reassembler.quiescence, Duration::from_millis(50));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Name of the context routes must declare a pattern for.
    ///
    /// Default: `Mud`.
    pub context_name: String,

    /// Inbound reassembly settings.
    pub reassembler: ReassemblerConfig,

    /// Largest process identifier handed out.
    ///
    /// Default: `u32::MAX`.
    pub max_pid: NonZeroU32,

    /// Bytes requested per read from the transport.
    ///
    /// Default: 8 KiB.
    pub read_buffer: usize,

    /// Prefix players type before bridged commands.
    ///
    /// Default: `+`.
    pub command_prefix: String,

    /// Template wrapping the echoed command in replies to players. The first
    /// `%s` is replaced by the prefixed command path.
    ///
    /// Default: `[%s]`.
    pub output_template: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            context_name: "Mud".to_owned(),
            reassembler: ReassemblerConfig::default(),
            max_pid: MAX_PID,
            read_buffer: DEFAULT_READ_BUFFER,
            command_prefix: "+".to_owned(),
            output_template: "[%s]".to_owned(),
        }
    }
}

impl BridgeConfig {
    /// Set the context name.
    #[must_use]
    pub fn context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    /// Replace the reassembler settings.
    #[must_use]
    pub fn reassembler(mut self, config: ReassemblerConfig) -> Self {
        self.reassembler = config;
        self
    }

    /// Set the reassembler quiescence window.
    #[must_use]
    pub fn quiescence(mut self, window: Duration) -> Self {
        self.reassembler = self.reassembler.quiescence(window);
        self
    }

    /// Set the largest process identifier.
    #[must_use]
    pub fn max_pid(mut self, max_pid: NonZeroU32) -> Self {
        self.max_pid = max_pid;
        self
    }

    /// Set the read buffer size.
    #[must_use]
    pub fn read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes;
        self
    }

    /// Set the command prefix.
    #[must_use]
    pub fn command_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_prefix = prefix.into();
        self
    }

    /// Set the output template.
    #[must_use]
    pub fn output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = template.into();
        self
    }

    /// Render the echo of `path` through the prefix and template.
    #[must_use]
    pub fn echo(&self, path: &str) -> String {
        let command = format!("{}{path}", self.command_prefix);
        self.output_template
            .replacen(TEMPLATE_PLACEHOLDER, &command, 1)
    }

    /// Check the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an empty context name, a zero read
    /// buffer, or a template without a `%s` placeholder.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.context_name.trim().is_empty() {
            return Err(BridgeError::Config("context name must not be empty"));
        }
        if self.read_buffer == 0 {
            return Err(BridgeError::Config("read buffer must not be zero"));
        }
        if !self.output_template.contains(TEMPLATE_PLACEHOLDER) {
            return Err(BridgeError::Config("output template needs a %s placeholder"));
        }
        Ok(())
    }
}
