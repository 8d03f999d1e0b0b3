//! Decoded inbound records.
//!
//! Every complete record received from the remote server is a JSON object
//! discriminated by its `type` field. Commands are typed by players and routed
//! through the [`Dispatcher`](crate::dispatch::Dispatcher); process replies
//! carry the [`Pid`] of the correlated request that produced them.

use serde::{Deserialize, Serialize};

use crate::process::Pid;

/// Fields of a process reply other than `type` and `pid`.
pub type Reply = serde_json::Map<String, serde_json::Value>;

/// One decoded application-level record.
///
/// # Examples
///
/// ```
/// use mudbridge::message::Message;
///
/// let message: Message =
///     serde_json::from_str(r##"{"type":"command","path":"roll","data":"3d6","requester":"#12"}"##)
///         .expect("valid command");
/// assert!(matches!(message, Message::Command(ref command) if command.path == "roll"));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A player command forwarded by the server.
    Command(Command),
    /// A reply to a correlated request issued by the bridge.
    Process(ProcessReply),
}

impl Message {
    /// Name of the `type` discriminator for this record.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(_) => "command",
            Self::Process(_) => "process",
        }
    }
}

/// A command typed by a player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command path, for example `roll` or `job/create`.
    pub path: String,
    /// Raw argument text following the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Database reference of the player who issued the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
}

impl Command {
    /// Construct a command with the given path and no data or requester.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Attach argument text.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach the requesting player.
    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    /// Argument text, or the empty string when the server sent none.
    #[must_use]
    pub fn data(&self) -> &str { self.data.as_deref().unwrap_or_default() }
}

/// A reply correlated to a pending process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessReply {
    /// Identifier echoed back by the server.
    pub pid: Pid,
    /// Remaining fields of the record.
    #[serde(flatten)]
    pub fields: Reply,
}

impl ProcessReply {
    /// Construct a reply for `pid` with no fields.
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            fields: Reply::new(),
        }
    }

    /// Add a field to the reply.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
