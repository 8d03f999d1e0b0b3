#![doc(html_root_url = "https://docs.rs/mudbridge/latest")]
//! Public API for the `mudbridge` library.
//!
//! This crate bridges application code to a line-based MUD/MUSH server over a
//! single ordered byte stream. It reassembles inbound JSON records, routes
//! player commands to handlers, correlates replies to earlier requests
//! through a tree of pending processes, and offers a fan-out barrier for
//! joining several asynchronous operations under per-task timeouts.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod instructions;
pub mod message;
pub mod metrics;
pub mod outbound;
pub mod prelude;
pub mod process;
pub mod reassembler;
pub mod route;
pub mod synchronizer;

pub use config::BridgeConfig;
pub use connection::{Bridge, MudContext, serve};
pub use dispatch::{Context, Dispatched, Dispatcher};
pub use error::{BridgeError, Result};
pub use message::{Command, Message, ProcessReply, Reply};
pub use metrics::{FRAGMENTS_DISCARDED, FRAMES_DECODED, ROUTE_MISSES, TASK_TIMEOUTS, UNKNOWN_PIDS};
pub use process::{Pid, ProcessError, ProcessTable, TriggerOutcome, Triggered};
pub use reassembler::{FrameReassembler, ReassemblerConfig};
pub use route::{Route, RouteError, RouteMatch};
pub use synchronizer::{Reporter, SyncError, SyncState, Synchronizer};
