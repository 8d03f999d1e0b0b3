//! Optional convenience imports for common bridge workflows.
//!
//! Prefer importing specialised APIs directly from their owning modules.
//!
//! # Examples
//!
//! ```rust
//! use mudbridge::prelude::*;
//!
//! fn routes() -> Result<Dispatcher<MudContext<()>>> {
//!     let mut dispatcher = Dispatcher::new();
//!     dispatcher.add("^who$", [("mud", ".*")], |ctx: &mut MudContext<()>, matched| {
//!         if let Some(requester) = matched.requester() {
//!             ctx.emit_to_user(requester, "Nobody here but us.");
//!         }
//!     })?;
//!     Ok(dispatcher)
//! }
//! # routes().expect("routes");
//! ```

pub use crate::{
    config::BridgeConfig,
    connection::{Bridge, MudContext, serve},
    dispatch::{Context, Dispatched, Dispatcher},
    error::{BridgeError, Result},
    instructions::Mush,
    message::{Command, Message, Reply},
    outbound::Outbox,
    process::{Pid, ProcessTable, Triggered},
    route::{Route, RouteMatch},
    synchronizer::{Reporter, Synchronizer},
};
