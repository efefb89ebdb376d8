//! Session manager using the actor pattern.
//!
//! The manager is the single owner of all session state: records, scrollback,
//! fan-out hubs, PTY handles, and log files. Every other component - the
//! socket server, the PTY bridge threads, the lifecycle sweeper, in-process
//! callers - interacts with sessions exclusively through its command channel.
//!
//! ```text
//! ┌──────────────┐   ManagerCommand    ┌────────────────┐   OutputEvent   ┌─────────────┐
//! │ connections, │ ──────────────────▶ │ SessionManager │ ──────────────▶ │ subscribers │
//! │ PTY threads, │    (mpsc channel)   │    (actor)     │  (per-session   │ (broadcast) │
//! │ sweep task   │                     │                │    hub)         │             │
//! └──────────────┘                     └────────────────┘                 └─────────────┘
//! ```

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::{SessionManager, MAX_SESSIONS};
pub use commands::{ManagerCommand, SubscribeReply};
pub use handle::ManagerHandle;

use crate::config::Config;
use crate::lifecycle::spawn_sweep_task;
use crate::store::RecordStore;

/// Command channel depth. Bounded so the PTY reader threads get backpressure
/// from a busy actor instead of queueing output without limit.
const COMMAND_BUFFER: usize = 256;

/// Spawns the session manager actor plus its lifecycle sweep task and
/// returns a handle for interaction.
pub fn spawn_manager(config: Config, store: RecordStore) -> ManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let sweep_interval = config.sweep_interval;

    let actor = SessionManager::new(cmd_rx, cmd_tx.clone(), store, config);
    tokio::spawn(actor.run());

    spawn_sweep_task(cmd_tx.clone(), sweep_interval);

    ManagerHandle::new(cmd_tx)
}
