//! Termcast Daemon - PTY session mirroring and control
//!
//! This crate provides the daemon infrastructure:
//! - `manager` - session manager actor, the single owner of session state
//! - `pty` - PTY bridge (spawn, read loop, input writer, exit waiter)
//! - `hub` - per-session fan-out with bounded per-subscriber buffers
//! - `store` - file-backed session records and append-only output logs
//! - `server` - Unix socket server speaking newline-delimited JSON
//! - `lifecycle` - periodic sweep (stuck detection, reaping, retention)
//! - `config` - defaults + TOML file + env overrides
//! - `client` - thin socket client used by the CLI subcommands
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        termcastd daemon                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────┐        ┌──────────────────────────────────┐    │
//! │  │ DaemonServer │───────▶│        SessionManager            │    │
//! │  │ (Unix socket)│        │  (actor: records, scrollback,    │    │
//! │  └──────┬───────┘        │   hubs, PTY handles, log files)  │    │
//! │         │                └───────┬──────────────▲───────────┘    │
//! │         │ per-connection         │ spawn        │ output/exit    │
//! │         ▼                        ▼              │                │
//! │  ┌──────────────┐        ┌──────────────────────┴───────────┐    │
//! │  │ forwarder    │◀───────│  PTY bridge threads per session  │    │
//! │  │ tasks        │  hub   │  (reader / writer / exit waiter) │    │
//! │  └──────────────┘        └──────────────────────────────────┘    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod client;
pub mod config;
pub mod hub;
pub mod lifecycle;
pub mod manager;
pub mod pty;
pub mod server;
pub mod store;
