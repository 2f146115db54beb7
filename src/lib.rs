//! # Shellmux
//!
//! This crate provides the core of shellmux: shells run as managed,
//! long-lived sessions whose output is captured in the background and
//! drained on demand.
//!
//! ## Overview
//!
//! - **Pipe sessions**: a non-interactive shell on plain pipes, with
//!   stdout and stderr merged into one FIFO stream and clear-screen
//!   markers woven in for consumers that render output.
//! - **Pty sessions**: an interactive shell on a pseudo-terminal, for
//!   programs that need real TTY behavior.
//! - **Registry**: a bounded, ID-keyed collection of sessions handing out
//!   shared handles.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use shellmux::{Config, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration (missing file means defaults)
//!     let config = Config::load_default()?;
//!     let registry = SessionRegistry::from_config(&config);
//!
//!     // Create and start a session, then drive it
//!     let handle = registry.create_session("build", Path::new("."), false)?;
//!     let mut session = handle.lock().await;
//!     session.start().await?;
//!     session.send_command("echo hello").await?;
//!
//!     // ...poll output, then tear down
//!     drop(session);
//!     registry.delete_session("build").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation and env overrides
//! - [`session`]: Session variants, the registry and shell profiles

pub mod config;
pub mod session;

pub use config::Config;
pub use session::{PipeSession, PtySession, Session, SessionError, SessionId, SessionRegistry};
