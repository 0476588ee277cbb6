//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → admin server, config poller and watcher exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
