//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → refresher loop exits
//!               → store watcher drops its notify handle
//!               → HTTP servers stop accepting and drain
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task holds its own receiver
//! - Tasks that subscribe late still observe a shutdown already triggered
//!   through `Shutdown::is_triggered`

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
