//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     Ctrl-C → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → soak loop stops → event buffers flush → exit
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
