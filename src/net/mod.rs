//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! configured base URI
//!     → uri.rs (canonical form, host key)
//!     → tls.rs (trust context for https candidates)
//!     → http transport opens the connection
//! ```
//!
//! # Design Decisions
//! - Candidates are validated once, before any call is attempted
//! - TLS material is immutable; reloading means building a new context

pub mod tls;
pub mod uri;

pub use tls::{TlsMaterialError, TrustContext};
pub use uri::{CandidateUri, UriError};
