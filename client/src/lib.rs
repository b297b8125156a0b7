//! LSP protocol client for the sketchbridge editor surface.
//!
//! One [`ProtocolClient`] per active project session: it owns a single
//! transport connection to the bridge, the JSON-RPC request/response session,
//! and the registry of open documents (with incremental didChange deltas).
//! Diagnostics pushed by the language server are stored per-uri and forwarded
//! to a registered observer.

pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod documents;
pub(crate) mod protocol;

mod client;

pub use client::{Connect, ProtocolClient, Transport};
pub use types::{ClientConfig, ClientError, Diagnostic, DiagnosticSeverity, Position, Range};
