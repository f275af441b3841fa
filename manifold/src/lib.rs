//! Manifold is the orchestration core of a Model Context Protocol server
//! that exposes AI-assisted developer tools (chat, thinkdeep, debug,
//! planner, ...) and routes them onto many upstream LLM providers.
//!
//! The crate is organised leaves-first:
//!
//! - [`catalog`]: immutable model capability descriptors, JSON manifest
//!   loading, and the operator restriction policy.
//! - [`providers`]: the provider contract, the shared chat-completions /
//!   responses / Gemini wire implementations, the retry helper, and the
//!   priority router.
//! - [`conversation`]: the process-wide conversation thread store that
//!   gives tools cross-call continuity.
//! - [`tools`]: the tool contract, schema builder, and the simple tools.
//! - [`workflow`]: the step-state machine shared by multi-step tools.
//! - [`server`]: the dispatcher that publishes tool descriptors and routes
//!   calls coming in over an opaque transport.
//!
//! The MCP wire protocol itself is not implemented here; the server binary
//! owns the framing and hands `tools/list` / `tools/call` requests to
//! [`server::Dispatcher`].

pub mod catalog;
pub mod conversation;
pub mod error;
pub mod providers;
pub mod server;
pub mod settings;
pub mod tokens;
pub mod tools;
pub mod workflow;

pub use error::{ConfigError, Error, Result};
