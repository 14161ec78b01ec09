//! Both transports the bridge sits between.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   stdio (framed)   ┌──────────────┐   WebSocket   ┌─────────────┐
//! │  MCP client  │ ◄────────────────► │    bridge    │ ◄───────────► │   editor    │
//! │              │  Content-Length or │              │  JSON-RPC     │   backend   │
//! └──────────────┘  newline JSON      └──────────────┘  text frames  └─────────────┘
//! ```
//!
//! - [`framing`] turns stdin bytes into message bodies and message bodies
//!   into stdout bytes.
//! - [`backend`] owns the WebSocket plumbing.

pub mod backend;
pub mod framing;

pub use backend::{connect, BackendError, BackendMessage, BackendReader, BackendWriter};
pub use framing::{encode_message, FrameBuffer, FramingError, ResponseMode};
