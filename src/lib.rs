//! opendocs-bridge Library
//!
//! A stdio <-> WebSocket bridge that lets MCP tool clients reach an editor
//! backend serving open-document tools (`listOpenDocuments`,
//! `readDocument`, `searchOpenDocuments`).
//!
//! - `transport` - stdio framing (Content-Length or newline JSON) and the
//!   backend WebSocket
//! - `router` - answers `initialize` / `tools/list` locally, forwards the rest
//! - `connection` - backend connection state machine with an ordered pending queue
//! - `bridge` - the owned bridge state, one handler per event kind
//! - `app` - the async event loop driving a `Bridge`
//! - `config` - environment-derived settings
//!
//! # Usage
//!
//! ```ignore
//! use opendocs_bridge::{app::App, config::BridgeConfig};
//!
//! let config = BridgeConfig::from_env()?;
//! App::new(config.backend_url, std::io::stdout())
//!     .run(tokio::io::stdin())
//!     .await?;
//! ```

pub mod app;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod models;
pub mod router;
pub mod transport;
