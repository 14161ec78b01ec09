//! Per-message routing.
//!
//! Two handshake methods are answered locally, the `initialized`
//! notification is swallowed, and everything else goes to the backend
//! untouched, including text that is not JSON at all.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{
    builtin_tools, InitializeResult, JsonRpcResponse, ProtocolMessage, ToolsListResult,
};

/// What to do with one extracted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Write this serialized response back to the client.
    Respond(String),
    /// Pass the original text to the backend unchanged.
    Forward,
    /// Do nothing.
    Drop,
}

/// Decide how to handle `text`.
pub fn route(text: &str) -> Route {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!("forwarding undecodable message: {}", e);
            return Route::Forward;
        }
    };

    // Only objects are routable; duplicate keys resolve to the last one.
    if !value.is_object() {
        debug!("forwarding non-object message");
        return Route::Forward;
    }
    let msg: ProtocolMessage = match serde_json::from_value(value) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("forwarding malformed message: {}", e);
            return Route::Forward;
        }
    };

    let Some(method) = msg.routable_method() else {
        debug!("forwarding message without jsonrpc/method");
        return Route::Forward;
    };

    match method {
        "notifications/initialized" => Route::Drop,
        "initialize" => respond(msg.id, InitializeResult::default()),
        "tools/list" => respond(
            msg.id,
            ToolsListResult {
                tools: builtin_tools(),
            },
        ),
        _ => Route::Forward,
    }
}

fn respond<T: Serialize>(id: Value, result: T) -> Route {
    match serde_json::to_string(&JsonRpcResponse::new(id, result)) {
        Ok(text) => Route::Respond(text),
        Err(e) => {
            // Only reachable through a broken Serialize impl; let the backend answer.
            warn!("failed to serialize local response: {}", e);
            Route::Forward
        }
    }
}
