//! JSON-RPC message shapes and the payloads the bridge answers locally.
//!
//! The bridge never interprets tool calls itself; these types cover only
//! what the router needs to inspect and the two handshake responses it
//! synthesizes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// JSON-RPC version tag required on routable messages.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision advertised in the `initialize` response.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name advertised in the `initialize` response.
pub const SERVER_NAME: &str = "vscode-mcp-open-docs";

/// Server version advertised in the `initialize` response.
pub const SERVER_VERSION: &str = "0.1.0";

// =============================================================================
// Protocol Messages
// =============================================================================

/// A decoded message from either transport.
///
/// Every field is optional; the router only cares about `jsonrpc`, `id`
/// and `method`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtocolMessage {
    /// Version tag, `"2.0"` for routable messages.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request id. Absent and `null` both decode to `Value::Null`.
    #[serde(default)]
    pub id: Value,
    /// Method name for requests and notifications.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl ProtocolMessage {
    /// Method name if this message can be routed by name.
    ///
    /// Requires the `"2.0"` version tag and a non-empty method.
    pub fn routable_method(&self) -> Option<&str> {
        if self.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return None;
        }
        self.method.as_deref().filter(|m| !m.is_empty())
    }
}

/// A successful JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse<T> {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub result: T,
}

impl<T: Serialize> JsonRpcResponse<T> {
    /// Build a response echoing `id`.
    pub fn new(id: Value, result: T) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

// =============================================================================
// Handshake Payloads
// =============================================================================

/// Result of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

impl Default for InitializeResult {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

/// A tool advertised to the client, with a JSON-schema input descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// The fixed tool set served by the editor backend.
pub fn builtin_tools() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::new(
            "listOpenDocuments",
            "List documents currently open in VS Code.",
            json!({ "type": "object", "properties": {} }),
        ),
        ToolDescriptor::new(
            "readDocument",
            "Open (if needed) and read a document via VS Code. Provide uri or path.",
            json!({
                "type": "object",
                "properties": {
                    "uri": { "type": "string" },
                    "path": { "type": "string" }
                },
                "anyOf": [{ "required": ["uri"] }, { "required": ["path"] }]
            }),
        ),
        ToolDescriptor::new(
            "searchOpenDocuments",
            "Search in currently open documents.",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "isCaseSensitive": { "type": "boolean" },
                    "isRegex": { "type": "boolean" }
                },
                "required": ["query"]
            }),
        ),
    ]
}
