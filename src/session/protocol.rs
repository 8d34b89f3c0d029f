//! Custom mclsp protocol extensions

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_lsp::lsp_types::{
    ClientCapabilities, ClientInfo, InitializeParams, TextDocumentClientCapabilities,
    TextDocumentSyncClientCapabilities, Url,
};

use crate::config::Flavor;

/// Pull request for the virtual C document of a source
pub const VIRTUAL_DOCUMENT_REQUEST: &str = "$/mclsp/virtualCDocument";

/// Server push after any rebuild of a virtual document
pub const VIRTUAL_DOCUMENT_UPDATED: &str = "$/mclsp/virtualCDocumentUpdated";

/// Source position → virtual position query
pub const POSITION_REQUEST: &str = "$/mclsp/positionInCRegion";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDocumentParams {
    pub uri: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// `line` is 1-based, `col` 0-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionParams {
    pub uri: Url,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResult {
    pub in_c_region: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_col: Option<u32>,
}

/// `initialize` params; the flavor is only sent when it is not `auto`
#[allow(deprecated)]
pub fn initialize_params(root_uri: Option<Url>, flavor: Flavor) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        root_uri,
        initialization_options: flavor
            .as_init_option()
            .map(|flavor| json!({ "flavor": flavor })),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    did_save: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        client_info: Some(ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    }
}

/// Language id announced in `didOpen`
pub fn language_id(uri: &Url) -> &'static str {
    if uri.path().to_ascii_lowercase().ends_with(".comp") {
        "mccode-comp"
    } else {
        "mccode-instr"
    }
}

/// JSON-RPC request frame
pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// JSON-RPC notification frame
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Successful JSON-RPC response frame
pub fn response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}
