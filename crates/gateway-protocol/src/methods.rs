//! Method and tool name constants.
//!
//! Each method constant is the exact string sent over the wire as the
//! `method` field of a JSON-RPC request; tool names are the `name` field of
//! a `tools/call`.

/// JSON-RPC methods understood by the dispatch layer.
pub struct Methods;

impl Methods {
    // ── Lifecycle ───────────────────────────────────────────────────────
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";

    // ── Tools ───────────────────────────────────────────────────────────
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Names of the built-in tools.
pub struct ToolNames;

impl ToolNames {
    pub const DEHYDRATE: &str = "dehydrate";
    pub const REHYDRATE: &str = "rehydrate";
    pub const DEHYDRATE_FILE: &str = "dehydrate_file";
}

/// Protocol revision reported from `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";
