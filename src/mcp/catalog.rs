// src/mcp/catalog.rs
// The fixed five-meta-tool catalog, with schemas bound to the live config

use serde_json::{json, Value};

pub const META_TOOL_NAMES: [&str; 5] = [
    "hub_list",
    "hub_discover",
    "hub_search",
    "hub_execute",
    "hub_help",
];

/// Build the `tools/list` catalog. Descriptions for discover/execute/help
/// embed the registered server names so the model can form valid calls
/// without a prior round trip; every `server` property is enum-restricted
/// to the current names (an empty enum when none are registered).
pub fn meta_tool_catalog(server_names: &[String]) -> Value {
    let list = server_names.join(", ");

    let server_property = |description: String| {
        json!({
            "type": "string",
            "description": description,
            "enum": server_names,
        })
    };

    json!([
        {
            "name": "hub_list",
            "description": "List all MCP servers registered with the gateway, with their provenance.",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        },
        {
            "name": "hub_discover",
            "description": format!(
                "List the tools exported by one registered MCP server. \
                 Registered servers: [{list}]. Call this before hub_execute \
                 when you do not know a server's tool names."
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": server_property(format!("Server to inspect. One of: {list}")),
                },
                "required": ["server"]
            }
        },
        {
            "name": "hub_search",
            "description": format!(
                "Search tools across all registered MCP servers by free text. \
                 Registered servers: [{list}]. Returns matching tools with \
                 their input schemas and relevance scores."
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Free-text query, e.g. 'create issue' or 'send message'"
                    },
                    "server": server_property(format!(
                        "Restrict results to one server. One of: {list}"
                    )),
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Maximum results to return (default 10)"
                    }
                },
                "required": ["query"]
            }
        },
        {
            "name": "hub_execute",
            "description": format!(
                "Execute a tool on a registered MCP server. \
                 Registered servers: [{list}]. Use hub_search or hub_discover \
                 first if you do not know the exact tool name."
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": server_property(format!("Server owning the tool. One of: {list}")),
                    "tool": {
                        "type": "string",
                        "description": "Tool name as reported by hub_discover or hub_search"
                    },
                    "arguments": {
                        "type": "object",
                        "description": "Arguments matching the tool's input schema"
                    },
                    "sessionId": {
                        "type": "string",
                        "description": "searchId from a preceding hub_search, for usage correlation"
                    }
                },
                "required": ["server", "tool"]
            }
        },
        {
            "name": "hub_help",
            "description": format!(
                "Show the full input schema of one tool. \
                 Registered servers: [{list}]."
            ),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": server_property(format!("Server owning the tool. One of: {list}")),
                    "tool": {
                        "type": "string",
                        "description": "Tool name to describe"
                    }
                },
                "required": ["server", "tool"]
            }
        }
    ])
}
