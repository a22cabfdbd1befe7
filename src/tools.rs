use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

pub fn tool_descriptors() -> Vec<ToolDescriptor> {
    let ping = ToolDescriptor {
        name: "ping".into(),
        description: "Health check; echoes a message.".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "message": {"type": "string"}
            }
        }),
    };

    let list_prs = ToolDescriptor {
        name: "list_pull_requests".into(),
        description: "List pull requests".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "state": {"type": "string", "enum": ["open", "closed", "merged"]},
                "base": {"type": "string"},
                "head": {"type": "string"},
                "after": {"type": "string", "description": "Forward cursor; exclusive with before"},
                "before": {"type": "string", "description": "Backward cursor; exclusive with after"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["owner", "repo"]
        }),
    };

    let get_pr = ToolDescriptor {
        name: "get_pull_request".into(),
        description: "Get a single pull request".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "pull_number": {"type": "integer"}
            },
            "required": ["owner", "repo", "pull_number"]
        }),
    };

    let list_reviews = ToolDescriptor {
        name: "list_pr_reviews_light".into(),
        description: "List pull request reviews (light)".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "pull_number": {"type": "integer"},
                "cursor": {"type": "string", "description": "Opaque page cursor; exclusive with page/per_page"},
                "page": {"type": "integer", "minimum": 1},
                "per_page": {"type": "integer", "minimum": 1, "maximum": 100}
            },
            "required": ["owner", "repo", "pull_number"]
        }),
    };

    let get_status = ToolDescriptor {
        name: "get_pull_request_status".into(),
        description: "Get the combined commit status for a PR's head commit".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "pull_number": {"type": "integer"}
            },
            "required": ["owner", "repo", "pull_number"]
        }),
    };

    let wait_checks = ToolDescriptor {
        name: "wait_for_pr_checks".into(),
        description: "Poll until every check run on the PR's head commit has completed".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "pull_number": {"type": "integer"},
                "timeout_seconds": {"type": "integer", "minimum": 1},
                "resume": {"type": "string", "description": "Token from a previous timed-out wait"}
            },
            "required": ["owner", "repo", "pull_number"]
        }),
    };

    let wait_review = ToolDescriptor {
        name: "wait_for_pr_review".into(),
        description: "Poll until someone other than the author responds on the PR".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string"},
                "repo": {"type": "string"},
                "pull_number": {"type": "integer"},
                "timeout_seconds": {"type": "integer", "minimum": 1},
                "resume": {"type": "string", "description": "Token from a previous timed-out wait"}
            },
            "required": ["owner", "repo", "pull_number"]
        }),
    };

    vec![
        ping,
        list_prs,
        get_pr,
        list_reviews,
        get_status,
        wait_checks,
        wait_review,
    ]
}

// Shared result meta shape used across tools.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Meta {
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub rate: Option<crate::http::RateMeta>,
}
