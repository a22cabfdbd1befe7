use crate::args::{self, ArgError, Args};
use crate::config::Config;
use crate::github::{GithubClient, PrListFilter, PrPageCursor, PullRequestApi};
use crate::http::{self, RestCursor};
use crate::mcp::{mcp_error, mcp_wrap};
use crate::poll::StdioProgress;
use crate::tools::{tool_descriptors, Meta, PROTOCOL_VERSION};
use crate::wait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};

// Minimal JSON-RPC 2.0 types
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Id {
    Str(String),
    Num(i64),
    Null,
}

#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Option<Id>,
}

#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Option<Id>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn rpc_error(id: Option<Id>, code: i64, message: &str) -> Response {
    Response {
        jsonrpc: "2.0",
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
        }),
        id,
    }
}

fn rpc_ok(id: Option<Id>, result: Value) -> Response {
    Response {
        jsonrpc: "2.0",
        result: Some(result),
        error: None,
        id,
    }
}

/// Serve line-delimited JSON-RPC over stdio until EOF. Requests are
/// handled one at a time; progress notifications from wait tools are
/// interleaved on stdout by the handlers themselves.
pub async fn run_stdio_server() -> anyhow::Result<()> {
    info!(
        "Starting github-watch-mcp stdio server; protocol={}",
        PROTOCOL_VERSION
    );
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                write_response(&rpc_error(None, -32700, &format!("Parse error: {}", e)))?;
                continue;
            }
        };
        debug!("Received method={}", req.method);
        if let Some(resp) = dispatch(req).await {
            write_response(&resp)?;
        }
    }
    Ok(())
}

fn write_response(resp: &Response) -> anyhow::Result<()> {
    let mut out = io::stdout();
    let payload = serde_json::to_string(resp)?;
    writeln!(out, "{}", payload)?;
    out.flush()?;
    Ok(())
}

async fn dispatch(req: Request) -> Option<Response> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(req.id)),
        "notifications/initialized" => None,
        "tools/list" => Some(handle_tools_list(req.id)),
        "tools/call" => Some(handle_tools_call(req.id, req.params).await),
        "ping" => Some(rpc_ok(req.id, serde_json::json!({}))),
        other => Some(rpc_error(
            req.id,
            -32601,
            &format!("Method not found: {}", other),
        )),
    }
}

fn handle_initialize(id: Option<Id>) -> Response {
    rpc_ok(
        id,
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "github-watch-mcp",
                "version": env!("CARGO_PKG_VERSION"),
            }
        }),
    )
}

fn handle_tools_list(id: Option<Id>) -> Response {
    let tools = tool_descriptors();
    rpc_ok(id, serde_json::json!({ "tools": tools }))
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default, rename = "_meta")]
    meta: Value,
}

fn arg_error(e: &ArgError) -> Value {
    mcp_error(e.code(), &e.to_string(), None)
}

async fn handle_tools_call(id: Option<Id>, params: Value) -> Response {
    let Ok(call) = serde_json::from_value::<ToolCallParams>(params) else {
        return rpc_error(id, -32602, "Invalid params");
    };
    let arguments = match args::as_object(&call.arguments) {
        Ok(a) => a,
        Err(e) => return rpc_ok(id, arg_error(&e)),
    };
    let progress_token = call.meta.get("progressToken").cloned();

    if call.name == "ping" {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("pong")
            .to_string();
        return rpc_ok(id, mcp_wrap(serde_json::json!({ "message": message }), None, false));
    }

    const TOOL_NAMES: [&str; 6] = [
        "list_pull_requests",
        "get_pull_request",
        "list_pr_reviews_light",
        "get_pull_request_status",
        "wait_for_pr_checks",
        "wait_for_pr_review",
    ];
    if !TOOL_NAMES.contains(&call.name.as_str()) {
        return rpc_error(id, -32601, &format!("Tool not found: {}", call.name));
    }

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => return rpc_error(id, -32603, &e),
    };
    let client = match GithubClient::new(cfg.clone()) {
        Ok(c) => c,
        Err(e) => return rpc_error(id, -32603, &e.message),
    };

    let result = match call.name.as_str() {
        "list_pull_requests" => handle_list_pull_requests(&client, &arguments).await,
        "get_pull_request" => handle_get_pull_request(&client, &arguments).await,
        "list_pr_reviews_light" => handle_list_pr_reviews(&client, &arguments).await,
        "get_pull_request_status" => handle_get_pr_status(&client, &arguments).await,
        "wait_for_pr_checks" => {
            wait::handle_wait_for_pr_checks(
                &client,
                &cfg,
                &StdioProgress,
                None,
                &arguments,
                progress_token,
            )
            .await
        }
        "wait_for_pr_review" => {
            wait::handle_wait_for_pr_review(
                &client,
                &cfg,
                &StdioProgress,
                None,
                &arguments,
                progress_token,
            )
            .await
        }
        // Unreachable: the name was screened above.
        _ => return rpc_error(id, -32601, &format!("Tool not found: {}", call.name)),
    };
    rpc_ok(id, result)
}

async fn handle_list_pull_requests(client: &GithubClient, arguments: &Args) -> Value {
    let parsed = (|| -> Result<(String, String, PrListFilter), ArgError> {
        let owner = args::required_string(arguments, "owner")?;
        let repo = args::required_string(arguments, "repo")?;
        let limit = args::limit_in_range(arguments, "limit", 30)?;
        let state = args::optional_enum(arguments, "state", &["open", "closed", "merged"])?;
        let base = args::optional_string(arguments, "base")?;
        let head = args::optional_string(arguments, "head")?;
        let (after, before) = args::cursor_exclusive(arguments, "after", "before")?;
        let cursor = match before {
            Some(b) => PrPageCursor::Backward(b),
            None => PrPageCursor::Forward(after),
        };
        let filter = PrListFilter {
            states: state.map(|s| vec![s.to_uppercase()]),
            base,
            head,
            limit,
            cursor,
        };
        Ok((owner, repo, filter))
    })();
    let (owner, repo, filter) = match parsed {
        Ok(v) => v,
        Err(e) => return arg_error(&e),
    };
    match client.list_pull_requests(&owner, &repo, &filter).await {
        Ok((items, page, rate)) => {
            let meta = Meta {
                next_cursor: page.next_cursor,
                has_more: page.has_more,
                rate,
            };
            mcp_wrap(
                serde_json::json!({ "items": items, "meta": meta }),
                None,
                false,
            )
        }
        Err(e) => mcp_error(&e.code, &e.message, None),
    }
}

async fn handle_get_pull_request(client: &GithubClient, arguments: &Args) -> Value {
    let parsed = (|| -> Result<(String, String, i64), ArgError> {
        Ok((
            args::required_string(arguments, "owner")?,
            args::required_string(arguments, "repo")?,
            args::required_int(arguments, "pull_number")?,
        ))
    })();
    let (owner, repo, number) = match parsed {
        Ok(v) => v,
        Err(e) => return arg_error(&e),
    };
    match client.get_pull_request(&owner, &repo, number).await {
        Ok(pr) => mcp_wrap(serde_json::json!({ "item": pr }), None, false),
        Err(e) => mcp_error(&e.code, &e.message, None),
    }
}

async fn handle_list_pr_reviews(client: &GithubClient, arguments: &Args) -> Value {
    let parsed = (|| -> Result<(String, String, i64, u32, u32), ArgError> {
        let owner = args::required_string(arguments, "owner")?;
        let repo = args::required_string(arguments, "repo")?;
        let number = args::required_int(arguments, "pull_number")?;
        let cursor = args::optional_string(arguments, "cursor")?;
        if cursor.is_some() {
            for conflicting in ["page", "per_page"] {
                if arguments.get(conflicting).is_some() {
                    return Err(ArgError::Invalid(format!(
                        "parameters cursor and {} are mutually exclusive",
                        conflicting
                    )));
                }
            }
        }
        let (page, per_page) = match cursor {
            Some(c) => {
                let c = http::decode_rest_cursor(&c)
                    .ok_or_else(|| ArgError::Invalid("parameter cursor is not a valid cursor".into()))?;
                (c.page, c.per_page)
            }
            None => {
                let page = args::page_at_least_one(arguments, "page")?.unwrap_or(1);
                let per_page = args::limit_in_range(arguments, "per_page", 30)?;
                (page, per_page)
            }
        };
        Ok((owner, repo, number, page, per_page))
    })();
    let (owner, repo, number, page, per_page) = match parsed {
        Ok(v) => v,
        Err(e) => return arg_error(&e),
    };
    match client
        .list_reviews(&owner, &repo, number, page, per_page)
        .await
    {
        Ok((items, has_more, rate)) => {
            let next_cursor = has_more.then(|| {
                http::encode_rest_cursor(&RestCursor {
                    page: page + 1,
                    per_page,
                })
            });
            let meta = Meta {
                next_cursor,
                has_more,
                rate,
            };
            mcp_wrap(
                serde_json::json!({ "items": items, "meta": meta }),
                None,
                false,
            )
        }
        Err(e) => mcp_error(&e.code, &e.message, None),
    }
}

async fn handle_get_pr_status(client: &GithubClient, arguments: &Args) -> Value {
    let parsed = (|| -> Result<(String, String, i64), ArgError> {
        Ok((
            args::required_string(arguments, "owner")?,
            args::required_string(arguments, "repo")?,
            args::required_int(arguments, "pull_number")?,
        ))
    })();
    let (owner, repo, number) = match parsed {
        Ok(v) => v,
        Err(e) => return arg_error(&e),
    };
    let pr = match client.get_pull_request(&owner, &repo, number).await {
        Ok(pr) => pr,
        Err(e) => return mcp_error(&e.code, &e.message, None),
    };
    match client
        .get_combined_status(&owner, &repo, &pr.head_sha)
        .await
    {
        Ok(status) => mcp_wrap(
            serde_json::json!({ "item": { "sha": pr.head_sha, "status": status } }),
            None,
            false,
        ),
        Err(e) => mcp_error(&e.code, &e.message, None),
    }
}
