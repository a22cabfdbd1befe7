use assert_cmd::Command;
use predicates::prelude::*;

fn run(req: &serde_json::Value) -> anyhow::Result<String> {
    let mut cmd = Command::cargo_bin("github-watch-mcp")?;
    let input = format!("{}\n", serde_json::to_string(req)?);
    let assert = cmd.arg("--log-level").arg("warn").write_stdin(input).assert();
    Ok(String::from_utf8(assert.get_output().stdout.clone())?)
}

#[test]
fn initialize_reports_protocol_and_server() -> anyhow::Result<()> {
    let out = run(&serde_json::json!({
        "jsonrpc": "2.0", "method": "initialize", "id": 1
    }))?;
    assert!(out.contains("\"protocolVersion\""));
    assert!(out.contains("github-watch-mcp"));
    Ok(())
}

#[test]
fn tools_list_includes_wait_tools() -> anyhow::Result<()> {
    let out = run(&serde_json::json!({
        "jsonrpc": "2.0", "method": "tools/list", "id": 2
    }))?;
    assert!(out.contains("\"wait_for_pr_checks\""));
    assert!(out.contains("\"wait_for_pr_review\""));
    assert!(out.contains("\"list_pull_requests\""));
    assert!(out.contains("\"get_pull_request_status\""));
    assert!(out.contains("\"inputSchema\""));
    Ok(())
}

#[test]
fn ping_tool_uses_result_envelope() -> anyhow::Result<()> {
    let out = run(&serde_json::json!({
        "jsonrpc": "2.0", "method": "tools/call", "id": 3,
        "params": {"name": "ping", "arguments": {"message": "hello"}}
    }))?;
    let v: serde_json::Value = serde_json::from_str(out.lines().next().unwrap())?;
    let result = &v["result"];
    assert_eq!(result["content"][0]["type"], "text");
    assert_eq!(result["structuredContent"]["message"], "hello");
    assert!(result.get("isError").is_none());
    Ok(())
}

#[test]
fn version_flag_prints_version() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("github-watch-mcp")?;
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("github-watch-mcp"));
    Ok(())
}

#[test]
fn unknown_method_is_rejected() -> anyhow::Result<()> {
    let out = run(&serde_json::json!({
        "jsonrpc": "2.0", "method": "bogus/thing", "id": 4
    }))?;
    assert!(out.contains("-32601"));
    Ok(())
}

#[test]
fn unknown_tool_is_rejected() -> anyhow::Result<()> {
    let out = run(&serde_json::json!({
        "jsonrpc": "2.0", "method": "tools/call", "id": 5,
        "params": {"name": "no_such_tool", "arguments": {}}
    }))?;
    assert!(out.contains("Tool not found"));
    Ok(())
}
