use assert_cmd::Command;
use httpmock::{Method::GET, Method::POST, MockServer};

fn run_with_env(req: &serde_json::Value, envs: &[(String, String)]) -> anyhow::Result<String> {
    let mut cmd = Command::cargo_bin("github-watch-mcp")?;
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let input = format!("{}\n", serde_json::to_string(req)?);
    let assert = cmd.arg("--log-level").arg("warn").write_stdin(input).assert();
    Ok(String::from_utf8(assert.get_output().stdout.clone())?)
}

fn github_env(server: &MockServer) -> Vec<(String, String)> {
    vec![
        ("GITHUB_TOKEN".into(), "t".into()),
        ("GITHUB_API_URL".into(), server.base_url()),
        (
            "GITHUB_GRAPHQL_URL".into(),
            format!("{}/graphql", server.base_url()),
        ),
        ("GITHUB_WAIT_POLL_INTERVAL_MS".into(), "10".into()),
    ]
}

fn mock_pr(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/pulls/1");
        then.status(200).json_body(serde_json::json!({
            "number": 1,
            "title": "Add feature",
            "state": "open",
            "head": {"sha": "abc123"},
            "user": {"login": "alice"},
            "draft": false,
            "merged": false,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-02T00:00:00Z",
            "merged_at": null
        }));
    });
}

fn activity_body(commit_at: &str, review_at: Option<&str>) -> serde_json::Value {
    let reviews = match review_at {
        Some(at) => serde_json::json!([{
            "submittedAt": at,
            "author": {"login": "bob"},
            "comments": {"nodes": []}
        }]),
        None => serde_json::json!([]),
    };
    serde_json::json!({
        "data": {"repository": {"pullRequest": {
            "author": {"login": "alice"},
            "commits": {"nodes": [{
                "commit": {"committedDate": commit_at, "author": {"user": {"login": "alice"}}}
            }]},
            "reviews": {"nodes": reviews}
        }}}
    })
}

fn wait_review_req(extra: serde_json::Value) -> serde_json::Value {
    let mut arguments = serde_json::json!({"owner": "o", "repo": "r", "pull_number": 1});
    if let (Some(dst), Some(src)) = (arguments.as_object_mut(), extra.as_object()) {
        for (k, v) in src {
            dst.insert(k.clone(), v.clone());
        }
    }
    serde_json::json!({
        "jsonrpc": "2.0", "method": "tools/call", "id": 1,
        "params": {"name": "wait_for_pr_review", "arguments": arguments}
    })
}

#[test]
fn reviewer_response_newer_than_author_terminates() -> anyhow::Result<()> {
    let server = MockServer::start();
    mock_pr(&server);
    let gql = server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(activity_body(
            "2025-03-01T10:00:00Z",
            Some("2025-03-01T11:00:00Z"),
        ));
    });
    let out = run_with_env(&wait_review_req(serde_json::json!({})), &github_env(&server))?;
    assert!(!out.contains("\"isError\":true"));
    assert!(out.contains("non_viewer_max_date"));
    assert!(out.contains("viewer_dates"));
    assert_eq!(gql.hits(), 1);
    Ok(())
}

#[test]
fn author_activity_newer_than_review_times_out() -> anyhow::Result<()> {
    let server = MockServer::start();
    mock_pr(&server);
    server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(activity_body(
            "2025-03-01T11:00:00Z",
            Some("2025-03-01T10:00:00Z"),
        ));
    });
    let req = wait_review_req(serde_json::json!({"timeout_seconds": 1}));
    let out = run_with_env(&req, &github_env(&server))?;
    assert!(out.contains("Timeout waiting for pull request review"));
    assert!(out.contains("\"isError\":true"));
    Ok(())
}

#[test]
fn malformed_resume_token_is_a_validation_error() -> anyhow::Result<()> {
    let server = MockServer::start();
    let pr = server.mock(|when, then| {
        when.method(GET).path("/repos/o/r/pulls/1");
        then.status(200).json_body(serde_json::json!({}));
    });
    let req = wait_review_req(serde_json::json!({"resume": "!!not-a-token!!"}));
    let out = run_with_env(&req, &github_env(&server))?;
    assert!(out.contains("\"isError\":true"));
    assert!(out.contains("resume"));
    assert_eq!(pr.hits(), 0);
    Ok(())
}

#[test]
fn activity_query_failure_is_fatal_on_first_poll() -> anyhow::Result<()> {
    let server = MockServer::start();
    mock_pr(&server);
    let gql = server.mock(|when, then| {
        when.method(POST).path("/graphql");
        then.status(200).json_body(serde_json::json!({
            "data": null,
            "errors": [{"message": "Something went wrong"}]
        }));
    });
    let out = run_with_env(&wait_review_req(serde_json::json!({})), &github_env(&server))?;
    assert!(out.contains("\"isError\":true"));
    assert!(out.contains("Something went wrong"));
    assert_eq!(gql.hits(), 1);
    Ok(())
}
