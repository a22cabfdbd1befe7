use crate::args::{self, ArgError, Args};
use crate::config::Config;
use crate::github::{CheckRunPage, PrActivity, PullRequestApi};
use crate::http::ApiError;
use crate::mcp::{mcp_error, mcp_wrap};
use crate::poll::{self, ProgressSink, WaitContext, WaitError};
use chrono::{DateTime, FixedOffset};
use log::warn;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::watch;

const CHECKS_WHAT: &str = "pull request checks to complete";
const REVIEW_WHAT: &str = "pull request review";

/// One iteration of the checks wait: are all check runs on the PR's head
/// commit finished? A PR with no configured checks is terminal at once.
pub async fn checks_complete<C: PullRequestApi>(
    api: &C,
    owner: &str,
    repo: &str,
    pull_number: i64,
) -> Result<Option<CheckRunPage>, ApiError> {
    let pr = api.get_pull_request(owner, repo, pull_number).await?;
    let page = api.list_check_runs(owner, repo, &pr.head_sha).await?;
    if page.check_runs.is_empty() {
        return Ok(Some(page));
    }
    let all_done = page.check_runs.iter().all(|r| r.status == "completed");
    Ok(all_done.then_some(page))
}

/// Activity summary returned when the review wait turns terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewActivity {
    pub viewer_dates: Vec<String>,
    pub viewer_max_date: Option<String>,
    pub non_viewer_dates: Vec<String>,
    pub non_viewer_max_date: Option<String>,
}

fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Some(dt),
        Err(e) => {
            warn!("skipping unparseable activity timestamp {:?}: {}", s, e);
            None
        }
    }
}

/// Partition PR activity into author vs everyone else and decide whether a
/// reviewer has spoken more recently than the author's last action.
pub fn summarize_activity(activity: &PrActivity) -> (ReviewActivity, bool) {
    let author = activity.author_login.as_deref();
    let mut viewer: Vec<(DateTime<FixedOffset>, String)> = Vec::new();
    let mut non_viewer: Vec<(DateTime<FixedOffset>, String)> = Vec::new();
    for ev in &activity.events {
        let Some(dt) = parse_date(&ev.at) else {
            continue;
        };
        // Unattributable events (e.g. commits pushed with an unlinked
        // email) are skipped, like unparseable timestamps; counting them
        // as a reviewer response would end the wait on the author's own
        // push.
        let Some(event_author) = ev.author_login.as_deref() else {
            continue;
        };
        let is_author = author == Some(event_author);
        if is_author {
            viewer.push((dt, ev.at.clone()));
        } else {
            non_viewer.push((dt, ev.at.clone()));
        }
    }
    let viewer_max = viewer.iter().map(|(dt, _)| *dt).max();
    let non_viewer_max = non_viewer.iter().map(|(dt, _)| *dt).max();
    let terminal = match (viewer_max, non_viewer_max) {
        (Some(v), Some(nv)) => nv > v,
        (None, Some(_)) => true,
        _ => false,
    };
    let max_str = |m: Option<DateTime<FixedOffset>>| m.map(|dt| dt.to_rfc3339());
    let summary = ReviewActivity {
        viewer_dates: viewer.into_iter().map(|(_, s)| s).collect(),
        viewer_max_date: max_str(viewer_max),
        non_viewer_dates: non_viewer.into_iter().map(|(_, s)| s).collect(),
        non_viewer_max_date: max_str(non_viewer_max),
    };
    (summary, terminal)
}

/// One iteration of the review wait: has someone other than the author
/// said something since the author's last activity?
pub async fn review_arrived<C: PullRequestApi>(
    api: &C,
    owner: &str,
    repo: &str,
    pull_number: i64,
) -> Result<Option<ReviewActivity>, ApiError> {
    // The PR fetch pins the author identity even when the activity query
    // returns a deleted/ghost author.
    let pr = api.get_pull_request(owner, repo, pull_number).await?;
    let mut activity = api.query_pr_activity(owner, repo, pull_number).await?;
    if activity.author_login.is_none() {
        activity.author_login = pr.author_login;
    }
    let (summary, terminal) = summarize_activity(&activity);
    Ok(terminal.then_some(summary))
}

fn parse_wait_params(
    cfg: &Config,
    arguments: &Args,
    progress_token: Option<Value>,
) -> Result<WaitContext, ArgError> {
    let owner = args::required_string(arguments, "owner")?;
    let repo = args::required_string(arguments, "repo")?;
    let pull_number = args::required_int(arguments, "pull_number")?;
    let timeout_secs =
        args::optional_int_or(arguments, "timeout_seconds", cfg.wait_timeout_secs as i64)?;
    if timeout_secs < 1 {
        return Err(ArgError::Invalid(format!(
            "parameter timeout_seconds must be >= 1, got {}",
            timeout_secs
        )));
    }
    let resume = match args::optional_string(arguments, "resume")? {
        None => None,
        Some(s) => Some(
            poll::decode_resume(&s)
                .ok_or_else(|| ArgError::Invalid("parameter resume is not a valid resume token".into()))?,
        ),
    };
    let ctx = WaitContext::new(
        owner,
        repo,
        pull_number,
        Duration::from_secs(timeout_secs as u64),
        Duration::from_millis(cfg.poll_interval_ms),
        progress_token,
        resume,
    );
    Ok(ctx)
}

fn wait_error_result(err: WaitError, ctx: &WaitContext) -> Value {
    match err {
        WaitError::Timeout(_) => mcp_error(
            "timeout",
            &err.to_string(),
            Some(serde_json::json!({ "resume": ctx.resume_token() })),
        ),
        WaitError::Canceled(_) => mcp_error("canceled", &err.to_string(), None),
        WaitError::Api(api) => mcp_error(&api.code, &api.message, None),
    }
}

/// wait_for_pr_checks tool handler.
pub async fn handle_wait_for_pr_checks<C: PullRequestApi>(
    api: &C,
    cfg: &Config,
    sink: &dyn ProgressSink,
    cancel: Option<watch::Receiver<bool>>,
    arguments: &Args,
    progress_token: Option<Value>,
) -> Value {
    let ctx = match parse_wait_params(cfg, arguments, progress_token) {
        Ok(c) => c,
        Err(e) => return mcp_error(e.code(), &e.to_string(), None),
    };
    let (owner, repo, number) = (ctx.owner.clone(), ctx.repo.clone(), ctx.pull_number);
    let outcome = poll::poll_until(&ctx, cancel, sink, CHECKS_WHAT, || {
        checks_complete(api, &owner, &repo, number)
    })
    .await;
    match outcome {
        Ok(page) => mcp_wrap(
            serde_json::to_value(&page).unwrap_or_else(|_| Value::Null),
            None,
            false,
        ),
        Err(err) => wait_error_result(err, &ctx),
    }
}

/// wait_for_pr_review tool handler.
pub async fn handle_wait_for_pr_review<C: PullRequestApi>(
    api: &C,
    cfg: &Config,
    sink: &dyn ProgressSink,
    cancel: Option<watch::Receiver<bool>>,
    arguments: &Args,
    progress_token: Option<Value>,
) -> Value {
    let ctx = match parse_wait_params(cfg, arguments, progress_token) {
        Ok(c) => c,
        Err(e) => return mcp_error(e.code(), &e.to_string(), None),
    };
    let (owner, repo, number) = (ctx.owner.clone(), ctx.repo.clone(), ctx.pull_number);
    let outcome = poll::poll_until(&ctx, cancel, sink, REVIEW_WHAT, || {
        review_arrived(api, &owner, &repo, number)
    })
    .await;
    match outcome {
        Ok(summary) => mcp_wrap(
            serde_json::to_value(&summary).unwrap_or_else(|_| Value::Null),
            None,
            false,
        ),
        Err(err) => wait_error_result(err, &ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::{
        ActivityEvent, ActivityKind, CheckRun, CombinedStatus, PullRequestInfo, ReviewInfo,
    };
    use crate::http::RateMeta;
    use std::cell::{Cell, RefCell};

    fn pr(author: &str) -> PullRequestInfo {
        PullRequestInfo {
            number: 1,
            title: "t".into(),
            state: "open".into(),
            head_sha: "abc123".into(),
            author_login: Some(author.into()),
            is_draft: false,
            merged: false,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
            merged_at: None,
        }
    }

    fn run(status: &str, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            id: 1,
            name: "ci".into(),
            status: status.into(),
            conclusion: conclusion.map(|s| s.into()),
            started_at: None,
            completed_at: None,
        }
    }

    /// Scripted fake: each call pops the next canned response.
    struct Fake {
        pr: RefCell<Vec<Result<PullRequestInfo, ApiError>>>,
        checks: RefCell<Vec<Result<CheckRunPage, ApiError>>>,
        activity: RefCell<Vec<Result<PrActivity, ApiError>>>,
        pr_calls: Cell<u32>,
        check_calls: Cell<u32>,
    }

    impl Fake {
        fn new() -> Self {
            Self {
                pr: RefCell::new(Vec::new()),
                checks: RefCell::new(Vec::new()),
                activity: RefCell::new(Vec::new()),
                pr_calls: Cell::new(0),
                check_calls: Cell::new(0),
            }
        }
    }

    impl PullRequestApi for Fake {
        async fn get_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            _number: i64,
        ) -> Result<PullRequestInfo, ApiError> {
            self.pr_calls.set(self.pr_calls.get() + 1);
            self.pr.borrow_mut().remove(0)
        }

        async fn list_check_runs(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
        ) -> Result<CheckRunPage, ApiError> {
            self.check_calls.set(self.check_calls.get() + 1);
            self.checks.borrow_mut().remove(0)
        }

        async fn get_combined_status(
            &self,
            _owner: &str,
            _repo: &str,
            _sha: &str,
        ) -> Result<CombinedStatus, ApiError> {
            unimplemented!("not used by wait tools")
        }

        async fn list_reviews(
            &self,
            _owner: &str,
            _repo: &str,
            _number: i64,
            _page: u32,
            _per_page: u32,
        ) -> Result<(Vec<ReviewInfo>, bool, Option<RateMeta>), ApiError> {
            unimplemented!("not used by wait tools")
        }

        async fn query_pr_activity(
            &self,
            _owner: &str,
            _repo: &str,
            _number: i64,
        ) -> Result<PrActivity, ApiError> {
            self.activity.borrow_mut().remove(0)
        }
    }

    struct NullSink;
    impl ProgressSink for NullSink {
        fn send(&self, _t: &Value, _p: f64, _total: Option<f64>) -> Result<(), String> {
            Ok(())
        }
    }

    fn cfg() -> Config {
        Config {
            token: "t".into(),
            api_url: "http://localhost".into(),
            graphql_url: "http://localhost/graphql".into(),
            api_version: "2022-11-28".into(),
            user_agent: "test".into(),
            timeout_secs: 5,
            wait_timeout_secs: 10,
            poll_interval_ms: 1_000,
        }
    }

    fn args_for(v: serde_json::Value) -> Args {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn empty_check_runs_is_immediately_terminal() {
        let fake = Fake::new();
        fake.pr.borrow_mut().push(Ok(pr("alice")));
        fake.checks.borrow_mut().push(Ok(CheckRunPage {
            total_count: 0,
            check_runs: vec![],
        }));
        let out = checks_complete(&fake, "o", "r", 1).await.unwrap();
        let page = out.expect("zero checks must be terminal");
        assert!(page.check_runs.is_empty());
        assert_eq!(fake.check_calls.get(), 1);
    }

    #[tokio::test]
    async fn pending_run_keeps_polling_then_completes() {
        let fake = Fake::new();
        fake.pr.borrow_mut().push(Ok(pr("alice")));
        fake.checks.borrow_mut().push(Ok(CheckRunPage {
            total_count: 2,
            check_runs: vec![run("completed", Some("success")), run("in_progress", None)],
        }));
        assert!(checks_complete(&fake, "o", "r", 1).await.unwrap().is_none());

        fake.pr.borrow_mut().push(Ok(pr("alice")));
        fake.checks.borrow_mut().push(Ok(CheckRunPage {
            total_count: 2,
            check_runs: vec![
                run("completed", Some("success")),
                run("completed", Some("failure")),
            ],
        }));
        let page = checks_complete(&fake, "o", "r", 1).await.unwrap().unwrap();
        // Failure conclusions are still terminal; callers see pass/fail detail.
        assert_eq!(page.check_runs[1].conclusion.as_deref(), Some("failure"));
    }

    #[tokio::test]
    async fn pr_fetch_failure_is_fatal() {
        let fake = Fake::new();
        fake.pr
            .borrow_mut()
            .push(Err(ApiError::not_found("no such PR")));
        let err = checks_complete(&fake, "o", "r", 1).await.unwrap_err();
        assert_eq!(err.code, "not_found");
        assert_eq!(fake.check_calls.get(), 0);
    }

    fn event(kind: ActivityKind, login: Option<&str>, at: &str) -> ActivityEvent {
        ActivityEvent {
            kind,
            author_login: login.map(|s| s.into()),
            at: at.into(),
        }
    }

    #[test]
    fn review_newer_than_author_commit_is_terminal() {
        let activity = PrActivity {
            author_login: Some("alice".into()),
            events: vec![
                event(ActivityKind::Commit, Some("alice"), "2025-03-01T10:00:00Z"),
                event(ActivityKind::Review, Some("bob"), "2025-03-01T11:00:00Z"),
            ],
        };
        let (summary, terminal) = summarize_activity(&activity);
        assert!(terminal);
        assert!(summary.non_viewer_max_date.unwrap() > summary.viewer_max_date.unwrap());
    }

    #[test]
    fn author_commit_after_review_keeps_polling() {
        let activity = PrActivity {
            author_login: Some("alice".into()),
            events: vec![
                event(ActivityKind::Review, Some("bob"), "2025-03-01T10:00:00Z"),
                event(ActivityKind::Commit, Some("alice"), "2025-03-01T11:00:00Z"),
            ],
        };
        let (_, terminal) = summarize_activity(&activity);
        assert!(!terminal);
    }

    #[test]
    fn no_activity_at_all_keeps_polling() {
        let activity = PrActivity {
            author_login: Some("alice".into()),
            events: vec![],
        };
        let (summary, terminal) = summarize_activity(&activity);
        assert!(!terminal);
        assert!(summary.viewer_max_date.is_none());
        assert!(summary.non_viewer_max_date.is_none());
    }

    #[test]
    fn unattributed_commit_is_not_a_reviewer_response() {
        // A push with an unlinked email yields a commit with no user login;
        // it must not end the wait.
        let activity = PrActivity {
            author_login: Some("alice".into()),
            events: vec![
                event(ActivityKind::Review, Some("bob"), "2025-03-01T10:00:00Z"),
                event(ActivityKind::Commit, Some("alice"), "2025-03-01T11:00:00Z"),
                event(ActivityKind::Commit, None, "2025-03-01T12:00:00Z"),
            ],
        };
        let (summary, terminal) = summarize_activity(&activity);
        assert!(!terminal);
        assert_eq!(summary.non_viewer_dates, vec!["2025-03-01T10:00:00Z"]);
    }

    #[test]
    fn reviewer_only_activity_is_terminal() {
        let activity = PrActivity {
            author_login: Some("alice".into()),
            events: vec![event(
                ActivityKind::ReviewComment,
                Some("bob"),
                "2025-03-01T10:00:00Z",
            )],
        };
        let (_, terminal) = summarize_activity(&activity);
        assert!(terminal);
    }

    #[tokio::test]
    async fn missing_parameter_never_calls_api() {
        let fake = Fake::new();
        let out = handle_wait_for_pr_checks(
            &fake,
            &cfg(),
            &NullSink,
            None,
            &args_for(serde_json::json!({"repo": "r", "pull_number": 1})),
            None,
        )
        .await;
        assert_eq!(out["isError"], true);
        assert!(out["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("missing required parameter: owner"));
        assert_eq!(fake.pr_calls.get(), 0);
    }

    #[tokio::test]
    async fn malformed_resume_token_fails_loudly() {
        let fake = Fake::new();
        let out = handle_wait_for_pr_checks(
            &fake,
            &cfg(),
            &NullSink,
            None,
            &args_for(serde_json::json!({
                "owner": "o", "repo": "r", "pull_number": 1, "resume": "@@garbage@@"
            })),
            None,
        )
        .await;
        assert_eq!(out["isError"], true);
        assert_eq!(out["structuredContent"]["error"]["code"], "validation");
        assert_eq!(fake.pr_calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn checks_timeout_message_names_checks_and_offers_resume() {
        let fake = Fake::new();
        // Enough scripted pending iterations to outlast the 2s timeout.
        for _ in 0..5 {
            fake.pr.borrow_mut().push(Ok(pr("alice")));
            fake.checks.borrow_mut().push(Ok(CheckRunPage {
                total_count: 1,
                check_runs: vec![run("queued", None)],
            }));
        }
        let out = handle_wait_for_pr_checks(
            &fake,
            &cfg(),
            &NullSink,
            None,
            &args_for(serde_json::json!({
                "owner": "o", "repo": "r", "pull_number": 1, "timeout_seconds": 2
            })),
            None,
        )
        .await;
        assert_eq!(out["isError"], true);
        let text = out["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("checks"));
        let resume = out["structuredContent"]["resume"].as_str().unwrap();
        assert!(poll::decode_resume(resume).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn review_timeout_message_names_review() {
        let fake = Fake::new();
        for _ in 0..5 {
            fake.pr.borrow_mut().push(Ok(pr("alice")));
            fake.activity.borrow_mut().push(Ok(PrActivity {
                author_login: Some("alice".into()),
                events: vec![event(
                    ActivityKind::Commit,
                    Some("alice"),
                    "2025-03-01T10:00:00Z",
                )],
            }));
        }
        let out = handle_wait_for_pr_review(
            &fake,
            &cfg(),
            &NullSink,
            None,
            &args_for(serde_json::json!({
                "owner": "o", "repo": "r", "pull_number": 1, "timeout_seconds": 2
            })),
            None,
        )
        .await;
        assert_eq!(out["isError"], true);
        assert!(out["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("review"));
    }

    #[tokio::test]
    async fn upstream_error_surfaces_on_first_iteration() {
        let fake = Fake::new();
        fake.pr.borrow_mut().push(Ok(pr("alice")));
        fake.checks
            .borrow_mut()
            .push(Err(ApiError::upstream("boom")));
        let out = handle_wait_for_pr_checks(
            &fake,
            &cfg(),
            &NullSink,
            None,
            &args_for(serde_json::json!({"owner": "o", "repo": "r", "pull_number": 1})),
            None,
        )
        .await;
        assert_eq!(out["isError"], true);
        assert_eq!(out["structuredContent"]["error"]["code"], "upstream_error");
        assert_eq!(fake.check_calls.get(), 1);
    }
}
