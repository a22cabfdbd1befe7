use crate::config::Config;
use crate::http::{self, ApiError, RateMeta};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Pull request fields the tools need; trimmed from the REST payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: i64,
    pub title: String,
    pub state: String,
    pub head_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
    pub is_draft: bool,
    pub merged: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: i64,
    pub name: String,
    /// queued | in_progress | completed
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunPage {
    pub total_count: i64,
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEntry {
    pub context: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedStatus {
    pub state: String,
    pub total_count: i64,
    pub statuses: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInfo {
    pub id: i64,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Commit,
    Review,
    ReviewComment,
}

/// One timestamped, attributed event on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrActivity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
    pub events: Vec<ActivityEvent>,
}

/// Pagination direction, fixed once from validated parameters; each
/// variant maps to its own query text.
#[derive(Debug, Clone)]
pub enum PrPageCursor {
    Forward(Option<String>),
    Backward(String),
}

#[derive(Debug, Clone)]
pub struct PrListFilter {
    pub states: Option<Vec<String>>,
    pub base: Option<String>,
    pub head: Option<String>,
    pub limit: u32,
    pub cursor: PrPageCursor,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrListItem {
    pub id: String,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_login: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageMeta {
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Abstract GitHub capabilities the tools are written against. The wait
/// check functions are generic over this so tests can script a fake.
#[allow(async_fn_in_trait)]
pub trait PullRequestApi {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestInfo, ApiError>;

    async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CheckRunPage, ApiError>;

    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CombinedStatus, ApiError>;

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<ReviewInfo>, bool, Option<RateMeta>), ApiError>;

    async fn query_pr_activity(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PrActivity, ApiError>;
}

/// Production client over the GitHub REST and GraphQL APIs. Shared
/// read-only across tool invocations; holds no per-call state.
pub struct GithubClient {
    client: Client,
    cfg: Config,
}

impl GithubClient {
    pub fn new(cfg: Config) -> Result<Self, ApiError> {
        let client = http::build_client(&cfg).map_err(|e| ApiError::server(e.to_string()))?;
        Ok(Self { client, cfg })
    }

    fn repo_path(owner: &str, repo: &str) -> (String, String) {
        (
            http::encode_path_segment(owner),
            http::encode_path_segment(repo),
        )
    }

    pub async fn list_pull_requests(
        &self,
        owner: &str,
        repo: &str,
        filter: &PrListFilter,
    ) -> Result<(Vec<PrListItem>, PageMeta, Option<RateMeta>), ApiError> {
        const FORWARD: &str = r#"
        query ListPullRequests($owner: String!, $repo: String!, $first: Int!, $after: String, $states: [PullRequestState!], $base: String, $head: String) {
          repository(owner: $owner, name: $repo) {
            pullRequests(first: $first, after: $after, states: $states, baseRefName: $base, headRefName: $head, orderBy: { field: UPDATED_AT, direction: DESC }) {
              nodes { id number title state createdAt updatedAt author { login } }
              pageInfo { hasNextPage endCursor }
            }
          }
        }
        "#;
        const BACKWARD: &str = r#"
        query ListPullRequests($owner: String!, $repo: String!, $last: Int!, $before: String!, $states: [PullRequestState!], $base: String, $head: String) {
          repository(owner: $owner, name: $repo) {
            pullRequests(last: $last, before: $before, states: $states, baseRefName: $base, headRefName: $head, orderBy: { field: UPDATED_AT, direction: DESC }) {
              nodes { id number title state createdAt updatedAt author { login } }
              pageInfo { hasNextPage endCursor }
            }
          }
        }
        "#;
        #[derive(Deserialize)]
        struct Login {
            login: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Node {
            id: String,
            number: i64,
            title: String,
            state: String,
            created_at: String,
            updated_at: String,
            author: Option<Login>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PageInfo {
            has_next_page: bool,
            end_cursor: Option<String>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Prs {
            nodes: Vec<Node>,
            page_info: PageInfo,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repo {
            pull_requests: Prs,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repo>,
        }

        let mut vars = serde_json::Map::new();
        vars.insert("owner".into(), serde_json::json!(owner));
        vars.insert("repo".into(), serde_json::json!(repo));
        vars.insert("states".into(), serde_json::json!(filter.states));
        vars.insert("base".into(), serde_json::json!(filter.base));
        vars.insert("head".into(), serde_json::json!(filter.head));
        let query = match &filter.cursor {
            PrPageCursor::Forward(after) => {
                vars.insert("first".into(), serde_json::json!(filter.limit));
                vars.insert("after".into(), serde_json::json!(after));
                FORWARD
            }
            PrPageCursor::Backward(before) => {
                vars.insert("last".into(), serde_json::json!(filter.limit));
                vars.insert("before".into(), serde_json::json!(before));
                BACKWARD
            }
        };

        let (data, rate) =
            http::graphql_post::<_, Data>(&self.client, &self.cfg, query, &vars).await?;
        let repo = data
            .repository
            .ok_or_else(|| ApiError::not_found("Repository not found"))?;
        let items = repo
            .pull_requests
            .nodes
            .into_iter()
            .map(|n| PrListItem {
                id: n.id,
                number: n.number,
                title: n.title,
                state: n.state,
                created_at: n.created_at,
                updated_at: n.updated_at,
                author_login: n.author.map(|a| a.login),
            })
            .collect();
        let page = PageMeta {
            next_cursor: repo.pull_requests.page_info.end_cursor,
            has_more: repo.pull_requests.page_info.has_next_page,
        };
        Ok((items, page, rate))
    }
}

impl PullRequestApi for GithubClient {
    async fn get_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PullRequestInfo, ApiError> {
        #[derive(Deserialize)]
        struct User {
            login: String,
        }
        #[derive(Deserialize)]
        struct Head {
            sha: String,
        }
        #[derive(Deserialize)]
        struct Pr {
            number: i64,
            title: String,
            state: String,
            head: Head,
            user: Option<User>,
            #[serde(default)]
            draft: bool,
            #[serde(default)]
            merged: bool,
            created_at: String,
            updated_at: String,
            merged_at: Option<String>,
        }
        let (o, r) = Self::repo_path(owner, repo);
        let path = format!("/repos/{}/{}/pulls/{}", o, r, number);
        let resp = http::rest_get_json::<Pr>(&self.client, &self.cfg, &path).await?;
        let pr = resp.value;
        Ok(PullRequestInfo {
            number: pr.number,
            title: pr.title,
            state: pr.state,
            head_sha: pr.head.sha,
            author_login: pr.user.map(|u| u.login),
            is_draft: pr.draft,
            merged: pr.merged,
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            merged_at: pr.merged_at,
        })
    }

    async fn list_check_runs(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CheckRunPage, ApiError> {
        let (o, r) = Self::repo_path(owner, repo);
        let path = format!(
            "/repos/{}/{}/commits/{}/check-runs?per_page=100",
            o,
            r,
            http::encode_path_segment(sha)
        );
        let resp = http::rest_get_json::<CheckRunPage>(&self.client, &self.cfg, &path).await?;
        Ok(resp.value)
    }

    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<CombinedStatus, ApiError> {
        let (o, r) = Self::repo_path(owner, repo);
        let path = format!(
            "/repos/{}/{}/commits/{}/status",
            o,
            r,
            http::encode_path_segment(sha)
        );
        let resp = http::rest_get_json::<CombinedStatus>(&self.client, &self.cfg, &path).await?;
        Ok(resp.value)
    }

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<ReviewInfo>, bool, Option<RateMeta>), ApiError> {
        #[derive(Deserialize)]
        struct User {
            login: String,
        }
        #[derive(Deserialize)]
        struct Review {
            id: i64,
            state: String,
            user: Option<User>,
            submitted_at: Option<String>,
        }
        let (o, r) = Self::repo_path(owner, repo);
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews?page={}&per_page={}",
            o, r, number, page, per_page
        );
        let resp = http::rest_get_json::<Vec<Review>>(&self.client, &self.cfg, &path).await?;
        let has_more = http::has_next_page_from_link(&resp.headers);
        let items = resp
            .value
            .into_iter()
            .map(|rv| ReviewInfo {
                id: rv.id,
                state: rv.state,
                author_login: rv.user.map(|u| u.login),
                submitted_at: rv.submitted_at,
            })
            .collect();
        Ok((items, has_more, resp.rate))
    }

    async fn query_pr_activity(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<PrActivity, ApiError> {
        let query = r#"
        query PrActivity($owner: String!, $repo: String!, $number: Int!) {
          repository(owner: $owner, name: $repo) {
            pullRequest(number: $number) {
              author { login }
              commits(last: 100) {
                nodes { commit { committedDate author { user { login } } } }
              }
              reviews(last: 100) {
                nodes {
                  submittedAt
                  author { login }
                  comments(last: 100) { nodes { createdAt author { login } } }
                }
              }
            }
          }
        }
        "#;
        #[derive(Deserialize)]
        struct Login {
            login: String,
        }
        #[derive(Deserialize)]
        struct CommitUser {
            user: Option<Login>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Commit {
            committed_date: String,
            author: Option<CommitUser>,
        }
        #[derive(Deserialize)]
        struct CommitNode {
            commit: Commit,
        }
        #[derive(Deserialize)]
        struct Nodes<T> {
            nodes: Vec<T>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CommentNode {
            created_at: String,
            author: Option<Login>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct ReviewNode {
            submitted_at: Option<String>,
            author: Option<Login>,
            comments: Nodes<CommentNode>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Pr {
            author: Option<Login>,
            commits: Nodes<CommitNode>,
            reviews: Nodes<ReviewNode>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Repo {
            pull_request: Option<Pr>,
        }
        #[derive(Deserialize)]
        struct Data {
            repository: Option<Repo>,
        }
        let vars = serde_json::json!({ "owner": owner, "repo": repo, "number": number });
        let (data, _rate) =
            http::graphql_post::<_, Data>(&self.client, &self.cfg, query, &vars).await?;
        let pr = data
            .repository
            .and_then(|r| r.pull_request)
            .ok_or_else(|| ApiError::not_found("Pull request not found"))?;

        let mut events = Vec::new();
        for node in pr.commits.nodes {
            events.push(ActivityEvent {
                kind: ActivityKind::Commit,
                author_login: node.commit.author.and_then(|a| a.user).map(|u| u.login),
                at: node.commit.committed_date,
            });
        }
        for review in pr.reviews.nodes {
            let review_author = review.author.map(|a| a.login);
            if let Some(at) = review.submitted_at {
                events.push(ActivityEvent {
                    kind: ActivityKind::Review,
                    author_login: review_author.clone(),
                    at,
                });
            }
            for comment in review.comments.nodes {
                events.push(ActivityEvent {
                    kind: ActivityKind::ReviewComment,
                    author_login: comment.author.map(|a| a.login),
                    at: comment.created_at,
                });
            }
        }
        Ok(PrActivity {
            author_login: pr.author.map(|a| a.login),
            events,
        })
    }
}
