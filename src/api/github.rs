//! GitHub GraphQL search client
//!
//! This module handles all HTTP requests to the search API, including:
//! - Building the HTTP client with a proper user agent and timeouts
//! - Repository search with cursor pagination
//! - Credential verification through the `viewer` query
//! - Reading rate-limit telemetry from the body and response headers
//! - Error classification (authentication, rate limits, server errors)

use crate::api::{ApiError, SearchApi, SearchPage};
use crate::config::ApiConfig;
use crate::model::{Cursor, RateBudget, Repository};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SEARCH_QUERY: &str = r#"
query ($searchQuery: String!, $first: Int!, $after: String) {
  search(query: $searchQuery, type: REPOSITORY, first: $first, after: $after) {
    repositoryCount
    pageInfo {
      endCursor
      hasNextPage
    }
    nodes {
      ... on Repository {
        databaseId
        name
        url
        createdAt
        stargazerCount
        owner {
          login
        }
      }
    }
  }
  rateLimit {
    remaining
    resetAt
  }
}"#;

const VIEWER_QUERY: &str = r#"
query {
  viewer {
    login
  }
  rateLimit {
    remaining
    resetAt
  }
}"#;

/// Client for the GitHub GraphQL search endpoint
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    endpoint: String,
    token: String,
    page_size: u32,
}

impl GitHubClient {
    /// Builds a client from the API configuration and a bearer token
    ///
    /// # Example
    ///
    /// ```no_run
    /// use star_sweep::api::GitHubClient;
    /// use star_sweep::config::ApiConfig;
    ///
    /// let client = GitHubClient::new(&ApiConfig::default(), "ghp_example".to_string()).unwrap();
    /// ```
    pub fn new(config: &ApiConfig, token: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token,
            page_size: config.page_size,
        })
    }

    /// Posts one GraphQL document and decodes its `data` member
    async fn post<T: DeserializeOwned>(
        &self,
        payload: serde_json::Value,
    ) -> Result<(T, Option<RateBudget>), ApiError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let header_budget = budget_from_headers(&headers);
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &headers, &body));
        }

        let envelope: GraphQlResponse<T> = serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("invalid GraphQL body: {}", e)))?;

        let data = check_graphql_errors(envelope, &headers)?;
        Ok((data, header_budget))
    }
}

impl SearchApi for GitHubClient {
    async fn search(&self, query: &str, after: Option<&Cursor>) -> Result<SearchPage, ApiError> {
        let payload = json!({
            "query": SEARCH_QUERY,
            "variables": {
                "searchQuery": query,
                "first": self.page_size,
                "after": after.map(Cursor::as_token),
            }
        });

        let (data, header_budget): (SearchData, _) = self.post(payload).await?;
        let page = into_search_page(data, header_budget);

        tracing::debug!(
            "Query '{}' returned {} repositories ({} skipped), has_next_page={}",
            query,
            page.repositories.len(),
            page.skipped,
            page.has_next_page
        );

        Ok(page)
    }

    async fn verify(&self) -> Result<RateBudget, ApiError> {
        let payload = json!({ "query": VIEWER_QUERY });
        let (data, header_budget): (ViewerData, _) = self.post(payload).await?;

        tracing::info!("Authenticated as: {}", data.viewer.login);

        data.rate_limit
            .map(RateBudget::from)
            .or(header_budget)
            .ok_or_else(|| ApiError::Decode("response carried no rate limit".to_string()))
    }
}

// ===== Wire types =====

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    search: SearchConnection,
    rate_limit: Option<RateLimitNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    repository_count: Option<u64>,
    page_info: PageInfoNode,
    #[serde(default)]
    nodes: Vec<Option<RepositoryNode>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfoNode {
    end_cursor: Option<String>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    database_id: Option<i64>,
    name: Option<String>,
    url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    stargazer_count: Option<u64>,
    owner: Option<OwnerNode>,
}

#[derive(Debug, Deserialize)]
struct OwnerNode {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitNode {
    remaining: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewerData {
    viewer: ViewerNode,
    rate_limit: Option<RateLimitNode>,
}

#[derive(Debug, Deserialize)]
struct ViewerNode {
    login: String,
}

impl From<RateLimitNode> for RateBudget {
    fn from(node: RateLimitNode) -> Self {
        Self {
            remaining: node.remaining,
            reset_at: node.reset_at,
        }
    }
}

impl RepositoryNode {
    fn into_repository(self) -> Option<Repository> {
        let repo = Repository {
            id: self.database_id?,
            owner: self.owner?.login,
            name: self.name?,
            url: self.url.unwrap_or_default(),
            created_at: self.created_at,
            stars: self.stargazer_count.unwrap_or(0),
        };
        match repo.validate() {
            Ok(()) => Some(repo),
            Err(reason) => {
                tracing::debug!("Skipping invalid repository node: {}", reason);
                None
            }
        }
    }
}

// ===== Response handling =====

/// Converts decoded search data into a page, preferring body telemetry
fn into_search_page(data: SearchData, header_budget: Option<RateBudget>) -> SearchPage {
    let connection = data.search;
    let node_count = connection.nodes.len();

    let repositories: Vec<Repository> = connection
        .nodes
        .into_iter()
        .flatten()
        .filter_map(RepositoryNode::into_repository)
        .collect();
    let skipped = node_count - repositories.len();

    SearchPage {
        repositories,
        skipped,
        has_next_page: connection.page_info.has_next_page,
        end_cursor: connection.page_info.end_cursor.map(Cursor::from_token),
        total_count: connection.repository_count,
        rate: data.rate_limit.map(RateBudget::from).or(header_budget),
    }
}

/// Inspects the GraphQL `errors` array of a 200 response
///
/// Errors that come with usable data are logged and the data is kept.
fn check_graphql_errors<T>(
    envelope: GraphQlResponse<T>,
    headers: &HeaderMap,
) -> Result<T, ApiError> {
    for error in &envelope.errors {
        match error.kind.as_deref() {
            Some("RATE_LIMITED") => {
                return Err(ApiError::RateLimited {
                    reset_at: header_reset(headers),
                })
            }
            Some("FORBIDDEN") | Some("UNAUTHORIZED") => {
                return Err(ApiError::Authentication(error.message.clone()))
            }
            _ => {}
        }
    }

    let messages: Vec<&str> = envelope.errors.iter().map(|e| e.message.as_str()).collect();
    match envelope.data {
        Some(data) => {
            if !messages.is_empty() {
                tracing::warn!("GraphQL errors (continuing): {}", messages.join("; "));
            }
            Ok(data)
        }
        None => Err(ApiError::Rejected {
            status: None,
            message: if messages.is_empty() {
                "response carried no data".to_string()
            } else {
                messages.join("; ")
            },
        }),
    }
}

/// Classifies a non-success HTTP status
///
/// | Status | Error |
/// |--------|-------|
/// | 401 | Authentication |
/// | 403/429 with secondary-limit text or `Retry-After` | SecondaryRateLimit |
/// | 403 with exhausted budget | RateLimited |
/// | other 403 | Authentication |
/// | 5xx | Server |
/// | other 4xx | Rejected |
fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ApiError {
    let lower = body.to_lowercase();

    match status.as_u16() {
        401 => ApiError::Authentication(excerpt(body)),
        403 | 429 => {
            let retry_after = headers
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);

            if status == StatusCode::TOO_MANY_REQUESTS
                || retry_after.is_some()
                || lower.contains("secondary rate limit")
                || lower.contains("abuse")
            {
                ApiError::SecondaryRateLimit { retry_after }
            } else if header_remaining(headers) == Some(0) || lower.contains("rate limit") {
                ApiError::RateLimited {
                    reset_at: header_reset(headers),
                }
            } else {
                ApiError::Authentication(excerpt(body))
            }
        }
        code if status.is_server_error() => ApiError::Server { status: code },
        code => ApiError::Rejected {
            status: Some(code),
            message: excerpt(body),
        },
    }
}

/// Classifies a transport-level failure
fn classify_transport(error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Transport("request timeout".to_string())
    } else if error.is_connect() {
        ApiError::Transport(format!("connection failed: {}", error))
    } else if error.is_decode() {
        ApiError::Decode(error.to_string())
    } else {
        ApiError::Transport(error.to_string())
    }
}

fn header_remaining(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn header_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

fn budget_from_headers(headers: &HeaderMap) -> Option<RateBudget> {
    Some(RateBudget {
        remaining: header_remaining(headers)?,
        reset_at: header_reset(headers)?,
    })
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}
