use crate::rate_limiter::{RateLimitConfig, RateLimiter};
use dealvote_core::{
    Comment, CoreError, ForestThing, Placeholder, Post, RedditApiError, COMMENT_KIND_PREFIX,
    POST_KIND_PREFIX,
};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const REDDIT_API_BASE: &str = "https://oauth.reddit.com";
const PAGE_SIZE: u32 = 100;
/// `/api/morechildren` accepts at most this many ids per call.
const MORE_CHILDREN_BATCH: usize = 100;
const DELETED_AUTHOR: &str = "[deleted]";

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<T>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub author: String,
    pub permalink: String,
    pub created_utc: f64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub is_self: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditCommentData {
    pub id: String,
    pub parent_id: String,
    pub author: String,
    #[serde(default)]
    pub body: String,
    pub created_utc: f64,
    /// Either `""` or a nested listing.
    #[serde(default)]
    pub replies: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditMoreData {
    pub id: String,
    pub parent_id: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum CommentThing {
    #[serde(rename = "t1")]
    Comment(RedditCommentData),
    #[serde(rename = "more")]
    More(RedditMoreData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditUserData {
    pub id: String,
    pub name: String,
}

/// Body of `api_type=json` write endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonEnvelope {
    pub json: JsonEnvelopeBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonEnvelopeBody {
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonEnvelope {
    /// Fails when Reddit reported errors, e.g. a locked thread.
    pub fn into_data(self) -> Result<Option<Value>, CoreError> {
        if !self.json.errors.is_empty() {
            return Err(CoreError::RedditApi(RedditApiError::Rejected {
                details: Value::Array(self.json.errors).to_string(),
            }));
        }
        Ok(self.json.data)
    }
}

fn author_of(name: String) -> Option<String> {
    (name != DELETED_AUTHOR && !name.is_empty()).then_some(name)
}

impl From<RedditPostData> for Post {
    fn from(post_data: RedditPostData) -> Self {
        Self {
            permalink: format!("https://redd.it/{}", post_data.id),
            id: post_data.id,
            author: author_of(post_data.author),
            title: post_data.title,
            body: post_data.selftext,
            created_utc: post_data.created_utc as i64,
        }
    }
}

impl From<RedditMoreData> for Placeholder {
    fn from(more: RedditMoreData) -> Self {
        Self {
            id: more.id,
            parent_id: more.parent_id,
            children: more.children,
        }
    }
}

/// Flattens nested comment listings into pre-order forest things, siblings in
/// listing order. Works with an explicit stack.
pub fn flatten_comment_things(things: Vec<CommentThing>) -> Vec<ForestThing> {
    let mut flat = Vec::new();
    let mut stack: Vec<CommentThing> = things.into_iter().rev().collect();

    while let Some(thing) = stack.pop() {
        match thing {
            CommentThing::Comment(mut data) => {
                let replies = std::mem::take(&mut data.replies);
                if replies.is_object() {
                    match serde_json::from_value::<RedditListing<CommentThing>>(replies) {
                        Ok(listing) => stack.extend(listing.data.children.into_iter().rev()),
                        Err(e) => warn!(comment_id = %data.id, "Unparseable replies: {}", e),
                    }
                }
                flat.push(ForestThing::Comment(Comment {
                    id: data.id,
                    parent_id: data.parent_id,
                    author: author_of(data.author),
                    body: data.body,
                    created_utc: data.created_utc as i64,
                }));
            }
            CommentThing::More(more) => flat.push(ForestThing::Placeholder(more.into())),
        }
    }

    flat
}

/// Extracts the new comment id from a `/api/comment` reply.
pub fn created_comment_id(data: Option<Value>) -> Result<String, CoreError> {
    data.as_ref()
        .and_then(|d| d.get("things"))
        .and_then(|things| things.get(0))
        .and_then(|thing| thing.get("data"))
        .and_then(|d| d.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: "Comment reply carried no comment id".to_string(),
            })
        })
}

#[derive(Debug, Deserialize)]
struct MoreChildrenData {
    #[serde(default)]
    things: Vec<CommentThing>,
}

#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    user_agent: String,
}

impl RedditApiClient {
    pub fn new(user_agent: String) -> Result<Self, CoreError> {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::reddit_oauth()));

        let http_client = Client::builder()
            .user_agent(&user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            rate_limiter,
            user_agent,
        })
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: Option<&[(&str, &str)]>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", REDDIT_API_BASE, endpoint);

        let permit = self.rate_limiter.acquire_permit().await;
        debug!(
            "Acquired rate limit permit for {} {} after {:?}",
            method, endpoint, permit.queue_wait_time
        );

        let mut request_builder = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .header("User-Agent", &self.user_agent);

        if let Some(params) = query_params {
            request_builder = request_builder.query(params);
        }
        if let Some(fields) = form {
            request_builder = request_builder.form(fields);
        }

        debug!("Making Reddit API request: {} {}", method, endpoint);
        let response = match request_builder.send().await {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                return Err(if e.is_timeout() {
                    CoreError::RedditApi(RedditApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!("Request successful: {} {}", status, endpoint);
            return Ok(response);
        }

        error!("Request failed with status: {} for {}", status, endpoint);
        let error = match status.as_u16() {
            429 => {
                self.rate_limiter.record_rate_limited().await;
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                let local = self.rate_limiter.get_rate_limit_status().await;
                warn!(
                    retry_after,
                    window_requests = local.current_window_requests,
                    rate_limited = local.rate_limited_requests,
                    "Rate limited by Reddit"
                );
                RedditApiError::RateLimitExceeded { retry_after }
            }
            401 => RedditApiError::InvalidToken,
            403 => RedditApiError::Forbidden {
                resource: endpoint.to_string(),
            },
            404 => RedditApiError::InvalidResponse {
                details: format!("Resource not found: {}", endpoint),
            },
            code if status.is_server_error() => RedditApiError::ServerError { status_code: code },
            code => RedditApiError::Rejected {
                details: format!("HTTP {} for {}", code, endpoint),
            },
        };
        Err(CoreError::RedditApi(error))
    }

    async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, CoreError> {
        response.json().await.map_err(|e| {
            error!("Failed to parse {}: {}", what, e);
            CoreError::RedditApi(RedditApiError::InvalidResponse {
                details: format!("Failed to parse {}", what),
            })
        })
    }

    pub async fn get_user_info(&self, access_token: &str) -> Result<RedditUserData, CoreError> {
        let response = self
            .make_request(Method::GET, "/api/v1/me", access_token, None, None)
            .await?;
        let user_data: RedditUserData = Self::parse(response, "user data").await?;

        debug!("Retrieved user info for: {}", user_data.name);
        Ok(user_data)
    }

    /// Newest submissions, following `after` cursors until `limit` posts are
    /// collected or the listing runs out.
    pub async fn get_new_posts(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<Post>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let mut posts = Vec::with_capacity(limit as usize);
        let mut after: Option<String> = None;

        while (posts.len() as u32) < limit {
            let page_limit = (limit - posts.len() as u32).min(PAGE_SIZE).to_string();
            let mut params = vec![("limit", page_limit.as_str()), ("raw_json", "1")];
            if let Some(cursor) = after.as_deref() {
                params.push(("after", cursor));
            }

            let response = self
                .make_request(Method::GET, &endpoint, access_token, Some(&params), None)
                .await
                .map_err(|e| match e {
                    CoreError::RedditApi(RedditApiError::Forbidden { .. })
                    | CoreError::RedditApi(RedditApiError::InvalidResponse { .. })
                        if posts.is_empty() && after.is_none() =>
                    {
                        CoreError::RedditApi(RedditApiError::SubredditNotFound {
                            subreddit: subreddit.to_string(),
                        })
                    }
                    other => other,
                })?;
            let listing: RedditListing<RedditListingChild<RedditPostData>> =
                Self::parse(response, &format!("posts for r/{}", subreddit)).await?;

            let page_len = listing.data.children.len();
            posts.extend(listing.data.children.into_iter().map(|c| Post::from(c.data)));

            match listing.data.after {
                Some(cursor) if page_len > 0 => after = Some(cursor),
                _ => break,
            }
        }

        posts.truncate(limit as usize);
        info!("Retrieved {} posts from r/{}", posts.len(), subreddit);
        Ok(posts)
    }

    async fn get_comment_page(
        &self,
        access_token: &str,
        endpoint: &str,
    ) -> Result<Vec<ForestThing>, CoreError> {
        let params = [("raw_json", "1")];
        let response = self
            .make_request(Method::GET, endpoint, access_token, Some(&params), None)
            .await?;

        // The response is [post listing, comment listing].
        let (_post, comments): (Value, RedditListing<CommentThing>) =
            Self::parse(response, "comment listing").await?;

        Ok(flatten_comment_things(comments.data.children))
    }

    pub async fn get_comments(
        &self,
        access_token: &str,
        post_id: &str,
    ) -> Result<Vec<ForestThing>, CoreError> {
        let things = self
            .get_comment_page(access_token, &format!("/comments/{}", post_id))
            .await?;
        debug!(post_id, count = things.len(), "Retrieved comment listing");
        Ok(things)
    }

    /// Subtree below one comment, used for "continue this thread" stubs.
    pub async fn get_comment_subtree(
        &self,
        access_token: &str,
        post_id: &str,
        comment_id: &str,
    ) -> Result<Vec<ForestThing>, CoreError> {
        self.get_comment_page(
            access_token,
            &format!("/comments/{}/_/{}", post_id, comment_id),
        )
        .await
    }

    pub async fn get_more_children(
        &self,
        access_token: &str,
        post_id: &str,
        children: &[String],
    ) -> Result<Vec<ForestThing>, CoreError> {
        let link_id = format!("{}{}", POST_KIND_PREFIX, post_id);
        let mut things = Vec::new();

        for batch in children.chunks(MORE_CHILDREN_BATCH) {
            let ids = batch.join(",");
            let form = [
                ("api_type", "json"),
                ("link_id", link_id.as_str()),
                ("children", ids.as_str()),
                ("limit_children", "false"),
                ("raw_json", "1"),
            ];
            let response = self
                .make_request(
                    Method::POST,
                    "/api/morechildren",
                    access_token,
                    None,
                    Some(&form),
                )
                .await?;
            let envelope: JsonEnvelope = Self::parse(response, "morechildren").await?;

            let data = envelope.into_data()?.unwrap_or(Value::Null);
            let batch_things = if data.is_null() {
                Vec::new()
            } else {
                serde_json::from_value::<MoreChildrenData>(data)?.things
            };
            things.extend(flatten_comment_things(batch_things));
        }

        debug!(post_id, count = things.len(), "Expanded more-children placeholder");
        Ok(things)
    }

    pub async fn submit_comment(
        &self,
        access_token: &str,
        post_id: &str,
        text: &str,
    ) -> Result<String, CoreError> {
        let thing_id = format!("{}{}", POST_KIND_PREFIX, post_id);
        let form = [
            ("api_type", "json"),
            ("thing_id", thing_id.as_str()),
            ("text", text),
        ];
        let response = self
            .make_request(Method::POST, "/api/comment", access_token, None, Some(&form))
            .await?;
        let envelope: JsonEnvelope = Self::parse(response, "comment reply").await?;

        let comment_id = created_comment_id(envelope.into_data()?)?;
        info!(post_id, comment_id = %comment_id, "Posted comment");
        Ok(comment_id)
    }

    pub async fn edit_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<(), CoreError> {
        let thing_id = format!("{}{}", COMMENT_KIND_PREFIX, comment_id);
        let form = [
            ("api_type", "json"),
            ("thing_id", thing_id.as_str()),
            ("text", text),
        ];
        let response = self
            .make_request(
                Method::POST,
                "/api/editusertext",
                access_token,
                None,
                Some(&form),
            )
            .await?;
        let envelope: JsonEnvelope = Self::parse(response, "edit reply").await?;
        envelope.into_data()?;

        debug!(comment_id, "Edited comment");
        Ok(())
    }

    pub async fn distinguish_comment(
        &self,
        access_token: &str,
        comment_id: &str,
        sticky: bool,
    ) -> Result<(), CoreError> {
        let id = format!("{}{}", COMMENT_KIND_PREFIX, comment_id);
        let sticky = sticky.to_string();
        let form = [
            ("api_type", "json"),
            ("id", id.as_str()),
            ("how", "yes"),
            ("sticky", sticky.as_str()),
        ];
        let response = self
            .make_request(
                Method::POST,
                "/api/distinguish",
                access_token,
                None,
                Some(&form),
            )
            .await?;
        let envelope: JsonEnvelope = Self::parse(response, "distinguish reply").await?;
        envelope.into_data()?;

        debug!(comment_id, "Distinguished comment");
        Ok(())
    }
}
