pub mod api;
pub mod rate_limiter;


use api::RedditApiClient;
use async_trait::async_trait;
use dealvote_core::{
    CoreError, ForestThing, Forum, Placeholder, Post, RedditApiError, RedditCredentials,
    COMMENT_KIND_PREFIX,
};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError,
    ResourceOwnerPassword, ResourceOwnerUsername, TokenResponse, TokenUrl,
};
use reqwest::Client;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/authorize";
const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens this close to expiry are renewed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Script-app credentials for the password grant.
#[derive(Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl RedditOAuth2Config {
    pub fn new(
        client_id: String,
        client_secret: String,
        username: String,
        password: String,
        user_agent: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            username,
            password,
            user_agent,
        }
    }
}

impl From<&RedditCredentials> for RedditOAuth2Config {
    fn from(credentials: &RedditCredentials) -> Self {
        Self::new(
            credentials.client_id.clone(),
            credentials.client_secret.clone(),
            credentials.username.clone(),
            credentials.password.clone(),
            credentials.user_agent.clone(),
        )
    }
}

impl std::fmt::Debug for RedditOAuth2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditOAuth2Config")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() + EXPIRY_MARGIN >= self.expires_at
    }
}

impl std::fmt::Debug for RedditToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditToken")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Authenticated Reddit session. The password grant has no refresh token, so
/// an expired or rejected token is replaced by logging in again.
pub struct RedditClient {
    config: RedditOAuth2Config,
    oauth_client: BasicClient,
    api: RedditApiClient,
    token: Mutex<Option<RedditToken>>,
}

// Sends oauth2's token request through our reqwest client so it carries the
// bot's user agent.
async fn token_http_client(
    http: Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let mut builder = http
        .request(request.method, request.url.as_str())
        .body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }

    let response = builder.send().await?;
    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

impl RedditClient {
    pub fn new(config: RedditOAuth2Config) -> Result<Self, CoreError> {
        let invalid_url = |e: oauth2::url::ParseError| {
            CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: format!("Invalid OAuth endpoint: {}", e),
            })
        };

        let oauth_client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(REDDIT_AUTH_URL.to_string()).map_err(invalid_url)?,
            Some(TokenUrl::new(REDDIT_TOKEN_URL.to_string()).map_err(invalid_url)?),
        );
        let api = RedditApiClient::new(config.user_agent.clone())?;

        Ok(Self {
            config,
            oauth_client,
            api,
            token: Mutex::new(None),
        })
    }

    pub async fn set_token(&self, token: RedditToken) {
        *self.token.lock().await = Some(token);
    }

    /// Runs the resource-owner password grant and caches the token.
    pub async fn login(&self) -> Result<(), CoreError> {
        let token = self.request_token().await?;
        self.set_token(token).await;
        Ok(())
    }

    async fn request_token(&self) -> Result<RedditToken, CoreError> {
        debug!("Requesting access token for {}", self.config.username);
        let http = self.api.http_client().clone();

        let response = self
            .oauth_client
            .exchange_password(
                &ResourceOwnerUsername::new(self.config.username.clone()),
                &ResourceOwnerPassword::new(self.config.password.clone()),
            )
            .request_async(|request| token_http_client(http, request))
            .await
            .map_err(|e| {
                let reason = match e {
                    RequestTokenError::ServerResponse(response) => response.to_string(),
                    RequestTokenError::Request(e) => format!("token request failed: {}", e),
                    RequestTokenError::Parse(e, _) => format!("unparseable token response: {}", e),
                    RequestTokenError::Other(message) => message,
                };
                CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let scope = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.as_str().to_owned()).collect())
            .unwrap_or_default();

        info!(
            "Authenticated as {} (token valid for {:?})",
            self.config.username, lifetime
        );
        Ok(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + lifetime,
            scope,
        })
    }

    async fn access_token(&self) -> Result<String, CoreError> {
        let mut guard = self.token.lock().await;
        match guard.as_ref() {
            Some(token) if !token.is_expired() => Ok(token.access_token.clone()),
            _ => {
                let token = self.request_token().await?;
                let access_token = token.access_token.clone();
                *guard = Some(token);
                Ok(access_token)
            }
        }
    }

    async fn with_token<T, F, Fut>(&self, call: F) -> Result<T, CoreError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let token = self.access_token().await?;
        let result = call(token).await;
        if matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::InvalidToken))
        ) {
            warn!("Access token rejected, re-authenticating on next request");
            *self.token.lock().await = None;
        }
        result
    }
}

#[async_trait]
impl Forum for RedditClient {
    async fn own_username(&self) -> Result<String, CoreError> {
        self.with_token(|token| async move { self.api.get_user_info(&token).await })
            .await
            .map(|user| user.name)
    }

    async fn newest_posts(&self, section: &str, limit: u32) -> Result<Vec<Post>, CoreError> {
        self.with_token(|token| async move { self.api.get_new_posts(&token, section, limit).await })
            .await
    }

    async fn comment_things(&self, post_id: &str) -> Result<Vec<ForestThing>, CoreError> {
        self.with_token(|token| async move { self.api.get_comments(&token, post_id).await })
            .await
    }

    async fn expand_placeholder(
        &self,
        post_id: &str,
        placeholder: &Placeholder,
    ) -> Result<Vec<ForestThing>, CoreError> {
        self.with_token(|token| async move {
            if !placeholder.is_continue_thread() {
                return self
                    .api
                    .get_more_children(&token, post_id, &placeholder.children)
                    .await;
            }
            match placeholder.parent_id.strip_prefix(COMMENT_KIND_PREFIX) {
                Some(comment_id) => {
                    self.api
                        .get_comment_subtree(&token, post_id, comment_id)
                        .await
                }
                None => self.api.get_comments(&token, post_id).await,
            }
        })
        .await
    }

    async fn reply_to_post(&self, post_id: &str, body: &str) -> Result<String, CoreError> {
        self.with_token(|token| async move { self.api.submit_comment(&token, post_id, body).await })
            .await
    }

    async fn edit_comment(&self, comment_id: &str, body: &str) -> Result<(), CoreError> {
        self.with_token(|token| async move { self.api.edit_comment(&token, comment_id, body).await })
            .await
    }

    async fn distinguish_sticky(&self, comment_id: &str) -> Result<(), CoreError> {
        self.with_token(|token| async move {
            self.api.distinguish_comment(&token, comment_id, true).await
        })
        .await
    }
}
