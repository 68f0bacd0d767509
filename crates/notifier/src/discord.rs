//! Discord REST implementation of [`ChatPlatform`].
//!
//! Only the handful of endpoints the delivery pipeline needs. DM channel ids
//! and the verified broadcast channel are cached; members and roles are
//! always fetched fresh so grant decisions see current state.
//!
//! A 429 answer is retried once after the advertised `retry_after`, provided
//! the wait fits inside the request timeout.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::RwLock;

use crate::platform::{ChatPlatform, Member, PlatformError, Role, snowflake};

/// Header carrying the audit-log reason on moderation actions.
const AUDIT_LOG_REASON: &str = "X-Audit-Log-Reason";

/// Longest error body kept in a `PlatformError`.
const MAX_ERROR_BODY: usize = 512;

/// DM channel ids remembered at once. One entry per distinct recipient.
const MAX_CACHED_DM_CHANNELS: usize = 4096;

#[derive(Debug, Deserialize)]
struct RateLimited {
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct Snowflake {
    #[serde(deserialize_with = "snowflake")]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct GuildMember {
    user: Snowflake,
    #[serde(default)]
    roles: Vec<String>,
}

pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    timeout: Duration,
    bot_user_id: OnceLock<u64>,
    dm_channels: RwLock<HashMap<u64, u64>>,
    known_channels: RwLock<HashSet<u64>>,
}

impl DiscordClient {
    /// Build a client. `timeout` bounds every request.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("whitenight/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            timeout,
            bot_user_id: OnceLock::new(),
            dm_channels: RwLock::new(HashMap::new()),
            known_channels: RwLock::new(HashSet::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, PlatformError> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                PlatformError::Timeout(self.timeout.as_secs())
            } else {
                PlatformError::Http(e)
            }
        })
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, PlatformError> {
        let retry = request.try_clone();
        let response = self.send(request).await?;
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return check_status(response).await;
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        match (retry, retry_after(&headers, &body)) {
            (Some(retry), Some(delay)) if delay <= self.timeout => {
                tracing::warn!(retry_after_ms = delay.as_millis() as u64, "Rate limited, retrying");
                tokio::time::sleep(delay).await;
                check_status(self.send(retry).await?).await
            }
            _ => Err(status_error(StatusCode::TOO_MANY_REQUESTS, body)),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PlatformError> {
        Ok(self.execute(request).await?.json().await?)
    }

    /// DM channel for a user, created on first use.
    async fn dm_channel(&self, user_id: u64) -> Result<u64, PlatformError> {
        if let Some(channel_id) = self.dm_channels.read().await.get(&user_id) {
            return Ok(*channel_id);
        }

        let channel: Snowflake = self
            .fetch_json(
                self.request(Method::POST, "/users/@me/channels")
                    .json(&json!({ "recipient_id": user_id.to_string() })),
            )
            .await?;

        remember(
            &mut *self.dm_channels.write().await,
            user_id,
            channel.id,
            MAX_CACHED_DM_CHANNELS,
        );
        Ok(channel.id)
    }

    /// Confirm a channel exists, remotely on first use.
    async fn ensure_channel(&self, channel_id: u64) -> Result<(), PlatformError> {
        if self.known_channels.read().await.contains(&channel_id) {
            return Ok(());
        }

        tracing::debug!(channel_id, "Channel not cached, fetching");
        let channel: Snowflake = self
            .fetch_json(self.request(Method::GET, &format!("/channels/{}", channel_id)))
            .await?;

        self.known_channels.write().await.insert(channel.id);
        Ok(())
    }

    async fn post_message(&self, channel_id: u64, content: &str) -> Result<(), PlatformError> {
        self.execute(
            self.request(Method::POST, &format!("/channels/{}/messages", channel_id))
                .json(&json!({ "content": content })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn login(&self) -> Result<u64, PlatformError> {
        let me: Snowflake = self
            .fetch_json(self.request(Method::GET, "/users/@me"))
            .await?;
        let id = *self.bot_user_id.get_or_init(|| me.id);
        Ok(id)
    }

    fn current_user_id(&self) -> Option<u64> {
        self.bot_user_id.get().copied()
    }

    async fn send_direct_message(&self, user_id: u64, content: &str) -> Result<(), PlatformError> {
        let channel_id = self.dm_channel(user_id).await?;
        self.post_message(channel_id, content).await
    }

    async fn send_channel_message(
        &self,
        channel_id: u64,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.ensure_channel(channel_id).await?;
        self.post_message(channel_id, content).await
    }

    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Member, PlatformError> {
        let member: GuildMember = self
            .fetch_json(self.request(
                Method::GET,
                &format!("/guilds/{}/members/{}", guild_id, user_id),
            ))
            .await?;

        Ok(Member {
            user_id: member.user.id,
            roles: member
                .roles
                .iter()
                .filter_map(|id| id.parse().ok())
                .collect(),
        })
    }

    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<Role>, PlatformError> {
        self.fetch_json(self.request(Method::GET, &format!("/guilds/{}/roles", guild_id)))
            .await
    }

    async fn add_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        self.execute(
            self.request(
                Method::PUT,
                &format!("/guilds/{}/members/{}/roles/{}", guild_id, user_id, role_id),
            )
            .header(AUDIT_LOG_REASON, reason),
        )
        .await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, mut body: String) -> PlatformError {
    body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
    match status {
        StatusCode::FORBIDDEN => PlatformError::Forbidden(body),
        StatusCode::NOT_FOUND => PlatformError::NotFound(body),
        _ => PlatformError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

/// Wait advertised by a 429: the body's `retry_after` (fractional seconds),
/// else the `Retry-After` header.
fn retry_after(headers: &HeaderMap, body: &str) -> Option<Duration> {
    let secs = serde_json::from_str::<RateLimited>(body)
        .ok()
        .map(|r| r.retry_after)
        .or_else(|| headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok())?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Insert into a bounded cache, evicting an arbitrary entry when full.
fn remember<K: Eq + Hash + Copy, V>(cache: &mut HashMap<K, V>, key: K, value: V, limit: usize) {
    if cache.len() >= limit
        && !cache.contains_key(&key)
        && let Some(evicted) = cache.keys().next().copied()
    {
        cache.remove(&evicted);
    }
    cache.insert(key, value);
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
