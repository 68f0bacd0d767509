//! Chat-platform collaborator seam.
//!
//! The worker and grant resolver only talk to the platform through
//! [`ChatPlatform`], so the Discord REST client and the in-memory test double
//! are interchangeable.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by platform operations.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Platform session is not ready")]
    NotReady,
}

/// A guild role as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Role {
    #[serde(deserialize_with = "snowflake")]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Hierarchy position; higher outranks lower
    pub position: i64,
    /// Roles owned by integrations cannot be granted manually
    #[serde(default)]
    pub managed: bool,
}

impl Role {
    /// Compare hierarchy rank: higher position wins, ties go to the older
    /// (lower id) role.
    pub fn rank_cmp(&self, other: &Role) -> Ordering {
        self.position
            .cmp(&other.position)
            .then_with(|| other.id.cmp(&self.id))
    }

    pub fn outranks(&self, other: &Role) -> bool {
        self.rank_cmp(other) == Ordering::Greater
    }
}

/// Highest-ranked role among `member_roles`, resolved against the guild's
/// role list. The `@everyone` role (id equal to the guild id) is every
/// member's implicit floor.
pub fn top_role<'a>(
    guild_id: u64,
    guild_roles: &'a [Role],
    member_roles: &[u64],
) -> Option<&'a Role> {
    guild_roles
        .iter()
        .filter(|role| role.id == guild_id || member_roles.contains(&role.id))
        .max_by(|a, b| a.rank_cmp(b))
}

/// A guild member's current role set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: u64,
    pub roles: Vec<u64>,
}

impl Member {
    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.contains(&role_id)
    }
}

/// Operations the delivery pipeline needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Start the session and return the bot's own user id.
    async fn login(&self) -> Result<u64, PlatformError>;

    /// The bot's own user id, once logged in.
    fn current_user_id(&self) -> Option<u64>;

    /// Send a direct message to a user.
    async fn send_direct_message(&self, user_id: u64, content: &str) -> Result<(), PlatformError>;

    /// Send a message to a guild channel.
    async fn send_channel_message(
        &self,
        channel_id: u64,
        content: &str,
    ) -> Result<(), PlatformError>;

    /// Fetch a guild member with its current roles.
    async fn fetch_member(&self, guild_id: u64, user_id: u64) -> Result<Member, PlatformError>;

    /// List all roles defined in a guild.
    async fn guild_roles(&self, guild_id: u64) -> Result<Vec<Role>, PlatformError>;

    /// Add a role to a member, recording `reason` in the audit log.
    async fn add_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError>;
}

/// Discord sends snowflakes as strings; accept either form.
pub(crate) fn snowflake<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}
