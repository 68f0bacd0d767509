//! Privilege grant resolver.
//!
//! Decides whether the configured role can and should be granted to a
//! subject, then grants it. Platform state (membership, role hierarchy,
//! current roles) is fetched fresh on every call and never cached.

use std::fmt;
use std::sync::Arc;

use crate::platform::{ChatPlatform, Member, PlatformError, top_role};

/// Audit-log reason attached to every grant.
pub const GRANT_REASON: &str = "Webhook role assign";

/// Result of one grant attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// No role configured.
    Disabled,
    /// Subject already holds the role; nothing changed.
    AlreadyHeld,
    Granted,
    MemberUnavailable(String),
    RoleNotFound,
    /// Role is owned by an integration.
    ManagedRole,
    /// Bot's top role does not strictly outrank the target role.
    InsufficientRank { bot_top_role: Option<u64> },
    Forbidden(String),
    Failed(String),
}

impl GrantOutcome {
    /// Whether the subject ends up in the desired state.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            GrantOutcome::Disabled | GrantOutcome::AlreadyHeld | GrantOutcome::Granted
        )
    }
}

impl fmt::Display for GrantOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantOutcome::Disabled => write!(f, "disabled"),
            GrantOutcome::AlreadyHeld => write!(f, "already_held"),
            GrantOutcome::Granted => write!(f, "granted"),
            GrantOutcome::MemberUnavailable(e) => write!(f, "member_unavailable: {}", e),
            GrantOutcome::RoleNotFound => write!(f, "role_not_found"),
            GrantOutcome::ManagedRole => write!(f, "managed_role"),
            GrantOutcome::InsufficientRank { .. } => write!(f, "insufficient_rank"),
            GrantOutcome::Forbidden(e) => write!(f, "forbidden: {}", e),
            GrantOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

pub struct GrantResolver {
    platform: Arc<dyn ChatPlatform>,
    guild_id: u64,
    role_id: Option<u64>,
}

impl GrantResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>, guild_id: u64, role_id: Option<u64>) -> Self {
        Self {
            platform,
            guild_id,
            role_id,
        }
    }

    /// Grant the configured role to `subject_id` if policy allows.
    pub async fn resolve(&self, subject_id: u64) -> GrantOutcome {
        let Some(role_id) = self.role_id else {
            return GrantOutcome::Disabled;
        };

        let member = match self.platform.fetch_member(self.guild_id, subject_id).await {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(
                    subject_id,
                    guild_id = self.guild_id,
                    error = %e,
                    "Member lookup failed, skipping role grant"
                );
                return GrantOutcome::MemberUnavailable(e.to_string());
            }
        };

        let roles = match self.platform.guild_roles(self.guild_id).await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::warn!(guild_id = self.guild_id, error = %e, "Role lookup failed");
                return GrantOutcome::Failed(e.to_string());
            }
        };

        let Some(role) = roles.iter().find(|r| r.id == role_id) else {
            tracing::warn!(role_id, guild_id = self.guild_id, "Role not found");
            return GrantOutcome::RoleNotFound;
        };

        if role.managed {
            tracing::warn!(role_id, "Managed role, not assignable");
            return GrantOutcome::ManagedRole;
        }

        let bot_member = match self.bot_member().await {
            Ok(member) => member,
            Err(e) => {
                tracing::warn!(error = %e, "Bot member lookup failed");
                return GrantOutcome::Failed(e.to_string());
            }
        };

        let bot_top = top_role(self.guild_id, &roles, &bot_member.roles);
        if !bot_top.is_some_and(|top| top.outranks(role)) {
            tracing::warn!(
                role_id,
                bot_top_role = ?bot_top.map(|r| r.id),
                "Role hierarchy: bot top role does not outrank target role"
            );
            return GrantOutcome::InsufficientRank {
                bot_top_role: bot_top.map(|r| r.id),
            };
        }

        if member.has_role(role_id) {
            tracing::info!(subject_id, role_id, "Member already has role");
            return GrantOutcome::AlreadyHeld;
        }

        match self
            .platform
            .add_member_role(self.guild_id, subject_id, role_id, GRANT_REASON)
            .await
        {
            Ok(()) => {
                tracing::info!(subject_id, role_id, role = %role.name, "Role added");
                GrantOutcome::Granted
            }
            Err(PlatformError::Forbidden(msg)) => {
                tracing::error!(
                    subject_id,
                    role_id,
                    error = %msg,
                    "Forbidden (permissions/hierarchy)"
                );
                GrantOutcome::Forbidden(msg)
            }
            Err(e) => {
                tracing::error!(subject_id, role_id, error = %e, "Role grant failed");
                GrantOutcome::Failed(e.to_string())
            }
        }
    }

    async fn bot_member(&self) -> Result<Member, PlatformError> {
        let bot_id = self
            .platform
            .current_user_id()
            .ok_or(PlatformError::NotReady)?;
        self.platform.fetch_member(self.guild_id, bot_id).await
    }
}
