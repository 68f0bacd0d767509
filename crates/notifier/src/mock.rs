//! In-memory [`ChatPlatform`] double for tests.
//!
//! Records every outbound call and keeps member roles in memory so grants are
//! observable.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::platform::{ChatPlatform, Member, PlatformError, Role};

/// A recorded role grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantCall {
    pub guild_id: u64,
    pub user_id: u64,
    pub role_id: u64,
    pub reason: String,
}

#[derive(Default)]
struct State {
    bot_user_id: Option<u64>,
    login_failures_left: u32,
    roles: Vec<Role>,
    members: HashMap<u64, Vec<u64>>,
    unreachable_users: HashSet<u64>,
    channel_down: bool,
    forbid_grants: bool,
    dm_delay: Option<Duration>,
    grant_delay: Option<Duration>,
    direct_messages: Vec<(u64, String)>,
    channel_messages: Vec<(u64, String)>,
    grants: Vec<GrantCall>,
    login_attempts: u32,
}

pub struct MockPlatform {
    bot_user_id: u64,
    state: Mutex<State>,
}

impl MockPlatform {
    /// A platform where the bot `bot_user_id` has not logged in yet.
    pub fn new(bot_user_id: u64) -> Self {
        Self {
            bot_user_id,
            state: Mutex::new(State::default()),
        }
    }

    /// Same as `new` but already logged in.
    pub fn logged_in(bot_user_id: u64) -> Self {
        let platform = Self::new(bot_user_id);
        platform.state.lock().unwrap().bot_user_id = Some(bot_user_id);
        platform
    }

    pub fn with_role(self, id: u64, position: i64, managed: bool) -> Self {
        self.state.lock().unwrap().roles.push(Role {
            id,
            name: format!("role-{id}"),
            position,
            managed,
        });
        self
    }

    pub fn with_member(self, user_id: u64, roles: &[u64]) -> Self {
        self.state
            .lock()
            .unwrap()
            .members
            .insert(user_id, roles.to_vec());
        self
    }

    /// DMs to this user fail as if DMs were disabled.
    pub fn with_unreachable_user(self, user_id: u64) -> Self {
        self.state.lock().unwrap().unreachable_users.insert(user_id);
        self
    }

    pub fn with_channel_down(self) -> Self {
        self.state.lock().unwrap().channel_down = true;
        self
    }

    pub fn with_forbidden_grants(self) -> Self {
        self.state.lock().unwrap().forbid_grants = true;
        self
    }

    /// Every DM send sleeps for `delay` before succeeding.
    pub fn with_dm_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().dm_delay = Some(delay);
        self
    }

    /// Every role grant sleeps for `delay` before applying.
    pub fn with_grant_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().grant_delay = Some(delay);
        self
    }

    /// The first `n` login attempts fail.
    pub fn with_login_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().login_failures_left = n;
        self
    }

    pub fn direct_messages(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().direct_messages.clone()
    }

    pub fn channel_messages(&self) -> Vec<(u64, String)> {
        self.state.lock().unwrap().channel_messages.clone()
    }

    pub fn grants(&self) -> Vec<GrantCall> {
        self.state.lock().unwrap().grants.clone()
    }

    pub fn member_roles(&self, user_id: u64) -> Option<Vec<u64>> {
        self.state.lock().unwrap().members.get(&user_id).cloned()
    }

    pub fn login_attempts(&self) -> u32 {
        self.state.lock().unwrap().login_attempts
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn login(&self) -> Result<u64, PlatformError> {
        let mut state = self.state.lock().unwrap();
        state.login_attempts += 1;
        if state.login_failures_left > 0 {
            state.login_failures_left -= 1;
            return Err(PlatformError::Status {
                status: 401,
                body: "401: Unauthorized".to_string(),
            });
        }
        state.bot_user_id = Some(self.bot_user_id);
        Ok(self.bot_user_id)
    }

    fn current_user_id(&self) -> Option<u64> {
        self.state.lock().unwrap().bot_user_id
    }

    async fn send_direct_message(&self, user_id: u64, content: &str) -> Result<(), PlatformError> {
        let delay = self.state.lock().unwrap().dm_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.unreachable_users.contains(&user_id) {
            return Err(PlatformError::Forbidden(
                "Cannot send messages to this user".to_string(),
            ));
        }
        state.direct_messages.push((user_id, content.to_string()));
        Ok(())
    }

    async fn send_channel_message(
        &self,
        channel_id: u64,
        content: &str,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.channel_down {
            return Err(PlatformError::NotFound(format!("channel {channel_id}")));
        }
        state.channel_messages.push((channel_id, content.to_string()));
        Ok(())
    }

    async fn fetch_member(&self, _guild_id: u64, user_id: u64) -> Result<Member, PlatformError> {
        let state = self.state.lock().unwrap();
        state
            .members
            .get(&user_id)
            .map(|roles| Member {
                user_id,
                roles: roles.clone(),
            })
            .ok_or_else(|| PlatformError::NotFound(format!("member {user_id}")))
    }

    async fn guild_roles(&self, _guild_id: u64) -> Result<Vec<Role>, PlatformError> {
        Ok(self.state.lock().unwrap().roles.clone())
    }

    async fn add_member_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let delay = self.state.lock().unwrap().grant_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.forbid_grants {
            return Err(PlatformError::Forbidden("Missing Permissions".to_string()));
        }
        state.grants.push(GrantCall {
            guild_id,
            user_id,
            role_id,
            reason: reason.to_string(),
        });
        let roles = state
            .members
            .get_mut(&user_id)
            .ok_or_else(|| PlatformError::NotFound(format!("member {user_id}")))?;
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
        Ok(())
    }
}
