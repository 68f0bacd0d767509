use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Default REST endpoint of the chat platform.
pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Selects where accepted ingress payloads go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressMode {
    /// Enqueue locally for the delivery worker.
    Queue,
    /// Relay the payload verbatim to `BOT_QUEUE_URL`.
    Forward,
}

impl fmt::Display for IngressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressMode::Queue => write!(f, "queue"),
            IngressMode::Forward => write!(f, "forward"),
        }
    }
}

impl FromStr for IngressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "local" => Ok(IngressMode::Queue),
            "forward" | "relay" => Ok(IngressMode::Forward),
            other => Err(anyhow::anyhow!(
                "INGRESS_MODE must be `queue` or `forward`, got `{}`",
                other
            )),
        }
    }
}

/// Settings for the chat-platform session. Only present in `queue` mode.
#[derive(Clone, Deserialize)]
pub struct BotConfig {
    /// Bot authentication token
    pub token: String,

    /// Community (guild) the bot operates in
    pub server_id: u64,

    /// Broadcast channel receiving result announcements
    pub channel_id: u64,

    /// Role granted on success; `None` disables the grant step
    pub role_id: Option<u64>,

    /// REST base URL of the chat platform
    pub api_base: String,

    /// Delay between failed login attempts
    pub login_retry_secs: u64,
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("token", &"<redacted>")
            .field("server_id", &self.server_id)
            .field("channel_id", &self.channel_id)
            .field("role_id", &self.role_id)
            .field("api_base", &self.api_base)
            .field("login_retry_secs", &self.login_retry_secs)
            .finish()
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen port (default: 8080)
    pub port: u16,

    /// Ingress sink selection (default: queue)
    pub ingress_mode: IngressMode,

    /// Bot session settings (required in queue mode)
    pub bot: Option<BotConfig>,

    /// Downstream ingestion URL (required in forward mode)
    pub forward_url: Option<String>,

    /// Optional bound on queue depth; `None` keeps the queue unbounded
    pub queue_capacity: Option<usize>,

    /// Timeout applied to every outbound call, in seconds (default: 10)
    pub outbound_timeout_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let ingress_mode: IngressMode = match var("INGRESS_MODE") {
            Some(raw) => raw.parse()?,
            None => IngressMode::Queue,
        };

        let port = parse_or(var("PORT"), "PORT", 8080u16)?;
        let outbound_timeout_secs =
            parse_or(var("OUTBOUND_TIMEOUT_SECS"), "OUTBOUND_TIMEOUT_SECS", 10u64)?;
        let queue_capacity = match var("QUEUE_CAPACITY") {
            Some(raw) => match parse_value::<usize>(&raw, "QUEUE_CAPACITY")? {
                0 => return Err(anyhow::anyhow!("QUEUE_CAPACITY must be greater than zero")),
                capacity => Some(capacity),
            },
            None => None,
        };

        let bot = match ingress_mode {
            IngressMode::Queue => {
                let role_id = parse_or(var("ROLE_ID"), "ROLE_ID", 0u64)?;
                Some(BotConfig {
                    token: var("TOKEN")
                        .ok_or_else(|| anyhow::anyhow!("TOKEN environment variable is required"))?,
                    server_id: required_id(var("SERVER_ID"), "SERVER_ID")?,
                    channel_id: required_id(var("CHANNEL_ID"), "CHANNEL_ID")?,
                    role_id: (role_id != 0).then_some(role_id),
                    api_base: var("DISCORD_API_BASE")
                        .unwrap_or_else(|| DEFAULT_DISCORD_API_BASE.to_string()),
                    login_retry_secs: parse_or(
                        var("LOGIN_RETRY_SECS"),
                        "LOGIN_RETRY_SECS",
                        5u64,
                    )?,
                })
            }
            IngressMode::Forward => None,
        };

        let forward_url = var("BOT_QUEUE_URL");
        if ingress_mode == IngressMode::Forward && forward_url.is_none() {
            return Err(anyhow::anyhow!(
                "BOT_QUEUE_URL environment variable is required in forward mode"
            ));
        }

        Ok(Self {
            port,
            ingress_mode,
            bot,
            forward_url,
            queue_capacity,
            outbound_timeout_secs,
        })
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_secs(self.outbound_timeout_secs)
    }
}

fn parse_value<T: FromStr>(raw: &str, key: &str) -> anyhow::Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>()))
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T> {
    match raw {
        Some(raw) => parse_value(&raw, key),
        None => Ok(default),
    }
}

fn required_id(raw: Option<String>, key: &str) -> anyhow::Result<u64> {
    let raw = raw.ok_or_else(|| anyhow::anyhow!("{} environment variable is required", key))?;
    parse_value(&raw, key)
}
