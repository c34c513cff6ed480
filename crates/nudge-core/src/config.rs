use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NudgeError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

/// Bot Framework application identity. An empty `app_id` means the bot runs
/// unauthenticated (Emulator / Playground).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default)]
    pub tenant_id: String,
}

impl ChannelConfig {
    pub fn has_credentials(&self) -> bool {
        !self.app_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host substituted for `localhost` / `127.0.0.1` in inbound service URLs.
    #[serde(default = "default_playground_host")]
    pub playground_host: String,
}

fn default_port() -> u16 {
    3978
}

fn default_playground_host() -> String {
    "host.docker.internal".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            playground_host: default_playground_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

fn default_llm_provider() -> String {
    "huggingface".to_string()
}

fn default_llm_model() -> String {
    "Qwen/Qwen2.5-7B-Instruct-1M".to_string()
}

const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// How late (in seconds) a reminder may still fire after its scheduled time.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Upper bound on stored conversation references. 0 = unbounded.
    #[serde(default)]
    pub max_conversations: usize,
}

fn default_grace_secs() -> u64 {
    120
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            grace_secs: default_grace_secs(),
            max_conversations: 0,
        }
    }
}

impl Config {
    /// Load config: defaults → nudge.toml → env vars (env wins).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| NudgeError::Config(format!("failed to read config: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| NudgeError::Config(format!("failed to parse config: {e}")))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MicrosoftAppId") {
            self.channel.app_id = v;
        }
        if let Some(v) = lookup("MicrosoftAppPassword") {
            self.channel.app_password = v;
        }
        if let Some(v) = lookup("MicrosoftAppTenantId") {
            self.channel.tenant_id = v;
        }
        if let Some(v) = lookup("PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| NudgeError::Config(format!("invalid PORT: '{v}'")))?;
        }
        if let Some(v) = lookup("PLAYGROUND_HOST") {
            self.server.playground_host = v;
        }
        if let Some(v) = lookup("NUDGE_LLM_PROVIDER") {
            self.llm.provider = v;
        }

        match self.llm.provider.as_str() {
            "openai" => {
                if let Some(v) = lookup("OPENAI_API_KEY") {
                    self.llm.api_key = v;
                }
                // The huggingface default model means nothing to OpenAI
                if self.llm.model == default_llm_model() {
                    self.llm.model = OPENAI_DEFAULT_MODEL.to_string();
                }
                if let Some(v) = lookup("OPENAI_MODEL") {
                    self.llm.model = v;
                }
            }
            _ => {
                if let Some(v) = lookup("HUGGINGFACE_API_TOKEN") {
                    self.llm.api_key = v;
                }
                if let Some(v) = lookup("HF_MODEL") {
                    self.llm.model = v;
                }
            }
        }

        if let Some(v) = lookup("NUDGE_REMINDER_GRACE_SECS") {
            self.reminders.grace_secs = v.parse().map_err(|_| {
                NudgeError::Config(format!("invalid NUDGE_REMINDER_GRACE_SECS: '{v}'"))
            })?;
        }
        if let Some(v) = lookup("NUDGE_MAX_CONVERSATIONS") {
            self.reminders.max_conversations = v.parse().map_err(|_| {
                NudgeError::Config(format!("invalid NUDGE_MAX_CONVERSATIONS: '{v}'"))
            })?;
        }

        Ok(())
    }
}
