use nudge_core::config::ChannelConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_core::types::now_unix;
use tokio::sync::Mutex;

const TOKEN_SCOPE: &str = "https://api.botframework.com/.default";
const DEFAULT_TENANT: &str = "botframework.com";

/// Refresh this many seconds before the token actually expires.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Who the bot claims to be when it calls the connector.
///
/// Chosen once at startup: an app id means real Bot Framework auth, no app id
/// means an unauthenticated Emulator / Playground session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Bot { app_id: String },
    Anonymous,
}

impl CallerIdentity {
    pub fn from_config(config: &ChannelConfig) -> Self {
        if config.has_credentials() {
            Self::Bot {
                app_id: config.app_id.clone(),
            }
        } else {
            Self::Anonymous
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Bot { .. })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - EXPIRY_SKEW_SECS
    }
}

/// Microsoft app credentials. Fetches connector bearer tokens with the
/// client-credentials flow and caches them until shortly before expiry.
pub struct AppCredentials {
    app_id: String,
    app_password: String,
    token_url: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl AppCredentials {
    pub fn new(config: &ChannelConfig) -> Self {
        let tenant = if config.tenant_id.is_empty() {
            DEFAULT_TENANT
        } else {
            config.tenant_id.as_str()
        };
        Self {
            app_id: config.app_id.clone(),
            app_password: config.app_password.clone(),
            token_url: format!("https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token"),
            http: reqwest::Client::new(),
            cache: Mutex::new(None),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Get a valid access token, fetching a new one if the cached one is stale.
    pub async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(now_unix()) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<CachedToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.app_id.as_str()),
            ("client_secret", self.app_password.as_str()),
            ("scope", TOKEN_SCOPE),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| NudgeError::Auth(format!("token request failed: {e}")))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| NudgeError::Auth(format!("token read failed: {e}")))?;

        if status != 200 {
            return Err(NudgeError::Http { status, body: text });
        }

        tracing::debug!(app_id = %self.app_id, "fetched connector token");
        parse_token_response(&text, now_unix())
    }
}

fn parse_token_response(text: &str, now: i64) -> Result<CachedToken> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| NudgeError::Auth(format!("token parse failed: {e}")))?;

    let token = json["access_token"]
        .as_str()
        .ok_or_else(|| NudgeError::Auth("missing access_token".to_string()))?
        .to_string();
    let expires_in = json["expires_in"].as_i64().unwrap_or(3600);

    Ok(CachedToken {
        token,
        expires_at: now + expires_in,
    })
}
