use std::sync::Arc;

use nudge_core::error::{NudgeError, Result};
use nudge_core::types::{Activity, ConversationReference};
use reqwest::Client;
use url::Url;

use crate::adapter::Channel;
use crate::credentials::{AppCredentials, CallerIdentity};
use crate::trust::TrustedServiceUrls;

/// Bot Framework connector REST client.
pub struct BotConnector {
    client: Client,
    credentials: Option<AppCredentials>,
    trusted: Arc<TrustedServiceUrls>,
}

impl BotConnector {
    pub fn new(credentials: Option<AppCredentials>, trusted: Arc<TrustedServiceUrls>) -> Self {
        Self {
            client: Client::new(),
            credentials,
            trusted,
        }
    }

    async fn bearer_for(&self, service_url: &str, identity: &CallerIdentity) -> Result<Option<String>> {
        match identity {
            CallerIdentity::Anonymous => Ok(None),
            CallerIdentity::Bot { app_id } => {
                if !self.trusted.is_trusted(service_url) {
                    return Err(NudgeError::Auth(format!(
                        "service url '{service_url}' is not trusted"
                    )));
                }
                let credentials = self.credentials.as_ref().ok_or_else(|| {
                    NudgeError::Auth(format!("no credentials configured for app '{app_id}'"))
                })?;
                credentials.access_token().await.map(Some)
            }
        }
    }
}

impl Channel for BotConnector {
    fn trust_service_url(&self, service_url: &str) {
        self.trusted.trust(service_url);
    }

    async fn send_activity(
        &self,
        reference: &ConversationReference,
        identity: &CallerIdentity,
        activity: Activity,
    ) -> Result<()> {
        let url = activities_url(
            &reference.service_url,
            &reference.conversation.id,
            activity.reply_to_id.as_deref(),
        )?;

        let mut request = self.client.post(url.as_str()).json(&activity);
        if let Some(token) = self.bearer_for(&reference.service_url, identity).await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NudgeError::Channel(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NudgeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(conversation = %reference.conversation.id, "activity sent");
        Ok(())
    }
}

/// `{serviceUrl}/v3/conversations/{id}/activities[/{replyToId}]`
pub fn activities_url(
    service_url: &str,
    conversation_id: &str,
    reply_to_id: Option<&str>,
) -> Result<Url> {
    if conversation_id.is_empty() {
        return Err(NudgeError::InvalidActivity(
            "conversation id is empty".to_string(),
        ));
    }

    let mut url = Url::parse(service_url)
        .map_err(|e| NudgeError::InvalidActivity(format!("bad service url '{service_url}': {e}")))?;

    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            NudgeError::InvalidActivity(format!("service url '{service_url}' cannot be a base"))
        })?;
        segments
            .pop_if_empty()
            .extend(["v3", "conversations", conversation_id, "activities"]);
        if let Some(reply_to) = reply_to_id {
            segments.push(reply_to);
        }
    }

    Ok(url)
}
