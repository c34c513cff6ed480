//! In-memory fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use nudge_channel::{CallerIdentity, Channel};
use nudge_core::error::{NudgeError, Result};
use nudge_core::types::{Activity, ConversationReference};

use crate::llm::Completion;

pub(crate) const SERVICE_URL: &str = "https://smba.example.com/";

pub(crate) fn message_from(user_id: &str, conversation_id: &str, text: &str) -> Activity {
    serde_json::from_value(serde_json::json!({
        "type": "message",
        "id": format!("act-{conversation_id}"),
        "serviceUrl": SERVICE_URL,
        "channelId": "msteams",
        "from": {"id": user_id},
        "recipient": {"id": "bot"},
        "conversation": {"id": conversation_id},
        "text": text
    }))
    .expect("test activity is valid")
}

#[derive(Debug, Clone)]
pub(crate) struct SentActivity {
    pub text: String,
    pub conversation_id: String,
    pub reply_to_id: Option<String>,
    pub identity: CallerIdentity,
}

#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<SentActivity>>,
    trusted: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<SentActivity> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.text).collect()
    }

    pub fn trusted(&self) -> Vec<String> {
        self.trusted.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Poll until at least `n` activities were sent.
    pub async fn wait_for_sends(&self, n: usize) -> Vec<SentActivity> {
        for _ in 0..200 {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} sent activities, got {}", self.sent().len());
    }
}

impl Channel for RecordingChannel {
    fn trust_service_url(&self, service_url: &str) {
        self.trusted.lock().unwrap().push(service_url.to_string());
    }

    async fn send_activity(
        &self,
        reference: &ConversationReference,
        identity: &CallerIdentity,
        activity: Activity,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NudgeError::Channel("connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(SentActivity {
            text: activity.text.unwrap_or_default(),
            conversation_id: reference.conversation.id.clone(),
            reply_to_id: activity.reply_to_id,
            identity: identity.clone(),
        });
        Ok(())
    }
}

/// Completion that answers with a fixed prefix and records prompts.
#[derive(Default)]
pub(crate) struct CannedLlm {
    prompts: Mutex<Vec<String>>,
}

impl CannedLlm {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Completion for CannedLlm {
    async fn complete(&self, prompt: &str) -> String {
        self.prompts.lock().unwrap().push(prompt.to_string());
        format!("llm: {prompt}")
    }
}
