use std::future::Future;

use nudge_core::error::Result;
use nudge_core::types::{Activity, ConversationReference};

use crate::credentials::CallerIdentity;

/// Outbound side of the messaging channel.
pub trait Channel: Send + Sync {
    /// Allow authenticated calls to this service URL's origin.
    fn trust_service_url(&self, service_url: &str);

    /// Deliver an activity into the referenced conversation.
    fn send_activity(
        &self,
        reference: &ConversationReference,
        identity: &CallerIdentity,
        activity: Activity,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// One turn against a conversation: either handling an inbound activity or a
/// proactive turn resumed from a stored reference.
pub struct TurnContext<'a, C> {
    channel: &'a C,
    identity: &'a CallerIdentity,
    reference: ConversationReference,
    inbound: Option<Activity>,
}

impl<'a, C: Channel> TurnContext<'a, C> {
    /// Turn for an activity that just arrived. Replies thread under it.
    pub fn inbound(channel: &'a C, identity: &'a CallerIdentity, activity: Activity) -> Self {
        Self {
            channel,
            identity,
            reference: activity.conversation_reference(),
            inbound: Some(activity),
        }
    }

    /// The inbound activity, absent for proactive turns.
    pub fn activity(&self) -> Option<&Activity> {
        self.inbound.as_ref()
    }

    pub fn reference(&self) -> &ConversationReference {
        &self.reference
    }

    pub async fn send_activity(&self, text: impl Into<String>) -> Result<()> {
        let mut activity = Activity::message(text);
        self.reference.apply_to(&mut activity);
        activity.reply_to_id = self.inbound.as_ref().and_then(|a| a.id.clone());
        self.channel
            .send_activity(&self.reference, self.identity, activity)
            .await
    }
}

/// Resume a conversation from a stored reference, without an inbound message.
pub fn continue_conversation<'a, C: Channel>(
    channel: &'a C,
    reference: ConversationReference,
    identity: &'a CallerIdentity,
) -> TurnContext<'a, C> {
    TurnContext {
        channel,
        identity,
        reference,
        inbound: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Activity>>,
    }

    impl Channel for Recorder {
        fn trust_service_url(&self, _service_url: &str) {}

        async fn send_activity(
            &self,
            _reference: &ConversationReference,
            _identity: &CallerIdentity,
            activity: Activity,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(activity);
            Ok(())
        }
    }

    fn inbound_activity() -> Activity {
        serde_json::from_value(serde_json::json!({
            "type": "message",
            "id": "in-1",
            "serviceUrl": "http://localhost:3978",
            "channelId": "emulator",
            "from": {"id": "user-1"},
            "recipient": {"id": "bot-1"},
            "conversation": {"id": "conv-1"},
            "text": "hi"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_inbound_reply_threads_under_activity() {
        let channel = Recorder::default();
        let identity = CallerIdentity::Anonymous;
        let turn = TurnContext::inbound(&channel, &identity, inbound_activity());

        turn.send_activity("hello back").await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("in-1"));
        assert_eq!(sent[0].recipient.as_ref().unwrap().id, "user-1");
        assert_eq!(sent[0].text.as_deref(), Some("hello back"));
    }

    #[tokio::test]
    async fn test_continued_turn_posts_without_reply_to() {
        let channel = Recorder::default();
        let identity = CallerIdentity::Anonymous;
        let reference = inbound_activity().conversation_reference();
        let turn = continue_conversation(&channel, reference, &identity);

        assert!(turn.activity().is_none());
        turn.send_activity("later").await.unwrap();

        let sent = channel.sent.lock().unwrap();
        assert!(sent[0].reply_to_id.is_none());
        assert_eq!(sent[0].conversation.as_ref().unwrap().id, "conv-1");
    }
}
