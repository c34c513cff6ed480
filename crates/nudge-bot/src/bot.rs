use std::sync::Arc;

use nudge_channel::{CallerIdentity, Channel, TurnContext};
use nudge_core::error::{NudgeError, Result};
use nudge_core::types::Activity;

use crate::dispatcher::Reminders;
use crate::llm::Completion;
use crate::reminder::parse_reminder;
use crate::store::ConversationStore;

const ERROR_REPLY: &str = "Oops, something went wrong.";

/// Handles one inbound activity: remember the conversation, then answer
/// with a reminder acknowledgement, an echo, or an LLM completion.
pub struct ChatBot<C, L> {
    channel: Arc<C>,
    identity: CallerIdentity,
    store: Arc<ConversationStore>,
    reminders: Reminders<C>,
    llm: L,
}

impl<C, L> ChatBot<C, L>
where
    C: Channel + 'static,
    L: Completion,
{
    pub fn new(
        channel: Arc<C>,
        identity: CallerIdentity,
        store: Arc<ConversationStore>,
        reminders: Reminders<C>,
        llm: L,
    ) -> Self {
        Self {
            channel,
            identity,
            store,
            reminders,
            llm,
        }
    }

    /// Process one activity. Errors are reported to the user, never returned.
    pub async fn on_turn(&self, activity: Activity) {
        if let Some(service_url) = activity.service_url.as_deref().filter(|u| !u.is_empty()) {
            self.channel.trust_service_url(service_url);
        }

        let turn = TurnContext::inbound(self.channel.as_ref(), &self.identity, activity);
        if let Err(e) = self.handle(&turn).await {
            self.on_error(&turn, e).await;
        }
    }

    async fn handle(&self, turn: &TurnContext<'_, C>) -> Result<()> {
        let activity = turn
            .activity()
            .ok_or_else(|| NudgeError::InvalidActivity("turn has no activity".to_string()))?;

        let user_id = self.store.upsert(activity);
        tracing::info!(user_id = %user_id, "[REF] stored conversation ref");

        if !activity.is_message() {
            tracing::debug!(activity_type = %activity.activity_type, "ignoring non-message activity");
            return Ok(());
        }

        let text = activity.text.as_deref().unwrap_or_default().trim();

        if let Some(request) = parse_reminder(text) {
            self.reminders.schedule(&user_id, &request)?;
            return turn.send_activity(request.acknowledgement()).await;
        }

        if let Some(rest) = echo_text(text) {
            return turn.send_activity(rest).await;
        }

        let reply = self.llm.complete(text).await;
        turn.send_activity(reply).await
    }

    async fn on_error(&self, turn: &TurnContext<'_, C>, error: NudgeError) {
        tracing::error!("turn failed: {error}");
        if let Err(e) = turn.send_activity(ERROR_REPLY).await {
            tracing::error!("could not send error reply: {e}");
        }
    }
}

/// `"echo <text>"` (any case) → `<text>` trimmed.
fn echo_text(text: &str) -> Option<&str> {
    let prefix = text.get(..5)?;
    if prefix.eq_ignore_ascii_case("echo ") {
        Some(text[5..].trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::ReminderDispatcher;
    use crate::testing::{message_from, CannedLlm, RecordingChannel};
    use nudge_scheduler::{ExecutionContext, ManualClock, Scheduler};
    use std::time::Duration;

    struct Harness {
        bot: ChatBot<RecordingChannel, CannedLlm>,
        channel: Arc<RecordingChannel>,
        store: Arc<ConversationStore>,
        scheduler: Arc<Scheduler>,
        clock: ManualClock,
    }

    fn harness(identity: CallerIdentity) -> Harness {
        let channel = Arc::new(RecordingChannel::default());
        let store = Arc::new(ConversationStore::new());
        let clock = ManualClock::default();
        let scheduler = Arc::new(Scheduler::new(Arc::new(clock.clone())));
        let (context, runner) = ExecutionContext::new("main");
        tokio::spawn(runner.run());
        scheduler.start(context).unwrap();

        let dispatcher = Arc::new(ReminderDispatcher::new(
            store.clone(),
            channel.clone(),
            identity.clone(),
        ));
        let reminders = Reminders::new(scheduler.clone(), dispatcher, Duration::from_secs(120));
        let bot = ChatBot::new(
            channel.clone(),
            identity,
            store.clone(),
            reminders,
            CannedLlm::default(),
        );
        Harness {
            bot,
            channel,
            store,
            scheduler,
            clock,
        }
    }

    #[tokio::test]
    async fn test_reminder_is_acknowledged_and_scheduled() {
        let h = harness(CallerIdentity::Anonymous);

        h.bot
            .on_turn(message_from("u1", "c1", "remind me in 5: take a break"))
            .await;

        assert_eq!(h.channel.texts(), vec!["Okay! I'll remind you in 5 minute(s)."]);
        assert_eq!(h.scheduler.pending(), 1);
        assert!(h.bot.llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_ack_replies_under_inbound_activity() {
        let h = harness(CallerIdentity::Anonymous);

        h.bot.on_turn(message_from("u1", "c1", "reminder 10 minutes")).await;

        let sent = h.channel.sent();
        assert_eq!(sent[0].reply_to_id.as_deref(), Some("act-c1"));
    }

    #[tokio::test]
    async fn test_echo_skips_reminders_and_llm() {
        let h = harness(CallerIdentity::Anonymous);

        h.bot.on_turn(message_from("u1", "c1", "echo hello world")).await;

        assert_eq!(h.channel.texts(), vec!["hello world"]);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(h.bot.llm.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_echo_prefix_is_case_insensitive() {
        let h = harness(CallerIdentity::Anonymous);
        h.bot.on_turn(message_from("u1", "c1", "ECHO   spaced out  ")).await;
        assert_eq!(h.channel.texts(), vec!["spaced out"]);
    }

    #[tokio::test]
    async fn test_other_text_goes_to_llm() {
        let h = harness(CallerIdentity::Anonymous);

        h.bot.on_turn(message_from("u1", "c1", "  what is rust?  ")).await;

        assert_eq!(h.bot.llm.prompts(), vec!["what is rust?"]);
        assert_eq!(h.channel.texts(), vec!["llm: what is rust?"]);
    }

    #[tokio::test]
    async fn test_every_turn_stores_reference_and_trusts_url() {
        let h = harness(CallerIdentity::Anonymous);
        let mut update = message_from("u9", "c9", "");
        update.activity_type = "conversationUpdate".to_string();

        h.bot.on_turn(update).await;

        assert!(h.store.get("u9").is_some());
        assert!(h.channel.sent().is_empty());
        assert_eq!(h.channel.trusted(), vec!["https://smba.example.com/".to_string()]);
    }

    #[tokio::test]
    async fn test_scheduling_failure_sends_apology() {
        let h = harness(CallerIdentity::Anonymous);
        h.scheduler.shutdown();

        h.bot.on_turn(message_from("u1", "c1", "remind in 2")).await;

        assert_eq!(h.channel.texts(), vec![ERROR_REPLY]);
    }

    #[tokio::test]
    async fn test_reminder_fires_into_stored_conversation() {
        let h = harness(CallerIdentity::Bot {
            app_id: "app-1".to_string(),
        });

        h.bot.on_turn(message_from("u1", "c1", "remind in 2")).await;
        h.clock.advance(Duration::from_secs(120));
        h.scheduler.wake();

        let sent = h.channel.wait_for_sends(2).await;
        assert_eq!(sent[1].text, "Reminder: 2 minute(s) have passed.");
        assert_eq!(sent[1].conversation_id, "c1");
        assert!(sent[1].reply_to_id.is_none());
        assert!(sent[1].identity.is_authenticated());
    }

    #[test]
    fn test_echo_text() {
        assert_eq!(echo_text("echo hi"), Some("hi"));
        assert_eq!(echo_text("Echo  hi  "), Some("hi"));
        assert_eq!(echo_text("echo"), None);
        assert_eq!(echo_text("echoes"), None);
        assert_eq!(echo_text("é"), None);
    }
}
