use std::sync::Arc;
use std::time::Duration;

use nudge_channel::{continue_conversation, CallerIdentity, Channel};
use nudge_core::error::Result;
use nudge_core::types::ConversationReference;
use nudge_scheduler::{JobOptions, Scheduler};

use crate::reminder::ReminderRequest;
use crate::store::ConversationStore;

/// Everything a fired reminder needs, captured by value at schedule time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderJob {
    pub user_id: String,
    pub message: String,
}

impl ReminderJob {
    pub fn text(&self) -> String {
        format!("Reminder: {}", self.message)
    }

    fn coalesce_key(&self) -> String {
        format!("{}\u{1f}{}", self.user_id, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No stored conversation for the user; nothing was sent.
    NoReference,
    /// Trust, auth or transport failed; logged and dropped.
    Failed,
}

/// Delivers fired reminders into the user's stored conversation.
///
/// The reference is looked up when the reminder fires, not when it was
/// scheduled, so a user who has moved conversations gets it in the latest one.
pub struct ReminderDispatcher<C> {
    store: Arc<ConversationStore>,
    channel: Arc<C>,
    identity: CallerIdentity,
}

impl<C: Channel> ReminderDispatcher<C> {
    pub fn new(store: Arc<ConversationStore>, channel: Arc<C>, identity: CallerIdentity) -> Self {
        Self {
            store,
            channel,
            identity,
        }
    }

    /// Best effort: every failure is logged and swallowed.
    pub async fn dispatch(&self, job: ReminderJob) -> DispatchOutcome {
        let reference = self.store.get(&job.user_id);
        tracing::info!(
            user_id = %job.user_id,
            have_ref = reference.is_some(),
            "[REM] firing"
        );
        let Some(reference) = reference else {
            return DispatchOutcome::NoReference;
        };

        match self.deliver(reference, &job).await {
            Ok(()) => {
                tracing::info!(user_id = %job.user_id, "[REM] continue_conversation OK");
                DispatchOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(user_id = %job.user_id, "[REM] continue_conversation ERROR: {e}");
                DispatchOutcome::Failed
            }
        }
    }

    async fn deliver(
        &self,
        reference: ConversationReference,
        job: &ReminderJob,
    ) -> Result<()> {
        // Re-trusted on every send; the registry is idempotent
        self.channel.trust_service_url(&reference.service_url);
        tracing::info!(service_url = %reference.service_url, "[REM] trusted serviceUrl");

        let turn = continue_conversation(self.channel.as_ref(), reference, &self.identity);
        turn.send_activity(job.text()).await
    }
}

/// Binds parsed reminder requests to the scheduler and dispatcher.
pub struct Reminders<C> {
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<ReminderDispatcher<C>>,
    grace: Duration,
}

impl<C: Channel + 'static> Reminders<C> {
    pub fn new(
        scheduler: Arc<Scheduler>,
        dispatcher: Arc<ReminderDispatcher<C>>,
        grace: Duration,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            grace,
        }
    }

    pub fn schedule(&self, user_id: &str, request: &ReminderRequest) -> Result<()> {
        let job = ReminderJob {
            user_id: user_id.to_string(),
            message: request.message.clone(),
        };
        tracing::info!(user_id, message = %job.message, "[REM] scheduling");

        let options = JobOptions::default()
            .with_grace(self.grace)
            .coalesce_on(job.coalesce_key());
        let dispatcher = self.dispatcher.clone();

        self.scheduler
            .schedule_in_minutes(request.delay_minutes, options, move || async move {
                dispatcher.dispatch(job).await;
            })?;
        Ok(())
    }
}
