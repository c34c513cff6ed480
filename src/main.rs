use nudge_bot::bot::ChatBot;
use nudge_bot::dispatcher::{ReminderDispatcher, Reminders};
use nudge_bot::http::{self, AppState};
use nudge_bot::llm::LlmDispatch;
use nudge_bot::store::ConversationStore;
use nudge_channel::{AppCredentials, BotConnector, CallerIdentity, TrustedServiceUrls};
use nudge_core::config::Config;
use nudge_scheduler::{ExecutionContext, Scheduler};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nudge=info")),
        )
        .init();

    let config_path = std::env::var("NUDGE_CONFIG").unwrap_or_else(|_| "nudge.toml".to_string());

    let config = Config::load(Path::new(&config_path)).unwrap_or_else(|e| {
        tracing::error!("fatal: failed to load config: {e}");
        std::process::exit(1);
    });

    // Decided once: every proactive send uses the same identity
    let identity = CallerIdentity::from_config(&config.channel);
    if identity.is_authenticated() {
        tracing::info!(app_id = %config.channel.app_id, "using bot framework credentials");
    } else {
        tracing::warn!("no MicrosoftAppId set, running unauthenticated (Emulator / Playground)");
    }
    if config.llm.api_key.is_empty() {
        tracing::warn!(provider = %config.llm.provider, "no LLM key set, replies will echo the prompt");
    }

    let credentials = identity
        .is_authenticated()
        .then(|| AppCredentials::new(&config.channel));
    let channel = Arc::new(BotConnector::new(
        credentials,
        Arc::new(TrustedServiceUrls::new()),
    ));
    let store = Arc::new(ConversationStore::bounded(
        config.reminders.max_conversations,
    ));

    // All fired reminders are marshalled onto this context
    let (context, context_loop) = ExecutionContext::new("main");
    tokio::spawn(context_loop.run());

    let scheduler = Arc::new(Scheduler::with_system_clock());
    if let Err(e) = scheduler.start(context) {
        tracing::error!("fatal: failed to start scheduler: {e}");
        std::process::exit(1);
    }

    let dispatcher = Arc::new(ReminderDispatcher::new(
        store.clone(),
        channel.clone(),
        identity.clone(),
    ));
    let reminders = Reminders::new(
        scheduler.clone(),
        dispatcher,
        Duration::from_secs(config.reminders.grace_secs),
    );
    let bot = ChatBot::new(
        channel,
        identity,
        store,
        reminders,
        LlmDispatch::new(config.llm.clone()),
    );
    let state = Arc::new(AppState {
        bot,
        playground_host: config.server.playground_host.clone(),
    });

    tracing::info!("nudge: starting...");
    let result = http::serve(config.server.port, state, shutdown_signal()).await;

    scheduler.shutdown();

    if let Err(e) = result {
        tracing::error!("fatal: server error: {e}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
