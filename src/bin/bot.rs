use anyhow::Result;
use dotenvy::dotenv;
use log::{error, info, warn};
use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use boomerang::core::{Config, MessagingProvider};
use boomerang::database::Database;
use boomerang::features::analytics::UsageTracker;
use boomerang::features::assistant::{CompletionClient, OpenAiClient};
use boomerang::features::conversation::{
    spawn_retention_loop, Conversation, ConversationSettings, RETENTION_INTERVAL,
};
use boomerang::features::intent::{IntentParser, RuleMatcher};
use boomerang::features::reminders::{
    JobQueue, QueueOptions, ReminderDelivery, ReminderLifecycle, ReminderStore,
};
use boomerang::features::transport::{build_transport, ConsoleTransport, DiscordTransport};
use boomerang::rate_limiter::RateLimiter;

struct Handler {
    conversation: Arc<Conversation>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(inbound) = DiscordTransport::inbound_from(&msg) else {
            return;
        };
        if let Err(e) = self.conversation.handle_inbound(inbound).await {
            error!("Error handling message {}: {e:#}", msg.id);
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🎉 {} is connected and ready!", ready.user.name);
        info!("📡 Connected to {} guilds", ready.guilds.len());
    }
}

async fn run_discord_gateway(token: &str, conversation: Arc<Conversation>) -> Result<()> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(token, intents)
        .event_handler(Handler { conversation })
        .await
        .map_err(|e| {
            error!("Failed to create Discord client: {e}");
            anyhow::anyhow!("Client creation failed: {}", e)
        })?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down Discord gateway...");
            shard_manager.lock().await.shutdown_all().await;
        }
    });

    info!("Establishing WebSocket connection to Discord gateway...");
    if let Err(why) = client.start().await {
        error!("Gateway connection failed: {why:?}");
        return Err(anyhow::anyhow!(
            "Failed to establish gateway connection: {}",
            why
        ));
    }
    Ok(())
}

/// Feed stdin lines to the conversation until ctrl-c. Scheduled reminders
/// keep firing after stdin closes.
async fn run_stdin(conversation: Arc<Conversation>, default_sender: &str) -> Result<()> {
    info!("Reading messages from stdin as `<sender>: <text>` (default sender {default_sender})");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            line = lines.next_line() => match line? {
                Some(line) => {
                    let Some(inbound) = ConsoleTransport::inbound_from_line(&line, default_sender) else {
                        continue;
                    };
                    if let Err(e) = conversation.handle_inbound(inbound).await {
                        error!("Error handling message: {e:#}");
                    }
                }
                None => {
                    info!("stdin closed; waiting for ctrl-c");
                    tokio::signal::ctrl_c().await?;
                    return Ok(());
                }
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    // The openai crate reads its credentials from the environment
    if let Some(key) = &config.openai_api_key {
        std::env::set_var("OPENAI_API_KEY", key);
        std::env::set_var("OPENAI_KEY", key);
    }
    std::env::set_var("OPENAI_BASE_URL", &config.openai_base_url);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!(
        "Starting Boomerang with the {} provider...",
        config.provider.as_str()
    );

    let database = Database::new(&config.database_path)?;
    let usage_tracker = UsageTracker::new(database.clone());
    let transport = build_transport(&config)?;

    let llm: Option<Arc<dyn CompletionClient>> = match &config.openai_api_key {
        Some(_) => {
            info!("🧠 LLM tier enabled ({})", config.openai_model);
            Some(Arc::new(
                OpenAiClient::new(&config.openai_model).with_usage_tracker(usage_tracker),
            ))
        }
        None => {
            warn!("OPENAI_API_KEY not set; intent parsing is rule-only and summaries are disabled");
            None
        }
    };

    let parser = IntentParser::hybrid(
        RuleMatcher::new(config.utc_offset()),
        llm.clone(),
        config.intent_confidence_threshold,
    );

    let queue = JobQueue::new(QueueOptions {
        concurrency: config.worker_concurrency,
        attempts: config.job_attempts,
        backoff: Duration::from_millis(config.job_backoff_ms),
    });
    let store: Arc<dyn ReminderStore> = Arc::new(database.clone());
    let lifecycle = ReminderLifecycle::new(store.clone(), queue.clone());
    let delivery = Arc::new(ReminderDelivery::new(store, transport.clone(), lifecycle.clone()));

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(queue.clone().run(delivery, shutdown.clone()));

    match lifecycle.recover_pending().await {
        Ok(0) => {}
        Ok(count) => info!("⏰ Re-scheduled {count} pending reminders"),
        Err(e) => error!("Failed to recover pending reminders: {e:#}"),
    }

    let rate_limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_per_user_per_minute));
    let retention = spawn_retention_loop(
        database.clone(),
        rate_limiter.clone(),
        RETENTION_INTERVAL,
        shutdown.clone(),
    );

    let mut conversation = Conversation::new(
        database,
        parser,
        lifecycle,
        transport,
        rate_limiter,
        ConversationSettings::from_config(&config),
    );
    if let Some(llm) = llm {
        conversation = conversation.with_llm(llm);
    }
    let conversation = Arc::new(conversation);

    let result = match (config.provider, config.discord_token.as_deref()) {
        (MessagingProvider::Discord, Some(token)) => run_discord_gateway(token, conversation).await,
        _ => run_stdin(conversation, &config.console_sender).await,
    };

    shutdown.cancel();
    if let Err(e) = worker.await {
        error!("Delay queue worker panicked: {e}");
    }
    if let Err(e) = retention.await {
        error!("Retention loop panicked: {e}");
    }
    info!("Boomerang stopped");

    result
}
