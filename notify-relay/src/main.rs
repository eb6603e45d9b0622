use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use notify_relay::config::RelayConfig;
use notify_relay::logging;
use notify_relay::notification::retry_queue::DeliveryContext;
use notify_relay::notification::{
    ApprovalNotifier, Batcher, DiscordWebhookChannel, EventBus, HttpQueueStatusSource,
    NotificationChannel, PublishNotifier, RateLimiter, RetryQueue,
};
use notify_relay::scheduler::{SweepJobs, SweepScheduler};
use notify_relay::store::{DurableStore, RedisStore, keys};
use notify_relay::time::{SystemTimeSource, TimeSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env_or_default();
    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;
    config.validate()?;

    let cancel_token = CancellationToken::new();
    if let Some(log_dir) = &config.log_dir {
        logging::start_retention_cleanup(log_dir, cancel_token.clone());
    }

    let redis = RedisStore::connect(&config.redis_url)
        .await
        .with_context(|| format!("connecting to {}", config.redis_url))?;
    redis.ping().await.context("durable store did not answer ping")?;
    let store: Arc<dyn DurableStore> = Arc::new(redis);

    let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let channel: Arc<dyn NotificationChannel> =
        Arc::new(DiscordWebhookChannel::new(config.webhook_config()));
    if !channel.is_enabled() {
        warn!("No webhook configured, notifications will be queued for retry only");
    }
    let source = Arc::new(HttpQueueStatusSource::new(
        &config.queue_url,
        config.request_timeout(),
    )?);
    let event_bus = Arc::new(EventBus::new());

    let approval = Arc::new(ApprovalNotifier::new(
        config.approval_config(),
        source,
        channel.clone(),
        RateLimiter::new(store.clone(), clock.clone(), config.cooldown()),
        RetryQueue::new(
            keys::APPROVAL_FAILED,
            store.clone(),
            clock.clone(),
            channel.clone(),
            DeliveryContext {
                dashboard_url: config.dashboard_url.clone(),
            },
        )
        .with_event_bus(event_bus.clone()),
        event_bus.clone(),
        clock.clone(),
    ));

    let publish = Arc::new(PublishNotifier::new(
        config.enabled,
        channel.clone(),
        Batcher::new(store.clone(), clock.clone(), config.batch_window()),
        RetryQueue::new(
            keys::PUBLISH_FAILED,
            store.clone(),
            clock.clone(),
            channel.clone(),
            DeliveryContext::default(),
        )
        .with_event_bus(event_bus.clone()),
        store.clone(),
        event_bus.clone(),
        clock.clone(),
    ));

    let jobs = Arc::new(SweepJobs::new(
        approval,
        publish,
        channel,
        store,
        clock.clone(),
    ));
    let scheduler = Arc::new(SweepScheduler::new(
        jobs,
        clock,
        config.sweep_interval(),
        config.daily_summary_hour,
    ));
    let handle = scheduler.start(cancel_token.clone());

    info!(
        threshold = config.approval_threshold,
        cooldown_minutes = config.cooldown_minutes,
        batch_window_minutes = config.batch_window_minutes,
        "notify-relay started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    cancel_token.cancel();
    handle.await.context("sweep scheduler panicked")?;

    info!("notify-relay stopped");
    Ok(())
}
