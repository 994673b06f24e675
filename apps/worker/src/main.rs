use chat_auth::{RedisSessionStore, SessionStore};
use chrono::{DateTime, Utc};
use dotenv::dotenv;
use once_cell::sync::Lazy;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SWEEP_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("SESSION_SWEEP_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60)
});

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let redis_url = std::env::var("REDIS_URL")
        .map_err(|_| anyhow::anyhow!("missing env REDIS_URL"))?;
    let store = RedisSessionStore::new(&redis_url)?;
    tracing::info!(interval_secs = *SWEEP_INTERVAL_SECS, "chat-worker starting");

    let mut ticker = tokio::time::interval(Duration::from_secs((*SWEEP_INTERVAL_SECS).max(1)));
    loop {
        ticker.tick().await;
        // 单次失败只记录，下个周期重试
        if let Err(e) = sweep_sessions(&store, Utc::now()).await {
            tracing::warn!(error = %e, "session sweep failed");
        }
    }
}

/// 把已过期但仍有效的会话置为失效，不删除
async fn sweep_sessions(store: &dyn SessionStore, now: DateTime<Utc>) -> chat_auth::Result<usize> {
    let flipped = store.deactivate_expired(now).await?;
    if flipped > 0 {
        tracing::info!(flipped, "expired sessions deactivated");
    } else {
        tracing::debug!("no expired sessions");
    }
    Ok(flipped)
}

fn init_tracing() {
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
