use axum::Router;
use chat_answer::{AnswerEngine, HttpAnswerEngine};
use chat_auth::{
    ConversationDirectory, MemoryDirectory, MemorySessionStore, PgDirectory, RedisSessionStore,
    SessionStore, SessionValidator, TenantDirectory, TenantValidator,
};
use chat_limits::{MemoryStore, RateLimiter, ResponseCache};
use chat_pipeline::{ChatPipeline, TracingEventSink};
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

mod chat_routes;
mod config;

use chat_routes::{create_chat_routes, AppState};
use config::{load_config, AppConfig, DirectorySeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg: AppConfig = load_config()?;
    let pipeline = Arc::new(build_pipeline(&cfg).await?);

    // 后台定期清理过期的限流窗口与缓存条目
    {
        let sweeper = pipeline.clone();
        let every = Duration::from_secs(cfg.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let stats = sweeper.sweep_expired();
                if stats.windows + stats.cache_entries > 0 {
                    debug!(
                        windows = stats.windows,
                        cache_entries = stats.cache_entries,
                        "background sweep"
                    );
                }
            }
        });
    }

    let app: Router = create_chat_routes()
        .with_state(AppState { pipeline })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    info!(%addr, "chat-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=info"))
        .unwrap();
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn build_pipeline(cfg: &AppConfig) -> anyhow::Result<ChatPipeline> {
    let (tenants, conversations) = build_directory(&cfg.directory).await?;

    // 配置了 REDIS_URL 则使用 Redis 会话存储，否则退回内存实现
    let sessions: Arc<dyn SessionStore> = match std::env::var("REDIS_URL").ok() {
        Some(url) => {
            info!("session store: redis");
            Arc::new(RedisSessionStore::new(&url)?)
        }
        None => {
            info!("REDIS_URL not set; using in-memory session store");
            Arc::new(MemorySessionStore::new())
        }
    };

    let engine: Arc<dyn AnswerEngine> = Arc::new(HttpAnswerEngine::from_env(&cfg.answer_service)?);
    info!(engine = engine.name(), "answer engine ready");

    let store = Arc::new(MemoryStore::new());
    Ok(ChatPipeline::new(
        TenantValidator::new(tenants, conversations),
        SessionValidator::new(sessions),
        RateLimiter::new(store.clone(), cfg.rate_limits.clone()),
        Arc::new(ResponseCache::new(store, cfg.cache.clone())),
        engine,
        Arc::new(TracingEventSink),
        cfg.pipeline.clone(),
    ))
}

async fn build_directory(
    seed: &DirectorySeed,
) -> anyhow::Result<(Arc<dyn TenantDirectory>, Arc<dyn ConversationDirectory>)> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        info!("directory: postgres");
        let pg = Arc::new(PgDirectory::connect(&url).await?);
        let tenants: Arc<dyn TenantDirectory> = pg.clone();
        let conversations: Arc<dyn ConversationDirectory> = pg;
        return Ok((tenants, conversations));
    }

    info!(
        tenants = seed.tenants.len(),
        conversations = seed.conversations.len(),
        "DATABASE_URL not set; using seeded in-memory directory"
    );
    let memory = Arc::new(MemoryDirectory::new());
    for tenant in &seed.tenants {
        memory.insert_tenant(tenant.clone()).await;
    }
    for conversation in &seed.conversations {
        memory.insert_conversation(conversation.clone()).await;
    }
    let tenants: Arc<dyn TenantDirectory> = memory.clone();
    let conversations: Arc<dyn ConversationDirectory> = memory;
    Ok((tenants, conversations))
}
