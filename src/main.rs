use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use campaign_engine::api::{AppState, routes};
use campaign_engine::approval::ApprovalService;
use campaign_engine::config::AppConfig;
use campaign_engine::dispatch::Dispatcher;
use campaign_engine::llm::create_provider;
use campaign_engine::pipeline::Orchestrator;
use campaign_engine::providers::Providers;
use campaign_engine::stages::ContentGenerator;
use campaign_engine::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Optional rolling file log; the guard must live as long as main.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "campaign-engine.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📣 Campaign Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Generator: {} @ {}", config.llm.model, config.llm.base_url);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Collaborators ────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let providers = Providers::from_config(config.sendgrid.clone(), config.smtp.clone(), config.twilio.clone())?;
    eprintln!(
        "   Mail: {}  Voice: {}",
        providers.mail.as_ref().map(|m| m.name()).unwrap_or("disabled"),
        providers.voice.as_ref().map(|v| v.name()).unwrap_or("disabled"),
    );

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&db), providers, config.dispatch.clone()));
    let content = Arc::new(ContentGenerator::new(llm.clone()));
    let orchestrator = Arc::new(Orchestrator::standard(
        Arc::clone(&db),
        llm,
        Arc::clone(&content),
        Arc::clone(&dispatcher),
        &config.pipeline,
    ));
    let approvals = Arc::new(ApprovalService::new(Arc::clone(&db), content, dispatcher));

    let app = routes(AppState {
        db,
        orchestrator,
        approvals,
    });

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    eprintln!("   REST: http://{}/api/campaigns", config.bind);
    eprintln!("   Approval WS: ws://{}/ws/campaigns/{{id}}/approval", config.bind);
    eprintln!("   Health: http://{}/health\n", config.bind);
    tracing::info!(addr = %config.bind, "Campaign engine listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
