use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analytical_query_engine::config::{Config, DatabaseConfig};
use analytical_query_engine::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    init_tracing(&config.logging);

    tracing::info!("analytical query engine starting up");
    tracing::info!("configuration loaded successfully");

    let app_state = Arc::new(AppState::new(config.clone()));

    register_default_workspace(&app_state, &config.database).await?;

    let app = analytical_query_engine::api::router(Arc::clone(&app_state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Registers the single tenant database configured in `[database]` as workspace
/// `"default"`. A deployment fronting more than one tenant would call
/// `Engine::register_workspace` again per tenant; this binary only needs the one.
async fn register_default_workspace(
    state: &AppState,
    db: &DatabaseConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let opts = mysql_async::OptsBuilder::default()
        .ip_or_hostname(&db.host)
        .tcp_port(db.port)
        .user(Some(&db.user))
        .pass(Some(&db.password))
        .db_name(Some(&db.database));
    let pool = mysql_async::Pool::new(opts);

    state.engine.register_workspace("default", pool);
    tracing::info!("registered workspace 'default' ({}:{})", db.host, db.port);
    Ok(())
}

fn init_tracing(logging: &analytical_query_engine::config::LoggingConfig) {
    let log_filter = tracing_subscriber::EnvFilter::new(&logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("aqe.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        // Leak the guard: the binary runs for the process lifetime and the appender
        // must stay alive until then.
        Box::leak(Box::new(_guard));
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
