use std::sync::Arc;

use server::auth::{SessionAuthority, StaticSessionAuthority};
use server::config::AppConfig;
use server::db::PersistenceBackend;

/// Boot sequence: load config, connect (or fall back to in-memory)
/// persistence, then hand the assembled router to `axum::serve`
/// (`spec.md` §6), grounded on the teacher's `main` almost directly.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(AppConfig::from_env());

    let persistence = Arc::new(match &config.database_url {
        Some(url) => PersistenceBackend::connect(url).await?,
        None => {
            tracing::warn!("DATABASE_URL not set, running with in-memory persistence");
            PersistenceBackend::in_memory()
        }
    });

    let auth: Arc<dyn SessionAuthority> = Arc::new(StaticSessionAuthority::new());
    let app = server::build_app(config.clone(), persistence, auth);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "race server listening");
    axum::serve(listener, app.router).await?;

    Ok(())
}
