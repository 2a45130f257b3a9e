use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use msgboard::config::Settings;
use msgboard::openapi::ApiDoc;
use msgboard::repo::Repo;
use msgboard::routes::{config, not_found, AppState};
use msgboard::SecurityHeaders;

#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable one of the `inmem-store` or `postgres-store` features");

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(_settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    let repo = msgboard::repo::inmem::InMemRepo::new().context("failed to open the in-memory store")?;
    info!("Using in-memory repository backend");
    Ok(Arc::new(repo))
}

// Fails fast: an unreachable database aborts startup instead of failing every request later.
#[cfg(feature = "postgres-store")]
async fn build_repo(settings: &Settings) -> anyhow::Result<Arc<dyn Repo>> {
    use msgboard::repo::pg::PgRepo;
    use sqlx::postgres::PgPoolOptions;

    let url = settings
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set for postgres-store")?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.context("failed to run migrations")?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(repo))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; deployments set variables externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let settings = Settings::from_env();
    info!("Bootstrapping message board");

    let repo = build_repo(&settings).await?;
    match repo.reconcile_summaries().await {
        Ok(0) => info!("Embedded reply summaries consistent"),
        Ok(n) => warn!("Repaired embedded reply summaries on {n} thread(s)"),
        Err(e) => return Err(anyhow::anyhow!("reconciliation failed: {e}")),
    }

    let state = web::Data::new(AppState { repo });
    let openapi = ApiDoc::openapi();
    let hsts = settings.enable_hsts;

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(hsts))
            .wrap(cors)
            .app_data(state.clone())
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .default_service(web::to(not_found))
    })
    .bind((settings.host.as_str(), settings.port))?;

    info!("Listening on http://{}:{}", settings.host, settings.port);

    server.run().await?;
    Ok(())
}
