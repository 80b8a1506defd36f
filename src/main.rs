use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use tracing::info;
use tracing_appender::rolling;
use utoipa::OpenApi; // needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use campus::auth::capability::RoleAuthorizer;
use campus::clock::SystemClock;
use campus::config::Config;
use campus::core::{AppState, Stores};
use campus::db::init_db;
use campus::docs::ApiDoc;
use campus::routes;
use campus::store::{MemoryStore, MySqlStore};

#[get("/")]
async fn index() -> impl Responder {
    "Campus timetable service"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let stores = if config.uses_memory_store() {
        info!("Using in-memory store");
        Stores::from_backend(Arc::new(MemoryStore::new()))
    } else {
        let pool = init_db(&config).await?;
        Stores::from_backend(Arc::new(MySqlStore::new(pool)))
    };

    let state = Data::new(AppState::new(
        stores,
        Arc::new(RoleAuthorizer),
        Arc::new(SystemClock),
        &config,
    ));

    let server_addr = config.server_addr.clone();
    let config_data = Data::new(config);

    HttpServer::new(move || {
        let config = config_data.clone();
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(state.clone())
            .app_data(config.clone())
            .service(index)
            .configure(|cfg| routes::configure(cfg, &config))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {}", server_addr))?
    .run()
    .await?;

    Ok(())
}
