/*
 * Responsibility
 * - tracing / panic hook の初期化
 * - Config読み込み → token repo (Postgres or in-memory) → AppState
 * - Router 組み立て (envelope → gate → http layers の順に外側へ)
 * - axum::serve() で起動
 */
use std::{panic, process, sync::Arc};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::health::health;
use crate::config::Config;
use crate::middleware;
use crate::repos::{MemoryTokenRepo, PgTokenRepo, TokenRepo};
use crate::state::AppState;

fn init_tracing() {
    // RUST_LOG wins when set.
    // RUST_LOG=info,token_gate=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // development: crash the whole process so the panic is noticed
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("loading configuration")?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        app_env = ?config.app_env,
        addr = %config.addr,
        lifetime = %config.token_lifetime,
        policy = ?config.gate.protected_path_policy,
        transport = ?config.gate.token_transport,
        "starting token gate"
    );

    let repo = build_repo(&config).await?;
    tracing::info!(backend = repo.backend_name(), "token store ready");

    let state = AppState::from_config(&config, repo);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn build_repo(config: &Config) -> Result<Arc<dyn TokenRepo>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL is not set; tokens are kept in memory and lost on restart");
        return Ok(Arc::new(MemoryTokenRepo::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .context("connecting to postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    Ok(Arc::new(PgTokenRepo::new(pool)))
}

/// Assemble the full application router.
///
/// `/health` sits outside the gate. Everything under `/accounts` and
/// `/api/v1` goes through the gate first and the envelope second, so a
/// rejection keeps the plain error body.
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        .nest("/accounts", api::v1::account_routes())
        .nest("/api/v1", api::v1::routes());
    let gated = middleware::envelope::apply(gated, state.clone());
    let gated = middleware::auth::gate::apply(gated, state.clone());

    let router = Router::new()
        .route("/health", get(health))
        .merge(gated)
        .with_state(state);

    middleware::http::apply(router)
}
