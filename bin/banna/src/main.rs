//! # Banna Binary
//!
//! The entry point that assembles the detector based on compile-time features.

use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use bn_api::{configure_routes, middleware, AppState};
use bn_config::{LoggingSettings, Settings};
use bn_engine::{AvatarVerdict, Engine, EngineOptions, EventDispatcher, Ports};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "db-sqlite")]
use bn_db_sqlite::SqliteConfigStore;

#[cfg(feature = "cache-local")]
use bn_cache_local::LocalAvatarCache;

#[cfg(feature = "relay")]
use bn_relay::{HttpImageFetcher, RelayClient, RelayConfig};

#[cfg(not(all(feature = "db-sqlite", feature = "cache-local", feature = "relay")))]
compile_error!("banna needs a config store, an avatar cache and a platform relay; enable the default features");

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load settings")?;
    init_tracing(&settings.logging);
    let (host, port) = settings.bind_address();
    let Settings { server, relay, database, cache, detection, .. } = settings;

    // 1. Config store
    let store = SqliteConfigStore::new(&database.url)
        .await
        .context("failed to open config store")?;

    // 2. Platform relay and image fetching
    let relay = Arc::new(
        RelayClient::new(RelayConfig {
            base_url: relay.base_url,
            token: relay.token,
            timeout_secs: relay.timeout_secs,
        })
        .context("failed to build relay client")?,
    );
    let fetcher = Arc::new(
        HttpImageFetcher::new(cache.fetch_timeout_secs).context("failed to build image fetcher")?,
    );

    // 3. Avatar cache
    let cache = LocalAvatarCache::new(PathBuf::from(cache.directory), fetcher.clone());

    let options = EngineOptions {
        avatar_verdict: if detection.strongest_avatar_verdict {
            AvatarVerdict::Strongest
        } else {
            AvatarVerdict::LastComparison
        },
    };
    let engine = Arc::new(Engine::new(
        Ports {
            config: Arc::new(store),
            directory: relay.clone(),
            moderator: relay.clone(),
            messenger: relay,
            cache: Arc::new(cache),
            fetcher,
        },
        options,
    ));
    let dispatcher = Arc::new(EventDispatcher::new(engine));

    // Events arriving before startup finishes are answered with 503.
    let starter = dispatcher.clone();
    actix_web::rt::spawn(async move {
        let reports = starter.start().await;
        let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
        info!(communities = reports.len(), failed, "initial sweep complete");
    });

    let state = web::Data::new(AppState {
        dispatcher,
        token: server.token,
    });

    info!(%host, port, "banna intake listening");

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::standard_middleware())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;
    Ok(())
}
