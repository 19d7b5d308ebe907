use std::process;

use strata::{
    cache::{CacheStore, HttpCache, HttpCacheConfig, PurgeHook, StoreConfig},
    config::{self, Settings, UrlArgs},
    error::AppError,
    infra::{
        backend,
        http::{self, Upstream},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Purge(args) => run_purge(settings, args).await,
        config::Command::Unlock(args) => run_unlock(settings, args).await,
        config::Command::Inspect(args) => run_inspect(settings, args).await,
    }
}

fn open_store(settings: &Settings) -> Result<CacheStore, AppError> {
    let backend = backend::connect(&settings.backend)?;
    Ok(CacheStore::new(backend, StoreConfig::from(&settings.store)))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    let cache = HttpCache::new(store, HttpCacheConfig::from(&settings.proxy))
        .with_hook(PurgeHook::new(settings.purge.allowed_ips.iter().copied()));

    let upstream = Upstream::new(
        settings.proxy.upstream.clone(),
        settings.proxy.upstream_timeout,
    )?;

    info!(
        target = "strata::serve",
        upstream = %upstream.base(),
        hooks = ?cache.hook_names(),
        "starting cache proxy"
    );

    let router = http::build_router(cache, upstream);
    http::serve(settings.server.listen_addr, router).await?;
    Ok(())
}

async fn run_purge(settings: Settings, args: UrlArgs) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    if store.purge(&args.url).await? {
        info!(target = "strata::purge", url = %args.url, "purged");
        println!("Purged");
    } else {
        info!(target = "strata::purge", url = %args.url, "nothing stored");
        println!("Not found");
    }
    Ok(())
}

async fn run_unlock(settings: Settings, args: UrlArgs) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    if store.unlock_url(&args.url).await {
        println!("Unlocked");
    } else {
        warn!(
            target = "strata::unlock",
            url = %args.url,
            "no lock removed; it was not held or the backend failed"
        );
        println!("Not locked");
    }
    Ok(())
}

async fn run_inspect(settings: Settings, args: UrlArgs) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    let entries = store.inspect(&args.url).await?;
    let rendered = serde_json::to_string_pretty(&entries)
        .map_err(|err| AppError::unexpected(format!("failed to render entries: {err}")))?;
    println!("{rendered}");
    Ok(())
}
