//! HookHost: hook dispatch and hot-reload unit host
//!
//! Main entry point that wires the runtime, the change processor and the
//! hot-patch catalog fetch together and drives the tick loop.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use hookhost_core::config::HostConfig;
use hookhost_core::error::AppError;
use hookhost_runtime::compiler::{CompilerChain, FactoryCatalog, ManifestCompiler};
use hookhost_runtime::hooks::{
    FilePatchSource, HttpPatchSource, PatchSource, TracingPatchHost,
};
use hookhost_runtime::watcher::ChangeProcessor;
use hookhost_runtime::{HookRuntime, TrackingAllocator};
use hookhost_sdk::prelude::*;

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Host error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/default.toml`, the environment overlay
/// and `HOOKHOST__*` variables
fn load_configuration() -> Result<HostConfig, AppError> {
    let env = std::env::var("HOOKHOST_ENV").unwrap_or_else(|_| "development".to_string());
    HostConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &HostConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Built-in units manifests can name with `entry = "..."`
fn builtin_factories() -> Arc<FactoryCatalog> {
    let factories = Arc::new(FactoryCatalog::new());

    let chat_filter = UnitExportBuilder::new(unit_info!(
        name: "ChatFilter",
        version: "1.0.0",
        description: "Drops chat lines that are empty after trimming",
        core: true,
    ))
    .on("OnPlayerChat", |args| {
        let line = args.get(1).and_then(HookValue::as_str).unwrap_or_default();
        Ok(if line.trim().is_empty() {
            HookValue::Bool(false)
        } else {
            HookValue::Null
        })
    })
    .build_arc();
    factories.register("chat-filter", move || chat_filter.clone());

    factories
}

/// Main host run function
async fn run(config: HostConfig) -> Result<(), AppError> {
    tracing::info!("Starting HookHost v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Runtime ──────────────────────────────────────────
    let compiler = CompilerChain::new().with(Arc::new(ManifestCompiler::new(builtin_factories())));
    #[cfg(feature = "dynamic")]
    let compiler = compiler.with(Arc::new(hookhost_runtime::compiler::DynamicCompiler::new(
        std::env::temp_dir().join("hookhost-shadow"),
    )));

    let mut runtime = HookRuntime::new(
        config.runtime.clone(),
        Arc::new(TracingPatchHost::new()),
        Arc::new(compiler),
    );

    runtime.define_hook(HookDefinition::new("OnServerInitialized"))?;
    runtime.define_hook(HookDefinition::new("OnTick").with_policy(ResultPolicy::Aggregate))?;
    runtime.define_hook(HookDefinition::new("OnPlayerChat"))?;

    // ── Step 2: Hot-patch catalog ────────────────────────────────
    if let Some(source) = config.patches.source.clone().filter(|_| config.patches.fetch_on_start) {
        let source: Arc<dyn PatchSource> = if config.patches.is_remote() {
            Arc::new(HttpPatchSource::new(source))
        } else {
            Arc::new(FilePatchSource::new(PathBuf::from(source)))
        };
        let fetcher = runtime.patch_fetcher(source);
        tokio::spawn(async move {
            if let Err(e) = fetcher.run().await {
                tracing::error!("Patch catalog fetch failed: {}", e);
            }
        });
    }

    // ── Step 3: Unit directory ───────────────────────────────────
    let _watch_guard = if config.watcher.enabled {
        tokio::fs::create_dir_all(&config.watcher.directory)
            .await
            .map_err(|e| {
                AppError::internal(format!(
                    "Failed to create dir '{}': {}",
                    config.watcher.directory.display(),
                    e
                ))
            })?;

        let processor = ChangeProcessor::new(config.watcher.clone(), &runtime);
        processor.scan();
        Some(processor.watch()?)
    } else {
        None
    };

    // Initial scan results land on the first tick.
    runtime.tick();
    runtime.dispatch("OnServerInitialized", &mut HookArgs::new());
    tracing::info!(
        packages = runtime.packages().len(),
        failed = runtime.failed_units().len(),
        "HookHost ready"
    );

    // ── Step 4: Tick loop ────────────────────────────────────────
    let mut interval = tokio::time::interval(config.runtime.tick_rate());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                runtime.tick();
                runtime.dispatch("OnTick", &mut HookArgs::new());
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, unloading units...");
                break;
            }
        }
    }

    // ── Step 5: Teardown ─────────────────────────────────────────
    runtime.tick();
    runtime.shutdown();

    tracing::info!("HookHost shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
