use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use thaum::application::application::Application;
use thaum::application::config::configuration::Configuration;
use thaum::compression::tracer::LogTraceSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::parse().with_environment();
    Application::install_logging(&configuration);
    info!(project = %configuration.project_path.display(), "thaum starting");

    let clear_cache = configuration.clear_cache;
    let cancellation = CancellationToken::new();
    let child_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child_token.cancel();
        }
    });

    let application =
        Application::initialize(configuration, Arc::new(LogTraceSink)).await?;
    if clear_cache {
        application.cache.clear().await?;
        info!("cache cleared");
    }

    let config = application.config.clone();
    let result = application
        .compressor
        .process_codebase(
            &config.project_path,
            config.language.as_deref(),
            config.compression_level,
            cancellation,
        )
        .await;

    match result {
        Ok(hierarchy) => {
            println!("{}", serde_json::to_string_pretty(&hierarchy)?);
            info!(
                cache_bytes = application.cache.size().await,
                roots = hierarchy.root_symbols().len(),
                "done"
            );
            Ok(())
        }
        Err(err) => {
            error!(?err, "compression pipeline failed");
            std::process::exit(1);
        }
    }
}
