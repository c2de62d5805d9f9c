use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use ringdht::{Config, Node};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::try_parse() {
        Ok(config) => config,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    };
    let settings = config.settings()?;

    // everything runs on this one thread
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        let mut node = Node::bind(settings).await?;
        info!("Node {} ready", node.ring().me);
        if let Err(e) = node.run().await {
            error!("{e:#}");
            return Err(e);
        }
        Ok(())
    })
}
