#![forbid(unsafe_code)]

use clap::Parser;
use mnet_cli::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    if let Err(err) = config.validate() {
        tracing::error!("invalid config: {err:#}");
        return Err(err);
    }

    let report = mnet_cli::run(&config).await?;
    println!("{}", report.render(config.output)?);
    Ok(())
}
