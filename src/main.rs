use anyhow::Context;
use momentum_feed::models::settings::FeedSettings;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = FeedSettings::load().context("加载配置失败")?;
    momentum_feed::run(settings).await
}
