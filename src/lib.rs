pub mod commands;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use anyhow::Context;
use models::settings::FeedSettings;
use services::assembler::ResultAssembler;
use services::transport::ReqwestTransport;
use utils::clock::SystemClock;
use utils::http::build_upstream_client;

pub struct AppState {
    pub assembler: ResultAssembler,
}

impl AppState {
    /// 用真实 HTTP client 和系统时钟组装
    pub fn from_settings(settings: FeedSettings) -> anyhow::Result<Self> {
        let client = build_upstream_client(settings.request_timeout()).context("创建 HTTP client 失败")?;
        let transport = Arc::new(ReqwestTransport::new(client));
        let assembler = ResultAssembler::new(transport, Arc::new(SystemClock), settings);
        Ok(Self { assembler })
    }
}

/// 启动 HTTP 服务，直到进程退出
pub async fn run(settings: FeedSettings) -> anyhow::Result<()> {
    if !settings.has_credentials() {
        log::warn!("未配置 FINVIZ_COOKIE 或 FINVIZ_EMAIL/FINVIZ_PASSWORD，行情请求将返回配置错误");
    }
    let bind = settings.bind.clone();
    let state = Arc::new(AppState::from_settings(settings)?);
    let app = commands::market_cmd::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("监听 {} 失败", bind))?;
    log::info!("服务已启动: http://{}", bind);
    axum::serve(listener, app).await.context("HTTP 服务异常退出")?;
    Ok(())
}
