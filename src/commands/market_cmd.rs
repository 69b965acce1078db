use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};

use crate::models::response::FacetRequest;
use crate::models::settings::FeedSettings;
use crate::AppState;

/// `GET /api/market` 查询参数
#[derive(Debug, Default, Deserialize)]
pub struct MarketQuery {
    /// 自选股，逗号分隔
    pub tickers: Option<String>,
    /// `1` / `themes` 表示配置里全部主题的成分股，否则为逗号分隔的代码
    pub universe: Option<String>,
    /// 个股详情（新闻、财报等）
    pub news: Option<String>,
    pub homepage: Option<String>,
    /// `scan` 时执行情绪拐点扫描
    pub ep: Option<String>,
}

impl MarketQuery {
    pub fn into_request(self, settings: &FeedSettings) -> FacetRequest {
        let universe = match self.universe.as_deref().map(str::trim) {
            Some(v) if is_flag(v) || v.eq_ignore_ascii_case("themes") => settings
                .themes
                .iter()
                .flat_map(|t| t.tickers.iter().cloned())
                .collect(),
            Some(v) => split_list(v),
            None => Vec::new(),
        };

        FacetRequest {
            watchlist: self.tickers.as_deref().map(split_list).unwrap_or_default(),
            universe,
            detail: self
                .news
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty()),
            homepage: self.homepage.as_deref().map(is_flag).unwrap_or(false),
            episodic_scan: self.ep.as_deref().map(|v| v.trim().eq_ignore_ascii_case("scan")).unwrap_or(false),
        }
    }
}

fn is_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub session_configured: bool,
}

pub async fn get_market(State(state): State<Arc<AppState>>, Query(query): Query<MarketQuery>) -> Response {
    let request = query.into_request(state.assembler.settings());
    match state.assembler.assemble(&request).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            log::error!("行情请求失败: {}", e);
            let body = ErrorResponse { ok: false, error: e.to_string() };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_configured: state.assembler.session().ensure_configured().is_ok(),
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/market", get(get_market))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::assembler::ResultAssembler;
    use crate::services::transport::testing::ScriptedTransport;
    use crate::utils::clock::SystemClock;

    fn query(pairs: &[(&str, &str)]) -> MarketQuery {
        let mut q = MarketQuery::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "tickers" => q.tickers = v,
                "universe" => q.universe = v,
                "news" => q.news = v,
                "homepage" => q.homepage = v,
                "ep" => q.ep = v,
                _ => {}
            }
        }
        q
    }

    #[test]
    fn test_query_to_request() {
        let settings = FeedSettings::default();
        let req = query(&[("tickers", "aapl, nvda,,"), ("news", " tsla "), ("homepage", "1"), ("ep", "scan")])
            .into_request(&settings);
        assert_eq!(req.watchlist, vec!["AAPL", "NVDA"]);
        assert_eq!(req.detail.as_deref(), Some("TSLA"));
        assert!(req.homepage);
        assert!(req.episodic_scan);
        assert!(req.universe.is_empty());
    }

    #[test]
    fn test_universe_flag_expands_themes() {
        let settings = FeedSettings::default();
        let total: usize = settings.themes.iter().map(|t| t.tickers.len()).sum();
        assert_eq!(query(&[("universe", "1")]).into_request(&settings).universe.len(), total);
        assert_eq!(query(&[("universe", "ionq,rgti")]).into_request(&settings).universe, vec!["IONQ", "RGTI"]);
        assert!(query(&[("ep", "no")]).into_request(&settings).is_empty());
    }

    #[tokio::test]
    async fn test_configuration_error_maps_to_500() {
        let assembler = ResultAssembler::new(
            Arc::new(ScriptedTransport::default()),
            Arc::new(SystemClock),
            FeedSettings::default(),
        );
        let state = Arc::new(AppState { assembler });
        let resp = get_market(State(state.clone()), Query(query(&[("homepage", "1")]))).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ok = get_market(State(state.clone()), Query(MarketQuery::default())).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let Json(h) = health(State(state)).await;
        assert!(!h.session_configured);
    }
}
