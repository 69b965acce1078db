use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};

use crate::error::{FeedError, Result};

/// 上游原始响应。状态码不在传输层判断，由调用方按场景分类。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: String,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// 期望 CSV 时拿到 HTML，通常是登录页或拦截页
    pub fn looks_like_html(&self) -> bool {
        if self.content_type.to_ascii_lowercase().contains("text/html") {
            return true;
        }
        let head: String = self.body.trim_start().chars().take(64).collect::<String>().to_ascii_lowercase();
        head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

/// 对上游站点的最小 HTTP 抽象，生产用 reqwest，测试用脚本化实现
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<UpstreamResponse>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<UpstreamResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn into_upstream(resp: reqwest::Response) -> Result<UpstreamResponse> {
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let set_cookies = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .collect();
        let body = resp.text().await?;
        Ok(UpstreamResponse { status, content_type, set_cookies, body })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, cookie: Option<&str>) -> Result<UpstreamResponse> {
        let mut req = self.client.get(url);
        if let Some(c) = cookie {
            req = req.header(COOKIE, c);
        }
        let resp = req.send().await?;
        Self::into_upstream(resp).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let mut req = self.client.post(url).form(form);
        if let Some(c) = cookie {
            req = req.header(COOKIE, c);
        }
        let resp = req.send().await?;
        Self::into_upstream(resp).await
    }
}

/// 简易 cookie 罐：按名字覆盖，输出为 `Cookie` 请求头
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// 合并一组 `Set-Cookie` 头，返回新写入的 cookie 数量
    pub fn merge_set_cookies(&mut self, headers: &[String]) -> usize {
        let mut added = 0;
        for raw in headers {
            let pair = raw.split(';').next().unwrap_or("").trim();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() {
                continue;
            }
            // 上游用空值 / deleted 表示清除
            if value.is_empty() || value.eq_ignore_ascii_case("deleted") {
                self.cookies.remove(name);
                continue;
            }
            self.cookies.insert(name.to_string(), value.to_string());
            added += 1;
        }
        added
    }

    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 状态码分类：429 限流、5xx 按网络抖动处理
pub fn classify_status(resp: &UpstreamResponse) -> Result<()> {
    match resp.status {
        429 => Err(FeedError::RateLimited),
        s if s >= 500 => Err(FeedError::TransientNetwork(format!("上游返回 HTTP {}", s))),
        s if s >= 400 => Err(FeedError::SchemaDrift(format!("上游返回 HTTP {}", s))),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// 按 URL 片段匹配的脚本化传输层。同一片段可排队多个响应，用完后重复最后一个。
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<(String, VecDeque<Result<UpstreamResponse>>)>>,
        pub calls: Mutex<Vec<String>>,
        pub delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub fn route(self, fragment: &str, responses: Vec<Result<UpstreamResponse>>) -> Self {
            if let Ok(mut routes) = self.routes.lock() {
                routes.push((fragment.to_string(), responses.into()));
            }
            self
        }

        pub fn calls_matching(&self, fragment: &str) -> usize {
            self.calls.lock().map(|c| c.iter().filter(|u| u.contains(fragment)).count()).unwrap_or(0)
        }

        async fn respond(&self, url: &str) -> Result<UpstreamResponse> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(url.to_string());
            }
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            let mut routes = self.routes.lock().unwrap();
            for (fragment, queue) in routes.iter_mut() {
                if url.contains(fragment.as_str()) {
                    if queue.len() > 1 {
                        return queue.pop_front().unwrap();
                    }
                    return queue.front().cloned().unwrap();
                }
            }
            Ok(UpstreamResponse { status: 404, ..Default::default() })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, _cookie: Option<&str>) -> Result<UpstreamResponse> {
            self.respond(url).await
        }

        async fn post_form(
            &self,
            url: &str,
            _form: &[(&str, &str)],
            _cookie: Option<&str>,
        ) -> Result<UpstreamResponse> {
            self.respond(url).await
        }
    }

    pub fn csv(body: &str) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: 200,
            content_type: "text/csv".to_string(),
            set_cookies: vec![],
            body: body.to_string(),
        })
    }

    pub fn html(body: &str) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: 200,
            content_type: "text/html; charset=utf-8".to_string(),
            set_cookies: vec![],
            body: body.to_string(),
        })
    }

    pub fn status(code: u16) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse { status: code, ..Default::default() })
    }

    pub fn with_cookies(code: u16, cookies: &[&str]) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: code,
            set_cookies: cookies.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
    }
}
