//! HTTP 포워더 — 컴파일된 JSON을 본문으로 요청

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use trap2json_core::config::Duration;
use trap2json_core::message::Message;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder, Tls};

/// HTTP 메서드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpMethod {
    #[default]
    Post,
    Get,
    Put,
}

/// 기본 인증
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBasicAuth {
    pub username: String,
    pub password: String,
}

/// HTTP 포워더 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub url: String,
    pub method: HttpMethod,
    /// 요청 헤더 (키 하나에 값 여러 개 허용)
    pub headers: HashMap<String, Vec<String>>,
    pub basic_auth: Option<HttpBasicAuth>,
    pub tls: Option<Tls>,
    /// 프록시 URL
    pub proxy: String,
    /// 요청 타임아웃 (기본 5s)
    pub timeout: Duration,
}

impl HttpConfig {
    pub(crate) fn normalize(&mut self) {
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(5);
        }
    }
}

/// HTTP 포워더
pub struct HttpForwarder {
    base: std::sync::Arc<Base>,
}

impl HttpForwarder {
    /// 포워더를 만들고 run 루프를 띄웁니다.
    pub fn spawn(config: Config, idx: usize) -> Result<Self, ForwardError> {
        let base = std::sync::Arc::new(Base::new(config, idx)?);
        let worker = std::sync::Arc::clone(&base);
        tokio::spawn(async move {
            run(&worker).await;
            worker.finished.cancel();
        });
        Ok(Self { base })
    }
}

/// 설정으로 reqwest 클라이언트를 만듭니다. TLS/프록시 설정 오류는 이
/// 포워더에 치명적입니다.
fn build_client(config: &HttpConfig) -> Result<reqwest::Client, String> {
    let mut builder = reqwest::Client::builder();
    if let Some(tls) = &config.tls {
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if !tls.ca_cert.is_empty() {
            let pem = std::fs::read(&tls.ca_cert)
                .map_err(|e| format!("failed reading ca certificate: {e}"))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| format!("invalid ca certificate: {e}"))?;
            builder = builder.add_root_certificate(cert);
        }
        if !tls.client_cert.is_empty() && !tls.client_key.is_empty() {
            let mut pem = std::fs::read(&tls.client_cert)
                .map_err(|e| format!("failed reading client certificate: {e}"))?;
            let key = std::fs::read(&tls.client_key)
                .map_err(|e| format!("failed reading client key: {e}"))?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| format!("invalid client certificate: {e}"))?;
            builder = builder.identity(identity);
        }
    }
    if !config.proxy.is_empty() {
        let proxy = reqwest::Proxy::all(&config.proxy)
            .map_err(|e| format!("proxy url is not in the correct format: {e}"))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| format!("failed building http client: {e}"))
}

async fn run(base: &Base) {
    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let config = base.config.http.clone().unwrap_or_default();
    let client = match build_client(&config) {
        Ok(client) => client,
        Err(reason) => {
            base.abort(&reason).await;
            return;
        }
    };
    let method = match config.method {
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Put => reqwest::Method::PUT,
    };
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        let mut request = client
            .request(method.clone(), &config.url)
            .timeout(config.timeout.get())
            .body(message.meta.message_json.clone());
        for (name, values) in &config.headers {
            for value in values {
                request = request.header(name, value);
            }
        }
        if let Some(auth) = &config.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => base.succeeded(),
            Err(e) => base.retry(message, &e.to_string()).await,
        }
    }
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for HttpForwarder {
    async fn send(&self, message: Message) {
        self.base.enqueue(message).await;
    }

    async fn close(&self) {
        self.base.close().await;
    }

    fn done(&self) -> tokio_util::sync::CancellationToken {
        self.base.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trap2json_core::config::AutoRetry;
    use trap2json_core::message::Payload;

    #[test]
    fn method_parses_lowercase() {
        let m: HttpMethod = serde_yaml::from_str("put").unwrap();
        assert_eq!(m, HttpMethod::Put);
        let m: HttpMethod = serde_yaml::from_str("get").unwrap();
        assert_eq!(m, HttpMethod::Get);
    }

    #[test]
    fn normalize_sets_default_timeout() {
        let mut config = HttpConfig::default();
        config.normalize();
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn build_client_rejects_bad_proxy() {
        let config = HttpConfig {
            proxy: "::not a proxy::".to_owned(),
            ..Default::default()
        };
        assert!(build_client(&config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_sink_retries_then_drops() {
        // 스킴이 없어 요청 자체가 실패하는 주소
        let mut config = Config {
            id: "http-test".to_owned(),
            http: Some(HttpConfig {
                url: "http://127.0.0.1:1".to_owned(),
                ..Default::default()
            }),
            auto_retry: AutoRetry {
                enable: true,
                max_retries: 2,
                min_delay: trap2json_core::config::Duration::from_secs(1),
                max_delay: trap2json_core::config::Duration::from_secs(2),
            },
            ..Default::default()
        };
        config.normalize();
        let fwd = HttpForwarder::spawn(config, 0).unwrap();
        fwd.send(Message::new(Payload::default())).await;

        // 재시도 2회 후 드롭되고 drain이 끝나야 함
        fwd.close().await;
        tokio::time::timeout(std::time::Duration::from_secs(60), fwd.done().cancelled())
            .await
            .expect("forwarder should finish draining");
    }
}
