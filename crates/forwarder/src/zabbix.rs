//! Zabbix trapper 포워더
//!
//! 메시지마다 대상 호스트를 조회하고(세 가지 전략), trapper
//! 프로토콜로 컴파일된 JSON을 보냅니다. 조회 실패는
//! `default_address:default_port` / `default_hostname` 폴백으로
//! 이어지며, 주소가 `":0"`이면 메시지를 버립니다.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use trap2json_core::message::Message;

use crate::base::Base;
use crate::error::ForwardError;
use crate::zabbix_lookup::{LookupStrategy, ZabbixLookup, ZsAdvancedConfig};
use crate::zabbix_sender::{self, ZabbixItem, ZabbixRequest};
use crate::{Config, Forwarder};

/// Zabbix trapper 포워더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZabbixTrapperConfig {
    /// 조회 실패 시 보낼 서버 주소
    pub default_address: String,
    /// 조회 실패 시 보낼 서버 포트
    pub default_port: u16,
    /// 조회 실패 시 쓸 호스트명
    pub default_hostname: String,
    /// trapper 아이템 키
    pub item_key: String,
    /// 호스트명 결정 전략
    pub hostname_lookup_strategy: LookupStrategy,
    /// `oid` 전략이 읽을 OID prefix
    pub oid_lookup: String,
    /// 프록시/DB 구성 (선택)
    pub advanced: Option<ZsAdvancedConfig>,
}

impl Default for ZabbixTrapperConfig {
    fn default() -> Self {
        Self {
            default_address: String::new(),
            default_port: 10051,
            default_hostname: String::new(),
            item_key: "snmptrap.json".to_owned(),
            hostname_lookup_strategy: LookupStrategy::default(),
            oid_lookup: String::new(),
            advanced: None,
        }
    }
}

impl ZabbixTrapperConfig {
    pub(crate) fn normalize(&mut self) {
        if let Some(advanced) = &mut self.advanced {
            advanced.normalize();
        }
    }
}

/// Zabbix trapper 포워더
pub struct ZabbixForwarder {
    base: std::sync::Arc<Base>,
}

impl ZabbixForwarder {
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

async fn run(base: &Base) {
    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let config = base.config.zabbix_trapper.clone().unwrap_or_default();
    let refresh_cancel = CancellationToken::new();
    let lookup = ZabbixLookup::new(
        config.advanced.clone(),
        config.oid_lookup.clone(),
        config.item_key.clone(),
        refresh_cancel.clone(),
    );

    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        let mut address = format!("{}:{}", config.default_address, config.default_port);
        let mut hostname = config.default_hostname.clone();
        match lookup.lookup(&message, config.hostname_lookup_strategy) {
            Some(result) => {
                if let Some(server) = &result.server {
                    address = format!("{}:{}", server.address, server.port);
                }
                hostname = result.hostname;
            }
            None => {
                base.lookup_failed();
                tracing::debug!(
                    src = %message.payload.src_address,
                    "zabbix failed lookup, using defaults"
                );
            }
        }
        if address == ":0" {
            base.dropped();
            continue;
        }
        let value = String::from_utf8_lossy(&message.meta.message_json).into_owned();
        // 같은 초에 도착한 trap이 중복으로 버려지지 않도록 clock/ns를
        // payload 시각으로 채움
        let request = ZabbixRequest::single(ZabbixItem {
            host: hostname.clone(),
            key: config.item_key.clone(),
            value,
            clock: message.payload.time.timestamp(),
            ns: i64::from(message.payload.time.timestamp_subsec_nanos()),
        });
        tracing::trace!(%address, %hostname, "sending to zabbix");
        match zabbix_sender::send(&address, &request).await {
            Ok(response) if response.is_success() => base.succeeded(),
            Ok(response) => {
                base.retry(message, &format!("zabbix rejected: {}", response.info)).await;
            }
            Err(e) => base.retry(message, &e.to_string()).await,
        }
    }
    refresh_cancel.cancel();
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for ZabbixForwarder {
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
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use trap2json_core::message::Payload;

    use crate::zabbix_sender::{decode_header, encode_frame};

    #[test]
    fn default_item_key() {
        let config = ZabbixTrapperConfig::default();
        assert_eq!(config.item_key, "snmptrap.json");
        assert_eq!(config.default_port, 10051);
    }

    #[tokio::test]
    async fn drops_when_default_address_is_empty_port_zero() {
        let mut config = Config {
            id: "zbx".to_owned(),
            zabbix_trapper: Some(ZabbixTrapperConfig {
                default_port: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        config.normalize();
        let fwd = ZabbixForwarder::spawn(config, 0).unwrap();
        // 조회 실패 + ":0" 폴백 → 드롭, 재시도 없이 drain이 끝나야 함
        fwd.send(Message::new(Payload::default())).await;
        fwd.close().await;
        tokio::time::timeout(std::time::Duration::from_secs(10), fwd.done().cancelled())
            .await
            .expect("forwarder should terminate");
    }

    #[tokio::test]
    async fn sends_item_with_payload_clock() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 13];
            socket.read_exact(&mut header).await.unwrap();
            let len = decode_header(&header).unwrap();
            let mut body = vec![0u8; len as usize];
            socket.read_exact(&mut body).await.unwrap();
            let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
            socket
                .write_all(&encode_frame(
                    br#"{"response":"success","info":"processed: 1"}"#,
                ))
                .await
                .unwrap();
            request
        });

        let mut config = Config {
            id: "zbx".to_owned(),
            zabbix_trapper: Some(ZabbixTrapperConfig {
                default_address: addr.ip().to_string(),
                default_port: addr.port(),
                default_hostname: "fallback-host".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        };
        config.normalize();
        let fwd = ZabbixForwarder::spawn(config, 0).unwrap();

        let payload = Payload {
            agent_address: Some("10.1.2.3".to_owned()),
            ..Default::default()
        };
        let expected_clock = payload.time.timestamp();
        fwd.send(Message::new(payload)).await;

        let request = server.await.unwrap();
        assert_eq!(request["request"], "sender data");
        // 조회가 agent 주소를 그대로 통과시킴
        assert_eq!(request["data"][0]["host"], "10.1.2.3");
        assert_eq!(request["data"][0]["key"], "snmptrap.json");
        assert_eq!(request["data"][0]["clock"], expected_clock);

        fwd.close().await;
        fwd.done().cancelled().await;
    }
}
