//! MQTT 포워더 — 설정된 QoS로 토픽에 발행

use serde::{Deserialize, Serialize};

use trap2json_core::message::Message;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder};

/// MQTT TLS 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttTls {
    /// 서버 인증서 검증 생략
    pub insecure_skip_verify: bool,
}

/// MQTT 포워더 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// 브로커 목록 (`host:port`). 첫 항목에 연결합니다.
    pub hosts: Vec<String>,
    pub client_id: String,
    pub username: String,
    pub password: String,
    /// 순서 보장 발행. 기본 켜짐 (inflight 1).
    pub ordered: Option<bool>,
    pub tls: Option<MqttTls>,
    pub topic: String,
    /// QoS 0..=2
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            ordered: None,
            tls: None,
            topic: String::new(),
            qos: 0,
        }
    }
}

/// MQTT 포워더
pub struct MqttForwarder {
    base: std::sync::Arc<Base>,
}

impl MqttForwarder {
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

fn mqtt_options(config: &MqttConfig) -> Result<rumqttc::MqttOptions, String> {
    let first = config
        .hosts
        .first()
        .ok_or_else(|| "no mqtt hosts configured".to_owned())?;
    let (host, port) = match first.rsplit_once(':') {
        Some((host, port)) => (
            host.to_owned(),
            port.parse::<u16>()
                .map_err(|e| format!("invalid mqtt port: {e}"))?,
        ),
        None => (first.clone(), 1883),
    };
    let mut options = rumqttc::MqttOptions::new(config.client_id.clone(), host, port);
    if !config.username.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }
    if config.ordered.unwrap_or(true) {
        // inflight 1이면 브로커 재전송 경로에서도 발행 순서가 유지됨
        options.set_inflight(1);
    }
    if let Some(tls) = &config.tls {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(tls.insecure_skip_verify)
            .build()
            .map_err(|e| format!("failed building tls connector: {e}"))?;
        options.set_transport(rumqttc::Transport::Tls(
            rumqttc::TlsConfiguration::NativeConnector(connector),
        ));
    }
    Ok(options)
}

fn qos_level(qos: u8) -> rumqttc::QoS {
    match qos {
        2 => rumqttc::QoS::ExactlyOnce,
        1 => rumqttc::QoS::AtLeastOnce,
        _ => rumqttc::QoS::AtMostOnce,
    }
}

async fn run(base: &Base) {
    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let config = base.config.mqtt.clone().unwrap_or_default();
    let options = match mqtt_options(&config) {
        Ok(options) => options,
        Err(reason) => {
            base.abort(&reason).await;
            return;
        }
    };
    let (client, mut event_loop) = rumqttc::AsyncClient::new(options, 10);
    // 이벤트 루프는 연결 유지와 ack 처리를 담당. 에러는 재연결로
    // 이어지므로 로그만 남김.
    let poll_task = tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "mqtt connection error");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
    let qos = qos_level(config.qos);
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        match client
            .publish(
                config.topic.clone(),
                qos,
                false,
                message.meta.message_json.clone(),
            )
            .await
        {
            Ok(()) => base.succeeded(),
            Err(e) => base.retry(message, &e.to_string()).await,
        }
    }
    let _ = client.disconnect().await;
    poll_task.abort();
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for MqttForwarder {
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

    #[test]
    fn options_parse_host_and_port() {
        let config = MqttConfig {
            hosts: vec!["broker.local:1884".to_owned()],
            client_id: "t2j".to_owned(),
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_owned(), 1884));
    }

    #[test]
    fn options_default_port() {
        let config = MqttConfig {
            hosts: vec!["broker.local".to_owned()],
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.broker_address().1, 1883);
    }

    #[test]
    fn options_require_a_host() {
        assert!(mqtt_options(&MqttConfig::default()).is_err());
    }

    #[test]
    fn ordered_defaults_to_inflight_one() {
        let config = MqttConfig {
            hosts: vec!["b:1883".to_owned()],
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_eq!(options.inflight(), 1);

        let config = MqttConfig {
            hosts: vec!["b:1883".to_owned()],
            ordered: Some(false),
            ..Default::default()
        };
        let options = mqtt_options(&config).unwrap();
        assert_ne!(options.inflight(), 1);
    }

    #[test]
    fn qos_mapping() {
        assert_eq!(qos_level(0), rumqttc::QoS::AtMostOnce);
        assert_eq!(qos_level(1), rumqttc::QoS::AtLeastOnce);
        assert_eq!(qos_level(2), rumqttc::QoS::ExactlyOnce);
        assert_eq!(qos_level(9), rumqttc::QoS::AtMostOnce);
    }
}
