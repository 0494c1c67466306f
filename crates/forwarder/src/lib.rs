#![doc = include_str!("../README.md")]

pub mod base;
pub mod error;
pub mod file;
pub mod http;
pub mod kafka;
pub mod mock;
pub mod mqtt;
pub mod trap;
pub mod zabbix;
pub mod zabbix_lookup;
pub mod zabbix_sender;

pub use error::ForwardError;
pub use file::FileConfig;
pub use http::HttpConfig;
pub use kafka::KafkaConfig;
pub use mock::MockConfig;
pub use mqtt::MqttConfig;
pub use trap::TrapConfig;
pub use zabbix::ZabbixTrapperConfig;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use trap2json_core::config::{AutoRetry, Duration};
use trap2json_core::message::Message;

/// TLS 설정 (kafka / http 공용)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tls {
    /// 서버 인증서 검증 생략
    pub insecure_skip_verify: bool,
    /// CA 인증서 경로 (PEM)
    pub ca_cert: String,
    /// 클라이언트 인증서 경로 (PEM)
    pub client_cert: String,
    /// 클라이언트 키 경로 (PEM)
    pub client_key: String,
}

/// 포워더 하나의 설정
///
/// 종류는 어느 sub-block이 있는지로 결정됩니다. 둘 이상 있으면
/// 고정 우선순위(file, kafka, http, mqtt, trap, zabbix_trapper, mock)
/// 의 첫 번째가 이기고, 하나도 없으면 경고와 함께 건너뜁니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 포워더 이름 (메트릭 레이블로도 사용)
    pub id: String,
    /// 큐 용량. 0이면 기본 10000, 음수면 무제한.
    pub queue_size: i64,
    /// time 필드 직렬화 레이아웃
    pub time_format: String,
    /// 레이아웃 기반 형식에 적용할 타임존
    pub time_as_timezone: String,
    /// 종료 시 drain 한도 (기본 5s)
    pub shutdown_wait_time: Duration,
    /// 불리언 filter 표현식
    pub filter: String,
    /// 기본 직렬화를 대체하는 맵 표현식
    pub json_format: String,
    /// 재시도 정책
    pub auto_retry: AutoRetry,

    pub file: Option<FileConfig>,
    pub kafka: Option<KafkaConfig>,
    pub http: Option<HttpConfig>,
    pub mqtt: Option<MqttConfig>,
    pub trap: Option<TrapConfig>,
    pub zabbix_trapper: Option<ZabbixTrapperConfig>,
    pub mock: Option<MockConfig>,
}

impl Config {
    /// sub-block 우선순위에 따라 포워더 종류를 결정합니다.
    pub fn kind(&self) -> Option<&'static str> {
        if self.file.is_some() {
            Some("file")
        } else if self.kafka.is_some() {
            Some("kafka")
        } else if self.http.is_some() {
            Some("http")
        } else if self.mqtt.is_some() {
            Some("mqtt")
        } else if self.trap.is_some() {
            Some("trap")
        } else if self.zabbix_trapper.is_some() {
            Some("zabbix_trapper")
        } else if self.mock.is_some() {
            Some("mock")
        } else {
            None
        }
    }

    /// 설정되지 않은 필드에 기본값을 채웁니다.
    pub fn normalize(&mut self) {
        if self.queue_size == 0 {
            self.queue_size = 10_000;
        }
        self.auto_retry.normalize();
        if self.shutdown_wait_time.is_zero() {
            self.shutdown_wait_time = Duration::from_secs(5);
        }
        if let Some(kafka) = &mut self.kafka {
            kafka.normalize();
        }
        if let Some(http) = &mut self.http {
            http.normalize();
        }
        if let Some(trap) = &mut self.trap {
            trap.normalize();
        }
        if let Some(zabbix) = &mut self.zabbix_trapper {
            zabbix.normalize();
        }
    }

    /// 큐 용량을 반환합니다 (음수 = 무제한 = 0).
    pub fn queue_capacity(&self) -> usize {
        usize::try_from(self.queue_size).unwrap_or(0)
    }
}

/// 포워더 공통 인터페이스
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// 메시지 사본을 이 포워더의 큐에 넣습니다. 큐가 가득 차면 이
    /// 포워더에서만 드롭됩니다.
    async fn send(&self, message: Message);

    /// 새 메시지 수락을 멈추고 drain을 시작합니다.
    async fn close(&self);

    /// run 루프 종료 시 해제되는 토큰입니다.
    fn done(&self) -> CancellationToken;
}

/// 설정 목록으로 포워더들을 만들고 팬아웃 루프를 돌립니다.
pub struct ForwarderSet {
    forwarders: Vec<Box<dyn Forwarder>>,
}

impl ForwarderSet {
    /// 포워더를 모두 생성합니다. 표현식 컴파일 실패 등 구성 오류는
    /// 기동 시 fatal로 전파됩니다.
    pub fn build(configs: Vec<Config>) -> Result<Self, ForwardError> {
        if configs.is_empty() {
            warn!("no forwarders configured");
        }
        let mut forwarders: Vec<Box<dyn Forwarder>> = Vec::new();
        for (idx, mut config) in configs.into_iter().enumerate() {
            config.normalize();
            match config.kind() {
                Some("file") => forwarders.push(Box::new(file::FileForwarder::spawn(config, idx)?)),
                Some("kafka") => {
                    forwarders.push(Box::new(kafka::KafkaForwarder::spawn(config, idx)?));
                }
                Some("http") => forwarders.push(Box::new(http::HttpForwarder::spawn(config, idx)?)),
                Some("mqtt") => forwarders.push(Box::new(mqtt::MqttForwarder::spawn(config, idx)?)),
                Some("trap") => forwarders.push(Box::new(trap::TrapForwarder::spawn(config, idx)?)),
                Some("zabbix_trapper") => {
                    forwarders.push(Box::new(zabbix::ZabbixForwarder::spawn(config, idx)?));
                }
                Some("mock") => forwarders.push(Box::new(mock::MockForwarder::spawn(config, idx)?)),
                _ => {
                    warn!(index = idx + 1, id = config.id, "please define your forwarder destination");
                }
            }
        }
        Ok(Self { forwarders })
    }

    /// 생성된 포워더 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.forwarders.len()
    }

    /// 포워더가 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.forwarders.is_empty()
    }

    /// 팬아웃 루프: 채널이 닫힐 때까지 각 메시지의 사본을 모든
    /// 포워더에 보냅니다. 채널이 닫히면 전부 close하고 drain을
    /// 기다립니다.
    pub async fn run(self, mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.recv().await {
            for forwarder in &self.forwarders {
                forwarder.send(message.fanout_copy()).await;
            }
        }
        for forwarder in &self.forwarders {
            forwarder.close().await;
        }
        for forwarder in &self.forwarders {
            forwarder.done().cancelled().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_priority_order() {
        let mut config = Config {
            file: Some(FileConfig::default()),
            kafka: Some(KafkaConfig::default()),
            mock: Some(MockConfig::default()),
            ..Default::default()
        };
        assert_eq!(config.kind(), Some("file"));
        config.file = None;
        assert_eq!(config.kind(), Some("kafka"));
        config.kafka = None;
        assert_eq!(config.kind(), Some("mock"));
        config.mock = None;
        assert_eq!(config.kind(), None);
    }

    #[test]
    fn normalize_applies_defaults() {
        let mut config = Config {
            file: Some(FileConfig::default()),
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.queue_size, 10_000);
        assert_eq!(config.auto_retry.max_retries, 10);
        assert_eq!(config.shutdown_wait_time, Duration::from_secs(5));
    }

    #[test]
    fn negative_queue_size_means_unbounded() {
        let mut config = Config {
            queue_size: -1,
            file: Some(FileConfig::default()),
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.queue_capacity(), 0);
    }

    #[test]
    fn config_parses_from_yaml() {
        let yaml = r#"
id: out-file
queue_size: 100
time_format: unixMilli
filter: 'snmp_version == "v2c"'
auto_retry:
  enable: true
  max_retries: 4
  min_delay: 1s
  max_delay: 8s
file:
  path: /tmp/out.json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.kind(), Some("file"));
        assert_eq!(config.queue_size, 100);
        assert!(config.auto_retry.enable);
        assert_eq!(config.file.unwrap().path, "/tmp/out.json");
    }
}
