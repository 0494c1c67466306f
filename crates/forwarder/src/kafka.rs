//! kafka 포워더 — murmur2 파티셔너, SASL/TLS, 배치 전송
//!
//! 느린 브로커에 막히지 않도록 미완료 전송을 최대
//! [`MAX_IN_FLIGHT`]개까지만 허용하고, 한도에 닿으면 전부 완료될
//! 때까지 기다립니다.

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use trap2json_core::config::Duration;
use trap2json_core::expr::{val_to_json, Program, Val};
use trap2json_core::message::Message;
use trap2json_core::timefmt::TimeFormatter;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder, Tls};

/// 동시에 허용되는 미완료 전송 수
const MAX_IN_FLIGHT: usize = 10_000;

/// SASL 메커니즘
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KafkaSaslMechanism {
    #[default]
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "scram-sha-512")]
    ScramSha512,
}

impl KafkaSaslMechanism {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

/// SASL 인증 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSasl {
    pub username: String,
    pub password: String,
    pub mechanism: KafkaSaslMechanism,
}

/// kafka 포워더 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// 브로커 목록 (`host:port`)
    pub hosts: Vec<String>,
    pub topic: String,
    /// acks (`0`, `1`, `all`). 비어 있으면 클라이언트 기본값.
    pub required_acks: String,
    /// 파티션 키를 계산하는 payload 표현식
    pub key_field: String,
    pub tls: Option<Tls>,
    pub sasl: Option<KafkaSasl>,
    /// 배치당 최대 메시지 수 (기본 100)
    pub batch_size: u32,
    /// 배치 플러시 대기 (기본 1s)
    pub batch_timeout: Duration,
}

impl KafkaConfig {
    pub(crate) fn normalize(&mut self) {
        if self.batch_size == 0 {
            self.batch_size = 100;
        }
        if self.batch_timeout.is_zero() {
            self.batch_timeout = Duration::from_secs(1);
        }
    }
}

/// kafka 포워더
pub struct KafkaForwarder {
    base: std::sync::Arc<Base>,
}

impl KafkaForwarder {
    /// key_field 표현식을 컴파일하고 run 루프를 띄웁니다.
    pub fn spawn(config: Config, idx: usize) -> Result<Self, ForwardError> {
        let key_program = match config.kafka.as_ref().map(|k| k.key_field.as_str()) {
            Some("") | None => None,
            Some(source) => Some(Program::compile(source)?),
        };
        let base = std::sync::Arc::new(Base::new(config, idx)?);
        let worker = std::sync::Arc::clone(&base);
        tokio::spawn(async move {
            run(&worker, key_program).await;
            worker.finished.cancel();
        });
        Ok(Self { base })
    }
}

/// 설정으로 rdkafka 클라이언트 설정을 만듭니다.
fn client_config(config: &KafkaConfig) -> rdkafka::ClientConfig {
    let mut client = rdkafka::ClientConfig::new();
    client
        .set("bootstrap.servers", config.hosts.join(","))
        .set("partitioner", "murmur2_random")
        .set("batch.num.messages", config.batch_size.to_string())
        .set(
            "linger.ms",
            config.batch_timeout.get().as_millis().to_string(),
        );
    if !config.required_acks.is_empty() {
        client.set("acks", &config.required_acks);
    }
    let use_tls = config.tls.is_some();
    if let Some(tls) = &config.tls {
        if !tls.ca_cert.is_empty() {
            client.set("ssl.ca.location", &tls.ca_cert);
        }
        if !tls.client_cert.is_empty() && !tls.client_key.is_empty() {
            client
                .set("ssl.certificate.location", &tls.client_cert)
                .set("ssl.key.location", &tls.client_key);
        }
        if tls.insecure_skip_verify {
            client.set("enable.ssl.certificate.verification", "false");
        }
    }
    match (&config.sasl, use_tls) {
        (Some(sasl), tls) => {
            client
                .set(
                    "security.protocol",
                    if tls { "sasl_ssl" } else { "sasl_plaintext" },
                )
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        (None, true) => {
            client.set("security.protocol", "ssl");
        }
        (None, false) => {}
    }
    client
}

/// 파티션 키를 계산합니다. 문자열은 그대로, 그 외 값은 JSON 인코딩,
/// 리터럴 "null"은 키 없음입니다.
fn partition_key(program: Option<&Program>, message: &Message) -> Option<Vec<u8>> {
    let program = program?;
    let value = program.eval(&message.payload).ok()?;
    let bytes = match value {
        Val::Str(s) => s.into_bytes(),
        other => serde_json::to_vec(&val_to_json(&other, &TimeFormatter::default())).ok()?,
    };
    if bytes == b"null" {
        return None;
    }
    Some(bytes)
}

async fn run(base: &Base, key_program: Option<Program>) {
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;

    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let config = base.config.kafka.clone().unwrap_or_default();
    let producer: FutureProducer = match client_config(&config).create() {
        Ok(producer) => producer,
        Err(e) => {
            base.abort(&format!("failed creating kafka producer: {e}")).await;
            return;
        }
    };

    let mut in_flight: JoinSet<Result<(), (Message, String)>> = JoinSet::new();
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        // 완료된 전송을 수거
        while let Some(done) = in_flight.try_join_next() {
            settle(base, done).await;
        }
        if in_flight.len() >= MAX_IN_FLIGHT {
            // 포화: 전부 완료될 때까지 대기
            while let Some(done) = in_flight.join_next().await {
                settle(base, done).await;
            }
        }
        let key = partition_key(key_program.as_ref(), &message);
        let topic = config.topic.clone();
        let producer = producer.clone();
        in_flight.spawn(async move {
            let payload = message.meta.message_json.clone();
            let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
                FutureRecord::to(&topic).payload(&payload);
            if let Some(key) = &key {
                record = record.key(key);
            }
            match producer.send(record, Timeout::Never).await {
                Ok(_) => Ok(()),
                Err((e, _)) => Err((message, e.to_string())),
            }
        });
    }
    // drain: 남은 전송을 끝까지 수거
    while let Some(done) = in_flight.join_next().await {
        settle(base, done).await;
    }
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

async fn settle(
    base: &Base,
    result: Result<Result<(), (Message, String)>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => base.succeeded(),
        Ok(Err((message, reason))) => base.retry(message, &reason).await,
        Err(e) => tracing::warn!(error = %e, "kafka delivery task panicked"),
    }
}

#[async_trait::async_trait]
impl Forwarder for KafkaForwarder {
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
