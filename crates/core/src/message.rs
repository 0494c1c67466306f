//! 메시지 엔벨로프 — trap 이벤트 하나의 공유 payload와 사본별 metadata
//!
//! 파서가 [`Payload`]를 만들고 나면 payload는 불변입니다. 포워더
//! 팬아웃 시점에 [`Message::fanout_copy`]로 얕은 사본을 만들며,
//! payload는 `Arc`로 공유되고 [`Metadata`]만 포워더별로 소유됩니다.
//! 컴파일(filter 평가 + JSON 직렬화)은 첫 디큐에서 한 번만 수행되고
//! 결과가 metadata에 캐시되므로 재시도는 표현식을 다시 돌리지 않습니다.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::expr::{val_to_json, Program};
use crate::queue::Eta;
use crate::timefmt::TimeFormatter;
use crate::value::Value;

/// 상관된 raise/clear 쌍의 정보
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelateInfo {
    /// raise 시점에 부여된 상관 ID (UUID)
    pub id: String,
    /// raise 이벤트 시각
    pub raised_time: DateTime<Utc>,
    /// raise부터 clear까지 걸린 시간
    pub duration: std::time::Duration,
    /// 초 단위 duration
    pub duration_seconds: f64,
}

impl CorrelateInfo {
    fn to_json(&self, tf: &TimeFormatter) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_owned(), serde_json::Value::from(self.id.clone()));
        map.insert("raised_time".to_owned(), tf.to_json(self.raised_time));
        map.insert(
            "duration".to_owned(),
            serde_json::Value::from(humantime::format_duration(self.duration).to_string()),
        );
        map.insert(
            "duration_seconds".to_owned(),
            serde_json::Value::from(self.duration_seconds),
        );
        serde_json::Value::Object(map)
    }
}

/// trap 이벤트의 payload — 파서 이후 불변
///
/// `time`은 snmptrapd가 보고한 시각이 아니라 도착 시점의 시스템 시각
/// 입니다. 같은 초에 도착한 메시지가 하류(zabbix 등)에서 중복으로
/// 버려지는 것을 피하기 위함입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// 도착 시각 (시스템 생성)
    pub time: DateTime<Utc>,
    /// sysUpTime 초 환산값
    pub uptime_seconds: Option<f64>,
    /// UDP 출발지 주소
    pub src_address: String,
    /// UDP 출발지 포트
    pub src_port: u16,
    /// UDP 목적지 주소
    pub dst_address: String,
    /// UDP 목적지 포트
    pub dst_port: u16,
    /// 장비가 스스로 보고한 agent 주소
    pub agent_address: Option<String>,
    /// PDU 종류 (TRAP / TRAP2 / INFORM)
    pub pdu_version: String,
    /// SNMP 버전 (v1 / v2c / v3)
    pub snmp_version: String,
    /// v1/v2c community
    pub community: Option<String>,
    /// enterprise OID
    pub enterprise_oid: Option<String>,
    /// enterprise OID의 MIB 이름
    pub enterprise_mib_name: Option<String>,
    /// v3 사용자
    pub user: Option<String>,
    /// v3 컨텍스트
    pub context: Option<String>,
    /// snmptrapd description 필드
    pub description: Option<String>,
    /// v1 trap type
    pub trap_type: Option<i64>,
    /// v1 trap sub-type
    pub trap_sub_type: Option<i64>,
    /// 변수 바인딩 (순서 보존)
    pub values: Vec<Value>,
    /// 상관 결과 (clear 이벤트에만 존재)
    pub correlate: Option<CorrelateInfo>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            time: Utc::now(),
            uptime_seconds: None,
            src_address: String::new(),
            src_port: 0,
            dst_address: String::new(),
            dst_port: 0,
            agent_address: None,
            pdu_version: String::new(),
            snmp_version: String::new(),
            community: None,
            enterprise_oid: None,
            enterprise_mib_name: None,
            user: None,
            context: None,
            description: None,
            trap_type: None,
            trap_sub_type: None,
            values: Vec::new(),
            correlate: None,
        }
    }
}

impl Payload {
    /// 기본 출력 스키마로 JSON 객체를 만듭니다.
    pub fn to_json(&self, tf: &TimeFormatter) -> serde_json::Value {
        fn opt_str(v: &Option<String>) -> serde_json::Value {
            v.as_ref().map_or(serde_json::Value::Null, |s| {
                serde_json::Value::from(s.clone())
            })
        }
        let mut map = serde_json::Map::new();
        map.insert("time".to_owned(), tf.to_json(self.time));
        map.insert(
            "uptime_seconds".to_owned(),
            self.uptime_seconds
                .map_or(serde_json::Value::Null, serde_json::Value::from),
        );
        map.insert(
            "src_address".to_owned(),
            serde_json::Value::from(self.src_address.clone()),
        );
        map.insert("src_port".to_owned(), serde_json::Value::from(self.src_port));
        map.insert(
            "dst_address".to_owned(),
            serde_json::Value::from(self.dst_address.clone()),
        );
        map.insert("dst_port".to_owned(), serde_json::Value::from(self.dst_port));
        map.insert("agent_address".to_owned(), opt_str(&self.agent_address));
        map.insert(
            "pdu_version".to_owned(),
            serde_json::Value::from(self.pdu_version.clone()),
        );
        map.insert(
            "snmp_version".to_owned(),
            serde_json::Value::from(self.snmp_version.clone()),
        );
        map.insert("community".to_owned(), opt_str(&self.community));
        map.insert("enterprise_oid".to_owned(), opt_str(&self.enterprise_oid));
        map.insert(
            "enterprise_mib_name".to_owned(),
            opt_str(&self.enterprise_mib_name),
        );
        map.insert("user".to_owned(), opt_str(&self.user));
        map.insert("context".to_owned(), opt_str(&self.context));
        map.insert("description".to_owned(), opt_str(&self.description));
        map.insert(
            "trap_type".to_owned(),
            self.trap_type
                .map_or(serde_json::Value::Null, serde_json::Value::from),
        );
        map.insert(
            "trap_sub_type".to_owned(),
            self.trap_sub_type
                .map_or(serde_json::Value::Null, serde_json::Value::from),
        );
        map.insert(
            "values".to_owned(),
            serde_json::Value::Array(self.values.iter().map(|v| v.to_json(tf)).collect()),
        );
        map.insert(
            "correlate".to_owned(),
            self.correlate
                .as_ref()
                .map_or(serde_json::Value::Null, |c| c.to_json(tf)),
        );
        serde_json::Value::Object(map)
    }
}

/// 포워더 사본이 소유하는 제어 필드
///
/// 팬아웃 시점마다 새로 만들어지며 포워더 간에 공유되지 않습니다.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// 지금까지의 재시도 횟수 (단조 증가)
    pub retries: u32,
    /// filter가 false로 평가되어 건너뛸 메시지인지
    pub skip: bool,
    /// 컴파일된 JSON 바이트
    pub message_json: Vec<u8>,
    /// 가장 이른 디스패치 허용 시각
    pub eta: Instant,
    /// compile()이 이미 수행되었는지
    pub compiled: bool,
    /// 포워더별 time 레이아웃
    pub time_format: String,
    /// 포워더별 타임존 재지정
    pub time_as_timezone: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            retries: 0,
            skip: false,
            message_json: Vec::new(),
            eta: Instant::now(),
            compiled: false,
            time_format: String::new(),
            time_as_timezone: String::new(),
        }
    }
}

/// 컴파일된 filter / json_format과 시간 직렬화기
///
/// 포워더마다 기동 시 한 번 만들어 모든 메시지에 재사용합니다.
#[derive(Debug, Clone, Default)]
pub struct MessageCompiler {
    /// 불리언 filter (없으면 모두 통과)
    pub filter: Option<Program>,
    /// 기본 직렬화를 대체하는 맵 표현식
    pub json_format: Option<Program>,
    /// 포워더별 시간 직렬화기
    pub time: TimeFormatter,
}

/// 공유 payload + 사본별 metadata
#[derive(Debug, Clone)]
pub struct Message {
    /// 파서 이후 불변인 payload (포워더 간 공유)
    pub payload: Arc<Payload>,
    /// 이 사본의 제어 필드
    pub meta: Metadata,
}

impl Eta for Message {
    fn eta(&self) -> Instant {
        self.meta.eta
    }
}

impl Message {
    /// 새 메시지를 만듭니다. `eta = now`.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
            meta: Metadata::default(),
        }
    }

    /// 팬아웃용 얕은 사본: payload는 공유, metadata는 초기화.
    pub fn fanout_copy(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            meta: Metadata::default(),
        }
    }

    /// payload를 교체한 사본을 만듭니다 (상관 결과 부착용).
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            payload: Arc::new(payload),
            meta: self.meta.clone(),
        }
    }

    /// filter 평가와 JSON 직렬화를 수행하고 결과를 캐시합니다.
    ///
    /// 재시도로 다시 들어온 메시지는 이미 컴파일되어 있으므로 바로
    /// 반환합니다. filter가 불리언이 아닌 값을 내면 메시지는 통과
    /// 합니다(관찰 전용 에러).
    pub fn compile(&mut self, compiler: &MessageCompiler) {
        if self.meta.compiled {
            return;
        }
        self.meta.compiled = true;
        if let Some(filter) = &compiler.filter {
            match filter.eval_bool(&self.payload) {
                Ok(keep) => self.meta.skip = !keep,
                Err(e) => {
                    tracing::debug!(error = %e, "failed evaluating filter expression");
                }
            }
        }
        if self.meta.skip {
            return;
        }
        let mut payload_json = None;
        if let Some(format) = &compiler.json_format {
            match format.eval_map(&self.payload) {
                Ok(v) => payload_json = Some(val_to_json(&v, &compiler.time)),
                Err(e) => {
                    // json_format은 기동 시 검증되었으므로 여기 도달은 드묾
                    tracing::warn!(error = %e, "failed evaluating json_format expression");
                }
            }
        }
        let json = payload_json.unwrap_or_else(|| self.payload.to_json(&compiler.time));
        match serde_json::to_vec(&json) {
            Ok(bytes) => self.meta.message_json = bytes,
            Err(e) => {
                tracing::warn!(error = %e, "unexpected error, failed marshalling json");
            }
        }
    }

    /// 지수 백오프 ETA를 계산합니다.
    ///
    /// `now + min(max_delay, min_delay * 2^retries)`
    pub fn compute_eta(
        &self,
        min_delay: std::time::Duration,
        max_delay: std::time::Duration,
    ) -> Instant {
        let factor = 2u32.saturating_pow(self.meta.retries);
        let delay = min_delay.saturating_mul(factor).min(max_delay);
        Instant::now() + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ValueDetail, ValueKind, ValueType};
    use std::time::Duration;

    fn sample_message() -> Message {
        Message::new(Payload {
            snmp_version: "v2c".to_owned(),
            pdu_version: "TRAP2".to_owned(),
            src_address: "172.17.1.65".to_owned(),
            src_port: 33332,
            dst_address: "172.17.1.66".to_owned(),
            dst_port: 10162,
            community: Some("public".to_owned()),
            values: vec![Value {
                oid: ".1.3.6.1.4.1.2378.1.1".to_owned(),
                value_type: ValueType::String,
                native_type: "string".to_owned(),
                value: ValueKind::Str("IP-20N".to_owned()),
                value_detail: ValueDetail::default(),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    #[test]
    fn fanout_copy_shares_payload() {
        let msg = sample_message();
        let copy = msg.fanout_copy();
        assert!(Arc::ptr_eq(&msg.payload, &copy.payload));
        assert_eq!(copy.meta.retries, 0);
        assert!(!copy.meta.compiled);
    }

    #[test]
    fn compile_produces_default_json() {
        let mut msg = sample_message();
        msg.compile(&MessageCompiler::default());
        assert!(msg.meta.compiled);
        assert!(!msg.meta.skip);
        let parsed: serde_json::Value = serde_json::from_slice(&msg.meta.message_json).unwrap();
        assert_eq!(parsed["snmp_version"], "v2c");
        assert_eq!(parsed["community"], "public");
        assert_eq!(parsed["agent_address"], serde_json::Value::Null);
        assert_eq!(parsed["values"][0]["value"], "IP-20N");
        assert_eq!(parsed["correlate"], serde_json::Value::Null);
    }

    #[test]
    fn compile_is_idempotent() {
        let mut msg = sample_message();
        msg.compile(&MessageCompiler::default());
        let first = msg.meta.message_json.clone();
        msg.meta.skip = true; // compile()이 다시 돌면 덮어써질 값
        msg.compile(&MessageCompiler::default());
        assert_eq!(msg.meta.message_json, first);
        assert!(msg.meta.skip);
    }

    #[test]
    fn compile_applies_filter() {
        let compiler = MessageCompiler {
            filter: Some(Program::compile(r#"snmp_version == "v1""#).unwrap()),
            ..Default::default()
        };
        let mut msg = sample_message();
        msg.compile(&compiler);
        assert!(msg.meta.skip);
        assert!(msg.meta.message_json.is_empty());
    }

    #[test]
    fn compile_non_bool_filter_passes_message() {
        let compiler = MessageCompiler {
            filter: Some(Program::compile("src_address").unwrap()),
            ..Default::default()
        };
        let mut msg = sample_message();
        msg.compile(&compiler);
        assert!(!msg.meta.skip);
        assert!(!msg.meta.message_json.is_empty());
    }

    #[test]
    fn compile_json_format_replaces_default() {
        let compiler = MessageCompiler {
            json_format: Some(
                Program::compile(r#"{"host": src_address, "ver": snmp_version}"#).unwrap(),
            ),
            ..Default::default()
        };
        let mut msg = sample_message();
        msg.compile(&compiler);
        let parsed: serde_json::Value = serde_json::from_slice(&msg.meta.message_json).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!({"host": "172.17.1.65", "ver": "v2c"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn compute_eta_backoff_sequence() {
        let mut msg = sample_message();
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(8);
        let expect = [1u64, 2, 4, 8, 8];
        for (i, want_secs) in expect.iter().enumerate() {
            msg.meta.retries = i as u32;
            let eta = msg.compute_eta(min, max);
            assert_eq!(
                eta.duration_since(Instant::now()),
                Duration::from_secs(*want_secs),
                "retry {i}"
            );
        }
    }

    #[test]
    fn json_roundtrip_preserves_fields() {
        let msg = sample_message();
        let tf = TimeFormatter::default();
        let json = msg.payload.to_json(&tf);
        let text = serde_json::to_string(&json).unwrap();
        let back: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json, back);
        // 출력 키가 모두 존재
        for key in [
            "time",
            "uptime_seconds",
            "src_address",
            "src_port",
            "dst_address",
            "dst_port",
            "agent_address",
            "pdu_version",
            "snmp_version",
            "community",
            "enterprise_oid",
            "enterprise_mib_name",
            "user",
            "context",
            "description",
            "trap_type",
            "trap_sub_type",
            "values",
            "correlate",
        ] {
            assert!(back.get(key).is_some(), "missing key {key}");
        }
    }

    #[test]
    fn correlate_info_serializes() {
        let tf = TimeFormatter::default();
        let info = CorrelateInfo {
            id: "abc-123".to_owned(),
            raised_time: Utc::now(),
            duration: Duration::from_secs(123),
            duration_seconds: 123.0,
        };
        let json = info.to_json(&tf);
        assert_eq!(json["id"], "abc-123");
        assert_eq!(json["duration"], "2m 3s");
        assert_eq!(json["duration_seconds"], 123.0);
    }
}
