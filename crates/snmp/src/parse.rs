//! 레코드 파서 — `|` 구분 10필드 레코드를 [`Payload`]로 변환
//!
//! snmptrapd가 내보내는 레코드의 필드 순서는 다음과 같습니다:
//! agent 주소, 연결 문자열, 시각, uptime, description, enterprise OID,
//! 보안 정보, trap type, trap sub-type, 변수 바인딩.
//!
//! 시각 필드는 무시하고 도착 시점의 시스템 시각을 사용합니다. 같은
//! 초에 도착한 trap이 하류에서 중복으로 버려지는 것을 피하기 위한
//! 의도적 선택입니다.

use std::sync::{Arc, LazyLock};

use chrono::{FixedOffset, NaiveDate, Utc};
use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use trap2json_core::message::{Message, Payload};
use trap2json_core::metrics as m;
use trap2json_core::value::{Value, ValueDetail, ValueKind, ValueType};

use crate::error::SnmpError;
use crate::mib;

const FIELDS_PER_RECORD: usize = 10;

// 헤더 필드 인덱스
const HEADER_AGENT_ADDRESS: usize = 0;
const HEADER_CONNECTION: usize = 1;
const HEADER_UPTIME: usize = 3;
const HEADER_DESCRIPTION: usize = 4;
const HEADER_ENTERPRISE: usize = 5;
const HEADER_SECURITY: usize = 6;
const HEADER_TRAP_TYPE: usize = 7;
const HEADER_TRAP_SUB_TYPE: usize = 8;
const HEADER_VAR_BINDS: usize = 9;

// 합성 필드를 만드는 잘 알려진 OID
const UPTIME_OID: &str = ".1.3.6.1.2.1.1.3.0";
const AGENT_OID: &str = ".1.3.6.1.6.3.18.1.3";
const ENTERPRISE_OID: &str = ".1.3.6.1.6.3.1.1.4.1.0";

static CONNECTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+: \[([\w.:-]+)]:([0-9]+)->\[([\w.:-]+)]:([0-9]+)").expect("valid pattern")
});
static VAR_BIND_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9.]+) = ([^:]+): (.*)$").expect("valid pattern"));
static VAR_BIND_NULL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([0-9.]+) = ""$"#).expect("valid pattern"));
static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((\d+)\)").expect("valid pattern"));
static ENUM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\((\d+)\)$").expect("valid pattern"));

/// 레코드 하나를 payload로 파싱합니다.
pub fn parse_record(raw: &[u8]) -> Result<Payload, SnmpError> {
    // 긴 메시지에는 개행이 끼어 있을 수 있음
    let text = String::from_utf8_lossy(raw).replace('\n', "");
    let fields: Vec<&str> = text.split('|').collect();
    if fields.len() != FIELDS_PER_RECORD {
        return Err(SnmpError::FieldCount {
            expected: FIELDS_PER_RECORD,
            found: fields.len(),
        });
    }

    let mut payload = Payload {
        time: Utc::now(),
        ..Default::default()
    };

    let agent_addr = fields[HEADER_AGENT_ADDRESS];
    if !agent_addr.is_empty() && agent_addr != "0.0.0.0" {
        payload.agent_address = Some(agent_addr.to_owned());
    }
    if let Some(caps) = CONNECTION_PATTERN.captures(fields[HEADER_CONNECTION]) {
        payload.src_address = caps[1].to_owned();
        payload.src_port = caps[2].parse().unwrap_or(0);
        payload.dst_address = caps[3].to_owned();
        payload.dst_port = caps[4].parse().unwrap_or(0);
    }
    if let Ok(uptime) = fields[HEADER_UPTIME].parse::<i64>() {
        if uptime > 0 {
            payload.uptime_seconds = Some(uptime as f64 / 100.0);
        }
    }
    if !fields[HEADER_DESCRIPTION].is_empty() {
        payload.description = Some(fields[HEADER_DESCRIPTION].to_owned());
    }
    let enterprise = fields[HEADER_ENTERPRISE];
    if !enterprise.is_empty() && enterprise != "." {
        payload.enterprise_oid = Some(enterprise.to_owned());
    }
    // snmptrapd는 sub-type을 ".17"처럼 선행 점과 함께 내보냄
    if let Ok(trap_type) = fields[HEADER_TRAP_TYPE].trim_start_matches('.').parse::<i64>() {
        payload.trap_type = Some(trap_type);
    }
    if let Ok(sub_type) = fields[HEADER_TRAP_SUB_TYPE]
        .trim_start_matches('.')
        .parse::<i64>()
    {
        payload.trap_sub_type = Some(sub_type);
    }
    parse_security_info(&mut payload, fields[HEADER_SECURITY]);
    parse_values(&mut payload, fields[HEADER_VAR_BINDS]);

    Ok(payload)
}

/// 보안 정보 필드를 파싱합니다.
///
/// 형식 예: `INFORM, SNMP v3, user traptest, context test` /
/// `TRAP2, SNMP v2c, community public`. 첫 원소는 PDU 종류이고,
/// 나머지는 앞 네 글자로 식별합니다.
fn parse_security_info(payload: &mut Payload, text: &str) {
    let parts: Vec<&str> = text.split(',').map(str::trim_start).collect();
    if parts.len() <= 2 {
        return;
    }
    payload.pdu_version = parts[0].to_owned();
    for part in &parts[1..] {
        let mut words = part.split(' ');
        let (Some(key), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        if key.len() < 4 {
            continue;
        }
        match &key[..4] {
            "SNMP" => payload.snmp_version = value.to_owned(),
            "user" => payload.user = Some(value.to_owned()),
            "cont" => payload.context = Some(value.to_owned()),
            "comm" => payload.community = Some(value.to_owned()),
            _ => {}
        }
    }
}

/// 탭으로 구분된 변수 바인딩 필드를 파싱합니다.
fn parse_values(payload: &mut Payload, text: &str) {
    for var_bind in text.split('\t') {
        let var_bind = var_bind.trim_start();
        if var_bind.is_empty() {
            continue;
        }
        let (oid_text, type_text, value_text) =
            if let Some(caps) = VAR_BIND_PATTERN.captures(var_bind) {
                (
                    caps.get(1).map_or("", |c| c.as_str()).to_owned(),
                    caps.get(2).map_or("", |c| c.as_str()).to_owned(),
                    caps.get(3).map_or("", |c| c.as_str()).to_owned(),
                )
            } else if let Some(caps) = VAR_BIND_NULL_PATTERN.captures(var_bind) {
                (
                    caps.get(1).map_or("", |c| c.as_str()).to_owned(),
                    "NULL".to_owned(),
                    String::new(),
                )
            } else {
                debug!(fields = var_bind, "value dropped, format unknown");
                continue;
            };

        let mib_name = mib::translate(&oid_text).unwrap_or_default();
        let mut value_type = mib::type_hint(&oid_text)
            .and_then(ValueType::from_mib)
            .or_else(|| ValueType::from_snmp(&type_text))
            .unwrap_or_default();
        let (value, value_detail, err) = coerce(&mut value_type, &value_text);
        if let Some(err) = err {
            debug!(error = %err, oid = %oid_text, "parsing surrender");
        }

        if oid_text == UPTIME_OID {
            if let Some(ValueKind::Float(secs)) = &value_detail.raw {
                payload.uptime_seconds = Some(*secs);
            }
        }
        if oid_text == AGENT_OID || oid_text.starts_with(&format!("{AGENT_OID}.")) {
            if let ValueKind::Str(addr) = &value {
                payload.agent_address = Some(addr.clone());
            }
        }
        if oid_text == ENTERPRISE_OID {
            if let Some(ValueKind::Str(oid)) = &value_detail.raw {
                payload.enterprise_oid = Some(oid.clone());
            }
        }

        payload.values.push(Value {
            oid: oid_text,
            mib_name,
            value_type,
            native_type: type_text.to_ascii_lowercase(),
            value,
            value_detail,
        });
    }
    if let Some(enterprise) = &payload.enterprise_oid {
        payload.enterprise_mib_name = mib::translate(enterprise);
    }
}

/// 타입 강제 규칙을 적용하여 원시 텍스트를 파싱합니다.
///
/// 일부 규칙은 타입 자체를 승격시킵니다: `name(N)` 텍스트는 integer를
/// enum으로, UTF-8로 해석되는 바이트열은 bytes를 string으로.
fn coerce(value_type: &mut ValueType, text: &str) -> (ValueKind, ValueDetail, Option<SnmpError>) {
    match *value_type {
        ValueType::Null => (ValueKind::Null, ValueDetail::default(), None),
        ValueType::DateTime => coerce_datetime(text),
        ValueType::Duration => {
            let Some(caps) = DURATION_PATTERN.captures(text) else {
                return (
                    ValueKind::Str(text.to_owned()),
                    ValueDetail::default(),
                    Some(SnmpError::Value {
                        reason: "failed extracting timeticks".to_owned(),
                        text: text.to_owned(),
                    }),
                );
            };
            match caps[1].parse::<i64>() {
                Ok(ticks) => {
                    let secs = ticks as f64 / 100.0;
                    (
                        ValueKind::Str(format_duration_secs(secs)),
                        ValueDetail {
                            raw: Some(ValueKind::Float(secs)),
                            hex: None,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ValueKind::Str(text.to_owned()),
                    ValueDetail::default(),
                    Some(SnmpError::Value {
                        reason: format!("failed casting timeticks: {e}"),
                        text: text.to_owned(),
                    }),
                ),
            }
        }
        ValueType::Integer => coerce_enum(value_type, text),
        ValueType::IpAddress | ValueType::String => {
            (ValueKind::Str(text.to_owned()), ValueDetail::default(), None)
        }
        ValueType::Oid => {
            let mib_name = mib::translate(text);
            (
                ValueKind::Str(mib_name.unwrap_or_else(|| text.to_owned())),
                ValueDetail {
                    raw: Some(ValueKind::Str(text.to_owned())),
                    hex: None,
                },
                None,
            )
        }
        ValueType::Bytes => {
            let stripped = text.replace(' ', "");
            match hex::decode(&stripped) {
                Err(e) => (
                    ValueKind::Str(text.to_owned()),
                    ValueDetail::default(),
                    Some(SnmpError::Value {
                        reason: format!("failed casting hex: {e}"),
                        text: text.to_owned(),
                    }),
                ),
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(decoded) => {
                        *value_type = ValueType::String;
                        (
                            ValueKind::Str(decoded),
                            ValueDetail {
                                raw: None,
                                hex: Some(stripped),
                            },
                            None,
                        )
                    }
                    Err(e) => {
                        use base64::Engine as _;
                        let encoded =
                            base64::engine::general_purpose::STANDARD.encode(e.into_bytes());
                        (
                            ValueKind::Str(encoded),
                            ValueDetail {
                                raw: None,
                                hex: Some(stripped),
                            },
                            None,
                        )
                    }
                },
            }
        }
        ValueType::Bits => {
            // `hh hh … name(N)` — 마지막 토큰이 enum, 앞쪽이 hex 옥텟
            let trimmed = text.trim();
            let tokens: Vec<&str> = trimmed.split(' ').collect();
            let (hex_part, enum_part) = match tokens.split_last() {
                Some((last, rest)) => (rest.join(""), *last),
                None => (String::new(), trimmed),
            };
            let mut enum_type = ValueType::Integer;
            let (value, mut detail, err) = coerce_enum(&mut enum_type, enum_part);
            detail.hex = Some(hex_part);
            (value, detail, err)
        }
        ValueType::Unknown | ValueType::Enum => (
            ValueKind::Str(text.to_owned()),
            ValueDetail::default(),
            Some(SnmpError::Value {
                reason: format!("unknown type: {}", value_type.as_str()),
                text: text.to_owned(),
            }),
        ),
    }
}

/// `name(N)` 텍스트는 enum으로 승격하고, 아니면 정수로 파싱합니다.
fn coerce_enum(
    value_type: &mut ValueType,
    text: &str,
) -> (ValueKind, ValueDetail, Option<SnmpError>) {
    if let Some(caps) = ENUM_PATTERN.captures(text) {
        *value_type = ValueType::Enum;
        let raw = caps[2].parse::<i64>().ok().map(ValueKind::Int);
        return (
            ValueKind::Str(caps[1].to_owned()),
            ValueDetail { raw, hex: None },
            None,
        );
    }
    match text.parse::<i64>() {
        Ok(n) => (ValueKind::Int(n), ValueDetail::default(), None),
        Err(e) => (
            ValueKind::Str(text.to_owned()),
            ValueDetail::default(),
            Some(SnmpError::Value {
                reason: format!("failed casting to integer: {e}"),
                text: text.to_owned(),
            }),
        ),
    }
}

/// SNMPv2-TC DateAndTime 텍스트를 파싱합니다.
///
/// `Y-M-D,h:m:s.d[,±H:M]` — 자리수는 느슨하며, 타임존이 없으면
/// +00:00으로 간주합니다. 원본 텍스트는 detail.raw에 보존됩니다.
fn coerce_datetime(text: &str) -> (ValueKind, ValueDetail, Option<SnmpError>) {
    let surrender = |reason: &str| {
        (
            ValueKind::Str(text.to_owned()),
            ValueDetail::default(),
            Some(SnmpError::Value {
                reason: reason.to_owned(),
                text: text.to_owned(),
            }),
        )
    };
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() < 2 {
        return surrender("not a valid DateAndTime");
    }
    let Some(date) = parse_loose_date(parts[0]) else {
        return surrender("failed parsing DateAndTime");
    };
    let Some((hour, min, sec, nanos)) = parse_loose_time(parts[1]) else {
        return surrender("failed parsing DateAndTime");
    };
    let offset = parts
        .get(2)
        .and_then(|tz| parse_loose_offset(tz))
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
    let Some(naive) = date.and_hms_nano_opt(hour, min, sec, nanos) else {
        return surrender("failed parsing DateAndTime");
    };
    match naive.and_local_timezone(offset).single() {
        Some(dt) => (
            ValueKind::DateTime(dt),
            ValueDetail {
                raw: Some(ValueKind::Str(text.to_owned())),
                hex: None,
            },
            None,
        ),
        None => surrender("failed parsing DateAndTime"),
    }
}

fn parse_loose_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('-');
    let year = parts.next()?.parse().ok()?;
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_loose_time(text: &str) -> Option<(u32, u32, u32, u32)> {
    let (hms, frac) = match text.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (text, None),
    };
    let mut parts = hms.split(':');
    let hour = parts.next()?.parse().ok()?;
    let min = parts.next()?.parse().ok()?;
    let sec = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let nanos = match frac {
        None => 0,
        Some(frac) => {
            let digits: u32 = frac.parse().ok()?;
            // 소수 자릿수만큼 나노초로 환산
            digits * 10u32.checked_pow(9u32.checked_sub(frac.len() as u32)?)?
        }
    };
    Some((hour, min, sec, nanos))
}

fn parse_loose_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1i32, &text[1..]),
        b'-' => (-1i32, &text[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// 초 단위 실수를 `"264024.25s"` 꼴의 사람이 읽는 문자열로 만듭니다.
fn format_duration_secs(secs: f64) -> String {
    let formatted = format!("{secs:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}s")
}

/// 파서 워커 — parse 채널에서 레코드를 받아 메시지 채널로 넘깁니다.
///
/// 파싱 실패는 드롭 카운터로 계수될 뿐 전파되지 않습니다. 성공한
/// 메시지는 `eta = now`로 스탬프되어 다음 채널로 갑니다.
pub async fn parser_worker(
    worker: usize,
    parse_rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    message_tx: mpsc::Sender<Message>,
) {
    let worker_label = worker.to_string();
    let labels = vec![metrics::Label::new(m::LABEL_WORKER, worker_label)];
    loop {
        let raw = { parse_rx.lock().await.recv().await };
        let Some(raw) = raw else { break };
        metrics::counter!(m::PARSER_PROCESSED, labels.clone()).increment(1);
        match parse_record(&raw) {
            Ok(payload) => {
                metrics::counter!(m::PARSER_SUCCEEDED, labels.clone()).increment(1);
                if message_tx.send(Message::new(payload)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(
                    error = %e,
                    data = %String::from_utf8_lossy(&raw),
                    "message parsing failed"
                );
                metrics::counter!(m::PARSER_DROPPED, labels.clone()).increment(1);
            }
        }
    }
}
