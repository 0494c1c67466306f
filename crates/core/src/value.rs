//! 변수 바인딩 값 모델
//!
//! trap 하나에 담긴 변수 바인딩([`Value`])과 그 의미론적 타입
//! ([`ValueType`]), 파싱된 값의 다형 표현([`ValueKind`])을 정의합니다.
//! 타입 강제(coercion) 규칙 자체는 MIB 조회가 필요하므로
//! `trap2json-snmp` 크레이트의 파서에 있습니다.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::timefmt::TimeFormatter;

/// 변수 바인딩의 의미론적 타입
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueType {
    /// 알 수 없는 타입
    #[default]
    Unknown,
    /// 정수 (counter/gauge/unsigned 포함)
    Integer,
    /// timeticks 기반 기간
    Duration,
    /// `name(N)` 형태의 열거값
    Enum,
    /// IPv4/IPv6 주소
    IpAddress,
    /// OID 값
    Oid,
    /// 문자열
    String,
    /// 바이트열 (hex-string)
    Bytes,
    /// BITS
    Bits,
    /// SNMPv2-TC DateAndTime
    DateTime,
    /// 값 없음
    Null,
}

impl ValueType {
    /// JSON에 쓰이는 이름을 반환합니다.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Integer => "integer",
            Self::Duration => "duration",
            Self::Enum => "enum",
            Self::IpAddress => "ip_address",
            Self::Oid => "oid",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Bits => "bits",
            Self::DateTime => "datetime",
            Self::Null => "null",
        }
    }

    /// snmptrapd가 보고한 네이티브 타입명으로부터 결정합니다.
    pub fn from_snmp(text: &str) -> Option<Self> {
        Some(match text.to_ascii_lowercase().as_str() {
            "integer" | "counter32" | "counter64" | "gauge32" | "unsigned32" => Self::Integer,
            "timeticks" => Self::Duration,
            "ipaddress" => Self::IpAddress,
            "oid" => Self::Oid,
            "hex-string" => Self::Bytes,
            "string" => Self::String,
            "bits" => Self::Bits,
            "null" => Self::Null,
            _ => return None,
        })
    }

    /// MIB 타입명으로부터 결정합니다 (DISPLAY-HINT 기반 승격).
    pub fn from_mib(text: &str) -> Option<Self> {
        match text {
            "DateAndTime" => Some(Self::DateTime),
            _ => None,
        }
    }
}

impl Serialize for ValueType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 파싱된 값의 다형 표현
///
/// Go 구현의 `any` 대신 태그 있는 변형으로 표현하여, JSON 직렬화와
/// 표현식 런타임이 런타임 리플렉션 없이 분기할 수 있게 합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ValueKind {
    /// 값 없음
    #[default]
    Null,
    /// 정수
    Int(i64),
    /// 실수
    Float(f64),
    /// 문자열
    Str(String),
    /// 파싱된 시각 (원본 오프셋 보존)
    DateTime(DateTime<FixedOffset>),
}

impl ValueKind {
    /// 시간 레이아웃을 적용하여 JSON 값으로 변환합니다.
    pub fn to_json(&self, tf: &TimeFormatter) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Str(v) => serde_json::Value::from(v.clone()),
            Self::DateTime(v) => tf.to_json(*v),
        }
    }
}

impl From<i64> for ValueKind {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ValueKind {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for ValueKind {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for ValueKind {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

/// 값의 원본 보존 상세
///
/// `raw`는 강제 변환 전의 원형(예: timeticks의 초 환산값, enum의 숫자),
/// `hex`는 바이트 계열 값의 원본 16진 표기입니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueDetail {
    /// 원형 값 (없으면 JSON에서 생략)
    pub raw: Option<ValueKind>,
    /// 원본 16진 문자열 (없으면 JSON에서 생략)
    pub hex: Option<String>,
}

impl ValueDetail {
    /// JSON 객체로 변환합니다. 두 필드 모두 없으면 빈 객체입니다.
    pub fn to_json(&self, tf: &TimeFormatter) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(raw) = &self.raw {
            map.insert("raw".to_owned(), raw.to_json(tf));
        }
        if let Some(hex) = &self.hex {
            map.insert("hex".to_owned(), serde_json::Value::from(hex.clone()));
        }
        serde_json::Value::Object(map)
    }
}

/// trap 하나에 담긴 변수 바인딩 하나
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    /// 점 표기 OID
    pub oid: String,
    /// MIB 조회로 얻은 이름 (없으면 빈 문자열)
    pub mib_name: String,
    /// 의미론적 타입
    pub value_type: ValueType,
    /// snmptrapd가 보고한 네이티브 타입 (소문자)
    pub native_type: String,
    /// 파싱된 값
    pub value: ValueKind,
    /// 원형 보존 상세
    pub value_detail: ValueDetail,
}

/// OID 또는 MIB 이름이 prefix와 같거나 `prefix.`로 시작하는지 검사합니다.
pub fn has_oid_prefix(prefix: &str, oid: &str, mib_name: &str) -> bool {
    oid == prefix
        || mib_name == prefix
        || oid.starts_with(&format!("{prefix}."))
        || mib_name.starts_with(&format!("{prefix}."))
}

impl Value {
    /// 이 바인딩이 주어진 OID prefix에 속하는지 검사합니다.
    pub fn has_oid_prefix(&self, prefix: &str) -> bool {
        has_oid_prefix(prefix, &self.oid, &self.mib_name)
    }

    /// `snmptrap` CLI 인자 3개(`OID 타입코드 값`)로 포매팅합니다.
    ///
    /// 타입코드는 net-snmp 표기(t/i/s/b/c/u/a/o)를 따릅니다.
    pub fn snmp_cmd(&self) -> [String; 3] {
        let type_code = match self.native_type.as_str() {
            "timeticks" => "t",
            "integer" => "i",
            "string" | "hex-string" => "s",
            "bits" => "b",
            "counter32" => "c",
            "gauge32" | "unsigned32" => "u",
            "ipaddress" => "a",
            "oid" => "o",
            _ => "",
        };
        let rendered = match self.value_type {
            ValueType::Duration => match &self.value_detail.raw {
                Some(ValueKind::Float(secs)) => format!("{}", (secs * 100.0) as i64),
                _ => "0".to_owned(),
            },
            ValueType::Oid | ValueType::DateTime => match &self.value_detail.raw {
                Some(ValueKind::Str(raw)) => raw.clone(),
                Some(other) => render_plain(other),
                None => String::new(),
            },
            ValueType::Enum => match &self.value_detail.raw {
                Some(ValueKind::Int(n)) => n.to_string(),
                _ => "0".to_owned(),
            },
            ValueType::String | ValueType::Integer | ValueType::IpAddress => {
                render_plain(&self.value)
            }
            _ => String::new(),
        };
        [self.oid.clone(), type_code.to_owned(), rendered]
    }

    /// JSON 객체로 변환합니다 (§출력 스키마의 values 원소).
    pub fn to_json(&self, tf: &TimeFormatter) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("oid".to_owned(), serde_json::Value::from(self.oid.clone()));
        map.insert(
            "mib_name".to_owned(),
            serde_json::Value::from(self.mib_name.clone()),
        );
        map.insert(
            "type".to_owned(),
            serde_json::Value::from(self.value_type.as_str()),
        );
        map.insert(
            "native_type".to_owned(),
            serde_json::Value::from(self.native_type.clone()),
        );
        map.insert("value".to_owned(), self.value.to_json(tf));
        map.insert("value_detail".to_owned(), self.value_detail.to_json(tf));
        serde_json::Value::Object(map)
    }
}

fn render_plain(v: &ValueKind) -> String {
    match v {
        ValueKind::Null => String::new(),
        ValueKind::Int(n) => n.to_string(),
        ValueKind::Float(f) => f.to_string(),
        ValueKind::Str(s) => s.clone(),
        ValueKind::DateTime(t) => t.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_type_from_snmp() {
        assert_eq!(ValueType::from_snmp("Counter32"), Some(ValueType::Integer));
        assert_eq!(ValueType::from_snmp("TIMETICKS"), Some(ValueType::Duration));
        assert_eq!(ValueType::from_snmp("Hex-STRING"), Some(ValueType::Bytes));
        assert_eq!(ValueType::from_snmp("weird"), None);
    }

    #[test]
    fn value_type_from_mib() {
        assert_eq!(ValueType::from_mib("DateAndTime"), Some(ValueType::DateTime));
        assert_eq!(ValueType::from_mib("InetAddress"), None);
    }

    #[test]
    fn oid_prefix_matching() {
        let v = Value {
            oid: ".1.3.6.1.2.1.1.3.0".to_owned(),
            mib_name: "SNMPv2-MIB::sysUpTime.0".to_owned(),
            ..Default::default()
        };
        assert!(v.has_oid_prefix(".1.3.6.1.2.1.1.3.0"));
        assert!(v.has_oid_prefix(".1.3.6.1.2.1.1.3"));
        assert!(v.has_oid_prefix("SNMPv2-MIB::sysUpTime.0"));
        assert!(!v.has_oid_prefix(".1.3.6.1.2.1.1.30"));
    }

    #[test]
    fn snmp_cmd_duration_uses_centiseconds() {
        let v = Value {
            oid: ".1.3.6.1.2.1.1.3.0".to_owned(),
            native_type: "timeticks".to_owned(),
            value_type: ValueType::Duration,
            value: ValueKind::Str("264024.25s".to_owned()),
            value_detail: ValueDetail {
                raw: Some(ValueKind::Float(264024.25)),
                hex: None,
            },
            ..Default::default()
        };
        let cmd = v.snmp_cmd();
        assert_eq!(cmd, [".1.3.6.1.2.1.1.3.0", "t", "26402425"]);
    }

    #[test]
    fn snmp_cmd_enum_uses_raw_number() {
        let v = Value {
            oid: ".1.2.3".to_owned(),
            native_type: "integer".to_owned(),
            value_type: ValueType::Enum,
            value: ValueKind::Str("up".to_owned()),
            value_detail: ValueDetail {
                raw: Some(ValueKind::Int(1)),
                hex: None,
            },
            ..Default::default()
        };
        assert_eq!(v.snmp_cmd(), [".1.2.3", "i", "1"]);
    }

    #[test]
    fn snmp_cmd_oid_uses_raw_dotted_form() {
        let v = Value {
            oid: ".1.3.6.1.6.3.1.1.4.1.0".to_owned(),
            mib_name: "SNMPv2-MIB::snmpTrapOID.0".to_owned(),
            native_type: "oid".to_owned(),
            value_type: ValueType::Oid,
            value: ValueKind::Str("IF-MIB::linkDown".to_owned()),
            value_detail: ValueDetail {
                raw: Some(ValueKind::Str(".1.3.6.1.6.3.1.1.5.3".to_owned())),
                hex: None,
            },
            ..Default::default()
        };
        assert_eq!(
            v.snmp_cmd(),
            [".1.3.6.1.6.3.1.1.4.1.0", "o", ".1.3.6.1.6.3.1.1.5.3"]
        );
    }

    #[test]
    fn value_detail_json_omits_absent_fields() {
        let tf = TimeFormatter::default();
        let d = ValueDetail::default();
        assert_eq!(d.to_json(&tf), serde_json::json!({}));
        let d = ValueDetail {
            raw: Some(ValueKind::Int(7)),
            hex: Some("07".to_owned()),
        };
        assert_eq!(d.to_json(&tf), serde_json::json!({"raw": 7, "hex": "07"}));
    }

    #[test]
    fn value_json_shape() {
        let tf = TimeFormatter::default();
        let v = Value {
            oid: ".1.2.3".to_owned(),
            mib_name: String::new(),
            value_type: ValueType::String,
            native_type: "hex-string".to_owned(),
            value: ValueKind::Str("IP-20N".to_owned()),
            value_detail: ValueDetail {
                raw: None,
                hex: Some("49502D32304E".to_owned()),
            },
        };
        assert_eq!(
            v.to_json(&tf),
            serde_json::json!({
                "oid": ".1.2.3",
                "mib_name": "",
                "type": "string",
                "native_type": "hex-string",
                "value": "IP-20N",
                "value_detail": {"hex": "49502D32304E"},
            })
        );
    }
}
