//! 시간 직렬화 — 포워더별 time 레이아웃 처리
//!
//! 출력 JSON의 모든 시간 필드는 포워더 설정(`time_format`,
//! `time_as_timezone`)에 따라 직렬화됩니다.
//!
//! - 빈 레이아웃: RFC 3339 나노초 (기본값)
//! - `unix` / `unixMilli` / `unixMicro` / `unixNano`: 정수로 출력
//! - 그 외: chrono strftime 패턴 (예: `%Y-%m-%d %H:%M:%S`)
//!
//! `time_as_timezone`은 레이아웃 기반 형식에만 적용됩니다.

use chrono::{DateTime, FixedOffset, SecondsFormat};
use chrono_tz::Tz;

/// 포워더 하나에 대응하는 시간 직렬화기
///
/// 설정은 기동 시 한 번 검증되며, 잘못된 타임존 이름은 무시되고
/// 경고만 남습니다(메시지는 원래 타임존으로 직렬화).
#[derive(Debug, Clone, Default)]
pub struct TimeFormatter {
    layout: String,
    tz: Option<Tz>,
}

impl TimeFormatter {
    /// 레이아웃과 타임존 이름으로 직렬화기를 만듭니다.
    pub fn new(layout: &str, tz_name: &str) -> Self {
        let tz = if tz_name.is_empty() {
            None
        } else {
            match tz_name.parse::<Tz>() {
                Ok(tz) => Some(tz),
                Err(_) => {
                    tracing::warn!(timezone = tz_name, "unknown time_as_timezone, ignoring");
                    None
                }
            }
        };
        Self {
            layout: layout.to_owned(),
            tz,
        }
    }

    /// 시간 값을 JSON 값으로 직렬화합니다.
    ///
    /// 파싱 시의 오프셋은 타임존 재지정이 없는 한 보존됩니다.
    pub fn to_json(&self, t: impl Into<DateTime<FixedOffset>>) -> serde_json::Value {
        let t: DateTime<FixedOffset> = t.into();
        match self.layout.as_str() {
            "unix" => return serde_json::Value::from(t.timestamp()),
            "unixMilli" => return serde_json::Value::from(t.timestamp_millis()),
            "unixMicro" => return serde_json::Value::from(t.timestamp_micros()),
            "unixNano" => {
                return serde_json::Value::from(t.timestamp_nanos_opt().unwrap_or(i64::MAX));
            }
            _ => {}
        }
        let formatted = match (self.layout.is_empty(), self.tz) {
            (true, None) => t.to_rfc3339_opts(SecondsFormat::Nanos, true),
            (true, Some(tz)) => t
                .with_timezone(&tz)
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
            (false, None) => t.format(&self.layout).to_string(),
            (false, Some(tz)) => t.with_timezone(&tz).format(&self.layout).to_string(),
        };
        serde_json::Value::from(formatted)
    }
}
