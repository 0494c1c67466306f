//! 설정 프리미티브 — 크레이트 공통으로 쓰이는 설정 타입
//!
//! 최상위 설정(`trap2json-daemon`의 `AppConfig`)은 각 크레이트의 설정
//! 타입을 조합합니다. 여기에는 모든 크레이트가 공유하는 프리미티브만
//! 둡니다: humantime 문자열(`"1s"`, `"15m"`)로 역직렬화되는 [`Duration`],
//! 재시도 정책 [`AutoRetry`], 로거 설정.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// humantime 문자열로 표기되는 기간 값
///
/// YAML에서 `"1s"`, `"500ms"`, `"15m"` 형태로 적습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Duration(pub std::time::Duration);

impl Duration {
    /// 초 단위로 기간을 생성합니다.
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    /// 내부 `std::time::Duration`을 반환합니다.
    pub const fn get(self) -> std::time::Duration {
        self.0
    }

    /// 0 기간인지 확인합니다.
    pub const fn is_zero(self) -> bool {
        self.0.as_nanos() == 0
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self(d)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text)
            .map(Duration)
            .map_err(serde::de::Error::custom)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 일시적 실패에 대한 지수 백오프 재시도 정책
///
/// i번째 재시도의 ETA는 `now + min(max_delay, min_delay * 2^i)`입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRetry {
    /// 재시도 활성화 여부
    pub enable: bool,
    /// 최대 재시도 횟수 (기본 10)
    pub max_retries: u32,
    /// 최소 지연 (기본 1s)
    pub min_delay: Duration,
    /// 최대 지연 (기본 1h)
    pub max_delay: Duration,
}

impl Default for AutoRetry {
    fn default() -> Self {
        Self {
            enable: false,
            max_retries: 0,
            min_delay: Duration::default(),
            max_delay: Duration::default(),
        }
    }
}

impl AutoRetry {
    /// 설정되지 않은 필드에 기본값을 채웁니다.
    ///
    /// `min_delay > max_delay`면 max_delay를 min_delay로 끌어올립니다.
    pub fn normalize(&mut self) {
        if self.max_retries == 0 {
            self.max_retries = 10;
        }
        if self.min_delay.is_zero() {
            self.min_delay = Duration::from_secs(1);
        }
        if self.max_delay.is_zero() {
            self.max_delay = Duration::from_secs(3600);
        }
        if self.min_delay > self.max_delay {
            if self.enable {
                tracing::warn!(
                    "min_delay is larger than max_delay, will set max_delay the same as min_delay"
                );
            }
            self.max_delay = self.min_delay;
        }
    }
}

/// 로그 출력 형식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 사람이 읽는 콘솔 출력
    #[default]
    Console,
    /// JSON 라인 출력
    Json,
}

/// 로거 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub level: String,
    /// 출력 형식
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Console,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        d: Duration,
    }

    #[test]
    fn duration_from_humantime_string() {
        let h: Holder = serde_yaml::from_str("d: 1s").unwrap();
        assert_eq!(h.d, Duration::from_secs(1));
        let h: Holder = serde_yaml::from_str("d: 15m").unwrap();
        assert_eq!(h.d, Duration::from_secs(900));
        let h: Holder = serde_yaml::from_str("d: 500ms").unwrap();
        assert_eq!(h.d.get(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn duration_rejects_garbage() {
        assert!(serde_yaml::from_str::<Holder>("d: banana").is_err());
    }

    #[test]
    fn auto_retry_defaults() {
        let mut retry = AutoRetry::default();
        retry.normalize();
        assert_eq!(retry.max_retries, 10);
        assert_eq!(retry.min_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(3600));
    }

    #[test]
    fn auto_retry_raises_max_delay() {
        let mut retry = AutoRetry {
            enable: true,
            max_retries: 3,
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(10),
        };
        retry.normalize();
        assert_eq!(retry.max_delay, retry.min_delay);
    }

    #[test]
    fn log_format_lowercase() {
        let f: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(f, LogFormat::Json);
        let f: LogFormat = serde_yaml::from_str("console").unwrap();
        assert_eq!(f, LogFormat::Console);
    }
}
