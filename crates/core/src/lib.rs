#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod expr;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod timefmt;
pub mod value;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 에러
pub use error::{ConfigError, ExprError, QueueError};

// 설정 프리미티브
pub use config::{AutoRetry, Duration, LogFormat, LoggerConfig};

// 메시지 모델
pub use message::{CorrelateInfo, Message, MessageCompiler, Metadata, Payload};
pub use value::{Value, ValueDetail, ValueKind, ValueType};

// 표현식 런타임
pub use expr::Program;

// 지연 우선순위 큐
pub use queue::{DelayQueue, Eta, QueueCounters};

// 시간 직렬화
pub use timefmt::TimeFormatter;
