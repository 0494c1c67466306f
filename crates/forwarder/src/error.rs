//! 포워더 에러 타입

use trap2json_core::error::ExprError;

/// 포워더 구성/전송 에러
///
/// 구성 에러(표현식 컴파일 포함)는 기동 시 fatal입니다. 전송 에러는
/// 워커 안에서 재시도 규칙으로 흡수되고 전파되지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// 설정 오류
    #[error("forwarder config error: {field}: {reason}")]
    Config { field: String, reason: String },

    /// filter / json_format / key_field 표현식 컴파일 실패
    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    /// 싱크 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 전송 실패 (재시도 대상)
    #[error("delivery failed: {0}")]
    Delivery(String),
}
