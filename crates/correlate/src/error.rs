//! 상관 엔진 에러 타입

use trap2json_core::error::ExprError;

/// 상관 엔진과 백엔드 에러
///
/// 백엔드 전송 에러는 일시적 실패로 취급되어 백오프 재시도 대상이
/// 됩니다. 조건 컴파일 실패와 백엔드 open 실패는 기동 시 fatal입니다.
#[derive(Debug, thiserror::Error)]
pub enum CorrelateError {
    /// backend_url 해석 실패
    #[error("invalid backend scheme: {0}")]
    InvalidBackendUrl(String),

    /// 조건 표현식 컴파일 실패
    #[error("condition index {index}: {source}")]
    Condition {
        index: usize,
        #[source]
        source: ExprError,
    },

    /// 백엔드 전송/저장 에러 (재시도 대상)
    #[error("backend error: {0}")]
    Backend(String),

    /// 백엔드 호출 시간 초과 (재시도 대상)
    #[error("backend call timed out")]
    Timeout,

    /// 저장된 레코드 역직렬화 실패
    #[error("failed decoding stored record: {0}")]
    Decode(String),
}
