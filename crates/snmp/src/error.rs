//! snmptrapd 연동 에러 타입

/// 레코드 파싱과 snmptrapd 설정 처리 에러
///
/// 레코드 단위 파싱 실패는 워커에서 드롭 카운터 + 디버그 로그로
/// 변환되며 전파되지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    /// 필드 수가 10이 아닌 레코드
    #[error("malformed record: expected {expected} fields, got {found}")]
    FieldCount { expected: usize, found: usize },

    /// 값 파싱 실패
    #[error("failed parsing value: {reason}: {text}")]
    Value { reason: String, text: String },

    /// buffer_size 설정 오류
    #[error("invalid buffer_size: {0}")]
    BufferSize(String),

    /// snmptrapd 설정 생성 실패
    #[error("failed generating snmptrapd config: {0}")]
    Generate(String),

    /// 설정 파일 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
