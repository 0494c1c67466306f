//! 상관 조건 — match / identifiers / clear 표현식 컴파일

use serde::{Deserialize, Serialize};

use trap2json_core::expr::Program;

use crate::error::CorrelateError;

/// 조건 하나의 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionConfig {
    /// 이 조건이 메시지를 처리할지 결정하는 불리언 표현식
    #[serde(rename = "match")]
    pub match_expr: String,
    /// 상관 키를 이루는 하위 표현식 목록
    pub identifiers: Vec<String>,
    /// clear 이벤트 여부를 결정하는 불리언 표현식
    pub clear: String,
}

/// 컴파일된 조건
///
/// identifiers는 `SHA256(a, b, …)`로 감싸 컴파일되므로, 인자 벡터의
/// 결정적 JSON 인코딩이 해시되어 키가 됩니다.
#[derive(Debug, Clone)]
pub struct Condition {
    pub match_program: Program,
    pub identifier_program: Program,
    pub clear_program: Program,
}

impl Condition {
    /// 조건 설정을 컴파일합니다. 실패는 기동 시 fatal입니다.
    pub fn compile(index: usize, config: &ConditionConfig) -> Result<Self, CorrelateError> {
        let wrap = |source| CorrelateError::Condition { index, source };
        Ok(Self {
            match_program: Program::compile(&config.match_expr).map_err(wrap)?,
            clear_program: Program::compile(&config.clear).map_err(wrap)?,
            identifier_program: Program::compile_identifiers(&config.identifiers).map_err(wrap)?,
        })
    }
}
