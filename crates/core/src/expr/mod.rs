//! 표현식 런타임 — filter / json_format / 상관 조건식
//!
//! 사용자 설정에 담긴 표현식을 기동 시 한 번 컴파일하고([`Program`]),
//! 메시지마다 payload 환경에 대해 평가합니다. 지원 범위는 설정이
//! 실제로 쓰는 부분집합입니다: 속성 접근, 비교/논리 연산, 산술,
//! 리스트/맵 리터럴, 인덱싱, `in`, 그리고 다섯 개의 내장 함수
//! (`SHA256`, `MergeMap`, `OidValueAny`, `OidValueNumber`,
//! `OidValueString`).
//!
//! # 컴파일과 평가의 실패 구분
//!
//! - 컴파일 실패(구문 오류, 알 수 없는 식별자/함수, 인자 개수)는
//!   기동 시 fatal입니다.
//! - 평가 실패는 메시지 단위의 관찰 대상입니다. filter가 불리언이
//!   아닌 값을 내면 메시지는 통과합니다.
//!
//! # 예시
//!
//! ```
//! use trap2json_core::expr::Program;
//! use trap2json_core::message::Payload;
//!
//! let filter = Program::compile(r#"snmp_version == "v2c" && src_port > 0"#).unwrap();
//! let payload = Payload {
//!     snmp_version: "v2c".to_owned(),
//!     src_port: 33332,
//!     ..Default::default()
//! };
//! assert_eq!(filter.eval_bool(&payload).unwrap(), true);
//! ```

mod eval;
mod lexer;
mod parser;

pub use eval::{val_to_json, Val};

use crate::error::ExprError;
use crate::message::Payload;

/// 컴파일된 표현식 프로그램
///
/// 파싱과 정적 검증(식별자/함수/인자 개수)을 마친 AST를 보관합니다.
/// 평가는 불변 참조만 사용하므로 여러 워커에서 공유할 수 있습니다.
#[derive(Debug, Clone)]
pub struct Program {
    ast: parser::Expr,
    source: String,
}

impl Program {
    /// 소스 문자열을 컴파일합니다.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = lexer::tokenize(source)?;
        let ast = parser::parse(&tokens)?;
        parser::validate(&ast)?;
        Ok(Self {
            ast,
            source: source.to_owned(),
        })
    }

    /// 상관 식별자 목록을 `SHA256(a, b, …)` 형태로 감싸 컴파일합니다.
    pub fn compile_identifiers(identifiers: &[String]) -> Result<Self, ExprError> {
        let joined = format!("SHA256({})", identifiers.join(", "));
        Self::compile(&joined)
    }

    /// 원본 소스를 반환합니다.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// payload 환경에 대해 평가합니다.
    pub fn eval(&self, payload: &Payload) -> Result<Val, ExprError> {
        eval::eval(&self.ast, payload)
    }

    /// 불리언 결과를 기대하며 평가합니다.
    pub fn eval_bool(&self, payload: &Payload) -> Result<bool, ExprError> {
        match self.eval(payload)? {
            Val::Bool(b) => Ok(b),
            other => Err(ExprError::Type {
                expected: "bool".to_owned(),
                found: other.type_name().to_owned(),
            }),
        }
    }

    /// 문자열 결과를 기대하며 평가합니다.
    pub fn eval_str(&self, payload: &Payload) -> Result<String, ExprError> {
        match self.eval(payload)? {
            Val::Str(s) => Ok(s),
            other => Err(ExprError::Type {
                expected: "string".to_owned(),
                found: other.type_name().to_owned(),
            }),
        }
    }

    /// 맵 결과를 기대하며 평가합니다 (json_format).
    pub fn eval_map(&self, payload: &Payload) -> Result<Val, ExprError> {
        match self.eval(payload)? {
            v @ Val::Map(_) => Ok(v),
            other => Err(ExprError::Type {
                expected: "map".to_owned(),
                found: other.type_name().to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueDetail, ValueKind, ValueType};

    fn sample_payload() -> Payload {
        Payload {
            snmp_version: "v2c".to_owned(),
            pdu_version: "TRAP2".to_owned(),
            src_address: "172.17.1.65".to_owned(),
            src_port: 33332,
            community: Some("public".to_owned()),
            trap_type: Some(6),
            trap_sub_type: Some(17),
            uptime_seconds: Some(264024.25),
            values: vec![
                Value {
                    oid: ".1.3.6.1.2.1.1.3.0".to_owned(),
                    mib_name: "SNMPv2-MIB::sysUpTime.0".to_owned(),
                    value_type: ValueType::Duration,
                    native_type: "timeticks".to_owned(),
                    value: ValueKind::Str("264024.25s".to_owned()),
                    value_detail: ValueDetail {
                        raw: Some(ValueKind::Float(264024.25)),
                        hex: None,
                    },
                },
                Value {
                    oid: ".1.3.6.1.4.1.2378.1.1".to_owned(),
                    mib_name: String::new(),
                    value_type: ValueType::String,
                    native_type: "string".to_owned(),
                    value: ValueKind::Str("IP-20N".to_owned()),
                    value_detail: ValueDetail::default(),
                },
                Value {
                    oid: ".1.3.6.1.4.1.2378.1.2".to_owned(),
                    mib_name: String::new(),
                    value_type: ValueType::Integer,
                    native_type: "integer".to_owned(),
                    value: ValueKind::Int(42),
                    value_detail: ValueDetail::default(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn filter_over_header_fields() {
        let p = Program::compile(r#"snmp_version == "v2c" && community == "public""#).unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());

        let p = Program::compile(r#"snmp_version == "v1""#).unwrap();
        assert!(!p.eval_bool(&sample_payload()).unwrap());
    }

    #[test]
    fn comparison_and_arithmetic() {
        let p = Program::compile("trap_type * 10 + trap_sub_type == 77").unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());

        let p = Program::compile("uptime_seconds > 100000.0").unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());
    }

    #[test]
    fn null_comparisons() {
        let p = Program::compile("agent_address == nil").unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());

        let p = Program::compile("community != nil").unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());
    }

    #[test]
    fn in_operator() {
        let p = Program::compile(r#"snmp_version in ["v2c", "v3"]"#).unwrap();
        assert!(p.eval_bool(&sample_payload()).unwrap());

        let p = Program::compile(r#"trap_type in [1, 2, 3]"#).unwrap();
        assert!(!p.eval_bool(&sample_payload()).unwrap());
    }

    #[test]
    fn oid_value_builtins() {
        let p = Program::compile(r#"OidValueString(value_list, ".1.3.6.1.4.1.2378.1.1", false)"#)
            .unwrap();
        assert_eq!(p.eval(&sample_payload()).unwrap(), Val::Str("IP-20N".to_owned()));

        let p = Program::compile(r#"OidValueNumber(value_list, ".1.3.6.1.4.1.2378.1.2", false)"#)
            .unwrap();
        assert_eq!(p.eval(&sample_payload()).unwrap(), Val::Float(42.0));

        // 문자열 값은 try_cast 없이는 숫자가 되지 않음
        let p = Program::compile(r#"OidValueNumber(value_list, ".1.3.6.1.4.1.2378.1.1", false)"#)
            .unwrap();
        assert_eq!(p.eval(&sample_payload()).unwrap(), Val::Null);

        let p = Program::compile(r#"OidValueAny(value_list, "SNMPv2-MIB::sysUpTime")"#).unwrap();
        assert_eq!(
            p.eval(&sample_payload()).unwrap(),
            Val::Str("264024.25s".to_owned())
        );
    }

    #[test]
    fn sha256_is_deterministic() {
        let p1 = Program::compile(r#"SHA256(src_address, trap_type)"#).unwrap();
        let p2 = Program::compile(r#"SHA256(src_address, trap_type)"#).unwrap();
        let a = p1.eval_str(&sample_payload()).unwrap();
        let b = p2.eval_str(&sample_payload()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_differs_by_input() {
        let p1 = Program::compile(r#"SHA256(src_address)"#).unwrap();
        let p2 = Program::compile(r#"SHA256(dst_address)"#).unwrap();
        assert_ne!(
            p1.eval_str(&sample_payload()).unwrap(),
            p2.eval_str(&sample_payload()).unwrap()
        );
    }

    #[test]
    fn identifiers_wrap_as_sha256() {
        let p = Program::compile_identifiers(&[
            "src_address".to_owned(),
            "trap_type".to_owned(),
        ])
        .unwrap();
        let direct = Program::compile(r#"SHA256(src_address, trap_type)"#).unwrap();
        assert_eq!(
            p.eval_str(&sample_payload()).unwrap(),
            direct.eval_str(&sample_payload()).unwrap()
        );
    }

    #[test]
    fn map_literal_for_json_format() {
        let p = Program::compile(r#"{"source": src_address, "sub": trap_sub_type}"#).unwrap();
        let v = p.eval_map(&sample_payload()).unwrap();
        match v {
            Val::Map(m) => {
                assert_eq!(m.get("source"), Some(&Val::Str("172.17.1.65".to_owned())));
                assert_eq!(m.get("sub"), Some(&Val::Int(17)));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn merge_map_last_key_wins() {
        let p = Program::compile(r#"MergeMap([{"a": 1, "b": 1}, {"b": 2}])"#).unwrap();
        match p.eval(&sample_payload()).unwrap() {
            Val::Map(m) => {
                assert_eq!(m.get("a"), Some(&Val::Int(1)));
                assert_eq!(m.get("b"), Some(&Val::Int(2)));
            }
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn unknown_identifier_fails_at_compile() {
        let err = Program::compile("bogus_field == 1").unwrap_err();
        assert!(err.to_string().contains("bogus_field"));
    }

    #[test]
    fn unknown_function_fails_at_compile() {
        let err = Program::compile("Md5(src_address)").unwrap_err();
        assert!(err.to_string().contains("Md5"));
    }

    #[test]
    fn arity_checked_at_compile() {
        assert!(Program::compile("OidValueNumber(value_list)").is_err());
        assert!(Program::compile("MergeMap()").is_err());
    }

    #[test]
    fn syntax_error_reported() {
        assert!(Program::compile("src_address ==").is_err());
        assert!(Program::compile("(1 + 2").is_err());
    }

    #[test]
    fn filter_non_bool_is_type_error() {
        let p = Program::compile("src_address").unwrap();
        assert!(p.eval_bool(&sample_payload()).is_err());
    }
}
