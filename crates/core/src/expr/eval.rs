//! 표현식 평가기 — payload 환경에 대한 AST 평가와 내장 함수

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use sha2::{Digest, Sha256};

use crate::error::ExprError;
use crate::message::Payload;
use crate::timefmt::TimeFormatter;
use crate::value::{has_oid_prefix, Value, ValueKind};

use super::parser::{BinOp, Expr, UnOp};

/// 평가 결과 값
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Val>),
    Map(BTreeMap<String, Val>),
    Time(DateTime<FixedOffset>),
}

impl Val {
    /// 타입 이름 (에러 메시지용)
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Time(_) => "time",
        }
    }
}

impl From<ValueKind> for Val {
    fn from(v: ValueKind) -> Self {
        match v {
            ValueKind::Null => Self::Null,
            ValueKind::Int(n) => Self::Int(n),
            ValueKind::Float(f) => Self::Float(f),
            ValueKind::Str(s) => Self::Str(s),
            ValueKind::DateTime(t) => Self::Time(t),
        }
    }
}

/// AST를 payload 환경에 대해 평가합니다.
pub fn eval(expr: &Expr, payload: &Payload) -> Result<Val, ExprError> {
    match expr {
        Expr::Null => Ok(Val::Null),
        Expr::Bool(b) => Ok(Val::Bool(*b)),
        Expr::Int(v) => Ok(Val::Int(*v)),
        Expr::Float(v) => Ok(Val::Float(*v)),
        Expr::Str(v) => Ok(Val::Str(v.clone())),
        Expr::Ident(name) => Ok(resolve_ident(name, payload)),
        Expr::List(items) => Ok(Val::List(
            items
                .iter()
                .map(|e| eval(e, payload))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value_expr) in entries {
                map.insert(key.clone(), eval(value_expr, payload)?);
            }
            Ok(Val::Map(map))
        }
        Expr::Unary(op, inner) => {
            let v = eval(inner, payload)?;
            match (op, v) {
                (UnOp::Not, Val::Bool(b)) => Ok(Val::Bool(!b)),
                (UnOp::Neg, Val::Int(n)) => Ok(Val::Int(-n)),
                (UnOp::Neg, Val::Float(f)) => Ok(Val::Float(-f)),
                (op, v) => Err(ExprError::Type {
                    expected: if *op == UnOp::Not { "bool" } else { "number" }.to_owned(),
                    found: v.type_name().to_owned(),
                }),
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !eval_bool(lhs, payload)? {
                return Ok(Val::Bool(false));
            }
            Ok(Val::Bool(eval_bool(rhs, payload)?))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval_bool(lhs, payload)? {
                return Ok(Val::Bool(true));
            }
            Ok(Val::Bool(eval_bool(rhs, payload)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, payload)?;
            let r = eval(rhs, payload)?;
            eval_binary(*op, l, r)
        }
        Expr::Index(base, index) => {
            let base = eval(base, payload)?;
            let index = eval(index, payload)?;
            match (base, index) {
                (Val::List(items), Val::Int(i)) => {
                    let idx = usize::try_from(i).map_err(|_| ExprError::Eval(
                        format!("negative index {i}"),
                    ))?;
                    Ok(items.get(idx).cloned().unwrap_or(Val::Null))
                }
                (Val::Map(map), Val::Str(key)) => {
                    Ok(map.get(&key).cloned().unwrap_or(Val::Null))
                }
                (base, index) => Err(ExprError::Eval(format!(
                    "cannot index {} with {}",
                    base.type_name(),
                    index.type_name()
                ))),
            }
        }
        Expr::Member(base, name) => {
            let base = eval(base, payload)?;
            match base {
                Val::Map(map) => Ok(map.get(name).cloned().unwrap_or(Val::Null)),
                Val::Null => Ok(Val::Null),
                other => Err(ExprError::Eval(format!(
                    "cannot access member '{name}' of {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|e| eval(e, payload))
                .collect::<Result<Vec<_>, _>>()?;
            call_builtin(name, args)
        }
    }
}

fn eval_bool(expr: &Expr, payload: &Payload) -> Result<bool, ExprError> {
    match eval(expr, payload)? {
        Val::Bool(b) => Ok(b),
        other => Err(ExprError::Type {
            expected: "bool".to_owned(),
            found: other.type_name().to_owned(),
        }),
    }
}

fn eval_binary(op: BinOp, l: Val, r: Val) -> Result<Val, ExprError> {
    match op {
        BinOp::Eq => Ok(Val::Bool(vals_eq(&l, &r))),
        BinOp::Ne => Ok(Val::Bool(!vals_eq(&l, &r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(&l, &r)?;
            Ok(Val::Bool(match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinOp::In => match r {
            Val::List(items) => Ok(Val::Bool(items.iter().any(|item| vals_eq(&l, item)))),
            Val::Map(map) => match l {
                Val::Str(key) => Ok(Val::Bool(map.contains_key(&key))),
                other => Err(ExprError::Type {
                    expected: "string".to_owned(),
                    found: other.type_name().to_owned(),
                }),
            },
            other => Err(ExprError::Type {
                expected: "list or map".to_owned(),
                found: other.type_name().to_owned(),
            }),
        },
        BinOp::Add => match (l, r) {
            (Val::Str(a), Val::Str(b)) => Ok(Val::Str(a + &b)),
            (l, r) => numeric(op, l, r),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => numeric(op, l, r),
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval"),
    }
}

fn numeric(op: BinOp, l: Val, r: Val) -> Result<Val, ExprError> {
    match (l, r) {
        (Val::Int(a), Val::Int(b)) => match op {
            BinOp::Add => Ok(Val::Int(a.wrapping_add(b))),
            BinOp::Sub => Ok(Val::Int(a.wrapping_sub(b))),
            BinOp::Mul => Ok(Val::Int(a.wrapping_mul(b))),
            BinOp::Div => {
                if b == 0 {
                    Err(ExprError::Eval("division by zero".to_owned()))
                } else {
                    Ok(Val::Float(a as f64 / b as f64))
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    Err(ExprError::Eval("division by zero".to_owned()))
                } else {
                    Ok(Val::Int(a % b))
                }
            }
            _ => unreachable!(),
        },
        (l, r) => {
            let a = as_float(&l)?;
            let b = as_float(&r)?;
            match op {
                BinOp::Add => Ok(Val::Float(a + b)),
                BinOp::Sub => Ok(Val::Float(a - b)),
                BinOp::Mul => Ok(Val::Float(a * b)),
                BinOp::Div => Ok(Val::Float(a / b)),
                BinOp::Mod => Ok(Val::Float(a % b)),
                _ => unreachable!(),
            }
        }
    }
}

fn as_float(v: &Val) -> Result<f64, ExprError> {
    match v {
        Val::Int(n) => Ok(*n as f64),
        Val::Float(f) => Ok(*f),
        other => Err(ExprError::Type {
            expected: "number".to_owned(),
            found: other.type_name().to_owned(),
        }),
    }
}

fn vals_eq(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Int(a), Val::Float(b)) | (Val::Float(b), Val::Int(a)) => (*a as f64) == *b,
        (l, r) => l == r,
    }
}

fn compare(l: &Val, r: &Val) -> Result<std::cmp::Ordering, ExprError> {
    match (l, r) {
        (Val::Str(a), Val::Str(b)) => Ok(a.cmp(b)),
        (Val::Time(a), Val::Time(b)) => Ok(a.cmp(b)),
        (l, r) => {
            let a = as_float(l)?;
            let b = as_float(r)?;
            a.partial_cmp(&b)
                .ok_or_else(|| ExprError::Eval("incomparable numbers".to_owned()))
        }
    }
}

// ─── 환경 ──────────────────────────────────────────────────────────

fn resolve_ident(name: &str, payload: &Payload) -> Val {
    match name {
        "time" => Val::Time(payload.time.into()),
        "uptime_seconds" => opt_float(payload.uptime_seconds),
        "src_address" => Val::Str(payload.src_address.clone()),
        "src_port" => Val::Int(i64::from(payload.src_port)),
        "dst_address" => Val::Str(payload.dst_address.clone()),
        "dst_port" => Val::Int(i64::from(payload.dst_port)),
        "agent_address" => opt_str(payload.agent_address.as_deref()),
        "pdu_version" => Val::Str(payload.pdu_version.clone()),
        "snmp_version" => Val::Str(payload.snmp_version.clone()),
        "community" => opt_str(payload.community.as_deref()),
        "enterprise_oid" => opt_str(payload.enterprise_oid.as_deref()),
        "enterprise_mib_name" => opt_str(payload.enterprise_mib_name.as_deref()),
        "user" => opt_str(payload.user.as_deref()),
        "context" => opt_str(payload.context.as_deref()),
        "description" => opt_str(payload.description.as_deref()),
        "trap_type" => opt_int(payload.trap_type),
        "trap_sub_type" => opt_int(payload.trap_sub_type),
        "value_list" | "values" => Val::List(payload.values.iter().map(value_to_val).collect()),
        "correlate" => match &payload.correlate {
            None => Val::Null,
            Some(c) => {
                let mut map = BTreeMap::new();
                map.insert("id".to_owned(), Val::Str(c.id.clone()));
                map.insert("raised_time".to_owned(), Val::Time(c.raised_time.into()));
                map.insert("duration_seconds".to_owned(), Val::Float(c.duration_seconds));
                Val::Map(map)
            }
        },
        // validate()가 걸러내므로 도달하지 않음
        _ => Val::Null,
    }
}

fn opt_str(v: Option<&str>) -> Val {
    v.map_or(Val::Null, |s| Val::Str(s.to_owned()))
}

fn opt_int(v: Option<i64>) -> Val {
    v.map_or(Val::Null, Val::Int)
}

fn opt_float(v: Option<f64>) -> Val {
    v.map_or(Val::Null, Val::Float)
}

fn value_to_val(v: &Value) -> Val {
    let mut detail = BTreeMap::new();
    if let Some(raw) = &v.value_detail.raw {
        detail.insert("raw".to_owned(), Val::from(raw.clone()));
    }
    if let Some(hex) = &v.value_detail.hex {
        detail.insert("hex".to_owned(), Val::Str(hex.clone()));
    }
    let mut map = BTreeMap::new();
    map.insert("oid".to_owned(), Val::Str(v.oid.clone()));
    map.insert("mib_name".to_owned(), Val::Str(v.mib_name.clone()));
    map.insert("type".to_owned(), Val::Str(v.value_type.as_str().to_owned()));
    map.insert("native_type".to_owned(), Val::Str(v.native_type.clone()));
    map.insert("value".to_owned(), Val::from(v.value.clone()));
    map.insert("value_detail".to_owned(), Val::Map(detail));
    Val::Map(map)
}

// ─── 내장 함수 ─────────────────────────────────────────────────────

fn call_builtin(name: &str, args: Vec<Val>) -> Result<Val, ExprError> {
    match name {
        "SHA256" => sha256_hex(&args),
        "MergeMap" => merge_map(args),
        "OidValueAny" => {
            let (values, prefix) = oid_args(&args)?;
            Ok(oid_value(values, prefix).cloned().unwrap_or(Val::Null))
        }
        "OidValueNumber" => {
            let (values, prefix) = oid_args(&args)?;
            let try_cast = bool_arg(&args[2], "OidValueNumber")?;
            Ok(match oid_value(values, prefix) {
                Some(Val::Int(n)) => Val::Float(*n as f64),
                Some(Val::Float(f)) => Val::Float(*f),
                Some(other) if try_cast => match render_scalar(other).parse::<f64>() {
                    Ok(f) => Val::Float(f),
                    Err(_) => Val::Null,
                },
                _ => Val::Null,
            })
        }
        "OidValueString" => {
            let (values, prefix) = oid_args(&args)?;
            let try_cast = bool_arg(&args[2], "OidValueString")?;
            Ok(match oid_value(values, prefix) {
                Some(Val::Str(s)) => Val::Str(s.clone()),
                Some(Val::Null) | None => Val::Null,
                Some(other) if try_cast => Val::Str(render_scalar(other)),
                _ => Val::Null,
            })
        }
        // validate()가 걸러내므로 도달하지 않음
        other => Err(ExprError::UnknownFunction(other.to_owned())),
    }
}

/// 인자 벡터의 결정적 JSON 인코딩을 해시합니다.
///
/// 맵 키는 정렬되고 시간 값은 RFC 3339 나노초로 고정되므로, 같은
/// 인자는 언제나 같은 다이제스트를 냅니다.
fn sha256_hex(args: &[Val]) -> Result<Val, ExprError> {
    let encoded: Vec<serde_json::Value> = args
        .iter()
        .map(|v| val_to_json(v, &TimeFormatter::default()))
        .collect();
    let json = serde_json::to_string(&encoded)
        .map_err(|e| ExprError::Eval(format!("failed encoding SHA256 arguments: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(Val::Str(hex::encode(hasher.finalize())))
}

fn merge_map(mut args: Vec<Val>) -> Result<Val, ExprError> {
    let arg = args.remove(0);
    let Val::List(items) = arg else {
        return Err(ExprError::Type {
            expected: "list of maps".to_owned(),
            found: arg.type_name().to_owned(),
        });
    };
    let mut out = BTreeMap::new();
    for item in items {
        let Val::Map(map) = item else {
            return Err(ExprError::Type {
                expected: "map".to_owned(),
                found: item.type_name().to_owned(),
            });
        };
        out.extend(map);
    }
    Ok(Val::Map(out))
}

fn oid_args<'a>(args: &'a [Val]) -> Result<(&'a [Val], &'a str), ExprError> {
    let Val::List(values) = &args[0] else {
        return Err(ExprError::Type {
            expected: "value list".to_owned(),
            found: args[0].type_name().to_owned(),
        });
    };
    let Val::Str(prefix) = &args[1] else {
        return Err(ExprError::Type {
            expected: "string".to_owned(),
            found: args[1].type_name().to_owned(),
        });
    };
    Ok((values, prefix))
}

fn bool_arg(v: &Val, func: &str) -> Result<bool, ExprError> {
    match v {
        Val::Bool(b) => Ok(*b),
        other => Err(ExprError::Eval(format!(
            "{func} expects a boolean try_cast, got {}",
            other.type_name()
        ))),
    }
}

/// 값 리스트에서 prefix가 일치하는 첫 값을 찾습니다.
fn oid_value<'a>(values: &'a [Val], prefix: &str) -> Option<&'a Val> {
    for item in values {
        let Val::Map(map) = item else { continue };
        let oid = map.get("oid").and_then(as_str).unwrap_or("");
        let mib_name = map.get("mib_name").and_then(as_str).unwrap_or("");
        if has_oid_prefix(prefix, oid, mib_name) {
            return map.get("value");
        }
    }
    None
}

fn as_str(v: &Val) -> Option<&str> {
    match v {
        Val::Str(s) => Some(s),
        _ => None,
    }
}

fn render_scalar(v: &Val) -> String {
    match v {
        Val::Null => String::new(),
        Val::Bool(b) => b.to_string(),
        Val::Int(n) => n.to_string(),
        Val::Float(f) => f.to_string(),
        Val::Str(s) => s.clone(),
        Val::Time(t) => t.to_rfc3339_opts(SecondsFormat::Nanos, true),
        other => serde_json::to_string(&val_to_json(other, &TimeFormatter::default()))
            .unwrap_or_default(),
    }
}

/// 평가 값을 시간 레이아웃을 적용하여 JSON 값으로 변환합니다.
pub fn val_to_json(v: &Val, tf: &TimeFormatter) -> serde_json::Value {
    match v {
        Val::Null => serde_json::Value::Null,
        Val::Bool(b) => serde_json::Value::from(*b),
        Val::Int(n) => serde_json::Value::from(*n),
        Val::Float(f) => serde_json::Value::from(*f),
        Val::Str(s) => serde_json::Value::from(s.clone()),
        Val::List(items) => {
            serde_json::Value::Array(items.iter().map(|i| val_to_json(i, tf)).collect())
        }
        Val::Map(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                out.insert(k.clone(), val_to_json(val, tf));
            }
            serde_json::Value::Object(out)
        }
        Val::Time(t) => tf.to_json(*t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vals_eq_coerces_int_float() {
        assert!(vals_eq(&Val::Int(42), &Val::Float(42.0)));
        assert!(!vals_eq(&Val::Int(42), &Val::Float(42.5)));
        assert!(vals_eq(&Val::Null, &Val::Null));
        assert!(!vals_eq(&Val::Null, &Val::Int(0)));
    }

    #[test]
    fn merge_map_rejects_non_maps() {
        let res = merge_map(vec![Val::List(vec![Val::Int(1)])]);
        assert!(res.is_err());
    }

    #[test]
    fn render_scalar_formats() {
        assert_eq!(render_scalar(&Val::Int(5)), "5");
        assert_eq!(render_scalar(&Val::Str("abc".to_owned())), "abc");
        assert_eq!(render_scalar(&Val::Bool(true)), "true");
    }

    #[test]
    fn val_to_json_nested() {
        let mut m = BTreeMap::new();
        m.insert("k".to_owned(), Val::List(vec![Val::Int(1), Val::Null]));
        let json = val_to_json(&Val::Map(m), &TimeFormatter::default());
        assert_eq!(json, serde_json::json!({"k": [1, null]}));
    }
}
