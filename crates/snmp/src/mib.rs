//! MIB 데이터베이스 — OID를 qualified MIB 이름으로 변환
//!
//! 기동 시 한 번 적재되고 이후 읽기 전용입니다. 적재기는 외부
//! 협력자이며, 여기서는 `OID 이름 [타입]` 한 줄 형식의 매핑 파일
//! 디렉토리를 읽습니다. 일부 모듈 적재 실패는 경고일 뿐 치명적이지
//! 않습니다(미해석 OID는 빈 이름으로 처리).
//!
//! 변환은 최장 prefix 매칭입니다: 등록된 prefix의 qualified 이름 뒤에
//! 남은 sub-index를 붙입니다.
//! 예: `1.3.6.1.2.1.1.3 → SNMPv2-MIB::sysUpTime`이 등록되어 있으면
//! `.1.3.6.1.2.1.1.3.0`은 `SNMPv2-MIB::sysUpTime.0`이 됩니다.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// OID → 이름/타입 매핑 테이블
#[derive(Debug, Default)]
pub struct MibDb {
    /// 선행 점이 없는 OID → qualified 이름
    names: HashMap<String, String>,
    /// 선행 점이 없는 OID → MIB 타입명 (예: DateAndTime)
    types: HashMap<String, String>,
}

static GLOBAL: OnceLock<MibDb> = OnceLock::new();

impl MibDb {
    /// 빈 테이블을 만듭니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 매핑 하나를 등록합니다. OID의 선행 점은 무시됩니다.
    pub fn insert(&mut self, oid: &str, name: &str, mib_type: Option<&str>) {
        let oid = oid.trim_start_matches('.').to_owned();
        if let Some(t) = mib_type {
            self.types.insert(oid.clone(), t.to_owned());
        }
        self.names.insert(oid, name.to_owned());
    }

    /// 디렉토리의 모든 매핑 파일을 읽습니다.
    ///
    /// 파일의 각 줄은 `OID 이름 [타입]`이며, `#`으로 시작하는 줄과 빈
    /// 줄은 무시합니다. 반환값은 (적재된 파일 수, 실패한 파일 이름들)
    /// 입니다.
    pub fn load_dir(&mut self, dir: &Path) -> (usize, Vec<String>) {
        let mut loaded = 0usize;
        let mut failed = Vec::new();
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                failed.push(format!("{}: {e}", dir.display()));
                return (0, failed);
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    for line in content.lines() {
                        let line = line.trim();
                        if line.is_empty() || line.starts_with('#') {
                            continue;
                        }
                        let mut parts = line.split_whitespace();
                        let (Some(oid), Some(name)) = (parts.next(), parts.next()) else {
                            continue;
                        };
                        self.insert(oid, name, parts.next());
                    }
                    loaded += 1;
                }
                Err(e) => failed.push(format!("{}: {e}", path.display())),
            }
        }
        (loaded, failed)
    }

    /// OID를 qualified 이름으로 변환합니다.
    fn translate(&self, oid: &str) -> Option<String> {
        let trimmed = oid.trim_start_matches('.');
        if trimmed.is_empty() {
            return None;
        }
        let mut prefix = trimmed;
        loop {
            if let Some(name) = self.names.get(prefix) {
                let suffix = &trimmed[prefix.len()..];
                return Some(format!("{name}{suffix}"));
            }
            match prefix.rfind('.') {
                Some(idx) => prefix = &prefix[..idx],
                None => return None,
            }
        }
    }

    /// OID에 대한 MIB 타입 힌트를 반환합니다 (정확히 일치할 때만).
    fn type_hint(&self, oid: &str) -> Option<&str> {
        self.types
            .get(oid.trim_start_matches('.'))
            .map(String::as_str)
    }
}

/// 전역 테이블을 설치합니다. 이미 설치되어 있으면 false를 반환합니다.
pub fn init(db: MibDb) -> bool {
    GLOBAL.set(db).is_ok()
}

/// OID를 qualified MIB 이름으로 변환합니다. 미해석이면 None.
pub fn translate(oid: &str) -> Option<String> {
    GLOBAL.get().and_then(|db| db.translate(oid))
}

/// OID의 MIB 타입 힌트를 반환합니다.
pub fn type_hint(oid: &str) -> Option<&'static str> {
    GLOBAL.get().and_then(|db| db.type_hint(oid))
}

#[cfg(test)]
pub(crate) fn init_test_fixture() {
    let mut db = MibDb::new();
    db.insert("1.3.6.1.2.1.1.3", "SNMPv2-MIB::sysUpTime", None);
    db.insert("1.3.6.1.6.3.1.1.4.1", "SNMPv2-MIB::snmpTrapOID", None);
    db.insert("1.3.6.1.6.3.1.1.5.3", "IF-MIB::linkDown", None);
    db.insert("1.3.6.1.2.1.2.2.1.1", "IF-MIB::ifIndex", None);
    db.insert("1.3.6.1.4.1.2378.9.9.9", "TEST-MIB::lastChange", Some("DateAndTime"));
    let _ = init(db);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_exact_and_subindex() {
        init_test_fixture();
        assert_eq!(
            translate(".1.3.6.1.2.1.1.3").as_deref(),
            Some("SNMPv2-MIB::sysUpTime")
        );
        assert_eq!(
            translate(".1.3.6.1.2.1.1.3.0").as_deref(),
            Some("SNMPv2-MIB::sysUpTime.0")
        );
        assert_eq!(
            translate("1.3.6.1.2.1.2.2.1.1.42").as_deref(),
            Some("IF-MIB::ifIndex.42")
        );
    }

    #[test]
    fn translate_unknown_returns_none() {
        init_test_fixture();
        assert_eq!(translate(".1.2.840.99999"), None);
        assert_eq!(translate(""), None);
    }

    #[test]
    fn type_hint_exact_match_only() {
        init_test_fixture();
        assert_eq!(type_hint(".1.3.6.1.4.1.2378.9.9.9"), Some("DateAndTime"));
        assert_eq!(type_hint(".1.3.6.1.4.1.2378.9.9.9.0"), None);
        assert_eq!(type_hint(".1.3.6.1.2.1.1.3"), None);
    }

    #[test]
    fn load_dir_parses_mapping_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("test.mibmap"),
            "# comment\n1.3.6.1.9.9 EXAMPLE-MIB::example\n1.3.6.1.9.8 EXAMPLE-MIB::stamp DateAndTime\n\n",
        )
        .unwrap();
        let mut db = MibDb::new();
        let (loaded, failed) = db.load_dir(dir.path());
        assert_eq!(loaded, 1);
        assert!(failed.is_empty());
        assert_eq!(
            db.translate("1.3.6.1.9.9.1").as_deref(),
            Some("EXAMPLE-MIB::example.1")
        );
        assert_eq!(db.type_hint("1.3.6.1.9.8"), Some("DateAndTime"));
    }

    #[test]
    fn load_dir_missing_directory_reports_failure() {
        let mut db = MibDb::new();
        let (loaded, failed) = db.load_dir(Path::new("/nonexistent/mibs"));
        assert_eq!(loaded, 0);
        assert_eq!(failed.len(), 1);
    }
}
