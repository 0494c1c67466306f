//! 상관 상태 백엔드 — TTL 저장소의 공통 인터페이스
//!
//! 요구되는 원자성은 둘뿐입니다: `set`은 upsert, `pop`은 원자적
//! get-and-delete. 이 둘만 지켜지면 한 키가 raise → clear → 재raise를
//! 거쳐도 이벤트를 잃지 않습니다(키 하나에 미해제 raise는 항상 최대
//! 하나, last-writer wins).
//!
//! 백엔드는 URL 스킴으로 선택합니다:
//!
//! | 스킴 | 저장소 |
//! |---|---|
//! | `sled://[path]` | 내장 KV. 경로가 비면 임시(인메모리성) 저장소 |
//! | `redis://…` | 단일 노드 redis, 네이티브 TTL |
//! | `postgres://…`, `mysql://…` | 공용 스키마의 관계형 저장소 |

mod embedded;
mod redis_store;
mod sql;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CorrelateError;

/// 저장되는 raise 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    /// raise 시각 (초)
    pub rts: i64,
    /// raise 시각 (나노초 부분)
    pub rtn: i64,
    /// raise에 부여된 상관 ID
    pub id: String,
}

impl Data {
    /// raise 시각을 복원합니다.
    pub fn time(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.rts, self.rtn as u32)
            .single()
            .unwrap_or_default()
    }
}

/// TTL 저장소 인터페이스
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// 키를 원자적으로 읽고 삭제합니다. 없으면 `Ok(None)`.
    async fn pop(&self, key: &str) -> Result<Option<Data>, CorrelateError>;

    /// 키를 upsert합니다 (TTL 포함).
    async fn set(&self, key: &str, data: Data) -> Result<(), CorrelateError>;

    /// TTL이 지난 레코드를 지웁니다. 네이티브 TTL 백엔드는 no-op.
    async fn cleanup(&self) -> Result<(), CorrelateError>;

    /// 저장소를 닫습니다.
    async fn close(&self) -> Result<(), CorrelateError>;

    /// 네이티브 TTL 지원 여부. false면 엔진이 주기적으로
    /// [`Backend::cleanup`]을 호출합니다.
    fn native_ttl(&self) -> bool {
        false
    }
}

/// backend_url 스킴에 따라 백엔드를 엽니다.
pub async fn open(
    url: &str,
    ttl: std::time::Duration,
    timeout: std::time::Duration,
) -> Result<Box<dyn Backend>, CorrelateError> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| CorrelateError::InvalidBackendUrl(url.to_owned()))?;
    match scheme {
        "sled" => Ok(Box::new(embedded::EmbeddedStore::open(url, ttl)?)),
        "redis" => Ok(Box::new(redis_store::RedisStore::open(url, ttl, timeout)?)),
        "postgres" | "mysql" => Ok(Box::new(sql::SqlStore::open(url, ttl, timeout).await?)),
        other => Err(CorrelateError::InvalidBackendUrl(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_roundtrips_time() {
        let now = Utc::now();
        let data = Data {
            rts: now.timestamp(),
            rtn: i64::from(now.timestamp_subsec_nanos()),
            id: "id-1".to_owned(),
        };
        assert_eq!(data.time(), now);
    }

    #[tokio::test]
    async fn unknown_scheme_is_rejected() {
        let err = open(
            "memcached://localhost",
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CorrelateError::InvalidBackendUrl(_)));

        let err = open(
            "not a url",
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CorrelateError::InvalidBackendUrl(_)));
    }
}
