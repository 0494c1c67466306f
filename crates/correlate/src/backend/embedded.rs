//! 내장 KV 백엔드 (sled)
//!
//! `sled://path`는 디렉토리 저장소, `sled://`(빈 경로)는 임시 저장소
//! 입니다. sled에는 네이티브 TTL이 없으므로 만료 시각을 레코드에
//! 함께 저장하고, 주기적 [`cleanup`](super::Backend::cleanup) 스윕과
//! `pop` 시점 검사로 TTL을 강제합니다.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CorrelateError;

use super::{Backend, Data};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    data: Data,
    /// 만료 시각 (unix 초)
    deadline: i64,
}

/// sled 기반 내장 저장소
pub struct EmbeddedStore {
    db: sled::Db,
    ttl: std::time::Duration,
}

impl EmbeddedStore {
    /// 저장소를 엽니다. 실패는 기동 시 fatal입니다.
    pub fn open(url: &str, ttl: std::time::Duration) -> Result<Self, CorrelateError> {
        let path = url.strip_prefix("sled://").unwrap_or_default();
        let db = if path.is_empty() {
            sled::Config::new()
                .temporary(true)
                .open()
                .map_err(|e| CorrelateError::Backend(e.to_string()))?
        } else {
            sled::open(path).map_err(|e| CorrelateError::Backend(e.to_string()))?
        };
        Ok(Self { db, ttl })
    }

    fn deadline(&self) -> i64 {
        Utc::now().timestamp() + self.ttl.as_secs() as i64
    }
}

#[async_trait]
impl Backend for EmbeddedStore {
    async fn pop(&self, key: &str) -> Result<Option<Data>, CorrelateError> {
        // remove는 이전 값을 원자적으로 반환함
        let removed = self
            .db
            .remove(key)
            .map_err(|e| CorrelateError::Backend(e.to_string()))?;
        let Some(bytes) = removed else {
            return Ok(None);
        };
        let entry: StoredEntry = serde_json::from_slice(&bytes)
            .map_err(|e| CorrelateError::Decode(e.to_string()))?;
        if entry.deadline < Utc::now().timestamp() {
            // TTL이 지난 raise는 없는 것으로 취급
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    async fn set(&self, key: &str, data: Data) -> Result<(), CorrelateError> {
        let entry = StoredEntry {
            data,
            deadline: self.deadline(),
        };
        let bytes =
            serde_json::to_vec(&entry).map_err(|e| CorrelateError::Decode(e.to_string()))?;
        self.db
            .insert(key, bytes)
            .map_err(|e| CorrelateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CorrelateError> {
        let now = Utc::now().timestamp();
        for item in self.db.iter() {
            let (key, bytes) = item.map_err(|e| CorrelateError::Backend(e.to_string()))?;
            let expired = serde_json::from_slice::<StoredEntry>(&bytes)
                .map(|entry| entry.deadline < now)
                .unwrap_or(true);
            if expired {
                self.db
                    .remove(key)
                    .map_err(|e| CorrelateError::Backend(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), CorrelateError> {
        self.db
            .flush_async()
            .await
            .map_err(|e| CorrelateError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ttl_secs: u64) -> EmbeddedStore {
        EmbeddedStore::open("sled://", std::time::Duration::from_secs(ttl_secs)).unwrap()
    }

    fn data(id: &str) -> Data {
        Data {
            rts: Utc::now().timestamp(),
            rtn: 0,
            id: id.to_owned(),
        }
    }

    #[tokio::test]
    async fn set_then_pop_then_absent() {
        let store = store(60);
        store.set("k1", data("id-1")).await.unwrap();

        let popped = store.pop("k1").await.unwrap().expect("raise stored");
        assert_eq!(popped.id, "id-1");

        // pop은 get-and-delete이므로 두 번째는 없음
        assert!(store.pop("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_is_an_upsert() {
        let store = store(60);
        store.set("k1", data("first")).await.unwrap();
        store.set("k1", data("second")).await.unwrap();
        let popped = store.pop("k1").await.unwrap().unwrap();
        assert_eq!(popped.id, "second");
    }

    #[tokio::test]
    async fn expired_entries_are_invisible() {
        let store = store(0);
        store.set("k1", data("id-1")).await.unwrap();
        // ttl 0 → 즉시 만료 취급은 아님(초 단위 절삭), deadline을 과거로 밀어넣어 검증
        let entry = StoredEntry {
            data: data("old"),
            deadline: Utc::now().timestamp() - 10,
        };
        store
            .db
            .insert("k2", serde_json::to_vec(&entry).unwrap())
            .unwrap();
        assert!(store.pop("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired() {
        let store = store(3600);
        store.set("fresh", data("a")).await.unwrap();
        let expired = StoredEntry {
            data: data("b"),
            deadline: Utc::now().timestamp() - 1,
        };
        store
            .db
            .insert("stale", serde_json::to_vec(&expired).unwrap())
            .unwrap();

        store.cleanup().await.unwrap();
        assert!(store.db.get("stale").unwrap().is_none());
        assert!(store.db.get("fresh").unwrap().is_some());
    }

    #[tokio::test]
    async fn directory_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sled://{}", dir.path().display());
        {
            let store =
                EmbeddedStore::open(&url, std::time::Duration::from_secs(60)).unwrap();
            store.set("k1", data("persisted")).await.unwrap();
            store.close().await.unwrap();
        }
        let store = EmbeddedStore::open(&url, std::time::Duration::from_secs(60)).unwrap();
        assert_eq!(store.pop("k1").await.unwrap().unwrap().id, "persisted");
    }
}
