//! redis 백엔드
//!
//! 네이티브 TTL(`SET … EX`)과 원자적 get-and-delete(`GETDEL`)를
//! 그대로 씁니다. `cleanup`은 no-op입니다.

use async_trait::async_trait;
use redis::AsyncCommands as _;

use crate::error::CorrelateError;

use super::{Backend, Data};

/// 단일 노드 redis 저장소
pub struct RedisStore {
    client: redis::Client,
    ttl: std::time::Duration,
    timeout: std::time::Duration,
}

impl RedisStore {
    /// 클라이언트를 만듭니다. 실제 연결은 첫 호출에서 맺어집니다.
    pub fn open(
        url: &str,
        ttl: std::time::Duration,
        timeout: std::time::Duration,
    ) -> Result<Self, CorrelateError> {
        let client = redis::Client::open(url).map_err(|e| CorrelateError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            ttl,
            timeout,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CorrelateError> {
        self.with_timeout(self.client.get_multiplexed_async_connection())
            .await?
            .map_err(|e| CorrelateError::Backend(e.to_string()))
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, CorrelateError> {
        if self.timeout.is_zero() {
            return Ok(fut.await);
        }
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CorrelateError::Timeout)
    }
}

#[async_trait]
impl Backend for RedisStore {
    async fn pop(&self, key: &str) -> Result<Option<Data>, CorrelateError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self
            .with_timeout(conn.get_del(key))
            .await?
            .map_err(|e| CorrelateError::Backend(e.to_string()))?;
        match value {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CorrelateError::Decode(e.to_string())),
        }
    }

    async fn set(&self, key: &str, data: Data) -> Result<(), CorrelateError> {
        let raw =
            serde_json::to_string(&data).map_err(|e| CorrelateError::Decode(e.to_string()))?;
        let mut conn = self.connection().await?;
        let ttl_secs = self.ttl.as_secs().max(1);
        let () = self
            .with_timeout(conn.set_ex(key, raw, ttl_secs))
            .await?
            .map_err(|e| CorrelateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CorrelateError> {
        // TTL은 redis가 직접 관리
        Ok(())
    }

    async fn close(&self) -> Result<(), CorrelateError> {
        Ok(())
    }

    fn native_ttl(&self) -> bool {
        true
    }
}
