//! 관계형 백엔드 (postgres / mysql)
//!
//! 두 dialect가 스키마 하나를 공유합니다:
//! `trap2json_correlate(key_ PRIMARY KEY, id, rts, rtn)` + `rts` 인덱스.
//! 마이그레이션은 소유자 책임이라 open 시점에 테이블/인덱스가 없으면
//! 만듭니다. `set`은 upsert, `pop`은 한 트랜잭션 안의
//! `SELECT … FOR UPDATE` + `DELETE`, `cleanup`은 TTL 스윕입니다.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::Row as _;

use crate::error::CorrelateError;

use super::{Backend, Data};

const MIGRATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug)]
enum Pool {
    Postgres(sqlx::PgPool),
    MySql(sqlx::MySqlPool),
}

/// postgres/mysql 공용 저장소
#[derive(Debug)]
pub struct SqlStore {
    pool: Pool,
    ttl: std::time::Duration,
    timeout: std::time::Duration,
}

impl SqlStore {
    /// 풀을 만들고 스키마를 마이그레이션합니다. 실패는 기동 시
    /// fatal입니다.
    pub async fn open(
        url: &str,
        ttl: std::time::Duration,
        timeout: std::time::Duration,
    ) -> Result<Self, CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        let pool = if url.starts_with("postgres://") {
            Pool::Postgres(
                PgPoolOptions::new()
                    .acquire_timeout(MIGRATION_TIMEOUT)
                    .connect(url)
                    .await
                    .map_err(backend_err)?,
            )
        } else {
            Pool::MySql(
                MySqlPoolOptions::new()
                    .acquire_timeout(MIGRATION_TIMEOUT)
                    .connect(url)
                    .await
                    .map_err(backend_err)?,
            )
        };
        let store = Self { pool, ttl, timeout };
        tokio::time::timeout(MIGRATION_TIMEOUT, store.migrate())
            .await
            .map_err(|_| CorrelateError::Timeout)??;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        let exists_query = "select count(*) from information_schema.tables \
                            where table_name = 'trap2json_correlate'";
        let create_table = "create table trap2json_correlate (\
                            key_ text primary key, \
                            id text not null, \
                            rts bigint not null, \
                            rtn bigint not null)";
        // mysql은 text 컬럼 primary key에 길이가 필요함
        let create_table_mysql = "create table trap2json_correlate (\
                                  key_ varchar(128) primary key, \
                                  id text not null, \
                                  rts bigint not null, \
                                  rtn bigint not null)";
        let create_index = "create index rts_idx on trap2json_correlate(rts)";
        match &self.pool {
            Pool::Postgres(pool) => {
                let exists = sqlx::query_scalar::<_, i64>(exists_query)
                    .fetch_one(pool)
                    .await
                    .map_err(backend_err)?
                    > 0;
                if !exists {
                    sqlx::query(create_table)
                        .execute(pool)
                        .await
                        .map_err(backend_err)?;
                    sqlx::query(create_index)
                        .execute(pool)
                        .await
                        .map_err(backend_err)?;
                }
            }
            Pool::MySql(pool) => {
                let exists: bool = sqlx::query_scalar::<_, i64>(exists_query)
                    .fetch_one(pool)
                    .await
                    .map_err(backend_err)?
                    > 0;
                if !exists {
                    sqlx::query(create_table_mysql)
                        .execute(pool)
                        .await
                        .map_err(backend_err)?;
                    sqlx::query(create_index)
                        .execute(pool)
                        .await
                        .map_err(backend_err)?;
                }
            }
        }
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CorrelateError>>,
    ) -> Result<T, CorrelateError> {
        if self.timeout.is_zero() {
            return fut.await;
        }
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CorrelateError::Timeout)?
    }

    async fn pop_postgres(pool: &sqlx::PgPool, key: &str) -> Result<Option<Data>, CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        let mut tx = pool.begin().await.map_err(backend_err)?;
        let row = sqlx::query(
            "select id, rts, rtn from trap2json_correlate where key_ = $1 limit 1 for update",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;
        let Some(row) = row else {
            tx.commit().await.map_err(backend_err)?;
            return Ok(None);
        };
        let data = Data {
            id: row.get("id"),
            rts: row.get("rts"),
            rtn: row.get("rtn"),
        };
        sqlx::query("delete from trap2json_correlate where key_ = $1")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(Some(data))
    }

    async fn pop_mysql(pool: &sqlx::MySqlPool, key: &str) -> Result<Option<Data>, CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        let mut tx = pool.begin().await.map_err(backend_err)?;
        let row = sqlx::query(
            "select id, rts, rtn from trap2json_correlate where key_ = ? limit 1 for update",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend_err)?;
        let Some(row) = row else {
            tx.commit().await.map_err(backend_err)?;
            return Ok(None);
        };
        let data = Data {
            id: row.get("id"),
            rts: row.get("rts"),
            rtn: row.get("rtn"),
        };
        sqlx::query("delete from trap2json_correlate where key_ = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(Some(data))
    }
}

#[async_trait]
impl Backend for SqlStore {
    async fn pop(&self, key: &str) -> Result<Option<Data>, CorrelateError> {
        match &self.pool {
            Pool::Postgres(pool) => self.with_timeout(Self::pop_postgres(pool, key)).await,
            Pool::MySql(pool) => self.with_timeout(Self::pop_mysql(pool, key)).await,
        }
    }

    async fn set(&self, key: &str, data: Data) -> Result<(), CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        match &self.pool {
            Pool::Postgres(pool) => {
                self.with_timeout(async {
                    sqlx::query(
                        "insert into trap2json_correlate(key_, id, rts, rtn) \
                         values ($1, $2, $3, $4) \
                         on conflict (key_) do update set \
                         id = excluded.id, rts = excluded.rts, rtn = excluded.rtn",
                    )
                    .bind(key)
                    .bind(&data.id)
                    .bind(data.rts)
                    .bind(data.rtn)
                    .execute(pool)
                    .await
                    .map(|_| ())
                    .map_err(backend_err)
                })
                .await
            }
            Pool::MySql(pool) => {
                self.with_timeout(async {
                    sqlx::query(
                        "insert into trap2json_correlate(key_, id, rts, rtn) \
                         values (?, ?, ?, ?) \
                         on duplicate key update \
                         id = values(id), rts = values(rts), rtn = values(rtn)",
                    )
                    .bind(key)
                    .bind(&data.id)
                    .bind(data.rts)
                    .bind(data.rtn)
                    .execute(pool)
                    .await
                    .map(|_| ())
                    .map_err(backend_err)
                })
                .await
            }
        }
    }

    async fn cleanup(&self) -> Result<(), CorrelateError> {
        let backend_err = |e: sqlx::Error| CorrelateError::Backend(e.to_string());
        let older_than = Utc::now().timestamp() - self.ttl.as_secs() as i64;
        match &self.pool {
            Pool::Postgres(pool) => {
                self.with_timeout(async {
                    sqlx::query("delete from trap2json_correlate where rts < $1")
                        .bind(older_than)
                        .execute(pool)
                        .await
                        .map(|_| ())
                        .map_err(backend_err)
                })
                .await
            }
            Pool::MySql(pool) => {
                self.with_timeout(async {
                    sqlx::query("delete from trap2json_correlate where rts < ?")
                        .bind(older_than)
                        .execute(pool)
                        .await
                        .map(|_| ())
                        .map_err(backend_err)
                })
                .await
            }
        }
    }

    async fn close(&self) -> Result<(), CorrelateError> {
        match &self.pool {
            Pool::Postgres(pool) => pool.close().await,
            Pool::MySql(pool) => pool.close().await,
        }
        Ok(())
    }
}
