//! Zabbix 호스트 조회 — 전략별 조회와 백그라운드 캐시 갱신
//!
//! advanced 설정(`db_url`)이 있으면 Zabbix DB에서
//! `(프록시 또는 HA 노드, 호스트명)` 매핑을 읽어 인메모리 캐시에
//! 보관합니다. 캐시는 RwLock으로 보호되며 읽기는 메시지 단위,
//! 쓰기는 단일 갱신 태스크가 맵 전체를 통째로 교체합니다.
//! advanced 설정이 없으면 조회 결과는 호스트명 그대로입니다.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use sqlx::Row as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trap2json_core::config::Duration;
use trap2json_core::message::Message;
use trap2json_core::value::ValueKind;

/// 호스트명 결정 전략
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    /// agent 주소를 호스트명으로 (DB가 있으면 인터페이스 주소로 검색)
    #[default]
    AgentAddress,
    /// UDP 출발지 주소 기준
    SourceAddress,
    /// 지정한 OID prefix의 문자열 값 기준
    Oid,
}

/// Zabbix 프록시 (HA 서버 노드 포함)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConf {
    pub hostname: String,
    pub address: String,
    pub port: u16,
}

/// advanced 설정 — 프록시 구성과 DB 조회
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZsAdvancedConfig {
    /// Zabbix에 등록된 프록시/HA 노드 목록
    pub proxies: Vec<ProxyConf>,
    /// Zabbix DB URL (`postgres://…` 또는 `mysql://…`)
    pub db_url: String,
    /// 캐시 갱신 주기 (기본 15m)
    pub db_refresh_interval: Duration,
    /// DB 쿼리 타임아웃 (기본 5s)
    pub db_query_timeout: Duration,
}

impl ZsAdvancedConfig {
    pub(crate) fn normalize(&mut self) {
        if self.db_refresh_interval.is_zero() {
            self.db_refresh_interval = Duration::from_secs(15 * 60);
        }
        if self.db_query_timeout.is_zero() {
            self.db_query_timeout = Duration::from_secs(5);
        }
    }
}

/// 조회 결과
#[derive(Debug, Clone, Default)]
pub struct LookupResult {
    /// 경유해야 하는 프록시/HA 노드 (없으면 기본 주소 사용)
    pub server: Option<ProxyConf>,
    /// Zabbix에 등록된 호스트명
    pub hostname: String,
}

// Zabbix 메이저 버전별 호스트 캐시 쿼리. 공통 조건:
// 아이템 타입 2(trapper), 호스트 status 0(활성), 인터페이스 타입 2(SNMP).
const HOST_QUERY_70: &str = "\
select case when i.useip = 1 then i.ip else i.dns end                    as ip_or_dns, \
       h.host                                                            as hostname, \
       coalesce(p.name, case when z.name = '' then null else z.name end) as proxy_hostname \
from hosts h \
         join interface i on i.hostid = h.hostid \
         join items i2 on i2.hostid = h.hostid \
         join ha_node z on z.status = 3 \
         left join proxy p on p.proxyid = h.proxyid \
where i2.key_ = {} and i2.type = 2 and h.status = 0 and i.type = 2";

const HOST_QUERY_60: &str = "\
select case when i.useip = 1 then i.ip else i.dns end                     as ip_or_dns, \
       h.host                                                             as hostname, \
       coalesce(hp.host, case when z.name = '' then null else z.name end) as proxy_hostname \
from hosts h \
         join interface i on i.hostid = h.hostid \
         join items i2 on i2.hostid = h.hostid \
         join ha_node z on z.status = 3 \
         left join hosts hp on hp.hostid = h.proxy_hostid \
where i2.key_ = {} and i2.type = 2 and h.status = 0 and i.type = 2";

const HOST_QUERY_PRE60: &str = "\
select case when i.useip = 1 then i.ip else i.dns end as ip_or_dns, \
       h.host                                         as hostname, \
       hp.host                                        as proxy_hostname \
from hosts h \
         join interface i on i.hostid = h.hostid \
         join items i2 on i2.hostid = h.hostid \
         left join hosts hp on hp.hostid = h.proxy_hostid \
where i2.key_ = {} and i2.type = 2 and h.status = 0 and i.type = 2";

#[derive(Default)]
struct Cache {
    by_address: HashMap<String, LookupResult>,
    by_hostname: HashMap<String, LookupResult>,
}

/// 호스트 조회기
pub struct ZabbixLookup {
    advanced: Option<ZsAdvancedConfig>,
    proxy_map: HashMap<String, ProxyConf>,
    oid_lookup: String,
    item_key: String,
    cache: Arc<RwLock<Cache>>,
    cancel: CancellationToken,
}

impl ZabbixLookup {
    /// 조회기를 만들고, advanced 설정이 있으면 초기 갱신과 백그라운드
    /// 갱신 태스크를 시작합니다.
    pub fn new(
        advanced: Option<ZsAdvancedConfig>,
        oid_lookup: String,
        item_key: String,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let advanced = advanced.map(|mut a| {
            a.normalize();
            a
        });
        let proxy_map = advanced
            .as_ref()
            .map(|a| {
                a.proxies
                    .iter()
                    .map(|p| (p.hostname.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let lookup = Arc::new(Self {
            advanced,
            proxy_map,
            oid_lookup,
            item_key,
            cache: Arc::new(RwLock::new(Cache::default())),
            cancel,
        });
        if let Some(advanced) = lookup.advanced.clone() {
            let refresher = Arc::clone(&lookup);
            tokio::spawn(async move {
                refresher.refresh().await;
                loop {
                    tokio::select! {
                        () = refresher.cancel.cancelled() => break,
                        () = tokio::time::sleep(advanced.db_refresh_interval.get()) => {
                            refresher.refresh().await;
                        }
                    }
                }
            });
        }
        lookup
    }

    /// 전략에 따라 메시지의 대상 호스트를 찾습니다.
    pub fn lookup(&self, message: &Message, strategy: LookupStrategy) -> Option<LookupResult> {
        let payload = &message.payload;
        if self.advanced.is_some() {
            match strategy {
                LookupStrategy::Oid => {
                    let hostname = self.oid_string_value(message)?;
                    self.cache.read().ok()?.by_hostname.get(&hostname).cloned()
                }
                LookupStrategy::AgentAddress => {
                    let addr = payload.agent_address.as_ref()?;
                    self.cache.read().ok()?.by_address.get(addr).cloned()
                }
                LookupStrategy::SourceAddress => {
                    if payload.src_address.is_empty() {
                        return None;
                    }
                    self.cache
                        .read()
                        .ok()?
                        .by_address
                        .get(&payload.src_address)
                        .cloned()
                }
            }
        } else {
            // DB 없이 호스트명을 그대로 통과시킴
            let hostname = match strategy {
                LookupStrategy::Oid => self.oid_string_value(message)?,
                LookupStrategy::AgentAddress => payload.agent_address.clone()?,
                LookupStrategy::SourceAddress => {
                    if payload.src_address.is_empty() {
                        return None;
                    }
                    payload.src_address.clone()
                }
            };
            Some(LookupResult {
                server: None,
                hostname,
            })
        }
    }

    fn oid_string_value(&self, message: &Message) -> Option<String> {
        message
            .payload
            .values
            .iter()
            .find(|v| v.has_oid_prefix(&self.oid_lookup))
            .and_then(|v| match &v.value {
                ValueKind::Str(s) => Some(s.clone()),
                _ => None,
            })
    }

    /// Zabbix DB에서 캐시를 다시 읽습니다.
    async fn refresh(&self) {
        let Some(advanced) = &self.advanced else { return };
        info!("starting background cache refresh");
        let started = std::time::Instant::now();
        match self.query_hosts(advanced).await {
            Ok(rows) => {
                let mut by_address = HashMap::with_capacity(rows.len());
                let mut by_hostname = HashMap::with_capacity(rows.len());
                for (ip_or_dns, hostname, proxy_hostname) in rows {
                    let server = proxy_hostname
                        .as_ref()
                        .and_then(|name| self.proxy_map.get(name).cloned());
                    let result = LookupResult {
                        server,
                        hostname: hostname.clone(),
                    };
                    by_address.insert(ip_or_dns, result.clone());
                    by_hostname.insert(hostname, result);
                }
                if let Ok(mut cache) = self.cache.write() {
                    cache.by_address = by_address;
                    cache.by_hostname = by_hostname;
                }
            }
            Err(e) => warn!(error = e, "failed refreshing zabbix host cache"),
        }
        info!(duration = ?started.elapsed(), "background cache refresh done");
    }

    async fn query_hosts(
        &self,
        advanced: &ZsAdvancedConfig,
    ) -> Result<Vec<(String, String, Option<String>)>, String> {
        let timeout = advanced.db_query_timeout.get();
        let run = async {
            if advanced.db_url.starts_with("postgres://") {
                let pool = sqlx::PgPool::connect(&advanced.db_url)
                    .await
                    .map_err(|e| format!("failed connecting to db: {e}"))?;
                let version: i64 = sqlx::query_scalar("select mandatory from dbversion")
                    .fetch_one(&pool)
                    .await
                    .map_err(|e| format!("cannot determine zabbix version: {e}"))?;
                let query = version_query(version).replace("{}", "$1");
                let rows = sqlx::query(&query)
                    .bind(&self.item_key)
                    .fetch_all(&pool)
                    .await
                    .map_err(|e| format!("failed executing lookup query: {e}"))?;
                pool.close().await;
                Ok(rows
                    .iter()
                    .map(|row| {
                        (
                            row.get::<String, _>("ip_or_dns"),
                            row.get::<String, _>("hostname"),
                            row.get::<Option<String>, _>("proxy_hostname"),
                        )
                    })
                    .collect())
            } else if advanced.db_url.starts_with("mysql://") {
                let pool = sqlx::MySqlPool::connect(&advanced.db_url)
                    .await
                    .map_err(|e| format!("failed connecting to db: {e}"))?;
                let version: i64 = sqlx::query_scalar("select mandatory from dbversion")
                    .fetch_one(&pool)
                    .await
                    .map_err(|e| format!("cannot determine zabbix version: {e}"))?;
                let query = version_query(version).replace("{}", "?");
                let rows = sqlx::query(&query)
                    .bind(&self.item_key)
                    .fetch_all(&pool)
                    .await
                    .map_err(|e| format!("failed executing lookup query: {e}"))?;
                pool.close().await;
                Ok(rows
                    .iter()
                    .map(|row| {
                        (
                            row.get::<String, _>("ip_or_dns"),
                            row.get::<String, _>("hostname"),
                            row.get::<Option<String>, _>("proxy_hostname"),
                        )
                    })
                    .collect())
            } else {
                Err(format!("unsupported db backend: {}", advanced.db_url))
            }
        };
        tokio::time::timeout(timeout, run)
            .await
            .map_err(|_| "db query timed out".to_owned())?
    }
}

fn version_query(mandatory: i64) -> &'static str {
    if mandatory >= 7_000_000 {
        HOST_QUERY_70
    } else if mandatory >= 6_000_000 {
        HOST_QUERY_60
    } else {
        HOST_QUERY_PRE60
    }
}
