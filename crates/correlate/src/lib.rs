#![doc = include_str!("../README.md")]

pub mod backend;
pub mod condition;
pub mod error;

pub use backend::{Backend, Data};
pub use condition::{Condition, ConditionConfig};
pub use error::CorrelateError;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use trap2json_core::config::{AutoRetry, Duration};
use trap2json_core::message::{CorrelateInfo, Message};
use trap2json_core::metrics as m;
use trap2json_core::queue::{DelayQueue, QueueCounters};

/// 상관 엔진 설정
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CorrelateConfig {
    /// 상관 단계 활성화 여부
    pub enable: bool,
    /// 백엔드 URL (`sled://`, `redis://…`, `postgres://…`, `mysql://…`)
    pub backend_url: String,
    /// raise 레코드 보존 기간
    pub ttl: Duration,
    /// 백엔드 호출 타임아웃 (0 = 무제한)
    pub timeout: Duration,
    /// 네이티브 TTL이 없는 백엔드의 스윕 주기
    pub cleanup_interval: Duration,
    /// 종료 시 큐 drain 한도
    pub shutdown_wait_time: Duration,
    /// 상관 큐 용량 (넘치면 상관을 건너뛰고 포워더로 직행)
    pub queue_size: usize,
    /// 워커 수
    pub workers: usize,
    /// 조건 목록 (first-match-wins 순서)
    pub conditions: Vec<ConditionConfig>,
    /// 백엔드 일시 장애의 재시도 정책
    pub auto_retry: AutoRetry,
}

impl Default for CorrelateConfig {
    fn default() -> Self {
        Self {
            enable: false,
            backend_url: "sled://".to_owned(),
            ttl: Duration::from_secs(30 * 24 * 3600),
            timeout: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(3600),
            shutdown_wait_time: Duration::from_secs(5),
            queue_size: 10_000,
            workers: 4,
            conditions: Vec::new(),
            auto_retry: AutoRetry::default(),
        }
    }
}

/// 상관 엔진
///
/// 입력 큐에서 메시지를 받아 조건을 순서대로 평가하고, 처리 결과를
/// (상관 여부와 무관하게) 포워더 팬아웃 채널로 내보냅니다. 큐가
/// 넘치면 메시지는 상관을 건너뛰고 passthrough로 포워더에 직행합니다.
pub struct Correlator {
    queue: DelayQueue<Message>,
    workers: Vec<JoinHandle<()>>,
    cleanup_cancel: CancellationToken,
    cleanup_task: Option<JoinHandle<()>>,
    backend: Arc<dyn Backend>,
}

struct Worker {
    queue: DelayQueue<Message>,
    backend: Arc<dyn Backend>,
    conds: Arc<Vec<Condition>>,
    out: mpsc::Sender<Message>,
    retry: AutoRetry,
}

impl Correlator {
    /// 백엔드를 열고 조건을 컴파일한 뒤 워커를 띄웁니다.
    ///
    /// 백엔드 open 실패와 조건 컴파일 실패는 기동 시 fatal입니다.
    pub async fn spawn(
        mut config: CorrelateConfig,
        fwd_tx: mpsc::Sender<Message>,
    ) -> Result<Self, CorrelateError> {
        config.auto_retry.normalize();
        let backend: Arc<dyn Backend> = Arc::from(
            backend::open(&config.backend_url, config.ttl.get(), config.timeout.get()).await?,
        );
        let mut conds = Vec::with_capacity(config.conditions.len());
        for (index, cond_config) in config.conditions.iter().enumerate() {
            conds.push(Condition::compile(index, cond_config)?);
        }
        let conds = Arc::new(conds);

        let queue = DelayQueue::new(
            config.queue_size,
            config.shutdown_wait_time.get(),
            Some(fwd_tx.clone()),
            QueueCounters {
                processed: m::CORRELATE_PROCESSED,
                dropped: m::CORRELATE_FAILED,
                passthrough: m::CORRELATE_SKIPPED,
                capacity: m::CORRELATE_QUEUE_CAPACITY,
                filled: m::CORRELATE_QUEUE_FILLED,
                labels: Vec::new(),
            },
        );

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let worker = Worker {
                    queue: queue.clone(),
                    backend: Arc::clone(&backend),
                    conds: Arc::clone(&conds),
                    out: fwd_tx.clone(),
                    retry: config.auto_retry.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        // 네이티브 TTL이 없는 백엔드만 주기적으로 스윕
        let cleanup_cancel = CancellationToken::new();
        let cleanup_task = if backend.native_ttl() {
            None
        } else {
            let backend = Arc::clone(&backend);
            let cancel = cleanup_cancel.clone();
            let interval = config.cleanup_interval.get();
            Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(interval) => {
                            if let Err(e) = backend.cleanup().await {
                                warn!(error = %e, "correlate backend cleanup failed");
                            }
                        }
                    }
                }
            }))
        };

        Ok(Self {
            queue,
            workers,
            cleanup_cancel,
            cleanup_task,
            backend,
        })
    }

    /// 입력 큐 핸들을 반환합니다.
    pub fn queue(&self) -> DelayQueue<Message> {
        self.queue.clone()
    }

    /// 새 메시지 수락을 멈추고 drain을 시작합니다.
    pub async fn close(&self) {
        self.queue.close().await;
    }

    /// drain과 워커 종료를 기다린 뒤 백엔드를 닫습니다.
    pub async fn join(mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.cleanup_cancel.cancel();
        if let Some(task) = self.cleanup_task.take() {
            let _ = task.await;
        }
        if let Err(e) = self.backend.close().await {
            warn!(error = %e, "failed closing correlate backend");
        }
    }
}

impl Worker {
    async fn run(self) {
        while let Some(message) = self.queue.recv().await {
            self.process(message).await;
        }
    }

    async fn process(&self, message: Message) {
        for cond in self.conds.iter() {
            let matched = match cond.match_program.eval_bool(&message.payload) {
                Ok(matched) => matched,
                Err(e) => {
                    self.failed(message, &format!("failed evaluating match: {e}")).await;
                    return;
                }
            };
            if !matched {
                continue;
            }
            let key = match cond.identifier_program.eval_str(&message.payload) {
                Ok(key) => key,
                Err(e) => {
                    self.failed(message, &format!("failed evaluating identifier: {e}"))
                        .await;
                    return;
                }
            };
            let is_clear = match cond.clear_program.eval_bool(&message.payload) {
                Ok(is_clear) => is_clear,
                Err(e) => {
                    self.failed(message, &format!("failed evaluating clear: {e}")).await;
                    return;
                }
            };
            if is_clear {
                self.handle_clear(message, &key).await;
            } else {
                self.handle_raise(message, &key).await;
            }
            return;
        }
        // 어느 조건에도 매칭되지 않음
        metrics::counter!(m::CORRELATE_SKIPPED).increment(1);
        self.forward(message).await;
    }

    /// clear 이벤트: 저장된 raise를 꺼내 상관 레코드를 부착합니다.
    async fn handle_clear(&self, message: Message, key: &str) {
        match self.backend.pop(key).await {
            Err(e) => self.retry(message, &e.to_string()).await,
            Ok(None) => {
                // 선행 raise가 없으면 영구 실패: 상관 없이 전달
                self.failed(message, "raise event doesn't exist").await;
            }
            Ok(Some(stored)) => {
                metrics::counter!(m::CORRELATE_SUCCEEDED).increment(1);
                let raised_time = stored.time();
                let duration = (message.payload.time - raised_time)
                    .to_std()
                    .unwrap_or_default();
                let mut payload = (*message.payload).clone();
                payload.correlate = Some(CorrelateInfo {
                    id: stored.id,
                    raised_time,
                    duration,
                    duration_seconds: duration.as_secs_f64(),
                });
                self.forward(message.with_payload(payload)).await;
            }
        }
    }

    /// raise 이벤트: 새 상관 ID를 만들어 저장합니다 (upsert).
    async fn handle_raise(&self, message: Message, key: &str) {
        let data = Data {
            rts: message.payload.time.timestamp(),
            rtn: i64::from(message.payload.time.timestamp_subsec_nanos()),
            id: Uuid::new_v4().to_string(),
        };
        match self.backend.set(key, data).await {
            Err(e) => self.retry(message, &e.to_string()).await,
            Ok(()) => {
                metrics::counter!(m::CORRELATE_SUCCEEDED).increment(1);
                self.forward(message).await;
            }
        }
    }

    /// 백엔드 일시 장애: 백오프 ETA로 재입력하거나 한도 초과 시 실패
    /// 처리합니다.
    async fn retry(&self, mut message: Message, reason: &str) {
        if self.retry.enable && message.meta.retries < self.retry.max_retries {
            message.meta.eta =
                message.compute_eta(self.retry.min_delay.get(), self.retry.max_delay.get());
            message.meta.retries += 1;
            metrics::counter!(m::CORRELATE_RETRIED).increment(1);
            debug!(reason, "retrying to correlate message");
            self.queue.send(message).await;
        } else {
            self.failed(message, reason).await;
        }
    }

    async fn failed(&self, message: Message, reason: &str) {
        warn!(reason, "failed correlating message");
        metrics::counter!(m::CORRELATE_FAILED).increment(1);
        self.forward(message).await;
    }

    async fn forward(&self, message: Message) {
        if self.out.send(message).await.is_err() {
            warn!("forwarder channel closed, dropping message");
        }
    }
}
