//! 포워더 공통 골격
//!
//! 모든 포워더가 공유하는 워커 사이클입니다:
//! 디큐 → 1회 컴파일 → skip이면 filtered 계수 → 전송 시도 → 성공이면
//! succeeded, 일시 실패면 재시도 규칙, 영구 실패면 dropped.
//!
//! 재시도 규칙: `auto_retry.enable`이고 `retries < max_retries`면
//! `eta = now + min(max_delay, min_delay * 2^retries)`로 재입력하고
//! retries를 올립니다. 아니면 드롭합니다.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trap2json_core::expr::Program;
use trap2json_core::message::{Message, MessageCompiler};
use trap2json_core::metrics as m;
use trap2json_core::queue::{DelayQueue, QueueCounters};
use trap2json_core::timefmt::TimeFormatter;

use crate::error::ForwardError;
use crate::Config;

/// 포워더 공통 상태
pub struct Base {
    /// 1부터 시작하는 포워더 순번 (레이블용)
    pub idx: String,
    /// 포워더 종류 (file, kafka, ...)
    pub kind: &'static str,
    /// 정규화된 설정
    pub config: Config,
    /// 이 포워더 전용 지연 큐
    pub queue: DelayQueue<Message>,
    /// run 루프 종료 시 해제되는 토큰
    pub finished: CancellationToken,
    /// 컴파일된 filter / json_format / 시간 직렬화기
    pub compiler: MessageCompiler,
    labels: Vec<metrics::Label>,
}

impl Base {
    /// 설정의 표현식을 컴파일하고 큐를 만듭니다.
    ///
    /// 표현식 컴파일 실패는 기동 시 fatal로 전파됩니다.
    pub fn new(config: Config, idx: usize) -> Result<Self, ForwardError> {
        let kind = config.kind().unwrap_or("unknown");
        let idx = (idx + 1).to_string();
        let labels = vec![
            metrics::Label::new(m::LABEL_INDEX, idx.clone()),
            metrics::Label::new(m::LABEL_TYPE, kind),
            metrics::Label::new(m::LABEL_ID, config.id.clone()),
        ];
        let filter = match config.filter.as_str() {
            "" => None,
            source => Some(Program::compile(source)?),
        };
        let json_format = match config.json_format.as_str() {
            "" => None,
            source => Some(Program::compile(source)?),
        };
        let compiler = MessageCompiler {
            filter,
            json_format,
            time: TimeFormatter::new(&config.time_format, &config.time_as_timezone),
        };
        let queue = DelayQueue::new(
            config.queue_capacity(),
            config.shutdown_wait_time.get(),
            None,
            QueueCounters {
                processed: m::FORWARDER_PROCESSED,
                dropped: m::FORWARDER_DROPPED,
                passthrough: "",
                capacity: m::FORWARDER_QUEUE_CAPACITY,
                filled: m::FORWARDER_QUEUE_FILLED,
                labels: labels.clone(),
            },
        );
        Ok(Self {
            idx,
            kind,
            config,
            queue,
            finished: CancellationToken::new(),
            compiler,
            labels,
        })
    }

    /// 팬아웃에서 온 메시지를 큐에 넣습니다. 큐가 가득 차면 이 포워더
    /// 에서만 드롭되며 파이프라인은 멈추지 않습니다.
    pub async fn enqueue(&self, mut message: Message) {
        message.meta.time_format = self.config.time_format.clone();
        message.meta.time_as_timezone = self.config.time_as_timezone.clone();
        self.queue.send(message).await;
    }

    /// ETA가 지난 다음 메시지를 꺼냅니다. drain이 끝나면 `None`.
    pub async fn recv(&self) -> Option<Message> {
        self.queue.recv().await
    }

    /// 꺼낸 메시지를 컴파일하고, filter에 걸렸으면 계수 후 `None`을
    /// 반환합니다.
    pub fn compile(&self, message: &mut Message) -> bool {
        message.compile(&self.compiler);
        if message.meta.skip {
            self.incr(m::FORWARDER_FILTERED);
            return false;
        }
        true
    }

    /// 일시 실패: 백오프 ETA로 재입력하거나 한도 초과 시 드롭합니다.
    pub async fn retry(&self, mut message: Message, reason: &str) {
        let retry = &self.config.auto_retry;
        if retry.enable && message.meta.retries < retry.max_retries {
            message.meta.eta =
                message.compute_eta(retry.min_delay.get(), retry.max_delay.get());
            message.meta.retries += 1;
            self.incr(m::FORWARDER_RETRIED);
            debug!(forwarder = self.kind, id = %self.config.id, reason, "retrying to forward trap");
            self.queue.send(message).await;
        } else {
            warn!(forwarder = self.kind, id = %self.config.id, reason, "failed forwarding trap");
            self.incr(m::FORWARDER_DROPPED);
        }
    }

    /// 전송 성공을 계수합니다.
    pub fn succeeded(&self) {
        self.incr(m::FORWARDER_SUCCEEDED);
    }

    /// 영구 실패를 계수합니다.
    pub fn dropped(&self) {
        self.incr(m::FORWARDER_DROPPED);
    }

    /// 호스트 조회 실패를 계수합니다.
    pub fn lookup_failed(&self) {
        self.incr(m::FORWARDER_LOOKUP_FAILED);
    }

    fn incr(&self, name: &'static str) {
        metrics::counter!(name, self.labels.clone()).increment(1);
    }

    /// 새 메시지 수락을 멈추고 `shutdown_wait_time` 한도의 drain을
    /// 시작합니다.
    pub async fn close(&self) {
        self.queue.close().await;
    }

    /// run 루프가 끝났을 때 해제되는 토큰입니다.
    pub fn done(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// 싱크 기동 실패 등 이 포워더만의 치명적 오류: 큐를 즉시 닫아
    /// drain 없이 종료합니다.
    pub async fn abort(&self, reason: &str) {
        tracing::error!(forwarder = self.kind, id = %self.config.id, reason, "forwarder aborted");
        self.queue.close().await;
        // drain 없이 빠르게 소진되도록 남은 메시지를 전부 버림
        while self.queue.recv().await.is_some() {
            self.dropped();
        }
    }
}
