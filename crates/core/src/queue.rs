//! 지연 우선순위 큐 — ETA 기준 min-heap
//!
//! 상관 엔진 입구와 모든 포워더 입구가 같은 추상화를 씁니다.
//!
//! # 계약
//!
//! - 용량 C로 바운드 (0 = 무제한)
//! - 넌블로킹 send: 가득 차면 드롭하거나, passthrough 채널이 있으면
//!   그쪽으로 우회 (상관 엔진 과부하 시 상관을 건너뛰고 포워더로)
//! - recv는 `eta <= now`인 아이템만 내보냄 (헤드를 ~10ms 간격으로 폴링)
//! - [`DelayQueue::close`]는 새 아이템을 거부하고, flush timeout까지
//!   힙이 비기를 기다린 뒤 남은 아이템을 버림
//! - [`DelayQueue::done`]은 drain이 끝난 뒤 해제됨
//!
//! 재시도는 ETA를 미래로 밀기 때문에, 재시도 메시지는 자연히 새
//! 메시지에 양보합니다(다운된 싱크가 신규 trap을 가로막지 않음).

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 큐에 들어가는 아이템이 구현해야 하는 trait
pub trait Eta {
    /// 가장 이른 디스패치 허용 시각
    fn eta(&self) -> Instant;
}

/// 큐가 갱신하는 메트릭 이름 묶음
///
/// 카운터/게이지 이름이 비어 있으면 해당 메트릭은 기록하지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct QueueCounters {
    /// send로 들어온 아이템 수 (counter)
    pub processed: &'static str,
    /// 드롭된 아이템 수 (counter, passthrough가 없을 때)
    pub dropped: &'static str,
    /// passthrough로 우회한 아이템 수 (counter)
    pub passthrough: &'static str,
    /// 용량 게이지
    pub capacity: &'static str,
    /// 현재 길이 게이지
    pub filled: &'static str,
    /// 레이블 (forwarder의 index/type/id 등)
    pub labels: Vec<metrics::Label>,
}

impl QueueCounters {
    fn incr(&self, name: &'static str) {
        if !name.is_empty() {
            metrics::counter!(name, self.labels.clone()).increment(1);
        }
    }

    fn gauge(&self, name: &'static str, value: f64) {
        if !name.is_empty() {
            metrics::gauge!(name, self.labels.clone()).set(value);
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct HeapEntry<T> {
    eta: Instant,
    seq: u64,
    item: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.eta == other.eta && self.seq == other.seq
    }
}
impl<T> Eq for HeapEntry<T> {}
impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.eta.cmp(&other.eta).then(self.seq.cmp(&other.seq))
    }
}

struct State<T> {
    heap: BinaryHeap<Reverse<HeapEntry<T>>>,
    seq: u64,
    closed: bool,
    disposed: bool,
    drain_deadline: Option<Instant>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    size: usize,
    flush_timeout: Duration,
    passthrough: Option<mpsc::Sender<T>>,
    counters: QueueCounters,
    done: CancellationToken,
}

/// ETA 기준 min-heap 큐
///
/// 핸들은 저렴하게 복제되며, `send`는 여러 태스크에서, `recv`는 여러
/// 워커에서 동시에 호출할 수 있습니다.
pub struct DelayQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DelayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Eta + Send + 'static> DelayQueue<T> {
    /// 새 큐를 만듭니다.
    ///
    /// `size == 0`은 무제한입니다. `passthrough`가 있으면 오버플로우
    /// 아이템이 드롭되는 대신 그 채널로 전달됩니다.
    pub fn new(
        size: usize,
        flush_timeout: Duration,
        passthrough: Option<mpsc::Sender<T>>,
        counters: QueueCounters,
    ) -> Self {
        counters.gauge(counters.capacity, size as f64);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                seq: 0,
                closed: false,
                disposed: false,
                drain_deadline: None,
            }),
            size,
            flush_timeout,
            passthrough,
            counters,
            done: CancellationToken::new(),
        });
        // 길이 게이지 갱신 태스크
        if !shared.counters.filled.is_empty() {
            let monitor = Arc::clone(&shared);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = monitor.done.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(1)) => {
                            let len = monitor.state.lock().await.heap.len();
                            monitor.counters.gauge(monitor.counters.filled, len as f64);
                        }
                    }
                }
            });
        }
        Self { shared }
    }

    /// 아이템을 큐에 넣습니다. 힙이 가득 차면 드롭하거나 passthrough로
    /// 우회하며, 호출자는 절대 힙 공간을 기다리지 않습니다.
    pub async fn send(&self, item: T) {
        let counters = &self.shared.counters;
        counters.incr(counters.processed);
        let overflow = {
            let mut state = self.shared.state.lock().await;
            if state.closed || state.disposed {
                tracing::warn!("queue is closed, rejecting item");
                Some(item)
            } else if self.shared.size == 0 || state.heap.len() < self.shared.size {
                let seq = state.seq;
                state.seq += 1;
                state.heap.push(Reverse(HeapEntry {
                    eta: item.eta(),
                    seq,
                    item,
                }));
                None
            } else {
                tracing::warn!("queue is full, consider increasing queue_size");
                Some(item)
            }
        };
        if let Some(item) = overflow {
            match &self.shared.passthrough {
                Some(tx) => {
                    counters.incr(counters.passthrough);
                    if tx.send(item).await.is_err() {
                        tracing::warn!("passthrough channel closed, dropping item");
                    }
                }
                None => counters.incr(counters.dropped),
            }
        }
    }

    /// ETA가 지난 아이템 하나를 꺼냅니다.
    ///
    /// 큐가 닫히고 drain이 끝났으면 `None`을 반환합니다. drain 중에는
    /// flush timeout까지 ETA가 지난 아이템만 내보내고, timeout이 지나면
    /// 남은 아이템은 버려집니다.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut state = self.shared.state.lock().await;
                if state.disposed {
                    return None;
                }
                let now = Instant::now();
                let ready = state
                    .heap
                    .peek()
                    .is_some_and(|Reverse(entry)| entry.eta <= now);
                if ready {
                    let Reverse(entry) = state.heap.pop().expect("peeked entry exists");
                    return Some(entry.item);
                }
                if state.closed {
                    let drained = state.heap.is_empty();
                    let expired = state
                        .drain_deadline
                        .is_some_and(|deadline| now >= deadline);
                    if drained || expired {
                        if !drained {
                            tracing::debug!(
                                remaining = state.heap.len(),
                                "flush timeout reached, discarding queued items"
                            );
                            state.heap.clear();
                        }
                        state.disposed = true;
                        self.shared.done.cancel();
                        return None;
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// 새 아이템 수락을 중단하고 drain 마감시한을 설정합니다.
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if !state.closed {
            state.closed = true;
            state.drain_deadline = Some(Instant::now() + self.shared.flush_timeout);
        }
    }

    /// drain까지 끝났을 때 해제되는 토큰을 반환합니다.
    pub fn done(&self) -> CancellationToken {
        self.shared.done.clone()
    }

    /// 현재 힙 길이를 반환합니다.
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.heap.len()
    }

    /// 힙이 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Item {
        id: u32,
        eta: Instant,
    }

    impl Eta for Item {
        fn eta(&self) -> Instant {
            self.eta
        }
    }

    fn item(id: u32, delay_ms: u64) -> Item {
        Item {
            id,
            eta: Instant::now() + Duration::from_millis(delay_ms),
        }
    }

    fn queue(size: usize) -> DelayQueue<Item> {
        DelayQueue::new(
            size,
            Duration::from_millis(100),
            None,
            QueueCounters::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_eta_order() {
        let q = queue(0);
        q.send(item(3, 30)).await;
        q.send(item(1, 10)).await;
        q.send(item(2, 20)).await;

        assert_eq!(q.recv().await.unwrap().id, 1);
        assert_eq!(q.recv().await.unwrap().id, 2);
        assert_eq!(q.recv().await.unwrap().id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_yield_future_items() {
        let q = queue(0);
        q.send(item(1, 5_000)).await;
        // ETA 전에는 나오지 않아야 함
        let res = tokio::time::timeout(Duration::from_secs(1), q.recv()).await;
        assert!(res.is_err(), "item yielded before its eta");
        // ETA 후에는 나옴
        let got = tokio::time::timeout(Duration::from_secs(10), q.recv())
            .await
            .expect("eta passed")
            .unwrap();
        assert_eq!(got.id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_drops_third_item() {
        let q = queue(2);
        q.send(item(1, 0)).await;
        q.send(item(2, 0)).await;
        q.send(item(3, 0)).await; // 수신자가 없는 동안 세 번째는 드롭
        assert_eq!(q.len().await, 2);
        assert_eq!(q.recv().await.unwrap().id, 1);
        assert_eq!(q.recv().await.unwrap().id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_diverts_to_passthrough() {
        let (tx, mut rx) = mpsc::channel(4);
        let q: DelayQueue<Item> = DelayQueue::new(
            1,
            Duration::from_millis(100),
            Some(tx),
            QueueCounters::default(),
        );
        q.send(item(1, 0)).await;
        q.send(item(2, 0)).await;
        assert_eq!(rx.recv().await.unwrap().id, 2);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_ready_items() {
        let q = queue(0);
        q.send(item(1, 0)).await;
        q.send(item(2, 0)).await;
        q.close().await;
        assert_eq!(q.recv().await.unwrap().id, 1);
        assert_eq!(q.recv().await.unwrap().id, 2);
        assert!(q.recv().await.is_none());
        assert!(q.done().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn close_discards_after_flush_timeout() {
        let q = queue(0);
        // ETA가 flush timeout보다 뒤인 아이템은 drain에서 버려짐
        q.send(item(1, 60_000)).await;
        q.close().await;
        let got = q.recv().await;
        assert!(got.is_none());
        assert_eq!(q.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_close_is_rejected() {
        let q = queue(0);
        q.close().await;
        q.send(item(1, 0)).await;
        assert_eq!(q.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_items_yield_to_fresh_ones() {
        let q = queue(0);
        // 백오프로 미래 ETA를 받은 재시도 메시지
        q.send(item(1, 10_000)).await;
        // 방금 도착한 신규 메시지
        q.send(item(2, 0)).await;
        assert_eq!(q.recv().await.unwrap().id, 2);
    }
}
