//! mock 포워더 — 외부가 소유한 채널로 메시지를 내보내는 테스트 계측

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use trap2json_core::config::Duration;
use trap2json_core::message::Message;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder};

/// mock 포워더 설정
///
/// 출력 채널은 설정 파일이 아니라 테스트 코드가 주입합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// 컴파일된 메시지를 받을 채널 (테스트가 소유)
    #[serde(skip)]
    pub out_channel: Option<mpsc::Sender<Message>>,
    /// 채널 전송 대기 한도. 초과하면 재시도 규칙을 탑니다.
    pub timeout: Duration,
}

/// 테스트 계측용 포워더
pub struct MockForwarder {
    base: std::sync::Arc<Base>,
}

impl MockForwarder {
    /// 포워더를 만들고 run 루프를 띄웁니다.
    pub fn spawn(config: Config, idx: usize) -> Result<Self, ForwardError> {
        let base = std::sync::Arc::new(Base::new(config, idx)?);
        let worker = std::sync::Arc::clone(&base);
        tokio::spawn(async move {
            run(&worker).await;
            worker.finished.cancel();
        });
        Ok(Self { base })
    }
}

async fn run(base: &Base) {
    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let mock = base.config.mock.clone().unwrap_or_default();
    let Some(out) = mock.out_channel else {
        base.abort("mock forwarder has no out channel").await;
        return;
    };
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        if mock.timeout.is_zero() {
            if out.send(message).await.is_ok() {
                base.succeeded();
            } else {
                base.dropped();
            }
        } else {
            let permit = tokio::time::timeout(mock.timeout.get(), out.reserve()).await;
            match permit {
                Ok(Ok(permit)) => {
                    permit.send(message);
                    base.succeeded();
                }
                Ok(Err(_)) => base.dropped(),
                Err(_) => base.retry(message, "timeout").await,
            }
        }
    }
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for MockForwarder {
    async fn send(&self, message: Message) {
        self.base.enqueue(message).await;
    }

    async fn close(&self) {
        self.base.close().await;
    }

    fn done(&self) -> tokio_util::sync::CancellationToken {
        self.base.done()
    }
}
