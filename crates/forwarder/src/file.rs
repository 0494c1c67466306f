//! 파일 포워더 — 한 줄에 JSON 객체 하나 (JSONL)

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use trap2json_core::message::Message;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder};

/// 파일 포워더 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// 출력 경로. 비어 있으면 stdout. 쓰기 권한이 필요합니다.
    pub path: String,
}

/// JSONL append 포워더
pub struct FileForwarder {
    base: std::sync::Arc<Base>,
}

enum Sink {
    Stdout(tokio::io::Stdout),
    File(tokio::fs::File),
}

impl Sink {
    async fn write_line(&mut self, json: &[u8]) -> std::io::Result<()> {
        let mut line = Vec::with_capacity(json.len() + 1);
        line.extend_from_slice(json);
        line.push(b'\n');
        match self {
            Self::Stdout(out) => {
                out.write_all(&line).await?;
                out.flush().await
            }
            Self::File(file) => {
                file.write_all(&line).await?;
                file.flush().await
            }
        }
    }
}

impl FileForwarder {
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
    let path = base
        .config
        .file
        .as_ref()
        .map(|f| f.path.clone())
        .unwrap_or_default();
    let mut sink = if path.is_empty() {
        Sink::Stdout(tokio::io::stdout())
    } else {
        match tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
        {
            Ok(file) => Sink::File(file),
            Err(e) => {
                // 열기 실패는 이 포워더에 치명적
                base.abort(&format!("failed opening file: {e}")).await;
                return;
            }
        }
    };
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        match sink.write_line(&message.meta.message_json).await {
            Ok(()) => base.succeeded(),
            Err(e) => base.retry(message, &e.to_string()).await,
        }
    }
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for FileForwarder {
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
