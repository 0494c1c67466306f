//! 레코드 프레이머 — 바이트 스트림에서 매직 마커로 레코드 추출
//!
//! snmptrapd는 end 마커로 끝나는 레코드를 stdout으로 내보내지만, 같은
//! 스트림에 데몬 로그나 잘린 줄 같은 잡음도 섞입니다. 프레이머는 end
//! 마커로 토큰을 자른 뒤, 토큰 안에서 **마지막** begin 마커 뒤의
//! 바이트만 남깁니다. begin 마커가 없는 토큰은 잡음으로 간주하여
//! 계수하고 버립니다.
//!
//! EOF에서 스캔이 끝나며(snmptrapd 종료 시 stdin이 닫힘), 읽기 에러는
//! 호출자(supervisor)가 파이프라인 전체를 취소하는 신호입니다.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use trap2json_core::metrics as m;

/// 기본 스캔 버퍼 크기
pub const DEFAULT_BUFFER_SIZE: usize = 64_000;

const READ_CHUNK: usize = 8 * 1024;

/// 매직 마커 기반 레코드 스캐너
pub struct Framer<R> {
    reader: R,
    magic_begin: Vec<u8>,
    magic_end: Vec<u8>,
    buf: BytesMut,
    buffer_size: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Framer<R> {
    /// 새 프레이머를 만듭니다.
    pub fn new(reader: R, magic_begin: &str, magic_end: &str, buffer_size: usize) -> Self {
        Self {
            reader,
            magic_begin: magic_begin.as_bytes().to_vec(),
            magic_end: magic_end.as_bytes().to_vec(),
            buf: BytesMut::with_capacity(READ_CHUNK),
            buffer_size,
            eof: false,
        }
    }

    /// 다음 레코드를 반환합니다.
    ///
    /// `Ok(None)`은 EOF, `Err`는 스캔 에러(버퍼 초과 포함)입니다.
    pub async fn next_record(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            // end 마커까지의 토큰을 찾음
            while let Some(idx) = find(&self.buf, &self.magic_end) {
                let token = self.buf.split_to(idx).freeze();
                self.buf.advance(self.magic_end.len());
                if let Some(record) = self.extract(&token) {
                    return Ok(Some(record));
                }
            }
            if self.eof {
                // 남은 바이트는 마지막 토큰으로 취급
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let token = self.buf.split().freeze();
                return Ok(self.extract(&token));
            }
            if self.buf.len() > self.buffer_size {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "token exceeds buffer_size ({} > {})",
                        self.buf.len(),
                        self.buffer_size
                    ),
                ));
            }
            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                self.eof = true;
            }
        }
    }

    /// 토큰에서 마지막 begin 마커 뒤의 레코드를 추출합니다.
    fn extract(&self, token: &Bytes) -> Option<Bytes> {
        metrics::counter!(m::SNMPTRAPD_PROCESSED).increment(1);
        metrics::counter!(m::SNMPTRAPD_PROCESSED_BYTES).increment(token.len() as u64);
        trace!(bytes = token.len(), "received data");
        match rfind(token, &self.magic_begin) {
            Some(idx) => {
                metrics::counter!(m::SNMPTRAPD_SUCCEEDED).increment(1);
                Some(token.slice(idx + self.magic_begin.len()..))
            }
            None => {
                debug!(data = %String::from_utf8_lossy(token), "dropping data");
                metrics::counter!(m::SNMPTRAPD_DROPPED).increment(1);
                None
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEGIN: &str = "--TFWDBEGIN--";
    const END: &str = "--TFWDEND--";

    async fn collect(input: &str) -> Vec<String> {
        let mut framer = Framer::new(input.as_bytes(), BEGIN, END, DEFAULT_BUFFER_SIZE);
        let mut records = Vec::new();
        while let Some(record) = framer.next_record().await.unwrap() {
            records.push(String::from_utf8_lossy(&record).into_owned());
        }
        records
    }

    #[tokio::test]
    async fn extracts_single_record() {
        let records = collect("--TFWDBEGIN--a|b|c--TFWDEND--").await;
        assert_eq!(records, vec!["a|b|c"]);
    }

    #[tokio::test]
    async fn strips_noise_before_last_begin_marker() {
        let records =
            collect("daemon log line\n--TFWDBEGIN--junk--TFWDBEGIN--real|record--TFWDEND--").await;
        assert_eq!(records, vec!["real|record"]);
    }

    #[tokio::test]
    async fn drops_tokens_without_begin_marker() {
        let records = collect(
            "NET-SNMP version 5.9--TFWDEND----TFWDBEGIN--kept--TFWDEND--noise only--TFWDEND--",
        )
        .await;
        assert_eq!(records, vec!["kept"]);
    }

    #[tokio::test]
    async fn handles_multiple_records() {
        let records =
            collect("--TFWDBEGIN--one--TFWDEND----TFWDBEGIN--two--TFWDEND----TFWDBEGIN--three--TFWDEND--")
                .await;
        assert_eq!(records, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn trailing_bytes_form_final_token() {
        // EOF 직전의 미완성 토큰도 begin 마커가 있으면 레코드가 됨
        let records = collect("--TFWDBEGIN--tail-record").await;
        assert_eq!(records, vec!["tail-record"]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        let records = collect("").await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn record_split_across_reads() {
        // 8KiB 읽기 경계를 넘는 레코드
        let payload = "x".repeat(20_000);
        let input = format!("--TFWDBEGIN--{payload}--TFWDEND--");
        let records = collect(&input).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 20_000);
    }

    #[tokio::test]
    async fn oversized_token_is_a_scan_error() {
        let payload = "y".repeat(4_096);
        let input = format!("--TFWDBEGIN--{payload}");
        let mut framer = Framer::new(input.as_bytes(), BEGIN, END, 1_024);
        let err = framer.next_record().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
