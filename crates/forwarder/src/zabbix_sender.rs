//! Zabbix trapper 프로토콜 — `ZBXD\x01` 프레임 코덱
//!
//! sender data 요청 하나를 TCP로 보내고 응답을 읽습니다. 프레임은
//! 5바이트 매직(`ZBXD` + 0x01), 리틀엔디언 u64 길이, JSON 본문으로
//! 구성됩니다.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::ForwardError;

const ZBX_MAGIC: &[u8; 5] = b"ZBXD\x01";
const MAX_RESPONSE: u64 = 16 * 1024 * 1024;

/// trapper 아이템 하나
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZabbixItem {
    pub host: String,
    pub key: String,
    pub value: String,
    pub clock: i64,
    pub ns: i64,
}

/// sender data 요청
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZabbixRequest {
    pub request: String,
    pub data: Vec<ZabbixItem>,
    pub clock: i64,
    pub ns: i64,
}

impl ZabbixRequest {
    /// 아이템 하나짜리 sender data 요청을 만듭니다.
    pub fn single(item: ZabbixItem) -> Self {
        let (clock, ns) = (item.clock, item.ns);
        Self {
            request: "sender data".to_owned(),
            data: vec![item],
            clock,
            ns,
        }
    }
}

/// 서버 응답
#[derive(Debug, Clone, Deserialize)]
pub struct ZabbixResponse {
    pub response: String,
    #[serde(default)]
    pub info: String,
}

impl ZabbixResponse {
    /// 서버가 수락했는지 확인합니다.
    pub fn is_success(&self) -> bool {
        self.response == "success"
    }
}

/// 프레임을 인코딩합니다.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ZBX_MAGIC.len() + 8 + body.len());
    frame.extend_from_slice(ZBX_MAGIC);
    frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
    frame.extend_from_slice(body);
    frame
}

/// 프레임 헤더를 해석하여 본문 길이를 반환합니다.
pub fn decode_header(header: &[u8; 13]) -> Result<u64, ForwardError> {
    if &header[..5] != ZBX_MAGIC {
        return Err(ForwardError::Delivery(
            "invalid zabbix response header".to_owned(),
        ));
    }
    let len = u64::from_le_bytes(header[5..13].try_into().expect("8 bytes"));
    if len > MAX_RESPONSE {
        return Err(ForwardError::Delivery(format!(
            "zabbix response too large: {len}"
        )));
    }
    Ok(len)
}

/// 요청을 보내고 응답을 읽습니다.
pub async fn send(addr: &str, request: &ZabbixRequest) -> Result<ZabbixResponse, ForwardError> {
    let body = serde_json::to_vec(request)
        .map_err(|e| ForwardError::Delivery(format!("failed encoding request: {e}")))?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ForwardError::Delivery(format!("failed connecting to {addr}: {e}")))?;
    stream.write_all(&encode_frame(&body)).await?;

    let mut header = [0u8; 13];
    stream.read_exact(&mut header).await?;
    let len = decode_header(&header)?;
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    serde_json::from_slice(&body)
        .map_err(|e| ForwardError::Delivery(format!("failed decoding response: {e}")))
}
