//! SNMP trap 재발신 포워더 — 외부 `snmptrap`/`snmpinform` CLI 호출
//!
//! 버전별 인자 배열이 다릅니다:
//! - v1: `enterprise_oid agent_addr trap_type trap_subtype uptime(1/100초)`
//! - v2c/v3: `uptime(1/100초) trap_oid` 뒤에 변수 바인딩. 첫 두 바인딩이
//!   관례적인 sysUpTime / snmpTrapOID면 생략합니다.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use trap2json_core::message::Message;
use trap2json_snmp::trapd::User;

use crate::base::Base;
use crate::error::ForwardError;
use crate::{Config, Forwarder};

const SYS_UPTIME_OID: &str = ".1.3.6.1.2.1.1.3.0";
const SNMP_TRAP_OID: &str = ".1.3.6.1.6.3.1.1.4.1.0";
const DEFAULT_TRAP_OID: &str = ".1.3.6.1.6.3.1.1.4.1";

/// trap 재발신 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapConfig {
    /// CLI 실행 워커 수 (기본 1)
    pub workers: usize,
    /// v2c/v3에서 INFORM으로 발신
    pub enable_inform: bool,
    /// 대상 호스트 (`host[:port]`)
    pub host: String,
    /// v1 / v2c / v3
    pub version: String,
    /// v1/v2c community
    pub community: String,
    /// v3 컨텍스트
    pub context: String,
    /// v3 사용자
    pub user: User,
}

impl TrapConfig {
    pub(crate) fn normalize(&mut self) {
        if self.workers == 0 {
            self.workers = 1;
        }
    }

    /// 버전별 필수 설정을 검증합니다. INFORM은 v1에서 지원되지 않아
    /// 경고 후 비활성화됩니다.
    pub fn check(&mut self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host is not defined".to_owned());
        }
        match self.version.as_str() {
            "v1" => {
                if self.community.is_empty() {
                    return Err("undefined community for snmp v1".to_owned());
                }
                if self.enable_inform {
                    tracing::warn!("using inform in snmp v1 is not supported");
                    self.enable_inform = false;
                }
            }
            "v2c" => {
                if self.community.is_empty() {
                    return Err("undefined community for snmp v2c".to_owned());
                }
            }
            "v3" => {
                if self.user.username.is_empty() {
                    return Err("undefined user for snmp v3".to_owned());
                }
            }
            other => return Err(format!("unknown snmp version: {other}")),
        }
        Ok(())
    }

    /// 메시지와 무관한 고정 인자 배열을 만듭니다.
    pub fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        args.push(if self.enable_inform { "snmpinform" } else { "snmptrap" }.to_owned());
        args.push(format!("-{}", self.version));
        match self.version.as_str() {
            "v1" | "v2c" => {
                args.push("-c".to_owned());
                args.push(self.community.clone());
            }
            "v3" => {
                args.push("-l".to_owned());
                args.push(self.user.security_level().to_owned());
                args.push("-u".to_owned());
                args.push(self.user.username.clone());
                if !self.user.auth_passphrase.is_empty() {
                    args.push("-a".to_owned());
                    args.push(self.user.auth_type.as_str().to_owned());
                    args.push("-A".to_owned());
                    args.push(self.user.auth_passphrase.clone());
                    if !self.user.privacy_passphrase.is_empty() {
                        args.push("-x".to_owned());
                        args.push(self.user.privacy_protocol.as_str().to_owned());
                        args.push("-X".to_owned());
                        args.push(self.user.privacy_passphrase.clone());
                    }
                }
                if !self.context.is_empty() {
                    args.push("-n".to_owned());
                    args.push(self.context.clone());
                }
                if !self.user.engine_id.is_empty() {
                    args.push("-e".to_owned());
                    args.push(self.user.engine_id.clone());
                }
            }
            _ => {}
        }
        args.push(self.host.clone());
        args
    }

    /// 메시지별 인자 배열을 만듭니다.
    pub fn command_args(&self, base: &[String], message: &Message) -> Vec<String> {
        let mut args = base.to_vec();
        let payload = &message.payload;
        let uptime_centis = payload
            .uptime_seconds
            .map_or(0i64, |secs| (secs * 100.0) as i64);
        let trap_oid = payload
            .enterprise_oid
            .clone()
            .unwrap_or_else(|| DEFAULT_TRAP_OID.to_owned());
        let mut values = payload.values.as_slice();
        match self.version.as_str() {
            "v1" => {
                args.push(trap_oid);
                args.push(
                    payload
                        .agent_address
                        .clone()
                        .unwrap_or_else(|| "0.0.0.0".to_owned()),
                );
                args.push(payload.trap_type.unwrap_or(0).to_string());
                args.push(payload.trap_sub_type.unwrap_or(0).to_string());
                args.push(uptime_centis.to_string());
            }
            "v2c" | "v3" => {
                args.push(uptime_centis.to_string());
                args.push(trap_oid);
                // RFC 관례를 따르는 trap이면 첫 두 바인딩은 헤더와 중복
                if values.len() > 2 {
                    if values[0].oid == SYS_UPTIME_OID {
                        values = &values[1..];
                    }
                    if values[0].oid == SNMP_TRAP_OID {
                        values = &values[1..];
                    }
                }
            }
            _ => return args,
        }
        for value in values {
            args.extend(value.snmp_cmd());
        }
        args
    }
}

/// trap 재발신 포워더
pub struct TrapForwarder {
    base: std::sync::Arc<Base>,
}

impl TrapForwarder {
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

async fn run(base: &std::sync::Arc<Base>) {
    tracing::info!(forwarder = base.kind, id = %base.config.id, "starting forwarder");
    let mut config = base.config.trap.clone().unwrap_or_default();
    if let Err(reason) = config.check() {
        base.abort(&format!("failed starting trap forwarder: {reason}")).await;
        return;
    }

    // CLI 실행 워커 풀
    let (cmd_tx, cmd_rx) = mpsc::channel::<(Vec<String>, Message)>(config.workers);
    let cmd_rx = std::sync::Arc::new(tokio::sync::Mutex::new(cmd_rx));
    let mut workers = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let rx = std::sync::Arc::clone(&cmd_rx);
        let base = std::sync::Arc::clone(base);
        workers.push(tokio::spawn(async move {
            loop {
                let next = { rx.lock().await.recv().await };
                let Some((args, message)) = next else { break };
                let status = tokio::process::Command::new(&args[0])
                    .args(&args[1..])
                    .status()
                    .await;
                match status {
                    Ok(status) if status.success() => base.succeeded(),
                    Ok(status) => base.retry(message, &format!("exit status {status}")).await,
                    Err(e) => base.retry(message, &e.to_string()).await,
                }
            }
        }));
    }

    let base_args = config.base_args();
    while let Some(mut message) = base.recv().await {
        if !base.compile(&mut message) {
            continue;
        }
        let args = config.command_args(&base_args, &message);
        if cmd_tx.send((args, message)).await.is_err() {
            break;
        }
    }
    drop(cmd_tx);
    for worker in workers {
        let _ = worker.await;
    }
    tracing::info!(forwarder = base.kind, id = %base.config.id, "forwarder exited");
}

#[async_trait::async_trait]
impl Forwarder for TrapForwarder {
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
