//! Pipeline supervision: channel wiring, lifecycles, shutdown ordering.
//!
//! Data flow:
//!
//! ```text
//! byte stream -> framer -> parse channel -> parser workers
//!             -> raw message channel -> (correlator) -> fan-out channel
//!             -> per-forwarder delay queues -> sinks
//! ```
//!
//! On a termination signal (or a framer scan error) the supervisor:
//! 1. cancels the root token,
//! 2. asks the external snmptrapd to terminate (closing our stdin),
//! 3. joins the parser workers and closes the fan-out,
//! 4. waits for every forwarder to drain within its own limit.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trap2json_core::message::Message;
use trap2json_correlate::Correlator;
use trap2json_forwarder::ForwarderSet;
use trap2json_snmp::{mib, parse, Framer, MibDb};

use crate::config::AppConfig;
use crate::trapd_process;

const PARSE_CHANNEL_CAPACITY: usize = 1024;
const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Directory holding the OID mapping files shipped with the container.
const MIB_DIR: &str = "/etc/trap2json/mibs";

/// Load the MIB mapping database once. Partial failure is a warning,
/// not fatal: unresolved OIDs keep their dotted form.
pub fn load_mibs() {
    info!("loading MIBs");
    let mut db = MibDb::new();
    let (loaded, failed) = db.load_dir(std::path::Path::new(MIB_DIR));
    if !failed.is_empty() {
        warn!(
            failed = %failed.join(", "),
            "failed initiating MIB database, some data might be unavailable"
        );
    }
    info!(loaded, "MIB modules loaded");
    if !mib::init(db) {
        warn!("MIB database already initialized");
    }
}

/// Run the whole pipeline until EOF, a signal, or a scan error.
pub async fn run<R>(config: AppConfig, reader: R, terminate_snmptrapd: bool) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let root = CancellationToken::new();

    // signal handler: first SIGTERM/SIGINT cancels the root token
    {
        let root = root.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                return;
            };
            let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                return;
            };
            tokio::select! {
                _ = sigterm.recv() => info!(signal = "SIGTERM", "received termination signal"),
                _ = sigint.recv() => info!(signal = "SIGINT", "received termination signal"),
                () = root.cancelled() => return,
            }
            root.cancel();
        });
    }

    // channels
    let (parse_tx, parse_rx) = mpsc::channel::<Vec<u8>>(PARSE_CHANNEL_CAPACITY);
    let (raw_tx, mut raw_rx) = mpsc::channel::<Message>(MESSAGE_CHANNEL_CAPACITY);
    let (fwd_tx, fwd_rx) = mpsc::channel::<Message>(MESSAGE_CHANNEL_CAPACITY);

    // forwarders (expression compile failure is fatal)
    let forwarder_set = ForwarderSet::build(config.forwarders.clone())?;
    info!(forwarders = forwarder_set.len(), "forwarders initialized");
    let forwarder_task = tokio::spawn(forwarder_set.run(fwd_rx));

    // optional correlator between the parsers and the fan-out
    let correlator = if config.correlate.enable {
        Some(Correlator::spawn(config.correlate.clone(), fwd_tx.clone()).await?)
    } else {
        None
    };

    // pump: raw messages go to the correlator queue when enabled,
    // straight to the fan-out otherwise
    let pump_task = {
        let correlate_queue = correlator.as_ref().map(Correlator::queue);
        let fwd_tx = fwd_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = raw_rx.recv().await {
                match &correlate_queue {
                    Some(queue) => queue.send(message).await,
                    None => {
                        if fwd_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // parser workers
    let parse_rx = Arc::new(Mutex::new(parse_rx));
    let mut parser_tasks = Vec::with_capacity(config.parse_workers);
    for worker in 0..config.parse_workers {
        parser_tasks.push(tokio::spawn(parse::parser_worker(
            worker + 1,
            Arc::clone(&parse_rx),
            raw_tx.clone(),
        )));
    }
    drop(raw_tx);

    // framer scan loop: exits on EOF or root cancellation; a scan error
    // cancels the whole pipeline
    let buffer_size = config.snmptrapd.buffer_size_or_default();
    let mut framer = Framer::new(
        reader,
        &config.snmptrapd.magic_begin,
        &config.snmptrapd.magic_end,
        buffer_size,
    );
    info!("trap2json started");
    loop {
        tokio::select! {
            () = root.cancelled() => break,
            record = framer.next_record() => match record {
                Ok(Some(record)) => {
                    if parse_tx.send(record.to_vec()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "scanner error");
                    root.cancel();
                    break;
                }
            },
        }
    }
    root.cancel();

    // shutdown ordering
    if terminate_snmptrapd {
        trapd_process::terminate().await;
    }
    drop(parse_tx);
    for task in parser_tasks {
        let _ = task.await;
    }
    let _ = pump_task.await;
    if let Some(correlator) = correlator {
        correlator.close().await;
        correlator.join().await;
    }
    drop(fwd_tx);
    let _ = forwarder_task.await;
    info!("trap2json exited");
    Ok(())
}
