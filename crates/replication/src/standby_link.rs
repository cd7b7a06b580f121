//! Standby-side inbound listener: accepts the primary's connection and
//! applies its replicated commit stream.
//!
//! Grounded on the same `onepointking-minisql` accept-loop shape
//! `velox-endpoint::listener` uses, paired with `velox_txn::replay` to
//! install each batch the same way WAL recovery installs it.

use crate::error::{ReplicationError, ReplicationResult};
use crate::frame::Frame;
use crate::standby::{batch_end_lsn, expect_log_batch, StandbyApplier};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use velox_storage::Heap;

/// Bind `addr` and apply every `LogBatch` the primary sends, until the
/// connection drops or the standby diverges.
///
/// Only one primary connection is served at a time; a second incoming
/// connection while the first is live is rejected by dropping it
/// immediately, since a standby has exactly one primary.
pub async fn serve(addr: SocketAddr, applier: Arc<StandbyApplier>, heap: Arc<Heap>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "standby replication link listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "primary connected");
        let applier = Arc::clone(&applier);
        let heap = Arc::clone(&heap);
        if let Err(e) = handle_connection(stream, &applier, &heap).await {
            warn!(%peer, error = %e, "primary connection ended");
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    applier: &Arc<StandbyApplier>,
    heap: &Arc<Heap>,
) -> ReplicationResult<()> {
    let hello = read_frame(&mut stream).await?;
    if !matches!(hello, Frame::Hello { .. }) {
        return Err(ReplicationError::Encoding("expected Hello as first frame".into()));
    }

    loop {
        let frame = read_frame(&mut stream).await?;
        match frame {
            Frame::LogBatch { .. } => {
                let (start_lsn, records) = expect_log_batch(frame)?;
                match applier.validate_batch_start(start_lsn) {
                    Ok(()) => {
                        for record in &records {
                            velox_txn::replay(std::slice::from_ref(record), heap)
                                .map_err(|e| ReplicationError::Encoding(e.to_string()))?;
                        }
                        let end_lsn = batch_end_lsn(start_lsn, &records);
                        applier.advance(end_lsn);
                        let ack = Frame::Ack { through_lsn: end_lsn };
                        write_frame(&mut stream, &ack).await?;
                    }
                    Err(ReplicationError::Gap { expected, .. }) => {
                        warn!(%expected, got = %start_lsn, "replication gap, requesting resync");
                        let hello = Frame::Hello {
                            node_name: String::new(),
                            epoch: 0,
                            last_applied_lsn: expected,
                        };
                        write_frame(&mut stream, &hello).await?;
                    }
                    Err(ReplicationError::Divergent) => {
                        applier.mark_divergent();
                        return Err(ReplicationError::Divergent);
                    }
                    Err(other) => return Err(other),
                }
            }
            Frame::Heartbeat { .. } => {}
            other => {
                return Err(ReplicationError::Encoding(format!(
                    "unexpected frame on standby link: {other:?}"
                )))
            }
        }
    }
}

async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> ReplicationResult<()> {
    let bytes = frame.to_bytes()?;
    stream.write_all(&bytes).await.map_err(ReplicationError::Io)
}

async fn read_frame(stream: &mut TcpStream) -> ReplicationResult<Frame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(ReplicationError::Io)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(ReplicationError::Io)?;
    Frame::from_payload(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use velox_core::Lsn;

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_is_applied_and_acked() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let applier = Arc::new(StandbyApplier::new(Lsn::ZERO));
        let heap = Arc::new(Heap::new(1));

        let server_applier = Arc::clone(&applier);
        let server_heap = Arc::clone(&heap);
        tokio::spawn(async move {
            let _ = serve(bound, server_applier, server_heap).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(bound).await.unwrap();
        let hello = Frame::Hello {
            node_name: "primary-1".into(),
            epoch: 1,
            last_applied_lsn: Lsn::ZERO,
        };
        write_frame(&mut client, &hello).await.unwrap();

        let batch = Frame::LogBatch {
            start_lsn: Lsn::ZERO,
            records: Vec::new(),
        };
        write_frame(&mut client, &batch).await.unwrap();

        let ack = read_frame(&mut client).await.unwrap();
        assert!(matches!(ack, Frame::Ack { .. }));
        assert_eq!(applier.last_applied_lsn(), Lsn::new(1, 0));
    }
}
