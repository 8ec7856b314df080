use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::Tracker;
use crate::Result;

/// Items flowing from the producer to the sender
#[derive(Debug)]
pub(crate) enum Block {
    Data(Bytes),
    /// End of input; nothing follows
    End,
}

/// Read `source` block by block until end of input.
///
/// Returns `Ok(())` as well when the pipeline is torn down underneath it.
pub(crate) async fn produce<R>(
    mut source: R,
    block_size: usize,
    interval: Duration,
    queue: mpsc::Sender<Block>,
    tracker: Arc<Tracker>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut last_read: Option<Instant> = None;

    loop {
        if let Some(prev) = last_read {
            let deadline = prev + interval;
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        last_read = Some(Instant::now());

        let block = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = read_block(&mut source, block_size) => res?,
        };
        let len = block.len();
        let exhausted = len < block_size;

        if len > 0 {
            if !enqueue(&queue, Block::Data(block), &cancel).await {
                return Ok(());
            }
            tracker.record_read(len);
            trace!(len, "block queued");
        }

        if exhausted {
            tracker.mark_producer_done();
            debug!("source exhausted");
            enqueue(&queue, Block::End, &cancel).await;
            return Ok(());
        }
    }
}

/// Push onto the queue, waiting for room. `false` means nobody is listening.
async fn enqueue(queue: &mpsc::Sender<Block>, block: Block, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        res = queue.send(block) => res.is_ok(),
    }
}

/// Fill one block, stopping early only at end of input.
async fn read_block<R: AsyncRead + Unpin>(source: &mut R, block_size: usize) -> io::Result<Bytes> {
    let mut buf = BytesMut::zeroed(block_size);
    let mut filled = 0;

    while filled < block_size {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    buf.truncate(filled);
    Ok(buf.freeze())
}
