#[cfg(test)]
mod unit_tests {
    use crate::chunk::{checksum_bytes, Chunk, FileMeta};
    use crate::config::{UploadConfig, BLOCK_SIZE, MAX_BLOCK_SIZE};
    use crate::protocol::{CallMetadata, UploadRequest, FILE_NAME_KEY, FILE_SIZE_KEY};
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_checksum_is_hex_sha256() {
        let sum = checksum_bytes(b"hello world");
        assert_eq!(
            sum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_chunk_verifies_own_checksum() {
        let chunk = Chunk::new(1, Bytes::from_static(b"payload"));
        assert!(chunk.verify());

        let mut tampered = chunk.clone();
        tampered.content = Bytes::from_static(b"pAyload");
        assert!(!tampered.verify());
    }

    #[test]
    fn test_call_metadata_for_file() {
        let md = CallMetadata::for_file(&FileMeta::new("report.pdf", 1_048_577));
        assert_eq!(md.get(FILE_NAME_KEY), Some("report.pdf"));
        assert_eq!(md.get(FILE_SIZE_KEY), Some("1048577"));
        assert_eq!(md.get("missing"), None);
    }

    #[test]
    fn test_request_serialization_chunk() {
        let msg = UploadRequest::Chunk(Chunk::new(42, Bytes::from(vec![1, 2, 3])));
        let bytes = msg.to_bytes().unwrap();

        match UploadRequest::from_bytes(&bytes).unwrap() {
            UploadRequest::Chunk(c) => {
                assert_eq!(c.id, 42);
                assert_eq!(&c.content[..], &[1, 2, 3]);
                assert!(c.verify());
            }
            _ => panic!("expected Chunk message"),
        }
    }

    #[test]
    fn test_default_pacing_interval() {
        // 512 KB at 50 MB/s
        let config = UploadConfig::default();
        assert_eq!(config.block_size, BLOCK_SIZE);
        assert_eq!(config.pacing_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_throughput_disables_pacing() {
        let config = UploadConfig::default().with_throughput(0);
        assert_eq!(config.pacing_interval(), Duration::ZERO);
    }

    #[test]
    fn test_config_validation() {
        assert!(UploadConfig::default().validate().is_ok());
        assert!(UploadConfig::default().with_block_size(0).validate().is_err());
        assert!(UploadConfig::default().with_queue_depth(0).validate().is_err());

        let largest = UploadConfig::default().with_block_size(MAX_BLOCK_SIZE);
        assert!(largest.validate().is_ok());

        let oversized = UploadConfig::default().with_block_size(11 * 1024 * 1024);
        assert!(matches!(
            oversized.validate(),
            Err(crate::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_largest_block_frame_fits_under_cap() {
        let content = Bytes::from(vec![0xAB; MAX_BLOCK_SIZE]);
        let msg = UploadRequest::Chunk(Chunk::new(i64::MAX, content));
        let bytes = msg.to_bytes().unwrap();
        assert!(bytes.len() <= crate::protocol::MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn test_file_meta_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, vec![0u8; 1234]).await.unwrap();

        let file = tokio::fs::File::open(&path).await.unwrap();
        let meta = FileMeta::from_file(&file, &path).await.unwrap();
        assert_eq!(meta, FileMeta::new("data.bin", 1234));
    }

    #[tokio::test]
    async fn test_file_meta_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = tokio::fs::File::open(dir.path()).await.unwrap();

        let err = FileMeta::from_file(&file, dir.path()).await.unwrap_err();
        assert!(matches!(err, crate::Error::Metadata(_)));
    }
}

#[cfg(test)]
mod pipeline_tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};
    use tokio_util::sync::CancellationToken;

    use crate::chunk::{Chunk, FileMeta};
    use crate::config::UploadConfig;
    use crate::protocol::{
        read_frame, write_frame, CallMetadata, UploadRequest, UploadStatus, FILE_NAME_KEY,
        FILE_SIZE_KEY,
    };
    use crate::upload::{run_upload, upload_stream, UploadProgress, UploadReport};
    use crate::{Error, Result};

    const BLOCK: usize = 1024;

    fn config() -> UploadConfig {
        UploadConfig::default()
            .with_block_size(BLOCK)
            .with_throughput(0)
    }

    fn file_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    fn progress_sink() -> mpsc::Sender<UploadProgress> {
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        tx
    }

    /// What the fake storage server saw
    #[derive(Default)]
    struct Received {
        metadata: Option<CallMetadata>,
        chunks: Vec<Chunk>,
    }

    /// How the fake server acknowledges
    #[derive(Clone, Copy)]
    enum AckMode {
        /// Cumulative snapshot after every chunk
        Cumulative,
        /// Only the newest id first, then the full set
        NewestFirst,
        /// Never acknowledge, keep the stream open
        Silent,
        /// Read everything, then close the ack stream without acking
        HangUp,
    }

    fn spawn_server(server: DuplexStream, mode: AckMode) -> Arc<Mutex<Received>> {
        let received = Arc::new(Mutex::new(Received::default()));
        let seen = received.clone();

        tokio::spawn(async move {
            let (mut rd, mut wr) = tokio::io::split(server);
            let mut acked = Vec::new();

            while let Ok(Some(req)) = read_frame::<_, UploadRequest>(&mut rd).await {
                let id = match req {
                    UploadRequest::Metadata(md) => {
                        seen.lock().unwrap().metadata = Some(md);
                        continue;
                    }
                    UploadRequest::Chunk(chunk) => {
                        let id = chunk.id;
                        seen.lock().unwrap().chunks.push(chunk);
                        id
                    }
                };

                match mode {
                    AckMode::Cumulative => {
                        acked.push(id);
                        let status = UploadStatus {
                            success: acked.clone(),
                        };
                        if write_frame(&mut wr, &status).await.is_err() {
                            break;
                        }
                    }
                    AckMode::NewestFirst => {
                        acked.push(id);
                        let newest = UploadStatus { success: vec![id] };
                        let full = UploadStatus {
                            success: acked.iter().rev().copied().collect(),
                        };
                        if write_frame(&mut wr, &newest).await.is_err()
                            || write_frame(&mut wr, &full).await.is_err()
                        {
                            break;
                        }
                    }
                    AckMode::Silent => {}
                    AckMode::HangUp => {
                        if seen.lock().unwrap().chunks.len() == 2 {
                            let _ = wr.shutdown().await;
                            // keep reading so the client side of the pipe stays writable
                            while let Ok(Some(_)) = read_frame::<_, UploadRequest>(&mut rd).await {}
                            return;
                        }
                    }
                }
            }

            // Hold the write half open until the client goes away.
            if matches!(mode, AckMode::Silent) {
                std::future::pending::<()>().await;
            }
        });

        received
    }

    async fn upload_bytes(
        data: Vec<u8>,
        mode: AckMode,
        config: UploadConfig,
    ) -> (Result<UploadReport>, Arc<Mutex<Received>>) {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let received = spawn_server(server, mode);
        let (rd, wr) = tokio::io::split(client);

        let meta = FileMeta::new("upload.bin", data.len() as u64);
        let result = timeout(
            Duration::from_secs(10),
            upload_stream(
                Cursor::new(data),
                meta,
                rd,
                wr,
                &config,
                CancellationToken::new(),
                progress_sink(),
            ),
        )
        .await
        .expect("upload should finish");

        (result, received)
    }

    fn assert_well_formed(chunks: &[Chunk], data: &[u8]) {
        let ids: Vec<i64> = chunks.iter().map(|c| c.id).collect();
        let expected: Vec<i64> = (1..=chunks.len() as i64).collect();
        assert_eq!(ids, expected, "ids must be 1..=n without gaps");
        assert!(chunks.iter().all(|c| c.verify()), "checksums must match");

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.content.to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_zero_byte_file_completes_immediately() {
        let (result, received) = upload_bytes(Vec::new(), AckMode::Silent, config()).await;

        let report = result.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.bytes, 0);
        assert!(received.lock().unwrap().chunks.is_empty());
    }

    #[tokio::test]
    async fn test_exactly_one_block() {
        let data = file_of(BLOCK);
        let (result, received) = upload_bytes(data.clone(), AckMode::Cumulative, config()).await;

        let report = result.unwrap();
        assert_eq!(report.chunks, 1);

        let received = received.lock().unwrap();
        assert_eq!(received.chunks.len(), 1);
        assert_eq!(received.chunks[0].id, 1);
        assert_eq!(received.chunks[0].len(), BLOCK);
        assert_well_formed(&received.chunks, &data);
    }

    #[tokio::test]
    async fn test_one_block_plus_one_byte() {
        let data = file_of(BLOCK + 1);
        let (result, received) = upload_bytes(data.clone(), AckMode::Cumulative, config()).await;

        assert_eq!(result.unwrap().chunks, 2);

        let received = received.lock().unwrap();
        let lens: Vec<usize> = received.chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![BLOCK, 1]);
        assert_well_formed(&received.chunks, &data);
    }

    #[tokio::test]
    async fn test_chunk_count_is_ceiling_of_size_over_block() {
        for len in [1, BLOCK - 1, 3 * BLOCK, 5 * BLOCK + 17] {
            let data = file_of(len);
            let (result, received) =
                upload_bytes(data.clone(), AckMode::Cumulative, config()).await;

            let report = result.unwrap();
            assert_eq!(report.chunks, len.div_ceil(BLOCK), "len {}", len);
            assert_eq!(report.bytes, len as u64);
            assert_well_formed(&received.lock().unwrap().chunks, &data);
        }
    }

    #[tokio::test]
    async fn test_metadata_is_first_frame() {
        let data = file_of(10);
        let (result, received) = upload_bytes(data, AckMode::Cumulative, config()).await;
        result.unwrap();

        let received = received.lock().unwrap();
        let md = received.metadata.as_ref().expect("metadata frame");
        assert_eq!(md.get(FILE_NAME_KEY), Some("upload.bin"));
        assert_eq!(md.get(FILE_SIZE_KEY), Some("10"));
    }

    #[tokio::test]
    async fn test_out_of_order_acks_still_complete() {
        let data = file_of(4 * BLOCK);
        let (result, received) = upload_bytes(data.clone(), AckMode::NewestFirst, config()).await;

        assert_eq!(result.unwrap().chunks, 4);
        assert_well_formed(&received.lock().unwrap().chunks, &data);
    }

    #[tokio::test]
    async fn test_acks_that_never_arrive_hit_drain_timeout() {
        let config = config().with_drain_timeout(Duration::from_millis(200));
        let (result, received) = upload_bytes(file_of(2 * BLOCK), AckMode::Silent, config).await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(received.lock().unwrap().chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_ack_stream_closing_early_aborts() {
        let (result, _) = upload_bytes(file_of(6 * BLOCK), AckMode::HangUp, config()).await;

        assert!(matches!(result, Err(Error::AckStreamClosed { .. })));
    }

    #[tokio::test]
    async fn test_send_failure_aborts_and_stops_sending() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let sink = Box::pin(futures::sink::unfold((), move |(), req: UploadRequest| {
            let log = log.clone();
            async move {
                if let UploadRequest::Chunk(chunk) = req {
                    if chunk.id == 3 {
                        return Err(Error::TransferFailed("link down".into()));
                    }
                    log.lock().unwrap().push(chunk.id);
                }
                Ok(())
            }
        }));
        let acks = futures::stream::pending::<Result<UploadStatus>>();

        let data = file_of(5 * BLOCK);
        let meta = FileMeta::new("five.bin", data.len() as u64);
        let result = timeout(
            Duration::from_secs(10),
            run_upload(
                Cursor::new(data),
                meta,
                sink,
                acks,
                &config(),
                CancellationToken::new(),
                progress_sink(),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::TransferFailed(_))));
        assert_eq!(*sent.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_peer_closing_upload_stream_aborts() {
        let sink = Box::pin(futures::sink::unfold((), |(), req: UploadRequest| async move {
            match req {
                UploadRequest::Chunk(c) if c.id == 2 => Err(Error::StreamClosed),
                _ => Ok(()),
            }
        }));
        let acks = futures::stream::pending::<Result<UploadStatus>>();

        let data = file_of(4 * BLOCK);
        let meta = FileMeta::new("closed.bin", data.len() as u64);
        let result = timeout(
            Duration::from_secs(10),
            run_upload(
                Cursor::new(data),
                meta,
                sink,
                acks,
                &config(),
                CancellationToken::new(),
                progress_sink(),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn test_read_error_aborts_upload() {
        struct FailAfterFirstRead(bool);

        impl AsyncRead for FailAfterFirstRead {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                if self.0 {
                    return std::task::Poll::Ready(Err(std::io::Error::other("bad sector")));
                }
                self.0 = true;
                let n = buf.remaining();
                buf.put_slice(&vec![1u8; n]);
                std::task::Poll::Ready(Ok(()))
            }
        }

        let (client, server) = tokio::io::duplex(1024 * 1024);
        let _received = spawn_server(server, AckMode::Cumulative);
        let (rd, wr) = tokio::io::split(client);

        let result = timeout(
            Duration::from_secs(10),
            upload_stream(
                FailAfterFirstRead(false),
                FileMeta::new("bad.bin", 10 * BLOCK as u64),
                rd,
                wr,
                &config(),
                CancellationToken::new(),
                progress_sink(),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_stays_under_ceiling() {
        // 10 blocks per second
        let throughput = (BLOCK * 10) as u64;
        let config = config().with_throughput(throughput);
        let data = file_of(8 * BLOCK);

        let (client, server) = tokio::io::duplex(1024 * 1024);
        let _received = spawn_server(server, AckMode::Cumulative);
        let (rd, wr) = tokio::io::split(client);

        let start = Instant::now();
        let report = upload_stream(
            Cursor::new(data.clone()),
            FileMeta::new("paced.bin", data.len() as u64),
            rd,
            wr,
            &config,
            CancellationToken::new(),
            progress_sink(),
        )
        .await
        .unwrap();
        let elapsed = start.elapsed();

        // The first block goes out immediately, each later one waits an interval.
        assert!(elapsed >= Duration::from_millis(700), "elapsed {:?}", elapsed);
        let rate = report.bytes as f64 / elapsed.as_secs_f64();
        assert!(rate <= throughput as f64 * 8.0 / 7.0 + 1.0, "rate {}", rate);
    }

    #[tokio::test]
    async fn test_cancellation_tears_down_pipeline() {
        // One block per hour: the upload can only end through cancellation.
        let config = config().with_throughput(1);
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let _received = spawn_server(server, AckMode::Cumulative);
        let (rd, wr) = tokio::io::split(client);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = timeout(
            Duration::from_secs(5),
            upload_stream(
                Cursor::new(file_of(4 * BLOCK)),
                FileMeta::new("slow.bin", 4 * BLOCK as u64),
                rd,
                wr,
                &config,
                cancel,
                progress_sink(),
            ),
        )
        .await
        .expect("cancellation should stop the upload promptly");

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_during_metadata_write() {
        // The server never reads and the pipe is smaller than the metadata
        // frame, so the first write blocks until cancelled.
        let (client, _server) = tokio::io::duplex(16);
        let (rd, wr) = tokio::io::split(client);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = timeout(
            Duration::from_secs(5),
            upload_stream(
                Cursor::new(file_of(BLOCK)),
                FileMeta::new("stuck.bin", BLOCK as u64),
                rd,
                wr,
                &config(),
                cancel,
                progress_sink(),
            ),
        )
        .await
        .expect("cancellation should interrupt the metadata write");

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_peer_gone_before_metadata_is_stream_closed() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let (rd, wr) = tokio::io::split(client);

        let result = upload_stream(
            Cursor::new(file_of(BLOCK)),
            FileMeta::new("orphan.bin", BLOCK as u64),
            rd,
            wr,
            &config(),
            CancellationToken::new(),
            progress_sink(),
        )
        .await;

        assert!(matches!(result, Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn test_progress_reports_streaming_bytes() {
        let (tx, mut rx) = mpsc::channel(1024);
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let _received = spawn_server(server, AckMode::Cumulative);
        let (rd, wr) = tokio::io::split(client);

        let data = file_of(3 * BLOCK);
        upload_stream(
            Cursor::new(data.clone()),
            FileMeta::new("p.bin", data.len() as u64),
            rd,
            wr,
            &config(),
            CancellationToken::new(),
            tx,
        )
        .await
        .unwrap();

        let mut last = 0;
        while let Ok(update) = rx.try_recv() {
            if let UploadProgress::Streaming {
                bytes_sent,
                total_bytes,
            } = update
            {
                assert!(bytes_sent >= last, "progress should not go backwards");
                assert_eq!(total_bytes, data.len() as u64);
                last = bytes_sent;
            }
        }
    }
}
