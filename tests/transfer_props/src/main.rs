fn main() {
    println!("Run `cargo test -p transfer-props` to execute the end-to-end transfer tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use mediaferry_chunkio::{
        BoxFuture, ChunkIo, ChunkIoError, ConnectionFactory, FileSink, FileSource, PartSink,
        PartSource, checksum_bytes, checksum_file,
    };
    use mediaferry_engine::{
        ConnectionPool, EngineConfig, SessionState, TransferError, TransferOutcome,
        TransferSession, TransferSpec, TransferTarget,
    };
    use mediaferry_tasks::{RegistryError, TaskRegistry};

    /// Deterministic non-repeating fill so offset mixups show up as
    /// checksum mismatches.
    fn test_data(len: usize) -> Vec<u8> {
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect()
    }

    // ---------- In-memory remote ----------

    struct Remote {
        data: Mutex<Vec<u8>>,
        /// Part offset whose chunk I/O always fails.
        poisoned_offset: Option<u64>,
        /// Chunk reads started, counted before any gating.
        reads_started: AtomicUsize,
        /// When present, every read waits for a gate permit.
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl Remote {
        fn serving(data: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                data: Mutex::new(data),
                poisoned_offset: None,
                reads_started: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn receiving() -> Arc<Self> {
            Self::serving(Vec::new())
        }
    }

    struct RemoteConn {
        remote: Arc<Remote>,
    }

    impl ChunkIo for RemoteConn {
        fn read_chunk(&self, offset: u64, len: u32) -> BoxFuture<'_, Result<Vec<u8>, ChunkIoError>> {
            Box::pin(async move {
                self.remote.reads_started.fetch_add(1, Ordering::SeqCst);
                if let Some(gate) = &self.remote.gate {
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|_| ChunkIoError::Closed)?;
                }
                if self.remote.poisoned_offset == Some(offset) {
                    return Err(ChunkIoError::Transport("injected fault".into()));
                }
                let data = self.remote.data.lock().unwrap();
                let start = offset as usize;
                let end = (start + len as usize).min(data.len());
                Ok(data[start..end].to_vec())
            })
        }

        fn write_chunk<'a>(
            &'a self,
            offset: u64,
            data: &'a [u8],
        ) -> BoxFuture<'a, Result<(), ChunkIoError>> {
            Box::pin(async move {
                if self.remote.poisoned_offset == Some(offset) {
                    return Err(ChunkIoError::Transport("injected fault".into()));
                }
                let mut buf = self.remote.data.lock().unwrap();
                let end = offset as usize + data.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[offset as usize..end].copy_from_slice(data);
                Ok(())
            })
        }
    }

    struct RemoteFactory {
        remote: Arc<Remote>,
    }

    impl ConnectionFactory for RemoteFactory {
        fn connect(&self) -> BoxFuture<'_, Result<Box<dyn ChunkIo>, ChunkIoError>> {
            Box::pin(async move {
                Ok(Box::new(RemoteConn {
                    remote: Arc::clone(&self.remote),
                }) as Box<dyn ChunkIo>)
            })
        }
    }

    fn pool_for(remote: &Arc<Remote>, size: usize) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Arc::new(RemoteFactory {
                remote: Arc::clone(remote),
            }),
            size,
            Duration::from_secs(10),
        ))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            max_attempts: 3,
            acquire_retry_delay: Duration::from_millis(10),
            ..EngineConfig::default()
        }
    }

    // ---------- End-to-end round trips ----------

    #[tokio::test]
    async fn download_large_file_checksum_matches() {
        let data = test_data(10_000_000);
        let expected = checksum_bytes(&data);
        let remote = Remote::serving(data);
        let pool = pool_for(&remote, 8);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        let sink = Arc::new(FileSink::create(&dest).await.unwrap());

        let session = TransferSession::new(
            TransferSpec {
                total_size: 10_000_000,
                part_size: 512_000,
                target: TransferTarget::Download(sink as Arc<dyn PartSink>),
            },
            pool,
            config(),
        );
        session.start().unwrap();

        assert!(matches!(session.wait().await, TransferOutcome::Completed));
        assert_eq!(session.progress().bytes_done, 10_000_000);
        assert_eq!(checksum_file(&dest).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn upload_file_checksum_matches() {
        let data = test_data(3_145_728);
        let expected = checksum_bytes(&data);

        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("outgoing.bin");
        tokio::fs::write(&src_path, &data).await.unwrap();
        let source = Arc::new(FileSource::open(&src_path).await.unwrap());
        let total_size = source.size();

        let remote = Remote::receiving();
        let pool = pool_for(&remote, 4);
        let cfg = config();
        let session = TransferSession::new(
            TransferSpec {
                total_size,
                part_size: cfg.part_size_for(total_size),
                target: TransferTarget::Upload(source as Arc<dyn PartSource>),
            },
            pool,
            cfg,
        );
        session.start().unwrap();

        assert!(matches!(session.wait().await, TransferOutcome::Completed));
        assert_eq!(checksum_bytes(&remote.data.lock().unwrap()), expected);
    }

    // ---------- Failure and cancellation ----------

    #[tokio::test]
    async fn persistent_part_failure_fails_session_once() {
        let data = test_data(2_000_000);
        let remote = Arc::new(Remote {
            data: Mutex::new(data),
            poisoned_offset: Some(1_024_000),
            reads_started: AtomicUsize::new(0),
            gate: None,
        });
        let pool = pool_for(&remote, 4);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        let sink = Arc::new(FileSink::create(&dest).await.unwrap());

        let cfg = config();
        let max_attempts = cfg.max_attempts;
        let session = TransferSession::new(
            TransferSpec {
                total_size: 2_000_000,
                part_size: 512_000,
                target: TransferTarget::Download(sink as Arc<dyn PartSink>),
            },
            pool,
            cfg,
        );
        session.start().unwrap();

        let TransferOutcome::Failed(err) = session.wait().await else {
            panic!("expected failure");
        };
        assert!(matches!(
            *err,
            TransferError::PartFailed {
                index: 2,
                attempts,
                ..
            } if attempts == max_attempts
        ));
        // Failed download leaves nothing at the destination.
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_download_leaves_no_artifact() {
        let data = test_data(5_000_000);
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let remote = Arc::new(Remote {
            data: Mutex::new(data),
            poisoned_offset: None,
            reads_started: AtomicUsize::new(0),
            gate: Some(Arc::clone(&gate)),
        });
        let pool = pool_for(&remote, 2);

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("payload.bin");
        let sink = Arc::new(FileSink::create(&dest).await.unwrap());

        let session = TransferSession::new(
            TransferSpec {
                total_size: 5_000_000,
                part_size: 512_000,
                target: TransferTarget::Download(sink as Arc<dyn PartSink>),
            },
            pool,
            config(),
        );
        session.start().unwrap();

        // Let both workers block inside a chunk read.
        while remote.reads_started.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        session.cancel();
        let at_cancel = remote.reads_started.load(Ordering::SeqCst);
        gate.add_permits(1000);

        assert!(matches!(session.wait().await, TransferOutcome::Cancelled));
        assert_eq!(session.state(), SessionState::Cancelled);
        // In-flight chunks drained; no new chunk started after cancel.
        assert_eq!(remote.reads_started.load(Ordering::SeqCst), at_cancel);
        assert!(session.progress().bytes_done < 5_000_000);
        assert!(!dest.exists());
    }

    // ---------- Registry integration ----------

    #[tokio::test]
    async fn registry_enforces_one_transfer_per_owner() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let remote = Arc::new(Remote {
            data: Mutex::new(test_data(1_000_000)),
            poisoned_offset: None,
            reads_started: AtomicUsize::new(0),
            gate: Some(Arc::clone(&gate)),
        });
        let pool = pool_for(&remote, 2);

        let dir = tempfile::tempdir().unwrap();
        let make_session = |name: &str| {
            let dest = dir.path().join(name);
            let pool = Arc::clone(&pool);
            async move {
                let sink = Arc::new(FileSink::create(&dest).await.unwrap());
                TransferSession::new(
                    TransferSpec {
                        total_size: 1_000_000,
                        part_size: 256 * 1024,
                        target: TransferTarget::Download(sink as Arc<dyn PartSink>),
                    },
                    pool,
                    config(),
                )
            }
        };

        let registry = TaskRegistry::new();
        registry
            .register(42, make_session("first.bin").await)
            .unwrap();
        let err = registry
            .register(42, make_session("second.bin").await)
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(42)));

        // Finish the first; the owner slot frees up.
        gate.add_permits(1000);
        let first = registry.get(42).unwrap();
        assert!(matches!(
            first.session.wait().await,
            TransferOutcome::Completed
        ));
        registry
            .register(42, make_session("third.bin").await)
            .unwrap();
        registry.cancel(42).unwrap();
        registry.shutdown().await;
    }

    // ---------- Sizing heuristics ----------

    #[test]
    fn connection_count_scales_with_size() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.connections_for(0), 1);
        assert_eq!(cfg.connections_for(1), 1);
        assert_eq!(cfg.connections_for(100 * 1024 * 1024), cfg.pool_size);
        assert_eq!(cfg.connections_for(10 * 1024 * 1024 * 1024), cfg.pool_size);
        let mid = cfg.connections_for(50 * 1024 * 1024);
        assert!((1..=cfg.pool_size).contains(&mid));
    }

    #[test]
    fn part_size_bands() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.part_size_for(1), 128 * 1024);
        assert_eq!(cfg.part_size_for(0x640_0000), 128 * 1024);
        assert_eq!(cfg.part_size_for(0x640_0001), 256 * 1024);
        assert_eq!(cfg.part_size_for(0x2EE0_0000), 256 * 1024);
        assert_eq!(cfg.part_size_for(0x2EE0_0001), 512 * 1024);
    }
}
