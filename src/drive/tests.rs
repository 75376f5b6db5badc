//! Unit tests for file sessions.
//!
//! Uses a recording flush target backed by an in-memory store so flushes can
//! be counted, failed on demand and read back.

#[cfg(test)]
mod file_session_tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    use crate::config::SessionSettings;
    use crate::drive::{
        DirectoryId, File, FileContext, FileType, FlushTarget, Lineage, MetaData, SessionState,
    };
    use crate::encrypt::{DiskUsage, EncryptedChunk, MemoryUsage, RetrievalFn};
    use crate::error::DriveError;
    use crate::storage::{KeyValueStore, MemoryStore, StorageError};
    use crate::sync::TaskQueue;

    const MEMORY_CAP: u64 = 1024 * 1024;
    const DISK_CAP: u64 = MEMORY_CAP;
    const DELAY: Duration = Duration::from_millis(50);

    // ── Mock Flush Target ────────────────────────────────────────────────

    struct RecordingTarget {
        store: Arc<MemoryStore>,
        persisted: Mutex<Vec<(MetaData, Lineage)>>,
        fail: AtomicBool,
    }

    impl RecordingTarget {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                persisted: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn calls(&self) -> usize {
            self.persisted.lock().unwrap().len()
        }

        fn last(&self) -> MetaData {
            self.persisted.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl FlushTarget for RecordingTarget {
        fn persist(
            &self,
            meta_data: &MetaData,
            lineage: &Lineage,
            chunks: &[EncryptedChunk],
        ) -> Result<(), DriveError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("offline".to_string()).into());
            }
            for chunk in chunks {
                self.store.put(&chunk.name, &chunk.bytes)?;
            }
            self.persisted
                .lock()
                .unwrap()
                .push((meta_data.clone(), *lineage));
            Ok(())
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    struct Harness {
        queue: TaskQueue,
        target: Arc<RecordingTarget>,
        lineage: Lineage,
        fetches: Arc<AtomicUsize>,
        dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            Self {
                queue: TaskQueue::current().unwrap(),
                target: Arc::new(RecordingTarget::new()),
                lineage: Lineage::new(DirectoryId::generate(), DirectoryId::generate()),
                fetches: Arc::new(AtomicUsize::new(0)),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn session(&self, context: FileContext) -> File {
            let mut file = File::from_context(context.with_lineage(self.lineage))
                .with_settings(SessionSettings {
                    inactivity_delay: DELAY,
                    ..SessionSettings::default()
                })
                .with_flush_target(self.target.clone());
            file.attach(self.queue.clone());
            file
        }

        fn new_file(&self) -> File {
            self.session(FileContext::new("foo", false))
        }

        fn retrieval(&self) -> RetrievalFn {
            let store = self.target.store.clone();
            let fetches = self.fetches.clone();
            Arc::new(move |name: &str| {
                fetches.fetch_add(1, Ordering::SeqCst);
                store.get(name)
            })
        }

        fn open(&self, file: &File) -> Result<(), DriveError> {
            file.open(
                self.retrieval(),
                MemoryUsage(MEMORY_CAP),
                DiskUsage(DISK_CAP),
                self.dir.path(),
            )
        }
    }

    fn read_all(file: &File) -> Vec<u8> {
        let size = file.meta_data().size() as usize;
        let mut buf = vec![0u8; size];
        let n = file.read(&mut buf, 0).unwrap();
        buf.truncate(n);
        buf
    }

    // ── State machine ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_open_requires_attached_queue() {
        let h = Harness::new();
        let file = File::from_context(FileContext::new("foo", false));
        assert!(matches!(h.open(&file), Err(DriveError::NotAttached)));
        assert_eq!(file.state(), SessionState::Unopened);
    }

    #[tokio::test]
    async fn test_open_twice_fails() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        assert!(matches!(h.open(&file), Err(DriveError::AlreadyOpen)));
        assert!(file.is_open());
    }

    #[tokio::test]
    async fn test_open_directory_fails() {
        let h = Harness::new();
        let dir = File::create(h.queue.clone(), "dir", true);
        assert!(matches!(h.open(&dir), Err(DriveError::IsDirectory(_))));
    }

    #[tokio::test]
    async fn test_io_requires_open_session() {
        let h = Harness::new();
        let file = h.new_file();
        let mut buf = [0u8; 4];
        assert!(matches!(file.read(&mut buf, 0), Err(DriveError::NotOpen)));
        assert!(matches!(file.write(b"x", 0), Err(DriveError::NotOpen)));
        assert!(matches!(file.truncate(3), Err(DriveError::NotOpen)));
        assert!(matches!(file.close(), Err(DriveError::NotOpen)));
    }

    // ── Metadata and content ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_empty_file() {
        let h = Harness::new();
        let file = h.new_file();
        let meta = file.meta_data();
        assert_eq!(meta.file_type(), FileType::RegularFile);
        assert_eq!(meta.size(), 0);
        assert_eq!(meta.allocation_size(), 0);
        assert_eq!(meta.creation_time(), meta.last_status_time());
        assert_eq!(meta.creation_time(), meta.last_write_time());
        assert_eq!(meta.creation_time(), meta.last_access_time());
        assert!(meta.data_map().unwrap().is_empty());

        h.open(&file).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 0);
        assert_eq!(file.meta_data().size(), 0);
    }

    #[tokio::test]
    async fn test_write_read_file() {
        let h = Harness::new();
        let file = h.new_file();
        let created = file.meta_data().creation_time();
        h.open(&file).unwrap();

        let contents = vec![b'f'; 1000];
        assert_eq!(file.write(&contents, 0).unwrap(), 1000);

        let meta = file.meta_data();
        assert_eq!(meta.size(), 1000);
        assert_eq!(meta.allocation_size(), 1000);
        assert_eq!(meta.creation_time(), created);
        assert_eq!(meta.last_write_time(), meta.last_status_time());
        assert_eq!(meta.last_write_time(), meta.last_access_time());
        assert!(meta.last_write_time() >= created);

        assert_eq!(read_all(&file), contents);
        let after_read = file.meta_data();
        assert_eq!(after_read.last_write_time(), meta.last_write_time());
        assert_eq!(after_read.last_status_time(), meta.last_status_time());
        assert!(after_read.last_access_time() >= meta.last_write_time());
        assert_eq!(after_read.creation_time(), created);
    }

    #[tokio::test]
    async fn test_read_past_end() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"0123456789", 0).unwrap();
        let before = file.meta_data();

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf, 10).unwrap(), 0);
        assert_eq!(file.read(&mut buf, 1000).unwrap(), 0);

        let after = file.meta_data();
        assert_eq!(after.size(), 10);
        assert_eq!(after.last_write_time(), before.last_write_time());
        assert_eq!(after.last_status_time(), before.last_status_time());
        assert!(after.last_access_time() >= before.last_access_time());
    }

    #[tokio::test]
    async fn test_read_straddling_end() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"0123456789", 0).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(file.read(&mut buf, 6).unwrap(), 4);
        assert_eq!(&buf[..4], b"6789");
    }

    #[tokio::test]
    async fn test_truncate_increase() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"abc", 0).unwrap();

        file.truncate(8).unwrap();
        let meta = file.meta_data();
        assert_eq!(meta.size(), 8);
        assert_eq!(meta.allocation_size(), 8);
        assert_eq!(meta.last_write_time(), meta.last_status_time());
        assert_eq!(read_all(&file), b"abc\0\0\0\0\0");
    }

    #[tokio::test]
    async fn test_truncate_decrease() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"abcdefgh", 0).unwrap();

        file.truncate(3).unwrap();
        assert_eq!(file.meta_data().size(), 3);
        assert_eq!(file.meta_data().allocation_size(), 3);
        assert_eq!(read_all(&file), b"abc");
    }

    #[tokio::test]
    async fn test_write_beyond_end_extends() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"ab", 0).unwrap();
        file.write(b"z", 5).unwrap();
        assert_eq!(file.meta_data().size(), 6);
        assert_eq!(read_all(&file), b"ab\0\0\0z");
    }

    #[tokio::test]
    async fn test_exceed_max_disk_usage() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();

        let data = vec![7u8; ((MEMORY_CAP + DISK_CAP) * 2) as usize];
        assert!(matches!(
            file.write(&data, 0),
            Err(DriveError::CapacityExceeded { .. })
        ));
        assert_eq!(file.meta_data().size(), 0);
        assert_eq!(h.queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_chunk_larger_than_both_caps_changes_nothing() {
        let h = Harness::new();
        let mut file = File::from_context(FileContext::new("big", false).with_lineage(h.lineage))
            .with_settings(SessionSettings {
                inactivity_delay: DELAY,
                chunk_size: 8,
            })
            .with_flush_target(h.target.clone());
        file.attach(h.queue.clone());
        file.open(h.retrieval(), MemoryUsage(4), DiskUsage(4), h.dir.path())
            .unwrap();

        assert!(matches!(
            file.write(&[1u8; 8], 0),
            Err(DriveError::CapacityExceeded {
                requested: 8,
                available: 4
            })
        ));
        assert_eq!(file.meta_data().size(), 0);
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 0);
        assert_eq!(h.queue.outstanding(), 0);
    }

    // ── Debounced flush ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_close_timer_flushes_once() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();

        file.truncate(500).unwrap();
        for i in 0..10u64 {
            file.write(b"burst", i * 10).unwrap();
        }
        file.close().unwrap();
        assert_eq!(file.state(), SessionState::Closing);

        h.queue.drain().await;
        assert_eq!(h.queue.completed(), 1);
        assert_eq!(h.target.calls(), 1);
        assert_eq!(file.flush_count(), 1);
        assert_eq!(file.state(), SessionState::Closed);

        let persisted = h.target.last();
        assert_eq!(persisted.size(), 500);
        assert_eq!(persisted.data_map().unwrap().size, 500);
        assert_eq!(file.meta_data().size(), 500);
        assert!(!file.context().lock().unwrap().is_open());
    }

    /// Holds each persist until the test releases it.
    struct GatedTarget {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
        calls: AtomicUsize,
    }

    impl FlushTarget for GatedTarget {
        fn persist(
            &self,
            _meta_data: &MetaData,
            _lineage: &Lineage,
            _chunks: &[EncryptedChunk],
        ) -> Result<(), DriveError> {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.release.lock().unwrap().recv();
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_close_during_running_flush_arms_no_timer() {
        let h = Harness::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let target = Arc::new(GatedTarget {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            calls: AtomicUsize::new(0),
        });
        let mut file = File::from_context(FileContext::new("gated", false).with_lineage(h.lineage))
            .with_settings(SessionSettings {
                inactivity_delay: DELAY,
                ..SessionSettings::default()
            })
            .with_flush_target(target.clone());
        file.attach(h.queue.clone());
        h.open(&file).unwrap();

        file.write(b"payload", 0).unwrap();
        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();

        file.close().unwrap();
        assert_eq!(file.state(), SessionState::Closing);
        // Only the running flush.
        assert_eq!(h.queue.outstanding(), 1);

        release_tx.send(()).unwrap();
        h.queue.drain().await;
        assert_eq!(h.queue.completed(), 1);
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);
        assert_eq!(file.flush_count(), 1);
        assert_eq!(file.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_without_changes_schedules_nothing() {
        let h = Harness::new();
        let file = h.session(FileContext::from_meta_data(MetaData::new("clean", false)));
        h.open(&file).unwrap();
        let mut buf = [0u8; 4];
        file.read(&mut buf, 0).unwrap();

        file.close().unwrap();
        assert_eq!(file.state(), SessionState::Closed);
        assert_eq!(h.queue.outstanding(), 0);

        tokio::time::sleep(DELAY * 2).await;
        h.queue.drain().await;
        assert_eq!(h.queue.completed(), 0);
        assert_eq!(h.target.calls(), 0);
    }

    #[tokio::test]
    async fn test_idle_open_session_flushes_in_background() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"hello", 0).unwrap();

        h.queue.drain().await;
        assert_eq!(h.target.calls(), 1);
        assert!(file.is_open());
        assert!(!file.context().lock().unwrap().content_changed);
        assert_eq!(read_all(&file), b"hello");
    }

    #[tokio::test]
    async fn test_dropped_session_still_flushes() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"orphan", 0).unwrap();
        drop(file);

        h.queue.drain().await;
        assert_eq!(h.target.calls(), 1);
        assert_eq!(h.target.last().size(), 6);
    }

    #[tokio::test]
    async fn test_reopen_fetches_persisted_content() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"persisted bytes", 0).unwrap();
        file.close().unwrap();
        h.queue.drain().await;
        assert_eq!(file.state(), SessionState::Closed);

        h.open(&file).unwrap();
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(read_all(&file), b"persisted bytes");
        assert_eq!(h.fetches.load(Ordering::SeqCst), 1);
        file.close().unwrap();
        assert_eq!(file.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_flush_is_recorded_and_retried() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        h.target.fail.store(true, Ordering::SeqCst);

        file.write(b"retry me", 0).unwrap();
        h.queue.drain().await;
        assert!(matches!(
            file.take_flush_error(),
            Some(DriveError::Storage(StorageError::Backend(_)))
        ));
        assert!(file.take_flush_error().is_none());
        assert!(file.context().lock().unwrap().content_changed);

        h.target.fail.store(false, Ordering::SeqCst);
        file.flush_now().unwrap();
        assert_eq!(h.target.calls(), 1);
        assert!(!file.context().lock().unwrap().content_changed);
    }

    #[tokio::test]
    async fn test_failed_final_flush_keeps_session_closing() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        h.target.fail.store(true, Ordering::SeqCst);

        file.write(b"unsaved", 0).unwrap();
        file.close().unwrap();
        h.queue.drain().await;
        assert_eq!(file.state(), SessionState::Closing);
        assert!(file.take_flush_error().is_some());

        h.target.fail.store(false, Ordering::SeqCst);
        file.flush_now().unwrap();
        assert_eq!(file.state(), SessionState::Closed);
        assert_eq!(h.target.last().size(), 7);
    }

    #[tokio::test]
    async fn test_flush_now_cancels_armed_timer() {
        let h = Harness::new();
        let file = h.new_file();
        h.open(&file).unwrap();
        file.write(b"now", 0).unwrap();
        assert_eq!(h.queue.outstanding(), 1);

        file.flush_now().unwrap();
        assert_eq!(h.queue.outstanding(), 0);
        h.queue.drain().await;
        assert_eq!(h.target.calls(), 1);
        assert_eq!(h.queue.completed(), 0);
    }

    #[tokio::test]
    async fn test_flush_without_parent_reports_error() {
        let h = Harness::new();
        let mut file = File::from_context(FileContext::new("orphan", false))
            .with_flush_target(h.target.clone());
        file.attach(h.queue.clone());
        h.open(&file).unwrap();
        file.write(b"x", 0).unwrap();
        assert!(matches!(file.flush_now(), Err(DriveError::NoParent(_))));
    }

    #[tokio::test]
    async fn test_relocate_updates_lineage_and_name() {
        let h = Harness::new();
        let file = h.new_file();
        let before = file.meta_data();
        let moved_to = Lineage::new(DirectoryId::generate(), DirectoryId::generate());

        file.relocate(moved_to, "bar");
        let context = file.context();
        let context = context.lock().unwrap();
        assert_eq!(context.lineage(), Some(moved_to));
        assert_eq!(context.meta_data.name(), "bar");
        assert!(context.meta_data.last_status_time() >= before.last_status_time());
        assert_eq!(context.meta_data.last_write_time(), before.last_write_time());
    }
}
