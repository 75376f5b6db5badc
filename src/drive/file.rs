//! Open-file session with debounced background persistence.
//!
//! Reads, writes and truncates run synchronously on the caller's thread
//! against the session's self-encryption stream. Every mutation re-arms one
//! inactivity timer on the task queue; when it fires, a flush task finalizes
//! the stream and hands the result to the session's [`FlushTarget`].
//!
//! Lock order is context, then session phase, then timer. The flush task
//! never holds the context lock while talking to storage.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SessionSettings;
use crate::encrypt::{DiskUsage, EncryptedChunk, MemoryUsage, RetrievalFn, SelfEncryptor};
use crate::error::DriveError;
use crate::sync::{Job, TaskQueue, TimerHandle};

use super::file_context::{FileContext, Lineage, SharedContext};
use super::lock;
use super::meta_data::MetaData;

/// Where finalized content goes.
pub trait FlushTarget: Send + Sync {
    /// Store `chunks`, then record `meta_data` in the listing at `lineage`.
    fn persist(
        &self,
        meta_data: &MetaData,
        lineage: &Lineage,
        chunks: &[EncryptedChunk],
    ) -> Result<(), DriveError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Opened,
    /// Closed by the caller; waiting for the final flush.
    Closing,
    Closed,
}

struct FlushState {
    phase: Mutex<SessionState>,
    timer: Mutex<Option<TimerHandle>>,
    /// Serializes flushes of this session (queued and forced).
    persist_lock: Mutex<()>,
    in_flight: AtomicBool,
    error: Mutex<Option<DriveError>>,
    completed: AtomicUsize,
}

pub struct File {
    context: SharedContext,
    queue: Option<TaskQueue>,
    target: Option<Arc<dyn FlushTarget>>,
    settings: SessionSettings,
    flush: Arc<FlushState>,
}

impl File {
    /// A new entry attached to `queue`.
    pub fn create(queue: TaskQueue, name: impl Into<String>, is_directory: bool) -> Self {
        let mut file = Self::from_context(FileContext::new(name, is_directory));
        file.attach(queue);
        file
    }

    /// A session over an existing context, not yet attached to a queue.
    pub fn from_context(context: FileContext) -> Self {
        Self {
            context: context.into_shared(),
            queue: None,
            target: None,
            settings: SessionSettings::default(),
            flush: Arc::new(FlushState {
                phase: Mutex::new(SessionState::Unopened),
                timer: Mutex::new(None),
                persist_lock: Mutex::new(()),
                in_flight: AtomicBool::new(false),
                error: Mutex::new(None),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn attach(&mut self, queue: TaskQueue) {
        self.queue = Some(queue);
    }

    pub fn with_flush_target(mut self, target: Arc<dyn FlushTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn context(&self) -> SharedContext {
        self.context.clone()
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.flush.phase)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Opened
    }

    pub fn meta_data(&self) -> MetaData {
        lock(&self.context).meta_data.clone()
    }

    /// Flushes that reached their target successfully.
    pub fn flush_count(&self) -> usize {
        self.flush.completed.load(Ordering::SeqCst)
    }

    /// Error of the last failed background flush, if not yet taken.
    pub fn take_flush_error(&self) -> Option<DriveError> {
        lock(&self.flush.error).take()
    }

    /// Bind a self-encryption stream to the entry's current data map.
    ///
    /// Allowed on a fresh session and on a closed one, which reopens it.
    pub fn open(
        &self,
        retrieval: RetrievalFn,
        memory_cap: MemoryUsage,
        disk_cap: DiskUsage,
        cache_root: &Path,
    ) -> Result<(), DriveError> {
        if self.queue.is_none() {
            return Err(DriveError::NotAttached);
        }
        let mut context = lock(&self.context);
        let mut phase = lock(&self.flush.phase);
        if matches!(*phase, SessionState::Opened | SessionState::Closing) {
            return Err(DriveError::AlreadyOpen);
        }
        let Some(data_map) = context.meta_data.data_map() else {
            return Err(DriveError::IsDirectory(context.meta_data.name().to_string()));
        };

        let stream = SelfEncryptor::new(
            data_map,
            retrieval,
            memory_cap,
            disk_cap,
            cache_root,
            self.settings.chunk_size,
        );
        context.self_encryptor = Some(stream);
        *phase = SessionState::Opened;
        log::debug!("Opened {}", context.meta_data.name());
        Ok(())
    }

    /// Read into `buffer` from `offset`. Returns 0 at or past the end of file.
    pub fn read(&self, buffer: &mut [u8], offset: u64) -> Result<usize, DriveError> {
        let mut context = lock(&self.context);
        self.ensure_open()?;
        let stream = context
            .self_encryptor
            .as_mut()
            .ok_or(DriveError::NotOpen)?;
        let count = stream.read(buffer, offset)?;
        context.meta_data.touch_access();
        Ok(count)
    }

    pub fn write(&self, data: &[u8], offset: u64) -> Result<usize, DriveError> {
        let mut context = lock(&self.context);
        self.ensure_open()?;
        let stream = context
            .self_encryptor
            .as_mut()
            .ok_or(DriveError::NotOpen)?;
        let written = stream.write(data, offset)?;
        if written == 0 {
            return Ok(0);
        }
        let new_size = stream.size();
        context.meta_data.touch_write(new_size);
        context.content_changed = true;
        self.schedule_flush();
        Ok(written)
    }

    pub fn truncate(&self, new_size: u64) -> Result<(), DriveError> {
        let mut context = lock(&self.context);
        self.ensure_open()?;
        let stream = context
            .self_encryptor
            .as_mut()
            .ok_or(DriveError::NotOpen)?;
        stream.truncate(new_size)?;
        context.meta_data.touch_write(new_size);
        context.content_changed = true;
        self.schedule_flush();
        Ok(())
    }

    /// Release the session. Pending changes are flushed in the background;
    /// this does not wait for them.
    pub fn close(&self) -> Result<(), DriveError> {
        let mut context = lock(&self.context);
        let mut phase = lock(&self.flush.phase);
        if *phase != SessionState::Opened {
            return Err(DriveError::NotOpen);
        }

        if context.content_changed {
            *phase = SessionState::Closing;
            drop(phase);
            log::debug!("Closing {} after pending flush", context.meta_data.name());
            self.schedule_flush();
        } else if self.flush.in_flight.load(Ordering::SeqCst) {
            // The running flush finishes the close.
            *phase = SessionState::Closing;
            log::debug!("Closing {} after running flush", context.meta_data.name());
        } else {
            context.self_encryptor = None;
            *phase = SessionState::Closed;
            log::debug!("Closed {}", context.meta_data.name());
        }
        Ok(())
    }

    /// Disarm the timer and flush on the calling thread.
    ///
    /// Blocks on storage; don't call it from an async task whose runtime is
    /// needed to complete storage calls.
    pub fn flush_now(&self) -> Result<(), DriveError> {
        if let Some(timer) = lock(&self.flush.timer).take() {
            timer.cancel();
        }
        run_flush(&self.context, self.target.as_deref(), &self.flush)
    }

    /// Apply a move to this session's entry: new lineage and name.
    pub fn relocate(&self, lineage: Lineage, new_name: &str) {
        let mut context = lock(&self.context);
        context.set_lineage(lineage);
        context.meta_data.set_name(new_name);
        context.meta_data.touch_status();
    }

    fn ensure_open(&self) -> Result<(), DriveError> {
        if *lock(&self.flush.phase) == SessionState::Opened {
            Ok(())
        } else {
            Err(DriveError::NotOpen)
        }
    }

    /// Replace any armed timer with a fresh one.
    fn schedule_flush(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        let job = self.flush_job();
        let mut timer = lock(&self.flush.timer);
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
        *timer = Some(queue.post_after(self.settings.inactivity_delay, job));
    }

    /// The job owns its own references so it outlives this handle.
    fn flush_job(&self) -> Job {
        let context = self.context.clone();
        let target = self.target.clone();
        let flush = self.flush.clone();
        Box::new(move || {
            if let Err(e) = run_flush(&context, target.as_deref(), &flush) {
                log::error!("Background flush failed: {}", e);
                *lock(&flush.error) = Some(e);
            }
        })
    }
}

/// Run one flush of the session. `in_flight` is cleared under the context
/// lock, so a concurrent `close` either sees the flush running and leaves
/// the close to it, or sees it done.
fn run_flush(
    context: &SharedContext,
    target: Option<&dyn FlushTarget>,
    flush: &FlushState,
) -> Result<(), DriveError> {
    let _serial = lock(&flush.persist_lock);
    flush.in_flight.store(true, Ordering::SeqCst);
    let result = persist_changes(context, target, flush);

    let mut ctx = lock(context);
    flush.in_flight.store(false, Ordering::SeqCst);
    if result.is_ok() && !ctx.content_changed {
        finish_close(&mut ctx, flush);
    }
    result
}

/// Finalize under the context lock, persist without it, then mark the
/// persisted slots clean.
fn persist_changes(
    context: &SharedContext,
    target: Option<&dyn FlushTarget>,
    flush: &FlushState,
) -> Result<(), DriveError> {
    let (finalized, meta_data, lineage) = {
        let mut ctx = lock(context);
        if !ctx.content_changed {
            return Ok(());
        }
        let Some(stream) = ctx.self_encryptor.as_ref() else {
            return Ok(());
        };
        let finalized = stream.finalize()?;
        ctx.meta_data.set_data_map(finalized.data_map.clone())?;
        ctx.content_changed = false;
        (finalized, ctx.meta_data.clone(), ctx.lineage())
    };

    let Some(target) = target else {
        log::debug!("No flush target for {}; content finalized locally", meta_data.name());
        flush.completed.fetch_add(1, Ordering::SeqCst);
        return Ok(());
    };

    let result = match lineage {
        Some(lineage) => target.persist(&meta_data, &lineage, &finalized.chunks),
        None => Err(DriveError::NoParent(meta_data.name().to_string())),
    };

    let mut ctx = lock(context);
    match result {
        Ok(()) => {
            if let Some(stream) = ctx.self_encryptor.as_mut() {
                stream.mark_persisted(&finalized);
            }
            flush.completed.fetch_add(1, Ordering::SeqCst);
            log::info!(
                "Persisted {} ({} bytes, {} new chunks)",
                meta_data.name(),
                meta_data.size(),
                finalized.chunks.len()
            );
            Ok(())
        }
        Err(e) => {
            // Dirty again so the next flush retries.
            ctx.content_changed = true;
            Err(e)
        }
    }
}

fn finish_close(context: &mut FileContext, flush: &FlushState) {
    let mut phase = lock(&flush.phase);
    if *phase == SessionState::Closing {
        context.self_encryptor = None;
        *phase = SessionState::Closed;
        log::debug!("Closed {}", context.meta_data.name());
    }
}
