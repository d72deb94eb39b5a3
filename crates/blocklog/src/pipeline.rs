// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered asynchronous log pipeline.
//!
//! Callers hold a cloneable [`Logger`] handle. Every log call is snapshotted
//! synchronously and sent to the [`Pipeline`] service, which owns the backend:
//!
//! ```text
//!    ┌──────────────┐
//!    │   Loggers    │ (many callers, snapshot entries)
//!    └──────┬───────┘
//!           │ Command channel
//!           v
//!    ┌──────────────┐      spawn       ┌──────────────────┐
//!    │   Dispatch   │ ───────────────> │ Formatting tasks │ (unordered)
//!    └──────┬───────┘                  └────────┬─────────┘
//!           │ DeliveryHandle (FIFO)             │ publish
//!           v                                   │
//!    ┌──────────────┐ <─────────────────────────┘
//!    │ Write task   │ (waits on each handle in turn)
//!    └──────┬───────┘
//!           v
//!        Writer
//! ```
//!
//! Formatting tasks may finish in any order; the position of a handle in the
//! delivery queue alone decides when its record is written.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::backend::{Formatter, Preformat, Writer};
use crate::config::PipelineConfig;
use crate::entry::EntrySource;
use crate::error::PipelineError;
use crate::level::Level;
use crate::record::{err_entry, EntryTree, Submission};

#[derive(Debug)]
enum Command {
    Submit(Submission),
    Shutdown(oneshot::Sender<Result<(), PipelineError>>),
}

/// Cloneable handle for submitting log calls to a running [`Pipeline`].
#[derive(Clone)]
pub struct Logger {
    tx: mpsc::UnboundedSender<Command>,
    preformatter: Arc<dyn Preformat>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Logs `message` with the entries of `sources`, in the order given.
    ///
    /// Entries are collected before returning; the backend is never waited on.
    ///
    /// # Errors
    ///
    /// `PipelineError::Closed` once shutdown has begun.
    pub fn log(
        &self,
        level: Level,
        message: impl Into<String>,
        sources: &[&dyn EntrySource],
    ) -> Result<(), PipelineError> {
        self.submit(Submission::capture(level, message, sources))
    }

    /// Like [`Logger::log`], with `err` appended as a final `err` entry.
    ///
    /// # Errors
    ///
    /// `PipelineError::Closed` once shutdown has begun.
    pub fn err(
        &self,
        level: Level,
        message: impl Into<String>,
        err: impl std::error::Error + Send + Sync + 'static,
        sources: &[&dyn EntrySource],
    ) -> Result<(), PipelineError> {
        let mut submission = Submission::capture(level, message, sources);
        submission
            .trees
            .push(EntryTree::capture(&err_entry(err)));
        self.submit(submission)
    }

    /// Queues an already captured submission.
    ///
    /// # Errors
    ///
    /// `PipelineError::Closed` once shutdown has begun.
    pub fn submit(&self, submission: Submission) -> Result<(), PipelineError> {
        self.tx
            .send(Command::Submit(submission))
            .map_err(|_| PipelineError::Closed)
    }

    /// Renders `source` ahead of time for this logger's backend.
    ///
    /// Meant for immutable context attached to many log calls. Backends
    /// without a cached form get a plain snapshot.
    pub fn preformat(&self, source: &dyn EntrySource) -> EntryTree {
        match self.preformatter.preformat(source) {
            Some(pre) => EntryTree::Preformatted(pre),
            None => EntryTree::capture(source),
        }
    }

    /// Waits for every earlier submission to be written, then closes the
    /// backend.
    ///
    /// # Errors
    ///
    /// - `PipelineError::Closed` if shutdown was already requested
    /// - the fatal write or formatting error that stopped the pipeline
    /// - `PipelineError::Close` if the backend failed to close
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done_tx))
            .map_err(|_| PipelineError::Closed)?;

        done_rx.await.map_err(|_| PipelineError::Closed)?
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer side of a [`DeliveryHandle`].
struct DeliverySlot<R>(oneshot::Sender<R>);

impl<R> DeliverySlot<R> {
    fn publish(self, raw: R) {
        // The write task is gone only after a fatal error; the record is moot.
        let _ = self.0.send(raw);
    }
}

/// Carries one formatted record from its formatting task to the write task.
struct DeliveryHandle<R>(oneshot::Receiver<R>);

impl<R> DeliveryHandle<R> {
    /// Blocks the calling thread until the record is published.
    fn wait(self) -> Result<R, PipelineError> {
        self.0.blocking_recv().map_err(|_| PipelineError::FormatterLost)
    }
}

fn delivery<R>() -> (DeliverySlot<R>, DeliveryHandle<R>) {
    let (tx, rx) = oneshot::channel();
    (DeliverySlot(tx), DeliveryHandle(rx))
}

/// Pipeline service owning a backend. Spawn [`Pipeline::run`] on a tokio
/// runtime and log through the returned [`Logger`].
pub struct Pipeline<F: Formatter, W> {
    formatter: Arc<F>,
    writer: W,
    rx: mpsc::UnboundedReceiver<Command>,
    delivery_capacity: usize,
}

impl<F, W> Pipeline<F, W>
where
    F: Formatter,
    W: Writer<F::Raw>,
{
    #[must_use]
    pub fn new(formatter: F, writer: W, config: &PipelineConfig) -> (Self, Logger) {
        let (tx, rx) = mpsc::unbounded_channel();
        let formatter = Arc::new(formatter);
        let preformatter: Arc<dyn Preformat> = formatter.clone();

        let service = Self {
            formatter,
            writer,
            rx,
            delivery_capacity: config.delivery_capacity.max(1),
        };
        let handle = Logger { tx, preformatter };

        (service, handle)
    }

    /// Creates the pipeline and spawns it on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    #[must_use]
    pub fn spawn(formatter: F, writer: W, config: &PipelineConfig) -> Logger {
        let (service, handle) = Self::new(formatter, writer, config);
        tokio::spawn(service.run());
        handle
    }

    pub async fn run(mut self) {
        debug!("Log pipeline started");

        let (delivery_tx, delivery_rx) = mpsc::channel(self.delivery_capacity);
        let writer = self.writer;
        let write_task = tokio::task::spawn_blocking(move || write_loop(writer, delivery_rx));

        let mut shutdown_tx = None;
        let mut stopped = false;
        let mut dropped = 0usize;

        // Once closed, the channel still yields everything queued before the
        // close, so no submission that won the race with shutdown is lost.
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Submit(submission) if stopped => {
                    drop(submission);
                    dropped += 1;
                }
                Command::Submit(submission) => {
                    let (slot, handle) = delivery();
                    // keep draining so the fatal error still reaches shutdown
                    if delivery_tx.send(handle).await.is_err() {
                        error!("Write task stopped, no further records will be written");
                        stopped = true;
                        dropped += 1;
                        continue;
                    }

                    // formatting is synchronous CPU work, kept off the async workers
                    let formatter = Arc::clone(&self.formatter);
                    tokio::task::spawn_blocking(move || {
                        slot.publish(formatter.format(&submission));
                    });
                }
                Command::Shutdown(done_tx) => {
                    if shutdown_tx.is_some() {
                        let _ = done_tx.send(Err(PipelineError::Closed));
                        continue;
                    }
                    debug!("Log pipeline shutting down");
                    shutdown_tx = Some(done_tx);
                    self.rx.close();
                }
            }
        }

        if dropped > 0 {
            warn!("Dropped {} log records after pipeline failure", dropped);
        }

        drop(delivery_tx);
        let result = match write_task.await {
            Ok((mut writer, written)) => {
                let closed = tokio::task::spawn_blocking(move || writer.close()).await;
                match (written, closed) {
                    (Err(e), closed) => {
                        if let Ok(Err(close_err)) = closed {
                            warn!("Failed to close log backend after failure: {close_err}");
                        }
                        Err(e)
                    }
                    (Ok(()), Ok(Ok(()))) => Ok(()),
                    (Ok(()), Ok(Err(e))) => {
                        error!("Failed to close log backend: {e}");
                        Err(PipelineError::Close(e))
                    }
                    (Ok(()), Err(_)) => Err(PipelineError::WriterPanicked),
                }
            }
            Err(e) => {
                error!("Log write task panicked: {e}");
                Err(PipelineError::WriterPanicked)
            }
        };

        match shutdown_tx {
            Some(done_tx) => {
                if done_tx.send(result).is_err() {
                    error!("Failed to send shutdown response - receiver dropped");
                }
            }
            None => {
                if let Err(e) = result {
                    error!("Log pipeline stopped without shutdown: {e}");
                }
            }
        }

        debug!("Log pipeline stopped");
    }
}

/// Runs on a blocking thread: backend writes are synchronous.
fn write_loop<R, W: Writer<R>>(
    mut writer: W,
    mut deliveries: mpsc::Receiver<DeliveryHandle<R>>,
) -> (W, Result<(), PipelineError>) {
    let mut written = 0u64;

    while let Some(handle) = deliveries.blocking_recv() {
        let raw = match handle.wait() {
            Ok(raw) => raw,
            Err(e) => {
                error!("Formatting task lost after {} records: {}", written, e);
                return (writer, Err(e));
            }
        };

        if let Err(e) = writer.write(raw) {
            error!("Backend write failed after {} records: {}", written, e);
            return (writer, Err(PipelineError::Write(e)));
        }
        written += 1;
    }

    debug!("Write task finished after {} records", written);
    (writer, Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Preformat;
    use crate::entries;
    use crate::entry::Entry;
    use crate::error::BackendError;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Formats a submission to its message, sleeping for the number of
    /// milliseconds found under the `delay` key.
    struct DelayFormatter;

    impl Preformat for DelayFormatter {}

    impl Formatter for DelayFormatter {
        type Raw = String;

        fn format(&self, submission: &Submission) -> String {
            let delay = submission
                .flattened()
                .iter()
                .find(|entry| entry.key == "delay")
                .and_then(|entry| entry.value.to_string().parse::<u64>().ok())
                .unwrap_or(0);
            std::thread::sleep(Duration::from_millis(delay));
            submission.message.clone()
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Write(String),
        Close,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        fail_on: Option<String>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().expect("lock poisoned").clone()
        }
    }

    impl Writer<String> for Recorder {
        fn write(&mut self, raw: String) -> Result<(), BackendError> {
            if self.fail_on.as_deref() == Some(raw.as_str()) {
                return Err(BackendError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "sink gone",
                )));
            }
            self.events.lock().expect("lock poisoned").push(Event::Write(raw));
            Ok(())
        }

        fn close(&mut self) -> Result<(), BackendError> {
            self.events.lock().expect("lock poisoned").push(Event::Close);
            Ok(())
        }
    }

    fn writes(messages: &[&str]) -> Vec<Event> {
        messages
            .iter()
            .map(|m| Event::Write((*m).to_string()))
            .chain(std::iter::once(Event::Close))
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_follow_submission_order_not_format_completion() {
        let recorder = Recorder::default();
        let logger = Pipeline::spawn(
            DelayFormatter,
            recorder.clone(),
            &PipelineConfig::default(),
        );

        logger
            .log(Level::Info, "slow", &[&Entry::new("delay", 60)])
            .expect("log");
        logger
            .log(Level::Info, "medium", &[&Entry::new("delay", 20)])
            .expect("log");
        logger.log(Level::Info, "fast", &[]).expect("log");

        logger.shutdown().await.expect("shutdown");

        assert_eq!(recorder.events(), writes(&["slow", "medium", "fast"]));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_all_writes_before_close() {
        let recorder = Recorder::default();
        let (service, logger) = Pipeline::new(
            DelayFormatter,
            recorder.clone(),
            &PipelineConfig {
                delivery_capacity: 2,
            },
        );
        let service_task = tokio::spawn(service.run());

        let names: Vec<String> = (0..20).map(|i| format!("record-{i}")).collect();
        for name in &names {
            logger.log(Level::Debug, name.clone(), &[]).expect("log");
        }
        logger.shutdown().await.expect("shutdown");
        service_task.await.expect("service task failed");

        let expected: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(recorder.events(), writes(&expected));
    }

    #[tokio::test]
    async fn test_log_after_shutdown_is_rejected() {
        let recorder = Recorder::default();
        let logger = Pipeline::spawn(DelayFormatter, recorder.clone(), &PipelineConfig::default());

        logger.shutdown().await.expect("shutdown");

        assert!(logger.is_closed());
        assert!(matches!(
            logger.log(Level::Info, "late", &[]),
            Err(PipelineError::Closed)
        ));
        assert!(matches!(logger.shutdown().await, Err(PipelineError::Closed)));
        assert_eq!(recorder.events(), vec![Event::Close]);
    }

    #[tokio::test]
    async fn test_err_appends_error_entry_last() {
        struct Keys;
        impl Preformat for Keys {}
        impl Formatter for Keys {
            type Raw = String;
            fn format(&self, submission: &Submission) -> String {
                submission
                    .flattened()
                    .iter()
                    .map(|e| format!("{}={}", e.key, e.value))
                    .collect::<Vec<_>>()
                    .join(",")
            }
        }

        let recorder = Recorder::default();
        let logger = Pipeline::spawn(Keys, recorder.clone(), &PipelineConfig::default());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");

        logger
            .err(Level::Error, "oh no", io, &[&entries!["path" => "/tmp/x"]])
            .expect("err");
        logger.shutdown().await.expect("shutdown");

        assert_eq!(recorder.events(), writes(&["path=/tmp/x,err=missing file"]));
    }

    #[tokio::test]
    async fn test_write_failure_is_fatal_and_escalated() {
        let recorder = Recorder {
            fail_on: Some("second".to_string()),
            ..Recorder::default()
        };
        let logger = Pipeline::spawn(DelayFormatter, recorder.clone(), &PipelineConfig::default());

        logger.log(Level::Info, "first", &[]).expect("log");
        logger.log(Level::Info, "second", &[]).expect("log");
        logger.log(Level::Info, "third", &[]).expect("log");

        let result = logger.shutdown().await;

        assert!(matches!(result, Err(PipelineError::Write(BackendError::Io(_)))));
        assert_eq!(recorder.events(), writes(&["first"]));
        assert!(matches!(
            logger.log(Level::Info, "fourth", &[]),
            Err(PipelineError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_panicking_formatter_stops_pipeline() {
        struct Panics;
        impl Preformat for Panics {}
        impl Formatter for Panics {
            type Raw = String;
            fn format(&self, submission: &Submission) -> String {
                if submission.message == "bad" {
                    panic!("formatter bug");
                }
                submission.message.clone()
            }
        }

        let recorder = Recorder::default();
        let logger = Pipeline::spawn(Panics, recorder.clone(), &PipelineConfig::default());

        logger.log(Level::Info, "good", &[]).expect("log");
        logger.log(Level::Info, "bad", &[]).expect("log");

        let result = logger.shutdown().await;
        assert!(matches!(result, Err(PipelineError::FormatterLost)));
        assert_eq!(recorder.events(), writes(&["good"]));
    }

    #[tokio::test]
    async fn test_dropping_all_loggers_drains_and_closes() {
        let recorder = Recorder::default();
        let (service, logger) =
            Pipeline::new(DelayFormatter, recorder.clone(), &PipelineConfig::default());
        let service_task = tokio::spawn(service.run());

        logger.log(Level::Info, "only", &[]).expect("log");
        drop(logger);
        service_task.await.expect("service task failed");

        assert_eq!(recorder.events(), writes(&["only"]));
    }

    #[tokio::test]
    async fn test_formatting_does_not_block_the_runtime() {
        // format blocks until the test task, on the same single-threaded
        // runtime, has observed that formatting started
        struct Gate {
            started: mpsc::UnboundedSender<()>,
            go: Mutex<std::sync::mpsc::Receiver<()>>,
        }
        impl Preformat for Gate {}
        impl Formatter for Gate {
            type Raw = String;
            fn format(&self, submission: &Submission) -> String {
                let _ = self.started.send(());
                let _ = self.go.lock().expect("lock poisoned").recv();
                submission.message.clone()
            }
        }

        let (started_tx, mut started_rx) = mpsc::unbounded_channel();
        let (go_tx, go_rx) = std::sync::mpsc::channel();
        let gate = Gate {
            started: started_tx,
            go: Mutex::new(go_rx),
        };
        let recorder = Recorder::default();
        let logger = Pipeline::spawn(gate, recorder.clone(), &PipelineConfig::default());

        logger.log(Level::Info, "gated", &[]).expect("log");
        started_rx.recv().await.expect("formatting started");
        go_tx.send(()).expect("formatter waiting");
        logger.shutdown().await.expect("shutdown");

        assert_eq!(recorder.events(), writes(&["gated"]));
    }

    #[tokio::test]
    async fn test_panicking_writer_is_escalated_without_close() {
        #[derive(Clone, Default)]
        struct PanicsOnWrite {
            closes: Arc<Mutex<usize>>,
        }
        impl Writer<String> for PanicsOnWrite {
            fn write(&mut self, _raw: String) -> Result<(), BackendError> {
                panic!("writer bug");
            }
            fn close(&mut self) -> Result<(), BackendError> {
                *self.closes.lock().expect("lock poisoned") += 1;
                Ok(())
            }
        }

        let writer = PanicsOnWrite::default();
        let logger = Pipeline::spawn(DelayFormatter, writer.clone(), &PipelineConfig::default());

        logger.log(Level::Info, "boom", &[]).expect("log");

        assert!(matches!(
            logger.shutdown().await,
            Err(PipelineError::WriterPanicked)
        ));
        assert_eq!(*writer.closes.lock().expect("lock poisoned"), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn test_random_format_delays_keep_submission_order(
            delays in prop::collection::vec(0u64..6, 1..16),
            capacity in 1usize..5,
        ) {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .build()
                .expect("runtime");
            let recorder = Recorder::default();

            rt.block_on(async {
                let logger = Pipeline::spawn(
                    DelayFormatter,
                    recorder.clone(),
                    &PipelineConfig { delivery_capacity: capacity },
                );
                for (i, delay) in delays.iter().enumerate() {
                    logger
                        .log(Level::Info, format!("m{i}"), &[&Entry::new("delay", *delay)])
                        .expect("log");
                }
                logger.shutdown().await.expect("shutdown");
            });

            let names: Vec<String> = (0..delays.len()).map(|i| format!("m{i}")).collect();
            let expected: Vec<&str> = names.iter().map(String::as_str).collect();
            prop_assert_eq!(recorder.events(), writes(&expected));
        }
    }

    #[tokio::test]
    async fn test_preformat_without_backend_support_snapshots() {
        let logger = Pipeline::spawn(DelayFormatter, Recorder::default(), &PipelineConfig::default());
        let tree = logger.preformat(&entries!["static" => true]);
        assert!(matches!(tree, EntryTree::Entries(_)));
        logger.shutdown().await.expect("shutdown");
    }
}
