//! Parallel evaluation of many samples.
//!
//! [`process`] evaluates every sample of a dataset against the measures of a
//! [`Study`]. Each sample is a [`SampleTask`] that a worker resolves against a
//! shared [`SampleSource`]: the worker evaluates the sample on its own fork
//! of the study, and the coordinator merges the fork back as soon as it
//! completes. Completion order is arbitrary; merging is order independent, so
//! the final study is the same as after sequential processing.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use segmetrics::label::Image;
//! use segmetrics::measure::Dice;
//! use segmetrics::parallel::{self, FnSource, ProcessOptions};
//! use segmetrics::study::Study;
//!
//! let mut study: Study<u32> = Study::new();
//! study.add_measure(Dice::default())?;
//!
//! let source = Arc::new(FnSource::new(
//!     |&id: &u32| Ok(Image::from_fn(8, 8, |x, _| i64::from(x < id as usize))),
//!     |_: &u32| Ok(Image::from_fn(8, 8, |x, _| i64::from(x < 4))),
//! ));
//! let options = ProcessOptions::builder().workers(2).build();
//! parallel::process_all(&mut study, source, &[2, 4, 6], &options)?;
//!
//! assert_eq!(study.results("Dice")?[&4], vec![1.0]);
//! # Ok::<(), segmetrics::Error>(())
//! ```

use std::any::Any;
use std::cell::Cell;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::label::Image;
use crate::study::{SampleKey, Study};

/// How often the coordinator checks for interrupts while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

thread_local! {
    /// Set on the coordinator thread while [`process`] runs.
    static FORKED: Cell<bool> = const { Cell::new(false) };
    /// Set on worker threads.
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Provides the images of a sample.
///
/// Shared between all workers, which call it concurrently.
pub trait SampleSource<K>: Send + Sync {
    /// Candidate image of `sample_id`.
    fn actual(&self, sample_id: &K) -> Result<Image>;

    /// Reference image of `sample_id`.
    fn expected(&self, sample_id: &K) -> Result<Image>;
}

/// [`SampleSource`] built from two closures.
pub struct FnSource<A, E> {
    actual: A,
    expected: E,
}

impl<A, E> FnSource<A, E> {
    /// Wrap the accessors of the candidate and the reference images.
    pub fn new<K>(actual: A, expected: E) -> Self
    where
        A: Fn(&K) -> Result<Image> + Send + Sync,
        E: Fn(&K) -> Result<Image> + Send + Sync,
    {
        Self { actual, expected }
    }
}

impl<K, A, E> SampleSource<K> for FnSource<A, E>
where
    A: Fn(&K) -> Result<Image> + Send + Sync,
    E: Fn(&K) -> Result<Image> + Send + Sync,
{
    fn actual(&self, sample_id: &K) -> Result<Image> {
        (self.actual)(sample_id)
    }

    fn expected(&self, sample_id: &K) -> Result<Image> {
        (self.expected)(sample_id)
    }
}

/// Cooperative interrupt flag for [`process`].
///
/// Raising the interrupt stops the harness at its next poll: queued samples
/// are skipped, running samples finish in the background and are discarded,
/// and [`Error::Interrupted`] is returned. Samples merged before the
/// interrupt remain in the study.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptState>,
}

#[derive(Debug, Default)]
struct InterruptState {
    raised: AtomicBool,
    pending: AtomicBool,
    masked: AtomicUsize,
}

impl Interrupt {
    /// Create a handle that is not raised.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an interrupt. While masked, delivery is deferred until the
    /// last mask is released.
    pub fn raise(&self) {
        if self.inner.masked.load(Ordering::SeqCst) > 0 {
            self.inner.pending.store(true, Ordering::SeqCst);
        } else {
            self.inner.raised.store(true, Ordering::SeqCst);
        }
    }

    /// Whether an interrupt was delivered.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Defer delivery until the returned guard is dropped.
    #[must_use]
    pub fn mask(&self) -> InterruptMask<'_> {
        self.inner.masked.fetch_add(1, Ordering::SeqCst);
        InterruptMask { interrupt: self }
    }
}

/// Scope in which interrupts are deferred, see [`Interrupt::mask`].
#[derive(Debug)]
pub struct InterruptMask<'a> {
    interrupt: &'a Interrupt,
}

impl Drop for InterruptMask<'_> {
    fn drop(&mut self) {
        let state = &self.interrupt.inner;
        if state.masked.fetch_sub(1, Ordering::SeqCst) == 1 && state.pending.swap(false, Ordering::SeqCst) {
            state.raised.store(true, Ordering::SeqCst);
        }
    }
}

/// Options of [`process`].
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Maximum number of worker threads.
    pub workers: usize,
    /// Whether candidate images are uniquely labeled already.
    pub actual_unique: bool,
    /// Whether reference images are uniquely labeled already.
    pub expected_unique: bool,
    /// Whether results of samples already in the study are replaced.
    pub replace: bool,
    /// Evaluate on the calling thread regardless of `workers`.
    pub sequential: bool,
    /// Interrupt handle polled by the coordinator.
    pub interrupt: Option<Interrupt>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProcessOptions {
    /// Create a new options builder.
    #[must_use]
    pub fn builder() -> ProcessOptionsBuilder {
        ProcessOptionsBuilder::default()
    }
}

/// Builder for [`ProcessOptions`].
#[derive(Debug, Default)]
pub struct ProcessOptionsBuilder {
    workers: Option<usize>,
    actual_unique: Option<bool>,
    expected_unique: Option<bool>,
    replace: Option<bool>,
    sequential: bool,
    interrupt: Option<Interrupt>,
}

impl ProcessOptionsBuilder {
    /// Set the maximum number of workers (default: available parallelism).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set whether candidate images are uniquely labeled (default: true).
    #[must_use]
    pub fn actual_unique(mut self, unique: bool) -> Self {
        self.actual_unique = Some(unique);
        self
    }

    /// Set whether reference images are uniquely labeled (default: true).
    #[must_use]
    pub fn expected_unique(mut self, unique: bool) -> Self {
        self.expected_unique = Some(unique);
        self
    }

    /// Set whether existing samples are replaced (default: true).
    #[must_use]
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = Some(replace);
        self
    }

    /// Force evaluation on the calling thread.
    #[must_use]
    pub fn sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Set the interrupt handle.
    #[must_use]
    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Build the options.
    #[must_use]
    pub fn build(self) -> ProcessOptions {
        ProcessOptions {
            workers: self.workers.unwrap_or_else(default_workers).max(1),
            actual_unique: self.actual_unique.unwrap_or(true),
            expected_unique: self.expected_unique.unwrap_or(true),
            replace: self.replace.unwrap_or(true),
            sequential: self.sequential,
            interrupt: self.interrupt,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// One sample to evaluate: its position in the sample list and its id.
#[derive(Debug, Clone)]
pub struct SampleTask<K> {
    /// Index into the sample list passed to [`process`].
    pub position: usize,
    /// Sample identifier.
    pub sample_id: K,
}

impl<K: SampleKey> SampleTask<K> {
    /// Load the images of this sample from `source` and evaluate them with
    /// `study`. Panics inside measures are reported as
    /// [`Error::WorkerPanicked`].
    pub fn run<S>(
        &self,
        study: &mut Study<K>,
        source: &S,
        options: &ProcessOptions,
        replace: bool,
    ) -> Result<()>
    where
        S: SampleSource<K> + ?Sized,
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
            let expected = source.expected(&self.sample_id)?;
            let actual = source.actual(&self.sample_id)?;
            study.set_expected(&expected, options.expected_unique)?;
            study.process(self.sample_id.clone(), &actual, options.actual_unique, replace)
        }));
        outcome
            .unwrap_or_else(|payload| Err(Error::WorkerPanicked(panic_message(payload.as_ref()))))
            .map_err(|e| e.for_sample(&self.sample_id))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Marks the calling thread as running the harness.
struct ForkGuard;

impl ForkGuard {
    fn acquire() -> Result<Self> {
        if FORKED.get() || IN_WORKER.get() {
            return Err(Error::AlreadyForked);
        }
        FORKED.set(true);
        Ok(Self)
    }
}

impl Drop for ForkGuard {
    fn drop(&mut self) {
        FORKED.set(false);
    }
}

/// Worker threads of one [`process`] call.
///
/// Dropping the pool before [`WorkerPool::finish`] cancels it: queued tasks
/// are skipped and results of running tasks are discarded.
struct WorkerPool {
    pool: rayon::ThreadPool,
    cancelled: Arc<AtomicBool>,
    finished: bool,
}

impl WorkerPool {
    fn new(workers: usize, interrupt: Option<&Interrupt>) -> Result<Self> {
        // Interrupts raised while threads are spawned are delivered afterwards.
        let _mask = interrupt.map(Interrupt::mask);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("segmetrics-worker-{index}"))
            .start_handler(|_| IN_WORKER.set(true))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        Ok(Self {
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: false,
        })
    }

    /// Queue `task`; it is skipped if the pool was cancelled before it starts.
    fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        let cancelled = Arc::clone(&self.cancelled);
        self.pool.spawn(move || {
            if !cancelled.load(Ordering::SeqCst) {
                task();
            }
        });
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.finished {
            warn!("cancelling queued samples");
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Evaluate `sample_ids` with the measures of `study`.
///
/// The images of each sample are obtained from `source`. Results are merged
/// into `study` as they complete; `progress` is called after every merge
/// with the number of completed samples and the total. Returns the sample
/// ids in completion order.
///
/// With a single effective worker, or with [`ProcessOptions::sequential`],
/// samples are evaluated in order on the calling thread. On failure or
/// interrupt, queued samples are cancelled, results of samples still running
/// are discarded, and the error is returned; samples merged so far remain in
/// `study`.
///
/// Fails with [`Error::AlreadyForked`] if called from within another
/// invocation, including from a worker thread.
pub fn process<K, S>(
    study: &mut Study<K>,
    source: Arc<S>,
    sample_ids: &[K],
    options: &ProcessOptions,
    mut progress: impl FnMut(usize, usize),
) -> Result<Vec<K>>
where
    K: SampleKey,
    S: SampleSource<K> + ?Sized + 'static,
{
    let _guard = ForkGuard::acquire()?;
    let total = sample_ids.len();
    let workers = options.workers.clamp(1, total.max(1));
    let started = Instant::now();
    info!(samples = total, workers, "processing samples");

    let completed = if workers == 1 || options.sequential {
        process_sequential(study, source.as_ref(), sample_ids, options, &mut progress)?
    } else {
        process_parallel(study, source, sample_ids, workers, options, &mut progress)?
    };

    info!(
        samples = completed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "processing finished"
    );
    Ok(completed)
}

/// Like [`process`], without progress reporting or the completion order.
pub fn process_all<K, S>(
    study: &mut Study<K>,
    source: Arc<S>,
    sample_ids: &[K],
    options: &ProcessOptions,
) -> Result<()>
where
    K: SampleKey,
    S: SampleSource<K> + ?Sized + 'static,
{
    process(study, source, sample_ids, options, |_, _| {}).map(|_| ())
}

fn process_sequential<K, S>(
    study: &mut Study<K>,
    source: &S,
    sample_ids: &[K],
    options: &ProcessOptions,
    progress: &mut impl FnMut(usize, usize),
) -> Result<Vec<K>>
where
    K: SampleKey,
    S: SampleSource<K> + ?Sized,
{
    let total = sample_ids.len();
    let mut completed = Vec::with_capacity(total);
    for (position, sample_id) in sample_ids.iter().enumerate() {
        check_interrupt(options, completed.len(), total)?;
        let task = SampleTask {
            position,
            sample_id: sample_id.clone(),
        };
        task.run(study, source, options, options.replace)?;
        completed.push(sample_id.clone());
        debug!(sample = %sample_id, completed = completed.len(), total, "sample done");
        progress(completed.len(), total);
    }
    Ok(completed)
}

fn process_parallel<K, S>(
    study: &mut Study<K>,
    source: Arc<S>,
    sample_ids: &[K],
    workers: usize,
    options: &ProcessOptions,
    progress: &mut impl FnMut(usize, usize),
) -> Result<Vec<K>>
where
    K: SampleKey,
    S: SampleSource<K> + ?Sized + 'static,
{
    let total = sample_ids.len();
    let pool = WorkerPool::new(workers, options.interrupt.as_ref())?;
    let (sender, receiver) = mpsc::channel::<(usize, Result<Study<K>>)>();

    for (position, sample_id) in sample_ids.iter().enumerate() {
        let task = SampleTask {
            position,
            sample_id: sample_id.clone(),
        };
        let mut fork = study.fork();
        let source = Arc::clone(&source);
        let options = options.clone();
        let sender = sender.clone();
        pool.spawn(move || {
            let result = task
                .run(&mut fork, source.as_ref(), &options, true)
                .map(|()| fork);
            // The coordinator stops listening once it gives up.
            let _ = sender.send((task.position, result));
        });
    }
    drop(sender);

    let mut completed = Vec::with_capacity(total);
    while completed.len() < total {
        check_interrupt(options, completed.len(), total)?;
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok((position, result)) => {
                let sample_id = &sample_ids[position];
                let sample_study = result?;
                study
                    .merge(&sample_study, Some(std::slice::from_ref(sample_id)), options.replace)
                    .map_err(|e| e.for_sample(sample_id))?;
                completed.push(sample_id.clone());
                debug!(sample = %sample_id, completed = completed.len(), total, "sample merged");
                progress(completed.len(), total);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::WorkerPool(format!(
                    "workers stopped after {} of {total} samples",
                    completed.len()
                )));
            }
        }
    }
    pool.finish();
    Ok(completed)
}

fn check_interrupt(options: &ProcessOptions, completed: usize, total: usize) -> Result<()> {
    match &options.interrupt {
        Some(interrupt) if interrupt.is_raised() => Err(Error::Interrupted { completed, total }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::LabelImage;
    use crate::measure::{Aggregation, Dice, ImageMeasure, Measure};

    fn source() -> Arc<impl SampleSource<u32>> {
        Arc::new(FnSource::new(
            |&id: &u32| Ok(Image::from_fn(16, 16, |x, y| i64::from(x < id as usize && y < 8))),
            |_: &u32| Ok(Image::from_fn(16, 16, |x, y| i64::from(x < 8 && y < 8))),
        ))
    }

    fn study() -> Study<u32> {
        let mut study = Study::new();
        study.add_measure(Dice::default().object_based()).unwrap();
        study
    }

    #[test]
    fn test_options_defaults() {
        let options = ProcessOptions::default();
        assert!(options.workers >= 1);
        assert!(options.actual_unique && options.expected_unique && options.replace);
        assert!(!options.sequential);
        assert_eq!(ProcessOptions::builder().workers(0).build().workers, 1);
    }

    #[test]
    fn test_sequential_and_parallel_agree() {
        let ids: Vec<u32> = (1..=12).collect();

        let mut sequential = study();
        let options = ProcessOptions::builder().sequential(true).build();
        let order = process(&mut sequential, source(), &ids, &options, |_, _| {}).unwrap();
        assert_eq!(order, ids);

        let mut parallel = study();
        let options = ProcessOptions::builder().workers(4).build();
        let mut order = process(&mut parallel, source(), &ids, &options, |_, _| {}).unwrap();
        order.sort_unstable();
        assert_eq!(order, ids);

        assert_eq!(sequential.table().unwrap().rows, parallel.table().unwrap().rows);
        assert_eq!(sequential.object_count(), parallel.object_count());
    }

    #[test]
    fn test_progress_reports_every_sample() {
        let mut study = study();
        let mut calls = Vec::new();
        let options = ProcessOptions::builder().workers(3).build();
        process(&mut study, source(), &[1, 2, 3, 4, 5], &options, |done, total| {
            calls.push((done, total));
        })
        .unwrap();
        assert_eq!(calls, (1..=5).map(|i| (i, 5)).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_sample_list() {
        let mut study = study();
        let order = process(&mut study, source(), &[], &ProcessOptions::default(), |_, _| {}).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_errors_carry_sample_id() {
        let failing = Arc::new(FnSource::new(
            |&id: &u32| {
                if id == 3 {
                    Image::new([2, 2, 2], vec![0; 8])
                } else {
                    Ok(Image::from_fn(16, 16, |_, _| 0))
                }
            },
            |_: &u32| Ok(Image::from_fn(16, 16, |_, _| 0)),
        ));
        for workers in [1, 2] {
            let mut study = study();
            let options = ProcessOptions::builder().workers(workers).build();
            let result = process_all(&mut study, failing.clone(), &[1, 2, 3], &options);
            match result {
                Err(Error::Sample { sample_id, source }) => {
                    assert_eq!(sample_id, "3");
                    assert!(matches!(*source, Error::InvalidImage { .. }));
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[derive(Clone)]
    struct Panicking;

    impl Measure for Panicking {
        fn set_expected(&mut self, _: &LabelImage) {}

        fn compute(&mut self, _: &LabelImage) -> Result<Vec<f64>> {
            panic!("measure exploded")
        }

        fn aggregation(&self) -> Aggregation {
            Aggregation::Mean
        }

        fn default_name(&self) -> String {
            "Panicking".to_string()
        }
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let mut study: Study<u32> = Study::new();
        study.add_measure(Panicking).unwrap();
        let options = ProcessOptions::builder().workers(2).build();
        let result = process_all(&mut study, source(), &[1, 2], &options);
        match result {
            Err(Error::Sample { source, .. }) => {
                assert!(matches!(*source, Error::WorkerPanicked(ref m) if m == "measure exploded"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_interrupt_stops_processing() {
        let interrupt = Interrupt::new();
        interrupt.raise();
        let options = ProcessOptions::builder()
            .workers(2)
            .interrupt(interrupt)
            .build();
        let mut study = study();
        let result = process_all(&mut study, source(), &[1, 2, 3], &options);
        assert!(matches!(result, Err(Error::Interrupted { completed: 0, total: 3 })));
        assert!(study.sample_ids().is_empty());
    }

    #[test]
    fn test_interrupt_mask_defers_delivery() {
        let interrupt = Interrupt::new();
        {
            let _outer = interrupt.mask();
            let _inner = interrupt.mask();
            interrupt.raise();
            assert!(!interrupt.is_raised());
        }
        assert!(interrupt.is_raised());
    }

    #[test]
    fn test_interrupt_from_progress_keeps_partial_results() {
        let interrupt = Interrupt::new();
        let options = ProcessOptions::builder()
            .sequential(true)
            .interrupt(interrupt.clone())
            .build();
        let mut study = study();
        let result = process(&mut study, source(), &[1, 2, 3, 4], &options, |done, _| {
            if done == 2 {
                interrupt.raise();
            }
        });
        assert!(matches!(result, Err(Error::Interrupted { completed: 2, total: 4 })));
        assert_eq!(study.sample_ids(), &[1, 2]);
    }

    #[test]
    fn test_nested_invocation_is_rejected() {
        let mut nested = None;
        let mut study = study();
        let options = ProcessOptions::builder().sequential(true).build();
        process(&mut study, source(), &[1], &options, |_, _| {
            let mut inner = Study::<u32>::new();
            let result = process_all(&mut inner, source(), &[1], &ProcessOptions::default());
            nested = Some(matches!(result, Err(Error::AlreadyForked)));
        })
        .unwrap();
        assert_eq!(nested, Some(true));

        // The guard is released afterwards.
        process_all(&mut study, source(), &[2], &options).unwrap();
    }

    #[test]
    fn test_duplicate_samples_without_replace() {
        let mut study = study();
        let options = ProcessOptions::builder().workers(2).replace(false).build();
        process_all(&mut study, source(), &[1, 2], &options).unwrap();
        let result = process_all(&mut study, source(), &[2, 3], &options);
        assert!(result.is_err());
        assert!(study.aggregate("Ob. Dice").unwrap().is_some());
    }
}
