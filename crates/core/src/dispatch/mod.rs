//! Hand-off between the capture callback and the analysis worker.
//!
//! The detectors keep per-frame history, so exactly one worker owns them and
//! consumes a bounded FIFO queue. The capture side only ever calls
//! [`FrameDispatcher::dispatch`], which never blocks: when the queue is full
//! the configured [`OverflowPolicy`] decides which frame is discarded.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use serde::Serialize;

use crate::{
    AnalysisAdapter, AudioFrame, DatagramSink, DispatchConfig, FeatureRecord, OverflowPolicy,
    PulsecastError, Result,
};

/// What happened to a frame handed to [`FrameDispatcher::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,
    /// The frame was queued after evicting the oldest waiting frame.
    DroppedOldest,
    /// The queue was full and the incoming frame was discarded.
    DroppedNewest,
    /// The worker has stopped; the frame was discarded.
    Closed,
}

/// Counters shared by the capture callback, the worker and the app.
#[derive(Debug, Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    analysis_failures: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub captured: u64,
    pub dropped: u64,
    pub analysis_failures: u64,
    pub sent: u64,
    pub send_failures: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            analysis_failures: self.analysis_failures.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Capture-side handle. Cheap to move into a driver callback.
#[derive(Debug)]
pub struct FrameDispatcher {
    sender: Sender<AudioFrame>,
    // Present only under `DropOldest`, to pop the oldest queued frame.
    evictor: Option<Receiver<AudioFrame>>,
    hop_size: usize,
    stats: Arc<PipelineStats>,
}

impl FrameDispatcher {
    /// Queues `frame` for analysis without blocking.
    pub fn dispatch(&self, frame: AudioFrame) -> DispatchOutcome {
        PipelineStats::bump(&self.stats.captured);

        let frame = match self.sender.try_send(frame) {
            Ok(()) => return DispatchOutcome::Queued,
            Err(TrySendError::Disconnected(_)) => {
                PipelineStats::bump(&self.stats.dropped);
                return DispatchOutcome::Closed;
            }
            Err(TrySendError::Full(frame)) => frame,
        };

        let Some(evictor) = &self.evictor else {
            PipelineStats::bump(&self.stats.dropped);
            tracing::debug!(sequence = frame.sequence(), "queue full, dropping newest frame");
            return DispatchOutcome::DroppedNewest;
        };

        // The worker may have drained the queue since the first attempt, in
        // which case nothing is evicted.
        let evicted = evictor.try_recv().ok();
        if let Some(evicted) = &evicted {
            PipelineStats::bump(&self.stats.dropped);
            tracing::debug!(sequence = evicted.sequence(), "queue full, dropping oldest frame");
        }
        match self.sender.try_send(frame) {
            Ok(()) if evicted.is_some() => DispatchOutcome::DroppedOldest,
            Ok(()) => DispatchOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                PipelineStats::bump(&self.stats.dropped);
                DispatchOutcome::DroppedNewest
            }
            Err(TrySendError::Disconnected(_)) => {
                PipelineStats::bump(&self.stats.dropped);
                DispatchOutcome::Closed
            }
        }
    }

    /// Frame length the analysis worker expects.
    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }
}

/// Owns the analysis worker thread.
#[derive(Debug)]
pub struct PipelineHandle {
    worker: JoinHandle<()>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    /// True once the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Waits for the worker to drain its queue. Returns once every
    /// [`FrameDispatcher`] has been dropped.
    pub fn join(self) -> Result<StatsSnapshot> {
        self.worker
            .join()
            .map_err(|_| PulsecastError::msg("analysis worker panicked"))?;
        Ok(self.stats.snapshot())
    }
}

/// Starts the single analysis worker, which takes exclusive ownership of the
/// detectors and the sink.
pub fn spawn_pipeline<S>(
    config: &DispatchConfig,
    adapter: AnalysisAdapter,
    sink: S,
) -> Result<(FrameDispatcher, PipelineHandle)>
where
    S: DatagramSink + 'static,
{
    config.validate()?;

    let (sender, receiver) = channel::bounded(config.queue_capacity);
    let stats = Arc::new(PipelineStats::default());

    let hop_size = adapter.hop_size();
    let worker = Worker {
        adapter,
        sink,
        stats: stats.clone(),
    };
    let evictor = match config.overflow {
        OverflowPolicy::DropOldest => Some(receiver.clone()),
        OverflowPolicy::DropNewest => None,
    };
    let worker = thread::Builder::new()
        .name("pulsecast-analysis".to_string())
        .spawn(move || worker.run(receiver))?;

    tracing::debug!(
        capacity = config.queue_capacity,
        hop_size,
        policy = ?config.overflow,
        "analysis worker started"
    );

    let dispatcher = FrameDispatcher {
        sender,
        evictor,
        hop_size,
        stats: stats.clone(),
    };

    Ok((dispatcher, PipelineHandle { worker, stats }))
}

struct Worker<S> {
    adapter: AnalysisAdapter,
    sink: S,
    stats: Arc<PipelineStats>,
}

impl<S: DatagramSink> Worker<S> {
    fn run(mut self, frames: Receiver<AudioFrame>) {
        // Ends once every sender is gone and the queue is empty.
        for frame in frames.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.process(&frame)));
            if outcome.is_err() {
                PipelineStats::bump(&self.stats.analysis_failures);
                tracing::warn!(sequence = frame.sequence(), "frame processing panicked, frame dropped");
            }
        }
        tracing::debug!("analysis worker stopped");
    }

    fn process(&mut self, frame: &AudioFrame) {
        let features = match self.adapter.analyze(frame) {
            Ok(features) => features,
            Err(err) => {
                PipelineStats::bump(&self.stats.analysis_failures);
                tracing::warn!(sequence = frame.sequence(), %err, "analysis failed, frame dropped");
                return;
            }
        };

        let payload = match FeatureRecord::new(frame.timestamp(), features).encode() {
            Ok(payload) => payload,
            Err(err) => {
                PipelineStats::bump(&self.stats.analysis_failures);
                tracing::warn!(sequence = frame.sequence(), %err, "encoding failed, frame dropped");
                return;
            }
        };

        match self.sink.send(&payload) {
            Ok(()) => PipelineStats::bump(&self.stats.sent),
            Err(err) => {
                PipelineStats::bump(&self.stats.send_failures);
                tracing::warn!(sequence = frame.sequence(), %err, "send failed");
            }
        }
    }
}
