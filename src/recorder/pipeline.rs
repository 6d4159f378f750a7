//! Capture-pipeline execution context
//!
//! One tokio task owns the [`FrameRouter`]. Hardware delivery threads push
//! samples into its bounded queue through a [`FrameSink`], and control requests
//! travel through the same queue with a oneshot reply, so every writer-state
//! mutation happens on that task, one at a time. The router state is
//! published on a watch channel after every message, so resets caused by a
//! sample are visible without a request.

use crate::capture::sample::{SampleBuffer, SampleDelegate};
use crate::capture::traits::Resolution;
use crate::events::CaptureEvent;
use crate::recorder::router::{FrameRouter, RecordingOutput};
use crate::recorder::state::{RecordingState, Segment};
use crate::utils::error::{CaptureError, CaptureResult, ErrorResponse};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Messages handled by the pipeline task
pub enum PipelineCommand {
    Sample(SampleBuffer),
    Start {
        video_resolution: Option<Resolution>,
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Pause {
        reply: oneshot::Sender<CaptureResult<Option<Segment>>>,
    },
    Resume {
        reply: oneshot::Sender<CaptureResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<CaptureResult<RecordingOutput>>,
    },
    State {
        reply: oneshot::Sender<RecordingState>,
    },
    Shutdown,
}

struct Shared {
    /// Whether the router currently wants samples
    accepting: AtomicBool,
    /// Samples refused at the queue
    dropped: AtomicU64,
    state: watch::Sender<RecordingState>,
}

/// Sample delegate feeding the pipeline queue
///
/// Never blocks the delivering thread: when the queue is full the sample is
/// dropped and counted.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<PipelineCommand>,
    shared: Arc<Shared>,
}

impl SampleDelegate for FrameSink {
    fn did_output(&self, sample: SampleBuffer) {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(PipelineCommand::Sample(sample)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!("Capture queue full; {} samples dropped so far", dropped);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Sample delivered after pipeline shutdown");
            }
        }
    }
}

/// Handle to the pipeline task
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineCommand>,
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Spawn the pipeline task owning `router`
    pub fn spawn(
        router: FrameRouter,
        queue_depth: usize,
        events: broadcast::Sender<CaptureEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (state, _) = watch::channel(router.state());
        let shared = Arc::new(Shared {
            accepting: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            state,
        });

        let task = tokio::spawn(run(router, rx, shared.clone(), events));
        (Self { tx, shared }, task)
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Samples dropped because the queue was full
    pub fn dropped_samples(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Router state as of the last handled message
    pub fn current_state(&self) -> RecordingState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RecordingState> {
        self.shared.state.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PipelineCommand,
    ) -> CaptureResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| CaptureError::PipelineClosed)?;
        response.await.map_err(|_| CaptureError::PipelineClosed)
    }

    pub async fn start(&self, video_resolution: Option<Resolution>) -> CaptureResult<()> {
        self.request(|reply| PipelineCommand::Start {
            video_resolution,
            reply,
        })
        .await?
    }

    pub async fn pause(&self) -> CaptureResult<Option<Segment>> {
        self.request(|reply| PipelineCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> CaptureResult<()> {
        self.request(|reply| PipelineCommand::Resume { reply }).await?
    }

    pub async fn stop(&self) -> CaptureResult<RecordingOutput> {
        self.request(|reply| PipelineCommand::Stop { reply }).await?
    }

    pub async fn state(&self) -> CaptureResult<RecordingState> {
        self.request(|reply| PipelineCommand::State { reply }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(PipelineCommand::Shutdown).await;
    }
}

async fn run(
    mut router: FrameRouter,
    mut rx: mpsc::Receiver<PipelineCommand>,
    shared: Arc<Shared>,
    events: broadcast::Sender<CaptureEvent>,
) {
    tracing::debug!("Capture pipeline running");

    while let Some(command) = rx.recv().await {
        match command {
            PipelineCommand::Sample(sample) => {
                if let Err(e) = router.handle_sample(sample) {
                    let _ = events.send(CaptureEvent::Error {
                        error: ErrorResponse::from(&e),
                    });
                }
            }
            PipelineCommand::Start {
                video_resolution,
                reply,
            } => {
                let result = router.start(video_resolution).await;
                publish(&router, &shared);
                let _ = reply.send(result);
            }
            PipelineCommand::Pause { reply } => {
                let result = router.pause().await;
                if let Ok(Some(segment)) = &result {
                    let _ = events.send(CaptureEvent::SegmentFinalized {
                        segment: segment.clone(),
                    });
                }
                publish(&router, &shared);
                let _ = reply.send(result);
            }
            PipelineCommand::Resume { reply } => {
                let result = router.resume().await;
                publish(&router, &shared);
                let _ = reply.send(result);
            }
            PipelineCommand::Stop { reply } => {
                let result = router.stop().await;
                publish(&router, &shared);
                let _ = reply.send(result);
            }
            PipelineCommand::State { reply } => {
                let _ = reply.send(router.state());
            }
            PipelineCommand::Shutdown => break,
        }
        // A writer failure while routing resets the router
        publish(&router, &shared);
    }

    router.abandon();
    publish(&router, &shared);
    tracing::debug!("Capture pipeline stopped");
}

/// Publish the router state and whether it currently wants samples
fn publish(router: &FrameRouter, shared: &Shared) {
    let state = router.state();
    let accepting = matches!(state, RecordingState::PendingStart | RecordingState::Recording);
    shared.accepting.store(accepting, Ordering::Release);
    shared.state.send_if_modified(|current| {
        let changed = *current != state;
        *current = state;
        changed
    });
}
