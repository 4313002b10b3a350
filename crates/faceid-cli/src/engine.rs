use faceid_core::{
    DecileProgress, Decision, RawImage, SimilarityModel, Thresholds, Verifier, VerifyError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Verify {
        probe: RawImage,
        gallery: Vec<RawImage>,
        thresholds: Thresholds,
        reply: oneshot::Sender<Result<Decision, EngineError>>,
    },
    Score {
        probe: RawImage,
        reference: RawImage,
        reply: oneshot::Sender<Result<f32, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request verification of `probe` against `gallery`, in gallery order.
    pub async fn verify(
        &self,
        probe: RawImage,
        gallery: Vec<RawImage>,
        thresholds: Thresholds,
    ) -> Result<Decision, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                probe,
                gallery,
                thresholds,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request the similarity score for a single pair.
    pub async fn score(&self, probe: RawImage, reference: RawImage) -> Result<f32, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Score {
                probe,
                reference,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the verifier on a dedicated OS thread.
///
/// The thread owns the model for its whole lifetime and serves requests
/// one at a time until every handle is dropped.
pub fn spawn_engine<M>(verifier: Verifier<M>) -> Result<EngineHandle, EngineError>
where
    M: SimilarityModel + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Verify {
                        probe,
                        gallery,
                        thresholds,
                        reply,
                    } => {
                        let result = verifier
                            .verify_with_progress(
                                &probe,
                                &gallery,
                                thresholds,
                                &DecileProgress::new(),
                            )
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Score {
                        probe,
                        reference,
                        reply,
                    } => {
                        let result = verifier
                            .score_pair(&probe, &reference)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
