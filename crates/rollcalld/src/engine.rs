use rollcall_core::{
    EnrollOutcome, FaceAnalyzer, GalleryService, MatchPolicy, MatchRecord, ServiceError,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Static facts about the engine, captured at spawn time.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub gallery_path: PathBuf,
    pub threshold: f32,
    pub policy: MatchPolicy,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        images: Vec<PathBuf>,
        reply: oneshot::Sender<Result<EnrollOutcome, ServiceError>>,
    },
    Delete {
        name: String,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    ListNames {
        reply: oneshot::Sender<Vec<String>>,
    },
    ListWithCounts {
        reply: oneshot::Sender<BTreeMap<String, usize>>,
    },
    Identify {
        image: PathBuf,
        reply: oneshot::Sender<Result<Vec<MatchRecord>, ServiceError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Requests are handled strictly one at a time, so every load → mutate →
/// save on the gallery file completes before the next one starts.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    info: EngineInfo,
}

impl EngineHandle {
    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn enroll(
        &self,
        name: String,
        images: Vec<PathBuf>,
    ) -> Result<EnrollOutcome, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Enroll { name, images, reply })
            .await??)
    }

    pub async fn delete(&self, name: String) -> Result<(), EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Delete { name, reply })
            .await??)
    }

    pub async fn list_names(&self) -> Result<Vec<String>, EngineError> {
        self.request(|reply| EngineRequest::ListNames { reply }).await
    }

    pub async fn list_with_counts(&self) -> Result<BTreeMap<String, usize>, EngineError> {
        self.request(|reply| EngineRequest::ListWithCounts { reply }).await
    }

    pub async fn identify(&self, image: PathBuf) -> Result<Vec<MatchRecord>, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Identify { image, reply })
            .await??)
    }
}

/// Spawn the engine on a dedicated OS thread that owns the gallery service.
///
/// The analyzer may block for a long time per image, so it never runs on
/// the async runtime.
pub fn spawn_engine<A>(mut service: GalleryService<A>) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + 'static,
{
    let info = EngineInfo {
        gallery_path: service.gallery_path().to_path_buf(),
        threshold: service.threshold(),
        policy: service.policy(),
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { name, images, reply } => {
                        let _ = reply.send(service.enroll(&name, &images));
                    }
                    EngineRequest::Delete { name, reply } => {
                        let _ = reply.send(service.delete(&name));
                    }
                    EngineRequest::ListNames { reply } => {
                        let _ = reply.send(service.list_names());
                    }
                    EngineRequest::ListWithCounts { reply } => {
                        let _ = reply.send(service.list_with_counts());
                    }
                    EngineRequest::Identify { image, reply } => {
                        let _ = reply.send(service.identify(&image));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, info })
}
