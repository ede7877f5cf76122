//! Background worker: preview rendering and detection dispatch.
//!
//! The worker never sees the slot registry. It gets owned jobs from the UI
//! loop and sends results back; the UI loop applies them.

use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    api::detect::{DetectError, DetectionClient, HttpDetectionClient, dispatch},
    config::Config,
    slots::{PreviewJob, PreviewReady},
    submission::{DetectionReport, SubmissionRequest},
};

/// Commands sent from the UI to the worker.
#[derive(Debug)]
pub enum WorkerCmd {
    /// Derive the data-URI preview for a freshly filled slot.
    RenderPreview(PreviewJob),
    /// Send a validated request to the detection endpoint.
    Submit {
        ticket: Uuid,
        request: SubmissionRequest,
    },
    /// Apply updated settings and rebuild the HTTP client.
    SaveSettings(Config),
}

/// Events emitted by the worker for UI updates.
#[derive(Debug)]
pub enum WorkerEvent {
    PreviewReady(PreviewReady),
    /// Exactly one per `Submit`.
    SubmissionFinished {
        ticket: Uuid,
        result: Result<DetectionReport, DetectError>,
    },
    /// Informational log message.
    Log(String),
    /// User-visible error message.
    Error(String),
}

/// Worker-side state.
pub struct Worker {
    client: Option<Arc<dyn DetectionClient>>,
    timeout: Duration,
    tx: mpsc::Sender<WorkerEvent>,
}

impl Worker {
    /// Worker using the given client and request timeout.
    pub fn new(
        client: Option<Arc<dyn DetectionClient>>,
        timeout: Duration,
        tx: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        Self {
            client,
            timeout,
            tx,
        }
    }

    /// Handle one command. Long-running work is spawned so previews keep
    /// flowing while a submission waits on the network.
    pub async fn handle(&mut self, cmd: WorkerCmd) {
        match cmd {
            WorkerCmd::RenderPreview(job) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let slot = job.slot.clone();
                    match tokio::task::spawn_blocking(move || job.render()).await {
                        Ok(ready) => {
                            let _ = tx.send(WorkerEvent::PreviewReady(ready)).await;
                        }
                        Err(e) => {
                            tracing::error!("preview for {slot} failed: {e}");
                            let _ = tx
                                .send(WorkerEvent::Error(format!("preview failed: {slot}")))
                                .await;
                        }
                    }
                });
            }

            WorkerCmd::Submit { ticket, request } => {
                let tx = self.tx.clone();
                let timeout = self.timeout;
                let Some(client) = self.client.clone() else {
                    tracing::warn!("submit {ticket} without a usable client");
                    let _ = tx
                        .send(WorkerEvent::SubmissionFinished {
                            ticket,
                            result: Err(DetectError::Request(
                                "detection endpoint is not configured".into(),
                            )),
                        })
                        .await;
                    return;
                };
                tokio::spawn(async move {
                    let result = dispatch(client.as_ref(), &request, timeout).await;
                    let _ = tx
                        .send(WorkerEvent::SubmissionFinished { ticket, result })
                        .await;
                });
            }

            WorkerCmd::SaveSettings(cfg) => {
                tracing::info!("settings updated");
                self.timeout = cfg.request_timeout();
                match connect(&cfg) {
                    Ok(client) => {
                        self.client = Some(client);
                        let _ = self.tx.send(WorkerEvent::Log("settings updated".into())).await;
                    }
                    Err(e) => {
                        self.client = None;
                        let _ = self.tx.send(WorkerEvent::Error(e.to_string())).await;
                    }
                }
            }
        }
    }
}

/// HTTP client for the configured detection site.
fn connect(cfg: &Config) -> Result<Arc<dyn DetectionClient>, DetectError> {
    let client = HttpDetectionClient::from_config(&cfg.server)?;
    tracing::info!("detection endpoint: {}", client.endpoint());
    Ok(Arc::new(client))
}

/// Main worker loop: build the client, then handle commands in order.
pub async fn run(mut rx: mpsc::Receiver<WorkerCmd>, tx: mpsc::Sender<WorkerEvent>, cfg: Config) {
    tracing::info!("worker started");

    // A bad base_url is not fatal; settings can fix it later.
    let client = match connect(&cfg) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::error!("client init failed: {e}");
            let _ = tx.send(WorkerEvent::Error(e.to_string())).await;
            None
        }
    };

    let mut worker = Worker::new(client, cfg.request_timeout(), tx);
    while let Some(cmd) = rx.recv().await {
        worker.handle(cmd).await;
    }
    tracing::info!("worker stopped");
}
