//! Analysis pipeline: ingestion, file staging and background analysis.
//!
//! # Document Lifecycle
//!
//! ```text
//! ingest ──► processing ──(file ACTIVE)──► analyzed ──(catalog saved)──► completed
//!                │                            │
//!                └──(upload/poll failure)──►  error  ◄──(analysis failure)
//!
//! retry: error | analyzed ──► analyzed ──► (queued again)
//! ```
//!
//! Ingestion blocks until the file store reports the content active, then
//! hands the document to the [`AnalysisQueue`] and returns. The queue's
//! single worker runs analyses in submission order and always writes the
//! terminal state to the document before resolving the job's
//! [`AnalysisTicket`].
//!
//! A job in flight when the process exits leaves its document in
//! `analyzed`. [`Pipeline::retry`] accepts such documents.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use api_harness_core::models::{Document, DocumentStatus, NewDocument};
use api_harness_core::store::CatalogStore;

use crate::analyzer;
use crate::extract::{self, MIME_DOCX, MIME_PDF};
use crate::file_store::{self, FileState, FileStore};
use crate::inference::{Dispatcher, FileRef, InferenceSettings};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("document {0} already has an analysis queued")]
    AlreadyQueued(String),
    #[error("analysis queue is shut down")]
    QueueClosed,
}

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub document_id: String,
    pub settings: InferenceSettings,
}

/// Terminal result of one analysis job.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Completed {
        document_id: String,
        api_count: usize,
    },
    Failed {
        document_id: String,
        error: String,
    },
}

impl AnalysisOutcome {
    pub fn status(&self) -> DocumentStatus {
        match self {
            AnalysisOutcome::Completed { .. } => DocumentStatus::Completed,
            AnalysisOutcome::Failed { .. } => DocumentStatus::Error,
        }
    }
}

/// Completion handle for a queued analysis. Dropping it is allowed.
#[derive(Debug)]
pub struct AnalysisTicket {
    rx: oneshot::Receiver<AnalysisOutcome>,
}

impl AnalysisTicket {
    /// Wait for the job to finish. `None` if the worker went away first.
    pub async fn wait(self) -> Option<AnalysisOutcome> {
        self.rx.await.ok()
    }
}

/// Shared state the analysis worker needs.
struct Analyst {
    store: Arc<dyn CatalogStore>,
    dispatcher: Arc<Dispatcher>,
    files: Arc<dyn FileStore>,
}

type QueuedJob = (AnalysisJob, oneshot::Sender<AnalysisOutcome>);

/// Work queue with one background worker.
#[derive(Clone)]
pub struct AnalysisQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl AnalysisQueue {
    /// Spawn the worker. Must be called inside a tokio runtime.
    fn start(analyst: Arc<Analyst>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedJob>();
        let pending: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let worker_pending = pending.clone();
        tokio::spawn(async move {
            while let Some((job, reply)) = rx.recv().await {
                let document_id = job.document_id.clone();
                // A nested task keeps a panicking analysis from killing the worker.
                let task = tokio::spawn(run_analysis(analyst.clone(), job));
                let outcome = match task.await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        let message = format!("analysis task aborted: {}", join_err);
                        mark_failed(analyst.store.as_ref(), &document_id, &message).await;
                        AnalysisOutcome::Failed {
                            document_id: document_id.clone(),
                            error: message,
                        }
                    }
                };
                lock(&worker_pending).remove(&document_id);
                let _ = reply.send(outcome);
            }
        });

        Self { tx, pending }
    }

    pub fn submit(&self, job: AnalysisJob) -> Result<AnalysisTicket> {
        if !lock(&self.pending).insert(job.document_id.clone()) {
            return Err(PipelineError::AlreadyQueued(job.document_id).into());
        }
        let (reply, rx) = oneshot::channel();
        let document_id = job.document_id.clone();
        if self.tx.send((job, reply)).is_err() {
            lock(&self.pending).remove(&document_id);
            return Err(PipelineError::QueueClosed.into());
        }
        Ok(AnalysisTicket { rx })
    }

    pub fn is_pending(&self, document_id: &str) -> bool {
        lock(&self.pending).contains(document_id)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of ingesting one document.
#[derive(Debug)]
pub struct Ingested {
    pub document: Document,
    /// Present when analysis was queued; absent when staging failed.
    pub ticket: Option<AnalysisTicket>,
}

pub struct Pipeline {
    store: Arc<dyn CatalogStore>,
    files: Arc<dyn FileStore>,
    queue: AnalysisQueue,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl Pipeline {
    /// Build the pipeline and start its analysis worker.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        dispatcher: Arc<Dispatcher>,
        files: Arc<dyn FileStore>,
        poll_interval: Duration,
        max_poll_attempts: u32,
    ) -> Self {
        let queue = AnalysisQueue::start(Arc::new(Analyst {
            store: store.clone(),
            dispatcher,
            files: files.clone(),
        }));
        Self {
            store,
            files,
            queue,
            poll_interval,
            max_poll_attempts,
        }
    }

    pub fn queue(&self) -> &AnalysisQueue {
        &self.queue
    }

    /// Ingest an uploaded document and queue its analysis.
    ///
    /// Returns an error only for unreadable input or storage failures.
    /// Staging failures are recorded on the document, which is returned
    /// in `error` without a ticket.
    pub async fn ingest(
        &self,
        project_id: &str,
        filename: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
        settings: InferenceSettings,
    ) -> Result<Ingested> {
        let extracted = extract::extract_content(bytes, mime_type, filename)?;
        let content_hash = format!("{:x}", Sha256::digest(bytes));

        let document = self
            .store
            .create_document(NewDocument {
                project_id: project_id.to_string(),
                filename: filename.to_string(),
                mime_type: extracted.mime_type.clone(),
                content: extracted.text,
                content_hash,
            })
            .await?;
        info!(
            document_id = %document.id,
            project_id,
            filename,
            mime_type = %document.mime_type,
            "document ingested"
        );

        if let Err(err) = self.stage(&document, bytes).await {
            warn!(document_id = %document.id, error = %err, "file staging failed");
            let document = self
                .store
                .transition_document(&document.id, DocumentStatus::Error, Some(&err.to_string()))
                .await?;
            return Ok(Ingested {
                document,
                ticket: None,
            });
        }

        let document = self
            .store
            .transition_document(&document.id, DocumentStatus::Analyzed, None)
            .await?;
        let ticket = self.queue.submit(AnalysisJob {
            document_id: document.id.clone(),
            settings,
        })?;
        info!(document_id = %document.id, "analysis queued");

        Ok(Ingested {
            document,
            ticket: Some(ticket),
        })
    }

    /// Upload the raw bytes and wait until the file store reports them active.
    async fn stage(&self, document: &Document, bytes: &[u8]) -> Result<()> {
        let uploaded = self
            .files
            .upload(bytes, &document.filename, &document.mime_type)
            .await?;

        if let Err(err) = file_store::wait_until_active(
            self.files.as_ref(),
            &uploaded.name,
            self.poll_interval,
            self.max_poll_attempts,
        )
        .await
        {
            if let Err(del) = self.files.delete(&uploaded.name).await {
                warn!(file = %uploaded.name, error = %del, "failed to delete remote file");
            }
            return Err(err.into());
        }

        self.store
            .set_document_remote(&document.id, &uploaded.name, &uploaded.uri)
            .await?;
        Ok(())
    }

    /// Explicit retry trigger: put the document back into `analyzed` and
    /// queue a full re-extraction.
    pub async fn retry(
        &self,
        document_id: &str,
        settings: InferenceSettings,
    ) -> Result<(Document, AnalysisTicket)> {
        if self.store.get_document(document_id).await?.is_none() {
            return Err(PipelineError::DocumentNotFound(document_id.to_string()).into());
        }
        if self.queue.is_pending(document_id) {
            return Err(PipelineError::AlreadyQueued(document_id.to_string()).into());
        }

        let document = self.store.reopen_document(document_id).await?;
        let ticket = self.queue.submit(AnalysisJob {
            document_id: document_id.to_string(),
            settings,
        })?;
        info!(document_id, "analysis re-queued");
        Ok((document, ticket))
    }
}

/// Binary formats go to the backend as the staged file when it is still active.
async fn file_ref_for(files: &dyn FileStore, document: &Document) -> Option<FileRef> {
    if !matches!(document.mime_type.as_str(), MIME_PDF | MIME_DOCX) {
        return None;
    }
    let name = document.remote_name.as_deref()?;
    let uri = document.remote_uri.as_deref().filter(|u| !u.is_empty())?;
    match files.status(name).await {
        Ok(FileState::Active) => Some(FileRef {
            uri: uri.to_string(),
            mime_type: document.mime_type.clone(),
        }),
        _ => None,
    }
}

async fn run_analysis(analyst: Arc<Analyst>, job: AnalysisJob) -> AnalysisOutcome {
    let document_id = job.document_id.clone();
    match analyze_document(&analyst, &job).await {
        Ok(api_count) => {
            info!(document_id = %document_id, api_count, "analysis completed");
            AnalysisOutcome::Completed {
                document_id,
                api_count,
            }
        }
        Err(err) => {
            let message = format!("{:#}", err);
            warn!(document_id = %document_id, error = %message, "analysis failed");
            mark_failed(analyst.store.as_ref(), &document_id, &message).await;
            AnalysisOutcome::Failed {
                document_id,
                error: message,
            }
        }
    }
}

async fn analyze_document(analyst: &Analyst, job: &AnalysisJob) -> Result<usize> {
    let document = analyst
        .store
        .get_document(&job.document_id)
        .await?
        .ok_or_else(|| PipelineError::DocumentNotFound(job.document_id.clone()))?;

    let file = file_ref_for(analyst.files.as_ref(), &document).await;
    let catalog = analyzer::analyze(
        &analyst.dispatcher,
        &document.content,
        &document.mime_type,
        &job.settings,
        file.as_ref(),
    )
    .await?;

    let apis = analyst
        .store
        .replace_catalog(&document.id, &catalog.apis)
        .await?;
    analyst
        .store
        .transition_document(&document.id, DocumentStatus::Completed, None)
        .await?;
    Ok(apis.len())
}

async fn mark_failed(store: &dyn CatalogStore, document_id: &str, message: &str) {
    if let Err(err) = store
        .transition_document(document_id, DocumentStatus::Error, Some(message))
        .await
    {
        error!(document_id, error = %err, "failed to record analysis failure");
    }
}
