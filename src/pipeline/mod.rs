//! Background attribution work, off the redirect path
//!
//! Jobs go through a bounded queue. A dispatcher pulls them and runs each
//! one as its own task, at most `workers` at a time. Submitting never
//! waits: a full queue drops the job with a warning.

use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::enrichment::EnrichmentEngine;
use crate::leads::LeadRecorder;
use crate::models::{now_ts, CompanyInference, EventType, LinkEvent, TrackedLink};
use crate::scoring::{score_session, ScoredEvent};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone)]
pub enum Job {
    /// Enrich, score and (for clicks) create the lead of a fresh event
    Attribute { event: LinkEvent, link: TrackedLink },
    /// Enrich a stored event on request
    Enrich { event_id: i64 },
}

/// Does the work of one job
pub struct Attributor {
    storage: Arc<dyn Storage>,
    enrichment: Arc<EnrichmentEngine>,
    leads: Arc<LeadRecorder>,
}

impl Attributor {
    pub fn new(
        storage: Arc<dyn Storage>,
        enrichment: Arc<EnrichmentEngine>,
        leads: Arc<LeadRecorder>,
    ) -> Self {
        Self {
            storage,
            enrichment,
            leads,
        }
    }

    pub async fn run(&self, job: Job) {
        match job {
            Job::Attribute { event, link } => self.attribute(&event, &link).await,
            Job::Enrich { event_id } => match self.storage.get_event(event_id).await {
                Ok(Some(event)) => self.enrich(&event).await,
                Ok(None) => warn!(event_id, "Enrichment requested for unknown event"),
                Err(e) => warn!(event_id, error = %e, "Failed to load event for enrichment"),
            },
        }
    }

    async fn attribute(&self, event: &LinkEvent, link: &TrackedLink) {
        self.enrich(event).await;
        self.score(event).await;

        if event.event_type == EventType::Click {
            if let Err(e) = self.leads.create_lead_for_event(link, event).await {
                warn!(
                    event_id = event.id,
                    link_id = link.id,
                    session_id = %event.session_id,
                    error = %e,
                    "Lead creation failed"
                );
            }
        }
    }

    async fn enrich(&self, event: &LinkEvent) {
        let inference = match event.ip_address.parse::<IpAddr>() {
            Ok(ip) => self.enrichment.enrich(ip).await,
            Err(_) => CompanyInference::unknown(0, "unparseable address", now_ts()),
        }
        .with_event_id(event.id);

        match self.storage.insert_inference(&inference).await {
            Ok(()) => debug!(
                event_id = event.id,
                network = %inference.network_type,
                confidence = inference.confidence_score,
                "Company inference stored"
            ),
            Err(StorageError::Conflict) => {
                debug!(event_id = event.id, "Event already has an inference")
            }
            Err(e) => warn!(
                event_id = event.id,
                link_id = event.tracked_link_id,
                session_id = %event.session_id,
                error = %e,
                "Failed to store company inference"
            ),
        }
    }

    async fn score(&self, event: &LinkEvent) {
        let visits = match self.storage.session_visits(event.session_id).await {
            Ok(visits) => visits,
            Err(e) => {
                warn!(
                    event_id = event.id,
                    session_id = %event.session_id,
                    error = %e,
                    "Failed to load session history"
                );
                return;
            }
        };

        let score = score_session(
            ScoredEvent {
                event_id: event.id,
                session_id: event.session_id,
                event_type: event.event_type,
                occurred_at: event.occurred_at,
            },
            &visits,
            now_ts(),
        );

        match self.storage.insert_intent_score(&score).await {
            Ok(stored) => debug!(event_id = event.id, score = stored.score, "Intent score stored"),
            Err(StorageError::Conflict) => debug!(event_id = event.id, "Event already scored"),
            Err(e) => warn!(
                event_id = event.id,
                session_id = %event.session_id,
                error = %e,
                "Failed to store intent score"
            ),
        }
    }
}

/// Cheap handle for submitting jobs
#[derive(Clone)]
pub struct Pipeline {
    tx: mpsc::Sender<Job>,
}

impl Pipeline {
    /// Start the dispatcher. It stops once every `Pipeline` handle is
    /// dropped and the queue has drained.
    pub fn start(attributor: Arc<Attributor>, queue_size: usize, workers: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_size.max(1));
        let permits = Arc::new(Semaphore::new(workers.max(1)));

        let dispatcher = tokio::spawn(async move {
            let mut running = tokio::task::JoinSet::new();
            while let Some(job) = rx.recv().await {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let attributor = attributor.clone();
                running.spawn(async move {
                    attributor.run(job).await;
                    drop(permit);
                });
                // Reap finished jobs so the set does not grow
                while running.try_join_next().is_some() {}
            }
            while running.join_next().await.is_some() {}
        });

        (Self { tx }, dispatcher)
    }

    /// Queue a job; returns false when it was dropped
    pub fn submit(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job = %job_label(&job), "Pipeline queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Pipeline is shut down, dropping job");
                false
            }
        }
    }
}

fn job_label(job: &Job) -> String {
    match job {
        Job::Attribute { event, .. } => format!("attribute event {}", event.id),
        Job::Enrich { event_id } => format!("enrich event {event_id}"),
    }
}
