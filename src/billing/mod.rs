//! Lead-count deltas for the billing collaborator
//!
//! Created leads are buffered in memory per (company, creator) and flushed
//! periodically. Billing never answers back; a failed flush puts the deltas
//! back into the buffer for the next round.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    leads: u64,
    cost_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingDelta {
    pub saas_id: String,
    pub creator_id: String,
    pub leads: u64,
    pub cost_cents: i64,
}

#[derive(Default)]
pub struct BillingBuffer {
    pending: DashMap<(String, String), Pending>,
}

impl BillingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, saas_id: &str, creator_id: &str, leads: u64, cost_cents: i64) {
        let mut entry = self
            .pending
            .entry((saas_id.to_string(), creator_id.to_string()))
            .or_default();
        entry.leads += leads;
        entry.cost_cents += cost_cents;
    }

    /// Take every non-zero delta, leaving the buffer empty for writers
    pub fn drain(&self) -> Vec<BillingDelta> {
        let keys: Vec<(String, String)> = self.pending.iter().map(|e| e.key().clone()).collect();

        let mut deltas: Vec<BillingDelta> = keys
            .into_iter()
            .filter_map(|key| self.pending.remove(&key))
            .filter(|(_, pending)| pending.leads > 0)
            .map(|((saas_id, creator_id), pending)| BillingDelta {
                saas_id,
                creator_id,
                leads: pending.leads,
                cost_cents: pending.cost_cents,
            })
            .collect();
        deltas.sort_by(|a, b| (&a.saas_id, &a.creator_id).cmp(&(&b.saas_id, &b.creator_id)));
        deltas
    }

    fn restore(&self, deltas: &[BillingDelta]) {
        for delta in deltas {
            self.record(&delta.saas_id, &delta.creator_id, delta.leads, delta.cost_cents);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[async_trait]
pub trait BillingSink: Send + Sync {
    async fn send(&self, deltas: &[BillingDelta]) -> Result<()>;
}

/// Default sink when no webhook is configured
pub struct LogBillingSink;

#[async_trait]
impl BillingSink for LogBillingSink {
    async fn send(&self, deltas: &[BillingDelta]) -> Result<()> {
        for delta in deltas {
            tracing::info!(
                saas_id = %delta.saas_id,
                creator_id = %delta.creator_id,
                leads = delta.leads,
                cost_cents = delta.cost_cents,
                "Billing delta"
            );
        }
        Ok(())
    }
}

pub struct WebhookBillingSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookBillingSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    deltas: &'a [BillingDelta],
}

#[async_trait]
impl BillingSink for WebhookBillingSink {
    async fn send(&self, deltas: &[BillingDelta]) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookBody { deltas })
            .send()
            .await
            .context("Billing webhook unreachable")?
            .error_for_status()
            .context("Billing webhook rejected the deltas")?;
        Ok(())
    }
}

/// Flush the buffer once. Deltas go back into the buffer when the sink fails.
pub async fn flush(buffer: &BillingBuffer, sink: &dyn BillingSink) -> Result<usize> {
    let deltas = buffer.drain();
    if deltas.is_empty() {
        return Ok(0);
    }

    if let Err(e) = sink.send(&deltas).await {
        buffer.restore(&deltas);
        return Err(e);
    }
    Ok(deltas.len())
}

/// Background task flushing the buffer on an interval and once more on shutdown
pub struct BillingFlusher {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BillingFlusher {
    pub fn spawn(buffer: Arc<BillingBuffer>, sink: Arc<dyn BillingSink>, interval_secs: u64) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));
            // First tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = flush(&buffer, sink.as_ref()).await {
                            tracing::error!(error = %e, "Failed to flush billing deltas");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Shutdown signal received, flushing billing deltas...");
                        match flush(&buffer, sink.as_ref()).await {
                            Ok(n) => tracing::info!(deltas = n, "Billing deltas flushed on shutdown"),
                            Err(e) => tracing::error!(error = %e, "Failed to flush billing deltas on shutdown"),
                        }
                        break;
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal shutdown and wait for the final flush
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Billing flusher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<BillingDelta>>>,
        fail: bool,
    }

    #[async_trait]
    impl BillingSink for RecordingSink {
        async fn send(&self, deltas: &[BillingDelta]) -> Result<()> {
            if self.fail {
                anyhow::bail!("sink down");
            }
            self.batches.lock().unwrap().push(deltas.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_deltas_accumulate_per_pair() {
        let buffer = BillingBuffer::new();
        buffer.record("saas-1", "creator-1", 1, 250);
        buffer.record("saas-1", "creator-1", 1, 250);
        buffer.record("saas-1", "creator-2", 1, 100);

        let deltas = buffer.drain();
        assert_eq!(
            deltas,
            vec![
                BillingDelta {
                    saas_id: "saas-1".into(),
                    creator_id: "creator-1".into(),
                    leads: 2,
                    cost_cents: 500,
                },
                BillingDelta {
                    saas_id: "saas-1".into(),
                    creator_id: "creator-2".into(),
                    leads: 1,
                    cost_cents: 100,
                },
            ]
        );
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_deltas() {
        let buffer = BillingBuffer::new();
        buffer.record("saas-1", "creator-1", 1, 250);

        let failing = RecordingSink {
            fail: true,
            ..Default::default()
        };
        assert!(flush(&buffer, &failing).await.is_err());

        let sink = RecordingSink::default();
        assert_eq!(flush(&buffer, &sink).await.unwrap(), 1);
        assert_eq!(sink.batches.lock().unwrap()[0][0].leads, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes() {
        let buffer = Arc::new(BillingBuffer::new());
        let sink = Arc::new(RecordingSink::default());
        let flusher = BillingFlusher::spawn(buffer.clone(), sink.clone(), 3600);

        buffer.record("saas-9", "creator-9", 3, 900);
        flusher.shutdown().await;

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].cost_cents, 900);
    }

    #[tokio::test]
    async fn test_webhook_sink_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/billing"))
            .and(body_json(serde_json::json!({
                "deltas": [{"saas_id": "s", "creator_id": "c", "leads": 1, "cost_cents": 50}]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookBillingSink::new(reqwest::Client::new(), format!("{}/billing", server.uri()));
        let deltas = vec![BillingDelta {
            saas_id: "s".into(),
            creator_id: "c".into(),
            leads: 1,
            cost_cents: 50,
        }];
        sink.send(&deltas).await.unwrap();
    }
}
