//! Asynchronous audit pipeline. Decisions are mirrored into the PHI access
//! log through a bounded channel drained by a detached writer task, so the
//! decision path never blocks on log durability. Overflow drops the event,
//! counts it, and alerts; a write failure is logged and never reverses the
//! decision that produced it.

use crate::storage::{self, NewEmergencyAccessLog, NewPhiAccessLog};
use sea_orm::DatabaseConnection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum AuditEvent {
    Access(NewPhiAccessLog),
    Emergency(NewEmergencyAccessLog),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Spawns the writer task on the current runtime.
    pub fn new(db: DatabaseConnection, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(writer_loop(db, rx));
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_access(&self, entry: NewPhiAccessLog) {
        self.dispatch(AuditEvent::Access(entry));
    }

    pub fn record_emergency(&self, entry: NewEmergencyAccessLog) {
        self.dispatch(AuditEvent::Emergency(entry));
    }

    fn dispatch(&self, event: AuditEvent) {
        if self.tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::error!(total_dropped = total, "audit queue full, entry dropped");
        }
    }

    /// Drain barrier: resolves once every event queued before the call has
    /// been written. Used at shutdown and by tests.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(AuditEvent::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Events lost to queue overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn writer_loop(db: DatabaseConnection, mut rx: mpsc::Receiver<AuditEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AuditEvent::Access(entry) => {
                if let Err(e) = storage::insert_phi_access_log(&db, &entry).await {
                    tracing::error!(
                        accessor = %entry.accessor_id,
                        patient = %entry.patient_id,
                        "failed to write PHI access log entry: {e}"
                    );
                }
            }
            AuditEvent::Emergency(entry) => {
                if let Err(e) = storage::insert_emergency_access_log(&db, &entry).await {
                    tracing::error!(
                        accessor = %entry.accessor_id,
                        patient = %entry.patient_id,
                        incident = %entry.incident_id,
                        "failed to write emergency access log entry: {e}"
                    );
                }
            }
            AuditEvent::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
}
