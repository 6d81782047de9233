// src/exec/registry.rs

//! In-memory table of running invocations.
//!
//! One `Registry` is owned by each `ProcessSupervisor`; there is no
//! process-wide instance. Lookups, inserts and removals go through a single
//! mutex and never hold it across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::progress::ProgressTracker;
use crate::types::InvocationId;

/// One entry per live process.
#[derive(Debug)]
pub struct ProcessRecord {
    pub id: InvocationId,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub command: String,
    pub args: Vec<String>,
    pub aborted: bool,
    /// Parser state, last percent and known total duration.
    pub tracker: Arc<Mutex<ProgressTracker>>,
    abort_tx: Option<oneshot::Sender<()>>,
}

impl ProcessRecord {
    pub fn new(
        id: InvocationId,
        pid: Option<u32>,
        command: String,
        args: Vec<String>,
        tracker: Arc<Mutex<ProgressTracker>>,
        abort_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            id,
            pid,
            started_at: Instant::now(),
            command,
            args,
            aborted: false,
            tracker,
            abort_tx: Some(abort_tx),
        }
    }
}

/// Read-only copy of a record for callers outside the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSnapshot {
    pub id: InvocationId,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub args: Vec<String>,
    pub aborted: bool,
    pub last_percent: Option<f64>,
}

/// What happened when an abort was recorded.
#[derive(Debug)]
pub enum AbortMark {
    NotFound,
    AlreadyAborted,
    /// Newly marked; the sender wakes the owning monitor.
    Marked(Option<oneshot::Sender<()>>),
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<InvocationId, ProcessRecord>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<InvocationId, ProcessRecord>> {
        // A panic while holding the lock cannot leave the map half-updated,
        // so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a record; hands it back if the id is already active.
    pub fn insert(&self, record: ProcessRecord) -> Result<(), ProcessRecord> {
        let mut map = self.lock();
        if map.contains_key(&record.id) {
            return Err(record);
        }
        map.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn remove(&self, id: &InvocationId) -> Option<ProcessRecord> {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &InvocationId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<InvocationId> {
        self.lock().keys().cloned().collect()
    }

    pub fn snapshot(&self, id: &InvocationId) -> Option<RecordSnapshot> {
        let map = self.lock();
        let record = map.get(id)?;
        let last_percent = record
            .tracker
            .lock()
            .map(|t| t.last_percent())
            .unwrap_or(None);
        Some(RecordSnapshot {
            id: record.id.clone(),
            pid: record.pid,
            started_at: record.started_at,
            args: record.args.clone(),
            aborted: record.aborted,
            last_percent,
        })
    }

    pub fn mark_aborted(&self, id: &InvocationId) -> AbortMark {
        let mut map = self.lock();
        match map.get_mut(id) {
            None => AbortMark::NotFound,
            Some(record) if record.aborted => AbortMark::AlreadyAborted,
            Some(record) => {
                record.aborted = true;
                AbortMark::Marked(record.abort_tx.take())
            }
        }
    }

    pub fn was_aborted(&self, id: &InvocationId) -> bool {
        self.lock().get(id).is_some_and(|r| r.aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::grammar_for;
    use crate::types::GrammarKind;

    fn record(id: &str) -> (ProcessRecord, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let id = InvocationId::from(id);
        let tracker = ProgressTracker::new(id.clone(), grammar_for(GrammarKind::Silent, None), None);
        let record = ProcessRecord::new(
            id,
            Some(42),
            "tool".to_string(),
            vec!["-x".to_string()],
            Arc::new(Mutex::new(tracker)),
            tx,
        );
        (record, rx)
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = Registry::new();
        let (a, _rx_a) = record("a");
        let (a2, _rx_a2) = record("a");
        assert!(registry.insert(a).is_ok());
        assert!(registry.insert(a2).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn abort_marks_once_and_signals_owner() {
        let registry = Registry::new();
        let (a, mut rx) = record("a");
        registry.insert(a).unwrap();

        match registry.mark_aborted(&InvocationId::from("a")) {
            AbortMark::Marked(Some(tx)) => tx.send(()).unwrap(),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            registry.mark_aborted(&InvocationId::from("a")),
            AbortMark::AlreadyAborted
        ));
        assert!(registry.was_aborted(&InvocationId::from("a")));
        assert!(registry.snapshot(&InvocationId::from("a")).unwrap().aborted);
    }

    #[test]
    fn unknown_ids_have_no_effect() {
        let registry = Registry::new();
        assert!(matches!(
            registry.mark_aborted(&InvocationId::from("ghost")),
            AbortMark::NotFound
        ));
        assert!(registry.snapshot(&InvocationId::from("ghost")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn removal_evicts_record() {
        let registry = Registry::new();
        let (a, _rx) = record("a");
        registry.insert(a).unwrap();
        let removed = registry.remove(&InvocationId::from("a")).unwrap();
        assert_eq!(removed.args, vec!["-x".to_string()]);
        assert!(!registry.contains(&InvocationId::from("a")));
    }
}
