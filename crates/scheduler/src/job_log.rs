//! In-memory audit log of notification jobs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventbell_core::ports::JobRecorder;
use eventbell_core::{NotificationJob, PortError};
use uuid::Uuid;

/// Jobs kept per event before the oldest is evicted.
pub const DEFAULT_JOBS_PER_EVENT: usize = 50;

/// Keeps the most recent jobs of each event and optionally forwards every
/// write to a durable recorder.
pub struct JobLog {
    jobs: Mutex<HashMap<Uuid, VecDeque<NotificationJob>>>,
    per_event: usize,
    sink: Option<Arc<dyn JobRecorder>>,
}

impl JobLog {
    pub fn new(per_event: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            per_event: per_event.max(1),
            sink: None,
        }
    }

    /// Forward every recorded job to `sink` as well.
    pub fn with_sink(mut self, sink: Arc<dyn JobRecorder>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Jobs of one event, oldest first.
    pub fn for_event(&self, event_id: Uuid) -> Vec<NotificationJob> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.get(&event_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The `limit` most recent jobs across all events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<NotificationJob> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<NotificationJob> = jobs.values().flatten().cloned().collect();
        all.sort_by(|a, b| b.execution_date.cmp(&a.execution_date));
        all.truncate(limit);
        all
    }

    fn store(&self, job: &NotificationJob) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let queue = jobs.entry(job.event_id).or_default();

        if let Some(existing) = queue.iter_mut().find(|j| j.id == job.id) {
            if existing.status.can_advance_to(job.status) {
                *existing = job.clone();
            }
            return;
        }

        queue.push_back(job.clone());
        while queue.len() > self.per_event {
            queue.pop_front();
        }
    }
}

impl Default for JobLog {
    fn default() -> Self {
        Self::new(DEFAULT_JOBS_PER_EVENT)
    }
}

#[async_trait]
impl JobRecorder for JobLog {
    async fn record(&self, job: &NotificationJob) -> Result<(), PortError> {
        self.store(job);
        match &self.sink {
            Some(sink) => sink.record(job).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use eventbell_core::JobStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        writes: AtomicUsize,
    }

    #[async_trait]
    impl JobRecorder for CountingSink {
        async fn record(&self, _job: &NotificationJob) -> Result<(), PortError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn updates_job_in_place_and_never_regresses() {
        let log = JobLog::default();
        let now = Utc::now();
        let mut job = NotificationJob::pending(Uuid::new_v4(), now, now);
        log.record(&job).await.unwrap();

        let pending = job.clone();
        job.advance(JobStatus::Running, None, now);
        job.advance(JobStatus::Completed, Some("delivered".into()), now);
        log.record(&job).await.unwrap();
        // A late write of an older state is ignored.
        log.record(&pending).await.unwrap();

        let jobs = log.for_event(job.event_id);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].detail.as_deref(), Some("delivered"));
    }

    #[tokio::test]
    async fn evicts_oldest_beyond_capacity() {
        let log = JobLog::new(2);
        let event_id = Uuid::new_v4();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let at = base + TimeDelta::days(i);
            let job = NotificationJob::pending(event_id, at, at);
            ids.push(job.id);
            log.record(&job).await.unwrap();
        }

        let kept: Vec<Uuid> = log.for_event(event_id).iter().map(|j| j.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
        assert_eq!(log.recent(1)[0].id, ids[2]);
    }

    #[tokio::test]
    async fn forwards_to_sink() {
        let sink = Arc::new(CountingSink {
            writes: AtomicUsize::new(0),
        });
        let log = JobLog::default().with_sink(sink.clone());
        let now = Utc::now();
        log.record(&NotificationJob::pending(Uuid::new_v4(), now, now))
            .await
            .unwrap();
        assert_eq!(sink.writes.load(Ordering::SeqCst), 1);
    }
}
