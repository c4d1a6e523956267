//! FIFO scan queue shared between callers and the scheduling loop.

use crate::core::{BoxedJob, JobId};
use crate::manager::handle::JobHandle;

use std::collections::VecDeque;
use std::sync::Mutex;

/// A job waiting for the running slot, paired with its handle.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub(crate) job: BoxedJob,
    pub(crate) handle: JobHandle,
}

/// Ordered queue of pending jobs.
///
/// `push` may be called from any thread; only the manager pops.
#[derive(Debug, Default)]
pub(crate) struct ScanQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
}

impl ScanQueue {
    /// Creates an empty queue.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the number of queued jobs.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns the queued job ids, head first.
    pub(crate) fn ids(&self) -> Vec<JobId> {
        self.lock().iter().map(|queued| queued.handle.id).collect()
    }

    /// Appends a job at the tail and returns the new length.
    pub(crate) fn push(&self, queued: QueuedJob) -> usize {
        let mut jobs = self.lock();
        jobs.push_back(queued);
        jobs.len()
    }

    /// Removes the head of the queue.
    pub(crate) fn pop(&self) -> Option<QueuedJob> {
        self.lock().pop_front()
    }

    /// Removes every queued job, head first.
    pub(crate) fn drain(&self) -> Vec<QueuedJob> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedJob>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Job;
    use crate::jobs::MockJob;

    fn queued(label: &str) -> QueuedJob {
        let job = MockJob::instant().with_label(label);
        let handle = JobHandle::new(job.id(), label);
        QueuedJob {
            job: Box::new(job),
            handle,
        }
    }

    #[test]
    fn test_scan_queue_fifo() {
        let queue = ScanQueue::new();
        assert_eq!(queue.len(), 0);

        let a = queued("a");
        let b = queued("b");
        let expected = vec![a.handle.id, b.handle.id];

        assert_eq!(queue.push(a), 1);
        assert_eq!(queue.push(b), 2);
        assert_eq!(queue.ids(), expected);

        assert_eq!(queue.pop().map(|q| q.handle.label), Some("a".to_string()));
        assert_eq!(queue.pop().map(|q| q.handle.label), Some("b".to_string()));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_scan_queue_drain() {
        let queue = ScanQueue::new();
        queue.push(queued("a"));
        queue.push(queued("b"));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].handle.label, "a");
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_push() {
        let queue = std::sync::Arc::new(ScanQueue::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let queue = std::sync::Arc::clone(&queue);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        queue.push(queued("job"));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(queue.len(), 200);
    }
}
