//! Bounded worker pool with rendezvous submission.

use std::thread;

use crossbeam_channel::{bounded, Sender};

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads executing opaque tasks.
///
/// Tasks are handed over through a zero-capacity rendezvous channel:
/// [`WorkerPool::exec`] blocks the submitter until some worker accepts the
/// task, which keeps submission order and throttles the caller to the pool
/// width. The recursive merge tree relies on this back-pressure to bound the
/// number of in-flight merges.
///
/// Tasks are fire-and-forget; failure reporting is the caller's concern.
pub struct WorkerPool {
    tasks: Option<Sender<Task>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads; 0 selects the CPU count.
    pub fn new(workers: usize) -> Result<Self> {
        let count = if workers == 0 {
            num_cpus::get()
        } else {
            workers
        };

        let (tasks, task_source) = bounded::<Task>(0);

        let mut handles = Vec::with_capacity(count);
        for idx in 0..count {
            let task_source = task_source.clone();
            let handle = thread::Builder::new()
                .name(format!("extsort-worker-{}", idx))
                .spawn(move || {
                    for task in task_source.iter() {
                        task();
                    }
                })?;
            handles.push(handle);
        }

        Ok(WorkerPool {
            tasks: Some(tasks),
            workers: handles,
        })
    }

    /// Hands `task` to a worker, blocking until one accepts it.
    pub fn exec<T: FnOnce() + Send + 'static>(&self, task: T) -> Result<()> {
        match &self.tasks {
            Some(tasks) => tasks
                .send(Box::new(task))
                .map_err(|_| Error::ProcessorClosed),
            None => Err(Error::ProcessorClosed),
        }
    }

    /// Stops accepting tasks and waits for every accepted task to finish.
    /// A second close fails with `ProcessorClosed`.
    pub fn close(&mut self) -> Result<()> {
        match self.tasks.take() {
            Some(tasks) => {
                drop(tasks);
                for worker in self.workers.drain(..) {
                    if worker.join().is_err() {
                        log::error!("worker thread panicked");
                    }
                }
                Ok(())
            }
            None => Err(Error::ProcessorClosed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.tasks.is_some() {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::WorkerPool;
    use crate::error::Error;

    #[test]
    fn test_tasks_are_executed() {
        let counter = Arc::new(AtomicUsize::new(0));

        let mut pool = WorkerPool::new(4).unwrap();
        for _ in 0..100 {
            let counter = counter.clone();
            pool.exec(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.close().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_single_worker_preserves_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut pool = WorkerPool::new(1).unwrap();
        for idx in 0..50 {
            let order = order.clone();
            pool.exec(move || order.lock().push(idx)).unwrap();
        }
        pool.close().unwrap();

        assert_eq!(*order.lock(), Vec::from_iter(0..50));
    }

    #[test]
    fn test_exec_after_close() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.close().unwrap();

        assert!(matches!(pool.exec(|| {}), Err(Error::ProcessorClosed)));
    }

    #[test]
    fn test_double_close() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.close().unwrap();

        assert!(matches!(pool.close(), Err(Error::ProcessorClosed)));
    }

    #[test]
    fn test_default_worker_count() {
        let mut pool = WorkerPool::new(0).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = done.clone();
        pool.exec(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        pool.close().unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
