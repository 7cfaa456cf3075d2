use crate::error::Result;

/// Worker pool running background load steps.
///
/// With the `parallel` feature this is a dedicated rayon pool; otherwise each
/// job gets its own named thread.
pub struct LoadExecutor {
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
    worker_threads: usize,
}

impl LoadExecutor {
    pub fn new(worker_threads: usize) -> Self {
        let worker_threads = worker_threads.max(1);

        #[cfg(feature = "parallel")]
        {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(worker_threads)
                .thread_name(|index| format!("resource-loader-{index}"))
                .build();
            let pool = match pool {
                Ok(pool) => Some(pool),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to build loader pool, using plain threads");
                    None
                }
            };
            Self {
                pool,
                worker_threads,
            }
        }

        #[cfg(not(feature = "parallel"))]
        {
            Self { worker_threads }
        }
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Run `job` off the calling thread
    pub fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        #[cfg(feature = "parallel")]
        {
            if let Some(pool) = &self.pool {
                pool.spawn(job);
                return Ok(());
            }
        }

        std::thread::Builder::new()
            .name("resource-loader".to_string())
            .spawn(job)?;
        Ok(())
    }
}

impl std::fmt::Debug for LoadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadExecutor")
            .field("worker_threads", &self.worker_threads)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_off_thread() {
        let executor = LoadExecutor::new(2);
        let (sender, receiver) = channel::unbounded();
        let caller = std::thread::current().id();

        for index in 0..4 {
            let sender = sender.clone();
            executor
                .spawn(move || {
                    let _ = sender.send((index, std::thread::current().id()));
                })
                .unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (index, thread) = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_ne!(thread, caller);
            seen.push(index);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_worker_threads_at_least_one() {
        assert_eq!(LoadExecutor::new(0).worker_threads(), 1);
    }
}
