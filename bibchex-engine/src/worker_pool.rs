//! Bounded CPU pool for comparison chunks
//!
//! A rayon pool, entered from async code through `spawn_blocking` so that the
//! tokio workers stay free for I/O.

use rayon::prelude::*;
use std::sync::Arc;
use tokio::task::JoinError;

/// Rayon thread pool sized to the available parallelism
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("bibchex-cpu-{i}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Pool with one thread per available core
    pub fn with_available_parallelism() -> Result<Self, rayon::ThreadPoolBuildError> {
        let threads = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(1);
        Self::new(threads)
    }

    /// Run `job(i)` for every chunk index `0..chunks` on the pool
    ///
    /// Results come back in chunk order. A panic inside a job surfaces as the
    /// `JoinError` of the blocking task.
    pub async fn run_chunks<T, F>(&self, chunks: usize, job: F) -> Result<Vec<T>, JoinError>
    where
        T: Send + 'static,
        F: Fn(usize) -> T + Send + Sync + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            tracing::debug!(chunks, threads = pool.current_num_threads(), "Running comparison chunks");
            pool.install(|| (0..chunks).into_par_iter().map(&job).collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_results_in_chunk_order() {
        let pool = WorkerPool::new(4).unwrap();
        let results = pool.run_chunks(20, |i| i * i).await.unwrap();
        assert_eq!(results, (0..20).map(|i| i * i).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panic_becomes_join_error() {
        let pool = WorkerPool::new(2).unwrap();
        let result = pool
            .run_chunks(4, |i| {
                if i == 3 {
                    panic!("boom");
                }
                i
            })
            .await;
        assert!(result.unwrap_err().is_panic());
    }
}
