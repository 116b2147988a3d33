//! Periodic persistence of allocator state on the
//! [`tokio`](https://docs.rs/tokio) runtime.

use core::time::Duration;
use std::sync::Arc;

use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{Error, LongIdProvider, Result};

/// Handle to a background task spawned by [`spawn_periodic_flush`].
///
/// Dropping the handle cancels the task; it still performs its final flush,
/// but the outcome is only logged. Call [`FlushTask::shutdown`] to wait for
/// that flush and observe its result.
pub struct FlushTask {
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
    _guard: DropGuard,
}

impl FlushTask {
    /// Stops the periodic flush, performs one last flush and waits for it.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush, or [`Error::Storage`] if the
    /// task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.token.cancel();
        self.handle.await.map_err(Error::storage)?
    }

    /// Whether the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns a task that calls [`LongIdProvider::flush_to_storage`] every
/// `period`, starting one period from now.
///
/// Flushes run on the blocking pool so storage I/O never stalls the runtime.
/// A failed periodic flush is logged and retried on the next tick. A zero
/// `period` is raised to one millisecond.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
///
/// # Example
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use longid::{LongId, LongIdAllocator, MemoryStorage, spawn_periodic_flush};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), longid::Error> {
/// let storage = MemoryStorage::with_values([LongId::from_components(1, 0, 0, 0)])?;
/// let allocator = Arc::new(LongIdAllocator::new(storage)?);
/// let flusher = spawn_periodic_flush(Arc::clone(&allocator), Duration::from_secs(5));
///
/// let id = allocator.create(1)?;
///
/// flusher.shutdown().await?;
/// assert_eq!(allocator.storage().values()?, vec![id]);
/// # Ok(())
/// # }
/// ```
pub fn spawn_periodic_flush<P>(provider: Arc<P>, period: Duration) -> FlushTask
where
    P: LongIdProvider + ?Sized + 'static,
{
    let token = CancellationToken::new();
    let handle = tokio::spawn(run(provider, period.max(Duration::from_millis(1)), token.clone()));
    FlushTask {
        _guard: token.clone().drop_guard(),
        token,
        handle,
    }
}

async fn run<P>(provider: Arc<P>, period: Duration, token: CancellationToken) -> Result<()>
where
    P: LongIdProvider + ?Sized + 'static,
{
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    #[cfg(feature = "tracing")]
    tracing::debug!(period_ms = period.as_millis(), "periodic flush started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(_e) = flush(&provider).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %_e, "periodic flush failed, retrying next tick");
                }
            }
        }
    }

    let result = flush(&provider).await;

    #[cfg(feature = "tracing")]
    match &result {
        Ok(()) => tracing::info!("final flush complete"),
        Err(e) => tracing::error!(error = %e, "final flush failed"),
    }

    result
}

async fn flush<P>(provider: &Arc<P>) -> Result<()>
where
    P: LongIdProvider + ?Sized + 'static,
{
    let provider = Arc::clone(provider);
    tokio::task::spawn_blocking(move || provider.flush_to_storage())
        .await
        .map_err(Error::storage)?
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{LongId, LongIdAllocator, MemoryStorage};

    #[derive(Default)]
    struct CountingProvider {
        flushes: AtomicUsize,
        fail: AtomicBool,
    }

    impl LongIdProvider for CountingProvider {
        fn create(&self, _type_id: u16) -> Result<LongId> {
            Ok(LongId::default())
        }

        fn flush_to_storage(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::storage("disk full"));
            }
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flushes_periodically_and_once_more_on_shutdown() {
        let provider = Arc::new(CountingProvider::default());
        let task = spawn_periodic_flush(Arc::clone(&provider), Duration::from_millis(10));

        time::sleep(Duration::from_millis(200)).await;
        let periodic = provider.flushes.load(Ordering::SeqCst);
        assert!(periodic >= 1, "expected at least one periodic flush");

        task.shutdown().await.unwrap();
        assert!(provider.flushes.load(Ordering::SeqCst) > periodic);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn periodic_failures_do_not_stop_the_task() {
        let provider = Arc::new(CountingProvider::default());
        provider.fail.store(true, Ordering::SeqCst);
        let task = spawn_periodic_flush(Arc::clone(&provider), Duration::from_millis(5));

        time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        provider.fail.store(false, Ordering::SeqCst);
        task.shutdown().await.unwrap();
        assert!(provider.flushes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_surfaces_a_failed_final_flush() {
        let provider = Arc::new(CountingProvider::default());
        let task = spawn_periodic_flush(Arc::clone(&provider), Duration::from_secs(3600));

        provider.fail.store(true, Ordering::SeqCst);
        assert!(matches!(task.shutdown().await, Err(Error::Storage(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_persists_issued_values() {
        let storage = MemoryStorage::with_values([LongId::from_components(1, 0, 0, 0)]).unwrap();
        let allocator = Arc::new(LongIdAllocator::new(storage).unwrap());
        let task = spawn_periodic_flush(Arc::clone(&allocator), Duration::from_secs(3600));

        let ids: Vec<LongId> = (0..10).map(|_| allocator.create(1).unwrap()).collect();
        task.shutdown().await.unwrap();

        assert_eq!(allocator.storage().values().unwrap(), vec![ids[9]]);
    }
}
