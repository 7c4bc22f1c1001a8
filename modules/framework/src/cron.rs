use crate::processor::Processor;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use time::PrimitiveDateTime;
use tracing::info;

#[derive(Debug)]
pub struct BatchedJobs<T: ScheduledJob> {
    pub jobs: Box<[T]>,
    pub timestamp: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct JobCompleteSignal<Id> {
    pub id: Id,
    pub complete_time: PrimitiveDateTime,
}

/// Type alias for job execution result
pub type JobResult<Id> = Result<JobCompleteSignal<Id>, crate::Error>;

pub trait ScheduledJob: Sized + Send {
    /// After each `CLOCK_LOOPS` intervals, the job will be executed
    const CLOCK_LOOPS: u64 = 1;

    /// The scanner that finds due jobs in the database, kv store or memory
    type Scanner: Processor<PrimitiveDateTime, Output = Box<[Self]>, Error = crate::Error>
        + Send
        + Sync;

    /// The executor that execute the job by batch
    type Executor: Processor<BatchedJobs<Self>, Output = Vec<JobResult<Self::Id>>, Error = crate::Error>
        + Send
        + Sync;

    /// The id of the job that can identify the job and tracing the status
    type Id: Clone + Send + Display + 'static;

    /// get the id of the job
    fn id(&self) -> Self::Id;

    fn is_due(loop_count: u64) -> bool {
        Self::CLOCK_LOOPS == 0 || loop_count % Self::CLOCK_LOOPS == 0
    }
}

fn trace_result<Id: Display>(result: &JobResult<Id>) {
    match result {
        Ok(signal) => {
            info!(
                "Job (ID: {}) completed at {}",
                signal.id, signal.complete_time
            )
        }
        Err(e) => tracing::error!("{e}"),
    }
}

/// Scan and execute one batch. Returns how many jobs completed successfully.
pub async fn cron<T: ScheduledJob>(
    scanner: &T::Scanner,
    executor: &T::Executor,
    now: PrimitiveDateTime,
) -> Result<usize, crate::Error> {
    let jobs = scanner.process(now).await?;
    if jobs.is_empty() {
        return Ok(0);
    }
    let batch = BatchedJobs {
        jobs,
        timestamp: now,
    };
    let results = executor.process(batch).await?;
    let mut completed = 0;
    for result in &results {
        info!(monotonic_counter.cron_execute = 1);
        trace_result(result);
        if result.is_ok() {
            completed += 1;
        }
    }
    Ok(completed)
}

/// Drives `on_tick` every `interval` until `shutdown` resolves.
pub async fn run_clock<F, Fut>(interval: Duration, shutdown: impl Future<Output = ()>, mut on_tick: F)
where
    F: FnMut(u64, PrimitiveDateTime) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    let mut loop_count: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                on_tick(loop_count, crate::now_time()).await;
                loop_count = loop_count.wrapping_add(1);
            }
        }
    }
    info!("Clock stopped after {loop_count} loops");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn clock_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let shutdown = tokio::time::sleep(Duration::from_millis(350));
        run_clock(Duration::from_millis(100), shutdown, move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;
        // ticks at 0, 100, 200, 300
        assert_eq!(ticks.load(Ordering::SeqCst), 4);
    }
}
