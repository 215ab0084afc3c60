use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, TimeoutPolicy};
use crate::error::{BoxError, BridgeError, WorkPanicked};

/// A type-erased work item, built on the caller's thread and run on the worker.
type Job = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// Builds the runtime each execution context drives.
type RuntimeFactory = fn() -> std::io::Result<Runtime>;

/// Contexts a single submission may be routed to when the one it was queued
/// on stops before starting it.
const MAX_ROUTES: u32 = 3;

fn current_thread_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

enum Command {
    Run(Job),
    Stop,
}

/// One worker thread and the runtime it drives.
struct ExecutionContext {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionContext {
    /// Spawn the worker and block until its runtime exists.
    fn start(id: u64, thread_name: &str, runtime: RuntimeFactory) -> Result<Self, BridgeError> {
        let (commands, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let thread = thread::Builder::new()
            .name(format!("{thread_name}-{id}"))
            .spawn(move || run_worker(id, runtime, rx, ready_tx))
            .map_err(|e| BridgeError::ContextInit(format!("spawn worker thread: {e}")))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("worker exited before signalling readiness".to_string()));
        if let Err(reason) = ready {
            let _ = thread.join();
            return Err(BridgeError::ContextInit(reason));
        }

        Ok(Self {
            id,
            commands,
            thread: Some(thread),
        })
    }

    /// The worker closes its receiver as soon as it accepts `Stop`, so a
    /// closed channel means the context takes no more work.
    fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|t| t.thread().id())
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(context_id = self.id, "execution context worker panicked");
            }
        }
    }
}

fn run_worker(
    id: u64,
    runtime: RuntimeFactory,
    mut rx: mpsc::UnboundedReceiver<Command>,
    ready: std_mpsc::SyncSender<Result<(), String>>,
) {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(format!("build runtime: {e}")));
            return;
        }
    };
    let local = LocalSet::new();

    if ready.send(Ok(())).is_err() {
        return;
    }
    debug!(context_id = id, "execution context running");

    local.block_on(&runtime, async move {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Run(job) => {
                    drop(tokio::task::spawn_local(job()));
                }
                Command::Stop => {
                    rx.close();
                    break;
                }
            }
        }
    });

    // Dropping the LocalSet and the receiver drops unfinished work items along
    // with their result senders, which wakes their callers.
    drop(local);
    drop(runtime);
    debug!(context_id = id, "execution context stopped");
}

/// Wrap a caller's work item for the worker. The job claims the work from
/// `pending` when first polled and reports through `result_tx`.
fn work_job<W, Fut, T, E>(
    pending: Arc<Mutex<Option<W>>>,
    cancel: CancellationToken,
    result_tx: std_mpsc::SyncSender<Result<T, BridgeError>>,
) -> Job
where
    W: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + 'static,
    T: Send + 'static,
    E: Into<BoxError> + 'static,
{
    Box::new(move || {
        async move {
            let claimed = pending.lock().take();
            let Some(work) = claimed else {
                return;
            };
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(BridgeError::Cancelled),
                result = AssertUnwindSafe(async move { work().await }).catch_unwind() => {
                    match result {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(BridgeError::Execution(e.into())),
                        Err(payload) => Err(BridgeError::Execution(Box::new(
                            WorkPanicked::from_payload(payload),
                        ))),
                    }
                }
            };
            // The caller may have stopped waiting.
            let _ = result_tx.send(outcome);
        }
        .boxed_local()
    })
}

/// Runs async work on a dedicated background thread on behalf of blocking
/// callers.
///
/// All work submitted to one bridge runs on the same worker thread, inside a
/// single-threaded runtime with a [`LocalSet`], so work futures need not be
/// `Send`. The worker is created lazily and recreated if it has stopped.
pub struct ExecutionBridge {
    config: BridgeConfig,
    context: Mutex<Option<ExecutionContext>>,
    generation: AtomicU64,
    runtime: RuntimeFactory,
}

impl ExecutionBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            context: Mutex::new(None),
            generation: AtomicU64::new(0),
            runtime: current_thread_runtime,
        }
    }

    #[cfg(test)]
    fn with_runtime_factory(mut self, runtime: RuntimeFactory) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `work` on the worker and block until it resolves or the configured
    /// timeout elapses.
    ///
    /// Must not be called from inside async code: it blocks the calling
    /// thread. Use `tokio::task::spawn_blocking` from async handlers.
    pub fn submit_and_wait<W, Fut, T, E>(&self, work: W) -> Result<T, BridgeError>
    where
        W: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.submit_and_wait_timeout(work, self.config.timeout)
    }

    /// [`submit_and_wait`](Self::submit_and_wait) with an explicit bound.
    pub fn submit_and_wait_timeout<W, Fut, T, E>(
        &self,
        work: W,
        timeout: Duration,
    ) -> Result<T, BridgeError>
    where
        W: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let deadline = Instant::now() + timeout;
        let cancel = CancellationToken::new();
        // Emptied by whichever job starts the work, so it runs at most once.
        let pending = Arc::new(Mutex::new(Some(work)));

        let mut routes = 0;
        loop {
            routes += 1;
            let (result_tx, result_rx) = std_mpsc::sync_channel(1);
            let job = work_job(pending.clone(), cancel.clone(), result_tx);
            let context_id = self.dispatch(job)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            match result_rx.recv_timeout(remaining) {
                Ok(outcome) => return outcome,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    if self.config.timeout_policy == TimeoutPolicy::Cancel {
                        cancel.cancel();
                    }
                    warn!(
                        context_id,
                        timeout_ms = timeout.as_millis() as u64,
                        policy = ?self.config.timeout_policy,
                        "work item timed out"
                    );
                    return Err(BridgeError::Timeout(timeout));
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    // A full slot means the context stopped with the job
                    // still queued.
                    if pending.lock().is_some() && routes < MAX_ROUTES {
                        debug!(context_id, routes, "work item dropped unstarted, rerouting");
                        continue;
                    }
                    return Err(BridgeError::Cancelled);
                }
            }
        }
    }

    /// Queue a job on a live context. Retries once on a fresh context if the
    /// current one closed between the liveness check and the send.
    fn dispatch(&self, job: Job) -> Result<u64, BridgeError> {
        let (context_id, sender) = self.live_sender()?;
        let Err(mpsc::error::SendError(command)) = sender.send(Command::Run(job)) else {
            return Ok(context_id);
        };

        debug!(context_id, "execution context closed during submission, retrying");
        let (context_id, sender) = self.live_sender()?;
        sender
            .send(command)
            .map_err(|_| BridgeError::ContextInit("execution context closed during submission".into()))?;
        Ok(context_id)
    }

    /// Return a sender for the live context, starting one if there is none.
    ///
    /// Holding the slot lock across startup makes concurrent first callers
    /// wait for the same context instead of each building one.
    fn live_sender(&self) -> Result<(u64, mpsc::UnboundedSender<Command>), BridgeError> {
        let mut slot = self.context.lock();

        if let Some(ctx) = slot.as_ref() {
            if ctx.is_alive() {
                return Ok((ctx.id, ctx.commands.clone()));
            }
        }

        if let Some(mut dead) = slot.take() {
            warn!(context_id = dead.id, "execution context stopped, rebuilding");
            dead.join();
        }

        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = ExecutionContext::start(id, &self.config.thread_name, self.runtime)?;
        info!(context_id = id, "execution context started");

        let sender = ctx.commands.clone();
        *slot = Some(ctx);
        Ok((id, sender))
    }

    /// Stop the current context. Work already running resolves as
    /// [`BridgeError::Cancelled`]; work still queued moves to a new context,
    /// as does the next submission.
    pub fn shutdown(&self) {
        let Some(mut ctx) = self.context.lock().take() else {
            return;
        };
        let _ = ctx.commands.send(Command::Stop);

        // A work item dropping the last handle to the bridge runs this on the
        // worker itself, which cannot join its own thread.
        if ctx.thread_id() == Some(thread::current().id()) {
            return;
        }
        ctx.join();
        info!(context_id = ctx.id, "execution context shut down");
    }

    pub fn is_running(&self) -> bool {
        self.context.lock().as_ref().is_some_and(ExecutionContext::is_alive)
    }

    /// Id of the live context, if any. Ids start at 1 and grow by one per
    /// context started.
    pub fn context_id(&self) -> Option<u64> {
        self.context
            .lock()
            .as_ref()
            .filter(|ctx| ctx.is_alive())
            .map(|ctx| ctx.id)
    }

    pub fn contexts_started(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for ExecutionBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Arc, Barrier};
    use std::time::Instant;

    use super::*;

    const UNIT: Duration = Duration::from_millis(10);

    #[derive(Debug, thiserror::Error)]
    #[error("task store unavailable: {0}")]
    struct StoreDown(&'static str);

    fn bridge_with_timeout(timeout: Duration) -> ExecutionBridge {
        ExecutionBridge::new(BridgeConfig::default().with_timeout(timeout))
    }

    /// Queue `Stop` on the live context without going through the bridge.
    fn stop_behind_bridge(bridge: &ExecutionBridge) {
        if let Some(ctx) = bridge.context.lock().as_ref() {
            let _ = ctx.commands.send(Command::Stop);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn returns_value() {
        let bridge = ExecutionBridge::default();
        let value = bridge
            .submit_and_wait(|| async {
                tokio::time::sleep(UNIT).await;
                Ok::<_, BoxError>(42)
            })
            .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn runs_exactly_once() {
        let bridge = ExecutionBridge::default();
        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();
        bridge
            .submit_and_wait(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_submission_starts_context() {
        let bridge = ExecutionBridge::default();
        assert!(!bridge.is_running());
        assert_eq!(bridge.context_id(), None);

        bridge.submit_and_wait(|| async { Ok::<_, BoxError>(()) }).unwrap();
        assert!(bridge.is_running());
        assert_eq!(bridge.context_id(), Some(1));
        assert_eq!(bridge.contexts_started(), 1);
    }

    #[test]
    fn work_runs_off_the_caller_thread() {
        let bridge = ExecutionBridge::default();
        let worker = bridge
            .submit_and_wait(|| async { Ok::<_, BoxError>(thread::current().id()) })
            .unwrap();
        assert_ne!(worker, thread::current().id());
    }

    #[test]
    fn non_send_futures_are_accepted() {
        let bridge = ExecutionBridge::default();
        let len = bridge
            .submit_and_wait(|| async {
                let local = std::rc::Rc::new(vec![1, 2, 3]);
                tokio::task::yield_now().await;
                Ok::<_, BoxError>(local.len())
            })
            .unwrap();
        assert_eq!(len, 3);
    }

    #[test]
    fn concurrent_callers_share_one_context() {
        let bridge = Arc::new(ExecutionBridge::default());
        let barrier = Arc::new(Barrier::new(10));

        let handles: Vec<_> = (0..10usize)
            .map(|i| {
                let bridge = bridge.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    bridge
                        .submit_and_wait(move || async move {
                            tokio::time::sleep(UNIT).await;
                            Ok::<_, BoxError>((i, thread::current().id()))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for (i, (returned, _)) in results.iter().enumerate() {
            assert_eq!(*returned, i);
        }
        let worker = results[0].1;
        assert!(results.iter().all(|(_, id)| *id == worker));
        assert_eq!(bridge.contexts_started(), 1);
    }

    #[test]
    fn failure_is_downcastable() {
        let bridge = ExecutionBridge::default();
        let err = bridge
            .submit_and_wait(|| async { Err::<(), _>(StoreDown("locked")) })
            .unwrap_err();

        assert_eq!(err.kind(), "execution");
        let source = err.downcast_ref::<StoreDown>().unwrap();
        assert_eq!(source.0, "locked");
    }

    #[test]
    fn panic_becomes_execution_error() {
        let bridge = ExecutionBridge::default();
        let err = bridge
            .submit_and_wait(|| async {
                if true {
                    panic!("handler blew up");
                }
                Ok::<(), BoxError>(())
            })
            .unwrap_err();

        let panicked = err.downcast_ref::<WorkPanicked>().unwrap();
        assert_eq!(panicked.message, "handler blew up");

        // The worker survives a panicking work item.
        assert_eq!(bridge.submit_and_wait(|| async { Ok::<_, BoxError>(1) }).unwrap(), 1);
        assert_eq!(bridge.contexts_started(), 1);
    }

    #[test]
    fn times_out_within_bound() {
        let bridge = bridge_with_timeout(UNIT * 30);
        let started = Instant::now();
        let err = bridge
            .submit_and_wait(|| async {
                tokio::time::sleep(UNIT * 60).await;
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, BridgeError::Timeout(d) if d == UNIT * 30));
        assert!(elapsed >= UNIT * 30);
        assert!(elapsed < UNIT * 55, "took {elapsed:?}");

        // Still usable afterwards, on the same context.
        assert_eq!(bridge.submit_and_wait(|| async { Ok::<_, BoxError>(7) }).unwrap(), 7);
        assert_eq!(bridge.contexts_started(), 1);
    }

    #[test]
    fn explicit_timeout_overrides_config() {
        let bridge = ExecutionBridge::default();
        let err = bridge
            .submit_and_wait_timeout(
                || async {
                    std::future::pending::<()>().await;
                    Ok::<_, BoxError>(())
                },
                UNIT * 5,
            )
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    /// Flips its flag when dropped, i.e. when the owning work item is torn down.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn timeout_cancels_work_by_default() {
        let bridge = bridge_with_timeout(UNIT * 5);
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let (d, f) = (dropped.clone(), finished.clone());

        let err = bridge
            .submit_and_wait(move || async move {
                let _flag = DropFlag(d);
                tokio::time::sleep(UNIT * 20).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));

        wait_until(|| dropped.load(Ordering::SeqCst));
        thread::sleep(UNIT * 25);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[test]
    fn detach_policy_lets_work_finish() {
        let bridge = ExecutionBridge::new(
            BridgeConfig::default()
                .with_timeout(UNIT * 5)
                .with_policy(TimeoutPolicy::Detach),
        );
        let finished = Arc::new(AtomicBool::new(false));
        let f = finished.clone();

        let err = bridge
            .submit_and_wait(move || async move {
                tokio::time::sleep(UNIT * 10).await;
                f.store(true, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));

        wait_until(|| finished.load(Ordering::SeqCst));
    }

    #[test]
    fn dead_context_is_rebuilt() {
        let bridge = ExecutionBridge::default();
        let first = bridge
            .submit_and_wait(|| async { Ok::<_, BoxError>(thread::current().id()) })
            .unwrap();

        stop_behind_bridge(&bridge);
        wait_until(|| !bridge.is_running());

        let second = bridge
            .submit_and_wait(|| async { Ok::<_, BoxError>(thread::current().id()) })
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(bridge.contexts_started(), 2);
        assert_eq!(bridge.context_id(), Some(2));
    }

    #[test]
    fn submission_racing_a_stop_is_rerouted() {
        let bridge = ExecutionBridge::default();
        bridge.submit_and_wait(|| async { Ok::<_, BoxError>(0) }).unwrap();

        for round in 1..=200u32 {
            stop_behind_bridge(&bridge);
            let value = bridge
                .submit_and_wait(move || async move { Ok::<_, BoxError>(round) })
                .unwrap_or_else(|e| panic!("round {round}: {e:?}"));
            assert_eq!(value, round);
        }
        assert!(bridge.contexts_started() > 1);
    }

    #[test]
    fn concurrent_submissions_racing_a_stop_are_rerouted() {
        let bridge = Arc::new(ExecutionBridge::default());
        bridge.submit_and_wait(|| async { Ok::<_, BoxError>(()) }).unwrap();

        for round in 0..30usize {
            let barrier = Arc::new(Barrier::new(11));
            let handles: Vec<_> = (0..10usize)
                .map(|idx| {
                    let bridge = bridge.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        bridge.submit_and_wait(move || async move { Ok::<_, BoxError>(idx) })
                    })
                })
                .collect();

            stop_behind_bridge(&bridge);
            barrier.wait();
            for (idx, handle) in handles.into_iter().enumerate() {
                match handle.join().unwrap() {
                    Ok(value) => assert_eq!(value, idx),
                    Err(e) => panic!("round {round} idx {idx}: {e:?}"),
                }
            }
        }
    }

    #[test]
    fn work_runs_once_when_rerouted() {
        let bridge = ExecutionBridge::default();
        bridge.submit_and_wait(|| async { Ok::<_, BoxError>(()) }).unwrap();
        let runs = Arc::new(AtomicU64::new(0));

        for _ in 0..50 {
            stop_behind_bridge(&bridge);
            let counter = runs.clone();
            bridge
                .submit_and_wait(move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                })
                .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 50);
    }

    fn no_runtime() -> std::io::Result<Runtime> {
        Err(std::io::Error::other("reactor unavailable"))
    }

    #[test]
    fn runtime_failure_is_context_init() {
        let bridge = ExecutionBridge::default().with_runtime_factory(no_runtime);
        let err = bridge
            .submit_and_wait(|| async { Ok::<_, BoxError>(()) })
            .unwrap_err();

        assert_eq!(err.kind(), "context_init");
        assert!(err.to_string().contains("reactor unavailable"), "{err}");
        assert!(!bridge.is_running());
        assert_eq!(bridge.context_id(), None);
    }

    #[test]
    fn next_submission_retries_context_init() {
        fn fails_once() -> std::io::Result<Runtime> {
            static CALLS: AtomicUsize = AtomicUsize::new(0);
            if CALLS.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(std::io::Error::other("first start fails"));
            }
            current_thread_runtime()
        }

        let bridge = ExecutionBridge::default().with_runtime_factory(fails_once);
        let err = bridge
            .submit_and_wait(|| async { Ok::<_, BoxError>(1) })
            .unwrap_err();
        assert!(matches!(err, BridgeError::ContextInit(_)), "got {err:?}");

        assert_eq!(bridge.submit_and_wait(|| async { Ok::<_, BoxError>(2) }).unwrap(), 2);
        assert!(bridge.is_running());
        assert_eq!(bridge.contexts_started(), 2);
    }

    #[test]
    fn shutdown_cancels_in_flight_work() {
        let bridge = Arc::new(ExecutionBridge::default());
        let started = Arc::new(Barrier::new(2));

        let caller = {
            let bridge = bridge.clone();
            let started = started.clone();
            thread::spawn(move || {
                bridge.submit_and_wait(move || async move {
                    started.wait();
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, BoxError>(())
                })
            })
        };

        started.wait();
        bridge.shutdown();
        assert!(!bridge.is_running());

        let err = caller.join().unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Cancelled), "got {err:?}");

        // A later submission starts a fresh context.
        assert_eq!(bridge.submit_and_wait(|| async { Ok::<_, BoxError>(5) }).unwrap(), 5);
        assert_eq!(bridge.context_id(), Some(2));
    }

    #[test]
    fn shutdown_without_context_is_a_noop() {
        let bridge = ExecutionBridge::default();
        bridge.shutdown();
        assert_eq!(bridge.contexts_started(), 0);
    }
}
