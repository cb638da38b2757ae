//! Test origins and stores.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use futures::future::BoxFuture;
use pagecache_core::{Clock, Error, Expiration, KvStore, Result};
use pagecache_store::MemoryStore;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::{Notify, Semaphore};

struct OriginState {
    started: AtomicUsize,
    completed: AtomicUsize,
    failing: AtomicBool,
    held_call: AtomicUsize,
    gate: Semaphore,
    entered: Notify,
}

impl Default for OriginState {
    fn default() -> Self {
        Self {
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            held_call: AtomicUsize::new(0),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }
}

/// Origin whose body is the number of the call that produced it.
///
/// Every response carries `set-cookie: visit=<n>`. A call can be held until
/// [`release`](CountingOrigin::release) to observe requests arriving while a
/// recompute is in flight.
#[derive(Clone, Default)]
pub struct CountingOrigin {
    state: Arc<OriginState>,
}

impl CountingOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls that reached the origin.
    pub fn started(&self) -> usize {
        self.state.started.load(Ordering::SeqCst)
    }

    /// Calls that produced a response.
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Answer with 500 while set.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Block the `n`th call (1-based) until released.
    pub fn hold_call(&self, n: usize) {
        self.state.held_call.store(n, Ordering::SeqCst);
    }

    /// Wait until the held call has reached the origin.
    pub async fn wait_for_held_call(&self) {
        self.state.entered.notified().await;
    }

    /// Let the held call respond.
    pub fn release(&self) {
        self.state.gate.add_permits(1);
    }

    async fn respond(state: Arc<OriginState>) -> Response<Body> {
        let n = state.started.fetch_add(1, Ordering::SeqCst) + 1;

        if state.held_call.load(Ordering::SeqCst) == n {
            state.entered.notify_one();
            if let Ok(permit) = state.gate.acquire().await {
                permit.forget();
            }
        }

        let status = if state.failing.load(Ordering::SeqCst) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };

        let response = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::SET_COOKIE, format!("visit={n}; Path=/"))
            .header("x-origin-call", n.to_string())
            .body(Body::from(n.to_string()))
            .unwrap();

        state.completed.fetch_add(1, Ordering::SeqCst);
        response
    }
}

impl tower::Service<Request<Body>> for CountingOrigin {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<Body>) -> Self::Future {
        let state = self.state.clone();
        Box::pin(async move { Ok(Self::respond(state).await) })
    }
}

/// Store operation seen by [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Get(String),
    Add(String),
    Set(String),
    Delete(String),
}

impl StoreOp {
    pub fn key(&self) -> &str {
        match self {
            StoreOp::Get(key) | StoreOp::Add(key) | StoreOp::Set(key) | StoreOp::Delete(key) => {
                key
            }
        }
    }
}

/// Memory store that records every operation and can be told to fail.
pub struct RecordingStore {
    inner: MemoryStore,
    ops: Mutex<Vec<StoreOp>>,
    fail_get: AtomicBool,
    fail_add: AtomicBool,
    fail_set: AtomicBool,
    fail_delete: AtomicBool,
}

impl RecordingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryStore::with_clock(clock),
            ops: Mutex::new(Vec::new()),
            fail_get: AtomicBool::new(false),
            fail_add: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    /// The wrapped store, for inspecting what is live.
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Make every operation fail as if the server were down.
    pub fn set_unavailable(&self, down: bool) {
        self.fail_get.store(down, Ordering::SeqCst);
        self.fail_add.store(down, Ordering::SeqCst);
        self.fail_set.store(down, Ordering::SeqCst);
        self.fail_delete.store(down, Ordering::SeqCst);
    }

    pub fn fail_adds(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn record(&self, op: StoreOp, fail: &AtomicBool) -> Result<()> {
        self.ops.lock().unwrap().push(op);
        if fail.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.record(StoreOp::Get(key.to_string()), &self.fail_get)?;
        self.inner.get(key).await
    }

    async fn add(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<bool> {
        self.record(StoreOp::Add(key.to_string()), &self.fail_add)?;
        self.inner.add(key, value, expiration).await
    }

    async fn set(&self, key: &str, value: &[u8], expiration: Expiration) -> Result<()> {
        self.record(StoreOp::Set(key.to_string()), &self.fail_set)?;
        self.inner.set(key, value, expiration).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.record(StoreOp::Delete(key.to_string()), &self.fail_delete)?;
        self.inner.delete(key).await
    }
}
