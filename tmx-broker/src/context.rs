//! The parameter bag and lifecycle state for one broker connection.

use crate::exec::TmxExecutor;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tmx_value::{named_enum, TmxError, TmxResult, Value};
use url::Url;

named_enum! {
    /// Lifecycle of a broker context. A well-behaved client never jumps
    /// from uninitialized straight to connected.
    pub enum BrokerState: u8 {
        Uninitialized = 0,
        Initialized = 1,
        Disconnected = 2,
        Connected = 3,
        Registered = 4,
    }
}

/// One mutex/condition-variable pair of the context's locking discipline.
#[derive(Default)]
pub struct Gate {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Gate {
    pub fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }

    /// Wait until the predicate holds or the bound elapses; the predicate
    /// is re-checked on every wakeup.
    pub fn wait_for(&self, timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !predicate() {
            let now = Instant::now();
            if now >= deadline {
                return predicate();
            }
            if self
                .cv
                .wait_for(&mut guard, deadline - now)
                .timed_out()
            {
                return predicate();
            }
        }
        true
    }
}

pub type ErrorCallback = Arc<dyn Fn(&BrokerContext, &TmxError) + Send + Sync>;

struct ContextInner {
    id: String,
    scheme: String,
    user: String,
    secret: String,
    host: String,
    port: Option<u16>,
    path: String,
    defaults: Value,
    parameters: Mutex<Value>,
    state: Mutex<BrokerState>,
    last_error: Mutex<Option<TmxError>>,
    executor: RwLock<Option<Arc<TmxExecutor>>>,
    on_error: RwLock<Option<ErrorCallback>>,
    thread_gate: Gate,
    publish_gate: Gate,
    receive_gate: Gate,
}

/// A cheaply-cloneable handle to one broker connection's identity, URL
/// parts, typed parameters and synchronization primitives.
#[derive(Clone)]
pub struct BrokerContext {
    inner: Arc<ContextInner>,
}

impl BrokerContext {
    /// Parse `scheme://[user[:secret]@]host[:port][/path]?param=value&...`.
    /// Query parameters land in the parameter bag as typed values; an
    /// explicit id may be supplied, otherwise a UUID is generated.
    pub fn new(url: &str, id: &str, defaults: Value) -> TmxResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| TmxError::invalid_argument(format!("bad broker URL {:?}: {}", url, e)))?;

        let mut parameters = Value::map();
        for (key, value) in parsed.query_pairs() {
            parameters.insert(key.into_owned(), Value::from_str_guess(&value));
        }

        let id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                scheme: parsed.scheme().to_string(),
                user: parsed.username().to_string(),
                secret: parsed.password().unwrap_or("").to_string(),
                host: parsed.host_str().unwrap_or("").to_string(),
                port: parsed.port(),
                path: parsed.path().trim_start_matches('/').to_string(),
                defaults,
                parameters: Mutex::new(parameters),
                state: Mutex::new(BrokerState::Uninitialized),
                last_error: Mutex::new(None),
                executor: RwLock::new(None),
                on_error: RwLock::new(None),
                thread_gate: Gate::default(),
                publish_gate: Gate::default(),
                receive_gate: Gate::default(),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn scheme(&self) -> &str {
        &self.inner.scheme
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn secret(&self) -> &str {
        &self.inner.secret
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.port
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.inner.port.unwrap_or(default)
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Reassemble the full URL string.
    pub fn to_url_string(&self) -> String {
        let mut out = format!("{}://", self.scheme());
        if !self.user().is_empty() {
            out.push_str(self.user());
            if !self.secret().is_empty() {
                out.push(':');
                out.push_str(self.secret());
            }
            out.push('@');
        }
        out.push_str(self.host());
        if let Some(port) = self.port() {
            out.push_str(&format!(":{}", port));
        }
        if !self.path().is_empty() {
            out.push('/');
            out.push_str(self.path());
        }
        out
    }

    /// The read/write parameter bag.
    pub fn parameters(&self) -> MutexGuard<'_, Value> {
        self.inner.parameters.lock()
    }

    /// The read-only defaults supplied at construction.
    pub fn defaults(&self) -> &Value {
        &self.inner.defaults
    }

    /// A parameter by key, falling back to the defaults bag.
    pub fn param(&self, key: &str) -> Value {
        let params = self.inner.parameters.lock();
        let found = params.get(key);
        if !found.is_null() {
            return found.clone();
        }
        self.inner.defaults.get(key).clone()
    }

    pub fn set_param(&self, key: &str, value: impl Into<Value>) {
        self.inner.parameters.lock().insert(key, value);
    }

    pub fn state(&self) -> BrokerState {
        *self.inner.state.lock()
    }

    /// Update the lifecycle state and wake anything blocked on it.
    pub fn set_state(&self, state: BrokerState) {
        *self.inner.state.lock() = state;
        self.inner.thread_gate.notify_all();
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            BrokerState::Connected | BrokerState::Registered
        )
    }

    /// Block until the context reaches the given state, bounded.
    pub fn wait_for_state(&self, state: BrokerState, timeout: Duration) -> bool {
        self.inner
            .thread_gate
            .wait_for(timeout, || self.state() == state)
    }

    pub fn last_error(&self) -> Option<TmxError> {
        self.inner.last_error.lock().clone()
    }

    /// Record a completion error, fan it out to the registered error
    /// callback, and wake receive waiters. OperationAborted is recorded
    /// but never propagated to the callback: cancellation is not an error
    /// the handlers act on.
    pub fn post_error(&self, error: TmxError) {
        if !error.is_ok() {
            if error.code != tmx_value::codes::ECANCELED {
                if let Some(cb) = self.inner.on_error.read().clone() {
                    cb(self, &error);
                }
            }
            *self.inner.last_error.lock() = Some(error);
        } else {
            *self.inner.last_error.lock() = None;
        }
        self.inner.receive_gate.notify_all();
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.inner.on_error.write() = Some(callback);
    }

    pub fn executor(&self) -> Option<Arc<TmxExecutor>> {
        self.inner.executor.read().clone()
    }

    pub fn set_executor(&self, executor: Arc<TmxExecutor>) {
        *self.inner.executor.write() = Some(executor);
    }

    pub fn thread_gate(&self) -> &Gate {
        &self.inner.thread_gate
    }

    pub fn publish_gate(&self) -> &Gate {
        &self.inner.publish_gate
    }

    pub fn receive_gate(&self) -> &Gate {
        &self.inner.receive_gate
    }
}

impl std::fmt::Debug for BrokerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerContext")
            .field("id", &self.inner.id)
            .field("scheme", &self.inner.scheme)
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish()
    }
}
