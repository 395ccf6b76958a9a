//! Shared fixtures: linked peers, sample objects and polling helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use duorun::ChannelTransport;
use duorun::Connection;
use duorun::ConnectionBuilder;
use duorun::ContextId;
use duorun::Coordinator;
use duorun::Failure;
use duorun::MethodSignature;
use duorun::ObjectRef;
use duorun::ParamType;
use duorun::Proxy;
use duorun::RemoteObject;
use duorun::Value;
use duorun::context::current_context;

/// Routes runtime logs to the test harness. Honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Two connections linked in memory, each with its own coordinator so that
/// per-side wait depth can be observed.
pub struct Peers {
    pub a: Connection,
    pub b: Connection,
    pub coord_a: Arc<Coordinator>,
    pub coord_b: Arc<Coordinator>,
}

pub fn peers() -> Peers {
    peers_with(ConnectionBuilder::new(), ConnectionBuilder::new())
}

pub fn peers_with(a: ConnectionBuilder, b: ConnectionBuilder) -> Peers {
    init_tracing();
    let coord_a = Arc::new(Coordinator::new());
    let coord_b = Arc::new(Coordinator::new());
    let (ta, tb) = ChannelTransport::pair();
    let a = a.name("a").bidirectional(true).coordinator(coord_a.clone()).build(ta);
    let b = b.name("b").bidirectional(true).coordinator(coord_b.clone()).build(tb);
    Peers { a, b, coord_a, coord_b }
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Fails the test instead of hanging when a call deadlocks.
pub async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut).await.expect("call did not finish within 5s")
}

// ============================================================================
//  SIGNATURES
// ============================================================================

pub fn get() -> MethodSignature {
    MethodSignature::new("get")
}

pub fn add() -> MethodSignature {
    MethodSignature::new("add").param(ParamType::Int)
}

pub fn add_later() -> MethodSignature {
    MethodSignature::new("add").param(ParamType::Int).asynchronous()
}

pub fn fail() -> MethodSignature {
    MethodSignature::new("fail")
}

pub fn notify() -> MethodSignature {
    MethodSignature::new("notify").param(ParamType::Interface("Listener".into()))
}

pub fn child() -> MethodSignature {
    MethodSignature::new("child")
}

pub fn itself() -> MethodSignature {
    MethodSignature::new("itself")
}

pub fn same() -> MethodSignature {
    MethodSignature::new("same").param(ParamType::Interface("Counter".into()))
}

pub fn echo(ty: ParamType) -> MethodSignature {
    MethodSignature::new("echo").param(ty)
}

pub fn stall() -> MethodSignature {
    MethodSignature::new("stall")
}

pub fn changed() -> MethodSignature {
    MethodSignature::new("changed").param(ParamType::Int)
}

// ============================================================================
//  COUNTER
// ============================================================================

/// A counter whose `add` and `notify` are synchronized.
pub struct Counter {
    value: AtomicI64,
    delay: Duration,
    me: std::sync::Weak<Counter>,
}

impl Counter {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// A counter whose `add` yields for `delay` between reading and writing.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            value: AtomicI64::new(0),
            delay,
            me: me.clone(),
        })
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn as_object(self: &Arc<Self>) -> ObjectRef {
        self.clone()
    }
}

fn int_arg(args: &[Value], method: &MethodSignature) -> Result<i64, Failure> {
    args.first()
        .and_then(Value::as_int)
        .ok_or_else(|| Failure::internal(format!("{} expects an integer", method)))
}

#[async_trait::async_trait]
impl RemoteObject for Counter {
    fn capabilities(&self) -> Vec<String> {
        vec!["Counter".into()]
    }

    fn is_synchronized(&self, method: &MethodSignature) -> bool {
        matches!(method.name(), "add" | "notify")
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        match method.name() {
            "get" => Ok(Value::Int(self.value())),
            "add" => {
                let delta = int_arg(&args, method)?;
                // Read-yield-write: only correct if calls are serialized.
                let current = self.value.load(Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.value.store(current + delta, Ordering::SeqCst);
                Ok(Value::Int(current + delta))
            }
            "fail" => Err(Failure::application("CounterError", "refused")),
            "notify" => {
                let Some(Value::Object(listener)) = args.into_iter().next() else {
                    return Err(Failure::internal("notify expects a listener"));
                };
                listener.invoke(&changed(), vec![Value::Int(self.value())]).await
            }
            "child" => Ok(Value::Object(Counter::new())),
            "itself" => match self.me.upgrade() {
                Some(me) => Ok(Value::Object(me)),
                None => Err(Failure::internal("counter is being dropped")),
            },
            "same" => {
                let Some(Value::Object(other)) = args.first() else {
                    return Err(Failure::internal("same expects a counter"));
                };
                let other = Arc::as_ptr(other) as *const ();
                Ok(Value::Bool(std::ptr::eq(other, self as *const Self as *const ())))
            }
            "echo" => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            "stall" => {
                futures::future::pending::<()>().await;
                Ok(Value::Null)
            }
            _ => Err(Failure::no_such_method(method)),
        }
    }
}

// ============================================================================
//  CALLBACK
// ============================================================================

/// What a `Callback` observed while servicing `changed`.
#[derive(Clone, Debug, PartialEq)]
pub struct Seen {
    pub value: i64,
    pub context: Option<ContextId>,
    pub depth: usize,
}

/// A listener that records the context it is called on and, if armed, calls
/// back into a counter before returning.
pub struct Callback {
    coordinator: Arc<Coordinator>,
    counter: Mutex<Option<Arc<Proxy>>>,
    seen: Mutex<Vec<Seen>>,
}

impl Callback {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            counter: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Makes `changed` call `add(1)` on `counter` before returning.
    pub fn arm(&self, counter: Arc<Proxy>) {
        *self.counter.lock().unwrap() = Some(counter);
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteObject for Callback {
    fn capabilities(&self) -> Vec<String> {
        vec!["Listener".into()]
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        if !method.is("changed", 1) {
            return Err(Failure::no_such_method(method));
        }
        let value = int_arg(&args, method)?;
        let context = current_context();
        self.seen.lock().unwrap().push(Seen {
            value,
            context,
            depth: context.map(|ctx| self.coordinator.depth(ctx)).unwrap_or(0),
        });

        let counter = self.counter.lock().unwrap().clone();
        match counter {
            Some(counter) => counter.invoke(&add(), vec![Value::Int(1)]).await,
            None => Ok(Value::Int(value)),
        }
    }
}
