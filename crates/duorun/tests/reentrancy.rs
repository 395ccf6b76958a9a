//! Callbacks into a blocked caller, nested waits, monitors and listener order.

mod common;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use duorun::ChannelTransport;
use duorun::ConnectionBuilder;
use duorun::ContextId;
use duorun::Coordinator;
use duorun::Failure;
use duorun::InvocationListener;
use duorun::MethodSignature;
use duorun::ObjectRef;
use duorun::ParamType;
use duorun::Proxy;
use duorun::RemoteObject;
use duorun::Value;
use duorun::context::current_context;
use duorun::context::with_new_context;

use common::*;

// --- Test 1: Callback Runs on the Blocked Caller ---

#[tokio::test]
async fn callback_runs_on_the_waiting_context() {
    let p = peers();
    p.b.publish("counter", Counter::new());
    let counter = p.a.lookup("counter").await.unwrap().unwrap();
    let callback = Callback::new(p.coord_a.clone());

    let (caller, result) = within(with_new_context(async {
        let caller = current_context();
        let result = counter.call(&notify(), vec![Value::Object(callback.clone())]).await;
        (caller, result)
    }))
    .await;

    assert_eq!(result, Ok(Value::Int(0)));
    let seen = callback.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].context, caller);
    assert_eq!(seen[0].depth, 1);
    assert!(!p.coord_a.is_waiting(caller.unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_get_their_own_callbacks() {
    let p = peers();
    p.b.publish("counter", Counter::new());
    let counter = p.a.lookup("counter").await.unwrap().unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            let callback = Callback::new(p.coord_a.clone());
            tokio::spawn(with_new_context(async move {
                let caller = current_context();
                counter.call(&notify(), vec![Value::Object(callback.clone())]).await.unwrap();
                (caller, callback.seen())
            }))
        })
        .collect();

    for task in tasks {
        let (caller, seen) = within(task).await.unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].context, caller);
    }
}

// --- Test 2: Nested Depth ---

fn bounce() -> MethodSignature {
    MethodSignature::new("bounce")
        .param(ParamType::Interface("Pinger".into()))
        .param(ParamType::Int)
}

fn ping() -> MethodSignature {
    MethodSignature::new("ping").param(ParamType::Int)
}

/// Lives on B. Calls straight back into the pinger it is handed.
struct Bouncer;

#[async_trait::async_trait]
impl RemoteObject for Bouncer {
    fn capabilities(&self) -> Vec<String> {
        vec!["Bouncer".into()]
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        let mut args = args.into_iter();
        match (method.name(), args.next(), args.next()) {
            ("bounce", Some(Value::Object(pinger)), Some(n)) => pinger.invoke(&ping(), vec![n]).await,
            _ => Err(Failure::no_such_method(method)),
        }
    }
}

/// Lives on A. Records where it runs and bounces again while `n > 0`.
struct Pinger {
    me: Weak<Pinger>,
    coordinator: Arc<Coordinator>,
    bouncer: Arc<Proxy>,
    seen: Mutex<Vec<(Option<ContextId>, usize)>>,
}

#[async_trait::async_trait]
impl RemoteObject for Pinger {
    fn capabilities(&self) -> Vec<String> {
        vec!["Pinger".into()]
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        let n = args.first().and_then(Value::as_int).ok_or_else(|| Failure::no_such_method(method))?;
        let ctx = current_context();
        let depth = ctx.map(|ctx| self.coordinator.depth(ctx)).unwrap_or(0);
        self.seen.lock().unwrap().push((ctx, depth));
        if n == 0 {
            return Ok(Value::Int(0));
        }
        let me: Arc<dyn RemoteObject> = self.me.upgrade().ok_or_else(|| Failure::internal("pinger dropped"))?;
        self.bouncer.invoke(&bounce(), vec![Value::Object(me), Value::Int(n - 1)]).await
    }
}

#[tokio::test]
async fn nested_callbacks_stack_on_one_context() {
    let p = peers();
    p.b.publish("bouncer", Arc::new(Bouncer));
    let bouncer = p.a.lookup("bouncer").await.unwrap().unwrap();
    let pinger = Arc::new_cyclic(|me| Pinger {
        me: me.clone(),
        coordinator: p.coord_a.clone(),
        bouncer: bouncer.clone(),
        seen: Mutex::new(Vec::new()),
    });

    let caller = within(with_new_context(async {
        let caller = current_context();
        let result = bouncer.call(&bounce(), vec![Value::Object(pinger.clone()), Value::Int(2)]).await;
        assert_eq!(result, Ok(Value::Int(0)));
        caller
    }))
    .await;

    // A -> B -> A -> B -> A -> B -> A: three pings, all on the caller's context.
    let seen = pinger.seen.lock().unwrap().clone();
    assert_eq!(seen, vec![(caller, 1), (caller, 2), (caller, 3)]);
    assert_eq!(p.coord_a.depth(caller.unwrap()), 0);

    // The pinger was exported once however many times it crossed.
    assert_eq!(p.a.registry().len(), 1);
    drop(pinger);
}

// --- Test 3: Reentrant Monitor ---

#[tokio::test]
async fn synchronized_callback_chain_does_not_deadlock() {
    let p = peers();
    let target = Counter::new();
    p.b.publish("counter", target.clone());
    let counter = p.a.lookup("counter").await.unwrap().unwrap();

    // notify (synchronized) -> changed on A -> add (synchronized) on the same counter.
    let callback = Callback::new(p.coord_a.clone());
    callback.arm(counter.clone());

    let result = within(counter.call(&notify(), vec![Value::Object(callback.clone())])).await;
    assert_eq!(result, Ok(Value::Int(1)));
    assert_eq!(target.value(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monitor_excludes_unrelated_callers() {
    let p = peers();
    let target = Counter::new();
    p.b.publish("counter", target.clone());
    let counter = p.a.lookup("counter").await.unwrap().unwrap();

    let callbacks: Vec<_> = (0..4)
        .map(|_| {
            let callback = Callback::new(p.coord_a.clone());
            callback.arm(counter.clone());
            callback
        })
        .collect();

    let tasks: Vec<_> = callbacks
        .iter()
        .map(|callback| {
            let counter = counter.clone();
            let callback: Arc<dyn RemoteObject> = callback.clone();
            tokio::spawn(async move { counter.call(&notify(), vec![Value::Object(callback)]).await })
        })
        .collect();
    for task in tasks {
        assert!(within(task).await.unwrap().is_ok());
    }

    // Each notify saw the value left by the previous chain.
    let mut values: Vec<i64> = callbacks.iter().map(|c| c.seen()[0].value).collect();
    values.sort();
    assert_eq!(values, vec![0, 1, 2, 3]);
    assert_eq!(target.value(), 4);
}

// --- Test 4: Listener Ordering ---

#[derive(Clone, Default)]
struct OrderLog {
    events: Arc<Mutex<Vec<(&'static str, i64)>>>,
    targets: Arc<Mutex<Vec<usize>>>,
}

impl InvocationListener for OrderLog {
    type Token = i64;

    fn before_invocation(
        &self,
        target: &ObjectRef,
        _target_id: u64,
        _method: &MethodSignature,
        args: &[Value],
    ) -> i64 {
        let token = args.first().and_then(Value::as_int).unwrap_or(-1);
        self.events.lock().unwrap().push(("before", token));
        self.targets.lock().unwrap().push(Arc::as_ptr(target) as *const () as usize);
        token
    }

    fn after_invocation(&self, token: i64, _outcome: Result<&Value, &Failure>) {
        self.events.lock().unwrap().push(("after", token));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listener_sees_synchronized_calls_in_order() {
    let log = OrderLog::default();
    let p = peers_with(ConnectionBuilder::new(), ConnectionBuilder::new().listener(log.clone()));
    let target = Counter::with_delay(Duration::from_millis(2));
    p.b.publish("counter", target.clone());
    let counter = p.a.lookup("counter").await.unwrap().unwrap();

    let tasks: Vec<_> = (1..=16)
        .map(|n| {
            let counter = counter.clone();
            tokio::spawn(async move { counter.call(&add(), vec![Value::Int(n)]).await })
        })
        .collect();
    for task in tasks {
        assert!(within(task).await.unwrap().is_ok());
    }

    let events = log.events.lock().unwrap().clone();
    assert_eq!(events.len(), 32);
    for pair in events.chunks(2) {
        assert_eq!(pair[0].0, "before");
        assert_eq!(pair[1], ("after", pair[0].1));
    }
    assert_eq!(target.value(), (1..=16).sum::<i64>());

    // Every hook was handed the exported counter itself.
    let counter_addr = Arc::as_ptr(&target) as *const () as usize;
    let targets = log.targets.lock().unwrap().clone();
    assert_eq!(targets.len(), 16);
    assert!(targets.iter().all(|addr| *addr == counter_addr));
}

// --- Test 5: Chains Through a Third Peer ---

fn go() -> MethodSignature {
    MethodSignature::new("go")
}

fn enter() -> MethodSignature {
    MethodSignature::new("enter").param(ParamType::Interface("Hop".into()))
}

fn touch() -> MethodSignature {
    MethodSignature::new("touch")
}

/// Lives on P1. Both methods are synchronized, so `touch` can only run while
/// `enter` waits if it lands on the context that holds the monitor.
#[derive(Default)]
struct Gate {
    contexts: Mutex<Vec<(&'static str, Option<ContextId>)>>,
}

#[async_trait::async_trait]
impl RemoteObject for Gate {
    fn capabilities(&self) -> Vec<String> {
        vec!["Gate".into()]
    }

    fn is_synchronized(&self, _method: &MethodSignature) -> bool {
        true
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        match (method.name(), args.into_iter().next()) {
            ("enter", Some(Value::Object(hop))) => {
                self.contexts.lock().unwrap().push(("enter", current_context()));
                hop.invoke(&go(), vec![]).await
            }
            ("touch", None) => {
                self.contexts.lock().unwrap().push(("touch", current_context()));
                Ok(Value::Int(7))
            }
            _ => Err(Failure::no_such_method(method)),
        }
    }
}

/// Forwards `go` to the next object in the chain, recording where it ran.
struct Hop {
    next: Arc<Proxy>,
    method: MethodSignature,
    ran_on: Mutex<Option<ContextId>>,
}

impl Hop {
    fn new(next: Arc<Proxy>, method: MethodSignature) -> Arc<Self> {
        Arc::new(Self {
            next,
            method,
            ran_on: Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl RemoteObject for Hop {
    fn capabilities(&self) -> Vec<String> {
        vec!["Hop".into()]
    }

    async fn invoke(&self, method: &MethodSignature, _args: Vec<Value>) -> Result<Value, Failure> {
        if !method.is("go", 0) {
            return Err(Failure::no_such_method(method));
        }
        *self.ran_on.lock().unwrap() = current_context();
        self.next.invoke(&self.method, vec![]).await
    }
}

fn link(
    left: &str,
    left_coord: &Arc<Coordinator>,
    right: &str,
    right_coord: &Arc<Coordinator>,
) -> (duorun::Connection, duorun::Connection) {
    let (l, r) = ChannelTransport::pair();
    let left = ConnectionBuilder::new()
        .name(left)
        .bidirectional(true)
        .coordinator(left_coord.clone())
        .build(l);
    let right = ConnectionBuilder::new()
        .name(right)
        .bidirectional(true)
        .coordinator(right_coord.clone())
        .build(r);
    (left, right)
}

#[tokio::test]
async fn callbacks_relayed_through_a_third_peer_reach_the_blocked_caller() {
    init_tracing();
    let (c1, c2, c3) = (
        Arc::new(Coordinator::new()),
        Arc::new(Coordinator::new()),
        Arc::new(Coordinator::new()),
    );
    // P2 sits in the middle with one connection to each side.
    let (p1_to_p2, p2_to_p1) = link("p1", &c1, "p2-left", &c2);
    let (p2_to_p3, p3_to_p2) = link("p2-right", &c2, "p3", &c3);

    let gate = Arc::new(Gate::default());
    p1_to_p2.publish("gate", gate.clone());
    let gate_proxy = p2_to_p1.lookup("gate").await.unwrap().unwrap();

    // hop3 on P2 calls gate.touch back on P1.
    let hop3 = Hop::new(gate_proxy.clone(), touch());
    p2_to_p3.publish("hop3", hop3.clone());
    let hop3_proxy = p3_to_p2.lookup("hop3").await.unwrap().unwrap();

    // hop2 on P3 calls hop3 on P2.
    let hop2 = Hop::new(hop3_proxy, go());
    p3_to_p2.publish("hop2", hop2.clone());
    let hop2_proxy = p2_to_p3.lookup("hop2").await.unwrap().unwrap();

    // hop1 on P2 calls hop2 on P3; it is handed to the gate on P1.
    let hop1 = Hop::new(hop2_proxy, go());

    let (caller, result) = within(with_new_context(async {
        let caller = current_context();
        let result = gate_proxy.call(&enter(), vec![Value::Object(hop1.clone())]).await;
        (caller, result)
    }))
    .await;
    assert_eq!(result, Ok(Value::Int(7)));

    // Both visits to P2 ran on the caller blocked in `enter`.
    assert_eq!(*hop1.ran_on.lock().unwrap(), caller);
    assert_eq!(*hop3.ran_on.lock().unwrap(), caller);

    // On P1, `touch` ran on the same context as the `enter` holding the monitor.
    let contexts = gate.contexts.lock().unwrap().clone();
    assert_eq!(contexts.len(), 2);
    assert_eq!(contexts[0].0, "enter");
    assert_eq!(contexts[1], ("touch", contexts[0].1));
}
