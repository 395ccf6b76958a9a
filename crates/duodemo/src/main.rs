//! Runs a server and a client in one process, linked over loopback TCP.
//!
//! The server publishes a `Tally`. The client looks it up, adds to it, then
//! subscribes a local `Watcher`. While the server is still inside the
//! synchronized `subscribe`, it calls the watcher, and the watcher calls back
//! into the tally on the same logical caller.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use anyhow::Context;
use anyhow::Result;
use duorun::ConnectionBuilder;
use duorun::Failure;
use duorun::MethodSignature;
use duorun::ParamType;
use duorun::Proxy;
use duorun::RemoteObject;
use duorun::StreamTransport;
use duorun::Value;
use duorun::context::current_context;
use duorun::context::with_new_context;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::info;

fn add() -> MethodSignature {
    MethodSignature::new("add").param(ParamType::Int)
}

fn total() -> MethodSignature {
    MethodSignature::new("total")
}

fn subscribe() -> MethodSignature {
    MethodSignature::new("subscribe").param(ParamType::Interface("Watcher".into()))
}

fn changed() -> MethodSignature {
    MethodSignature::new("changed").param(ParamType::Int)
}

/// Server-side running total.
#[derive(Default)]
struct Tally {
    total: AtomicI64,
}

#[async_trait::async_trait]
impl RemoteObject for Tally {
    fn capabilities(&self) -> Vec<String> {
        vec!["Tally".into()]
    }

    fn is_synchronized(&self, method: &MethodSignature) -> bool {
        method.name() != "total"
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        match (method.name(), args.first()) {
            ("add", Some(Value::Int(n))) => Ok(Value::Int(self.total.fetch_add(*n, Ordering::SeqCst) + n)),
            ("total", None) => Ok(Value::Int(self.total.load(Ordering::SeqCst))),
            ("subscribe", Some(Value::Object(watcher))) => {
                let current = self.total.load(Ordering::SeqCst);
                info!(context = ?current_context(), current, "tally notifying watcher");
                watcher.invoke(&changed(), vec![Value::Int(current)]).await
            }
            _ => Err(Failure::no_such_method(method)),
        }
    }
}

/// Client-side watcher that tops the tally up whenever it is told about it.
struct Watcher {
    tally: Arc<Proxy>,
    log: Mutex<Vec<i64>>,
}

#[async_trait::async_trait]
impl RemoteObject for Watcher {
    fn capabilities(&self) -> Vec<String> {
        vec!["Watcher".into()]
    }

    async fn invoke(&self, method: &MethodSignature, args: Vec<Value>) -> Result<Value, Failure> {
        let Some(seen) = args.first().and_then(Value::as_int) else {
            return Err(Failure::no_such_method(method));
        };
        self.log.lock().unwrap_or_else(|e| e.into_inner()).push(seen);
        info!(context = ?current_context(), seen, "watcher called back");
        // Re-enters the tally, whose monitor this logical caller already holds.
        self.tally.invoke(&add(), vec![Value::Int(1)]).await
    }
}

async fn serve(listener: TcpListener) -> Result<duorun::Connection> {
    let (stream, peer) = listener.accept().await.context("accepting client")?;
    info!(%peer, "client connected");
    let conn = ConnectionBuilder::new()
        .name("server")
        .bidirectional(true)
        .build(StreamTransport::tcp(stream));
    conn.publish("tally", Arc::new(Tally::default()));
    Ok(conn)
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let listener = TcpListener::bind("127.0.0.1:0").await.context("binding loopback")?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(serve(listener));

    let stream = TcpStream::connect(addr).await.context("connecting to server")?;
    let client = ConnectionBuilder::new()
        .name("client")
        .bidirectional(true)
        .build(StreamTransport::tcp(stream));
    let server = server.await??;

    let tally = client
        .lookup("tally")
        .await?
        .context("server did not publish a tally")?;

    let after = tally.call(&add(), vec![Value::Int(41)]).await?;
    info!(?after, "added remotely");

    let watcher = Arc::new(Watcher {
        tally: tally.clone(),
        log: Mutex::new(Vec::new()),
    });
    let outcome = with_new_context(async {
        info!(context = ?current_context(), "subscribing watcher");
        tally.call(&subscribe(), vec![Value::Object(watcher.clone())]).await
    })
    .await?;
    info!(?outcome, "subscribe returned");

    let total = tally.call(&total(), vec![]).await?;
    info!(?total, seen = ?watcher.log.lock().unwrap_or_else(|e| e.into_inner()), "final state");

    client.close().await;
    while !server.is_closed() {
        tokio::task::yield_now().await;
    }
    info!("done");
    Ok(())
}
