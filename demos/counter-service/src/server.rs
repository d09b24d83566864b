//! Shared Counter Store
//!
//! Hosts `Counter` objects that any number of clients can create, share
//! and release. A counter's `spawn` method returns a fresh counter that
//! starts at the parent's current value.
//!
//! USAGE:
//!   counter-server [OPTIONS]
//!
//! EXAMPLES:
//!   counter-server                          # Start with default settings
//!   counter-server --port 8000              # Custom port
//!   counter-server --key s3cret --pinned    # Custom key, pinned residency

mod common;

use clap::Parser;
use common::*;
use objbroker::{
    Args as CallArgs, MethodTable, ObjectError, ObjectStoreServer, Registry, Reply, ResidencyPolicy,
    SharedRef, TableObject, TypeEntry,
};
use objwire::{AuthKey, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "counter-server")]
#[command(version)]
#[command(about = "Shared counter store - hosts counters for any number of clients")]
struct Args {
    /// Host address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port number to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Authentication key clients must present
    #[arg(long, default_value = DEFAULT_KEY)]
    key: String,

    /// Keep objects referenced from inside the store alive until unpinned
    #[arg(long)]
    pinned: bool,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = 1024)]
    max_connections: usize,
}

struct Counter {
    value: AtomicI64,
}

fn step(args: &CallArgs) -> Result<i64, ObjectError> {
    if args.positional.is_empty() {
        Ok(1)
    } else {
        args.int(0)
    }
}

fn add(counter: &Counter, args: &CallArgs, sign: i64) -> Result<Reply, ObjectError> {
    let by = step(args)? * sign;
    let value = counter.value.fetch_add(by, Ordering::SeqCst) + by;
    println!("[COUNTER] {:+} = {}", by, value);
    Ok(Reply::value(value))
}

fn counter_table() -> Arc<MethodTable<Counter>> {
    Arc::new(
        MethodTable::new()
            .method("get", |counter: Arc<Counter>, _ctx, _args| async move {
                Ok(Reply::value(counter.value.load(Ordering::SeqCst)))
            })
            .method("increment", |counter: Arc<Counter>, _ctx, args: CallArgs| async move {
                add(&counter, &args, 1)
            })
            .method("decrement", |counter: Arc<Counter>, _ctx, args: CallArgs| async move {
                add(&counter, &args, -1)
            })
            .method("spawn", |counter: Arc<Counter>, _ctx, _args| async move {
                Ok(Reply::value(counter.value.load(Ordering::SeqCst)))
            }),
    )
}

fn new_counter(table: &Arc<MethodTable<Counter>>, args: &CallArgs) -> Result<SharedRef, ObjectError> {
    let start = if args.positional.is_empty() { 0 } else { args.int(0)? };
    println!("[COUNTER] new counter starting at {}", start);
    Ok(TableObject::new(
        Counter {
            value: AtomicI64::new(start),
        },
        Arc::clone(table),
    )
    .with_value(|c| Value::Int(c.value.load(Ordering::SeqCst)))
    .with_label("Counter")
    .into_shared())
}

fn create_registry() -> objbroker::Result<Registry> {
    let table = counter_table();
    Registry::new()
        .with(
            TypeEntry::new(COUNTER_TYPE)
                .constructor(move |args| new_counter(&table, &args))
                .exposed(["get", "increment", "decrement"])
                .redirect("spawn", COUNTER_TYPE)
                .handle_kind(COUNTER_KIND),
        )?
        .with(TypeEntry::new(VALUE_TYPE))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let residency = if args.pinned {
        ResidencyPolicy::Pinned
    } else {
        ResidencyPolicy::Counted
    };

    let server = ObjectStoreServer::builder(Arc::new(create_registry()?))
        .bind_addr(addr)
        .auth_key(AuthKey::from(args.key.as_str()))
        .max_connections(args.max_connections)
        .residency(residency)
        .bind()
        .await?;

    println!("========================================================");
    println!("         Shared Counter Store");
    println!("========================================================");
    println!("  Listening: {}", server.local_addr());
    println!("  Residency: {:?}", residency);
    println!("========================================================");
    println!("  Types:");
    println!("    {:<8} - get, increment, decrement, spawn", COUNTER_TYPE);
    println!("    {:<8} - hosts any value, handles included", VALUE_TYPE);
    println!("========================================================");
    println!("  Stop with 'shutdown' from a client");
    println!("========================================================");
    println!();

    let stats = Arc::clone(server.stats());
    info!("Starting counter store on {}", server.local_addr());
    server.run().await?;

    let stats = stats.snapshot();
    info!(
        "Store stopped: {} connections, {} requests ({} failed)",
        stats.connections_accepted, stats.requests_processed, stats.requests_failed
    );
    Ok(())
}
