//! Shared Counter Client
//!
//! An interactive client that creates and shares counters held by a
//! counter store. Every handle the client holds lives in a numbered slot.
//!
//! USAGE:
//!   counter-client [OPTIONS] [OPERATION]
//!
//! EXAMPLES:
//!   counter-client                          # Interactive mode
//!   counter-client "list"                   # Print every live object
//!   counter-client --key s3cret             # Non-default key
//!   counter-client --host 192.168.1.1       # Connect to remote store

mod common;

use clap::Parser;
use common::*;
use objbroker::store::GETVALUE;
use objbroker::{Handle, Manager};
use objwire::{AuthKey, Value};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

type BoxError = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
#[command(name = "counter-client")]
#[command(version)]
#[command(about = "Shared counter client - creates, shares and releases counters")]
#[command(
    long_about = "A client that connects to a counter store and works with shared counters.\n\n\
If no operation is provided, enters interactive mode.\n\n\
COMMANDS:\n\
  new [start]        Create a counter\n\
  inc <slot> [by]    Increment a counter\n\
  dec <slot> [by]    Decrement a counter\n\
  get <slot>         Read a counter\n\
  spawn <slot>       Create a counter starting at this one's value\n\
  clone <slot>       Take another reference to the same object\n\
  box <slot>         Store the handle inside a new hosted value\n\
  unbox <slot>       Take the handles back out of a hosted value\n\
  release <slot>     Release a handle\n\
  slots              Show the handles this client holds\n\
  list               Show every object in the store\n\
  count              Number of reference counted objects\n\
  shutdown           Stop the store\n\
  help               Show help\n\
  quit/exit          Release everything and exit"
)]
struct Args {
    /// Host address to connect to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port number to connect to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Authentication key shared with the store
    #[arg(long, default_value = DEFAULT_KEY)]
    key: String,

    /// Operation to perform (e.g., "new 5")
    #[arg(value_name = "OPERATION")]
    operation: Option<String>,

    /// Quiet mode - suppress informational output
    #[arg(short, long)]
    quiet: bool,
}

/// Handles held by this client, by slot number
struct Session {
    manager: Manager,
    slots: BTreeMap<usize, Handle>,
    next_slot: usize,
    quiet: bool,
}

impl Session {
    fn new(manager: Manager, quiet: bool) -> Self {
        Self {
            manager,
            slots: BTreeMap::new(),
            next_slot: 1,
            quiet,
        }
    }

    fn hold(&mut self, handle: Handle) -> usize {
        let slot = self.next_slot;
        self.next_slot += 1;
        if self.quiet {
            println!("{}", slot);
        } else {
            println!("[{}] {} {}", slot, handle.type_id(), handle.object_id());
        }
        self.slots.insert(slot, handle);
        slot
    }

    fn slot(&self, slot: usize) -> Result<&Handle, BoxError> {
        self.slots
            .get(&slot)
            .ok_or_else(|| format!("no handle in slot {}", slot).into())
    }

    fn show(&self, label: &str, value: &Value) {
        if self.quiet {
            println!("{:?}", value);
        } else {
            println!("{} = {:?}", label, value);
        }
    }

    async fn execute(&mut self, command: &str, args: &[i64]) -> Result<(), BoxError> {
        let slot = |i: usize| -> Result<usize, BoxError> {
            args.get(i)
                .map(|&s| s as usize)
                .ok_or_else(|| format!("'{}' needs a slot number", command).into())
        };

        match command {
            "new" => {
                let start = args.first().copied().unwrap_or(0);
                let handle = self.manager.create(COUNTER_TYPE, vec![Value::Int(start)]).await?;
                self.hold(handle);
            }
            "inc" | "increment" | "dec" | "decrement" => {
                let s = slot(0)?;
                let by = args.get(1).copied().unwrap_or(1);
                let method = if command.starts_with("inc") { "increment" } else { "decrement" };
                let value = self.slot(s)?.call_value(method, vec![Value::Int(by)]).await?;
                self.show(&format!("[{}]", s), &value);
            }
            "get" => {
                let s = slot(0)?;
                let value = self.slot(s)?.call_value(GETVALUE, vec![]).await?;
                self.show(&format!("[{}]", s), &value);
            }
            "spawn" => {
                let s = slot(0)?;
                let handle = self.slot(s)?.call_handle("spawn", vec![]).await?;
                self.hold(handle);
            }
            "clone" => {
                let s = slot(0)?;
                let handle = self.slot(s)?.try_clone().await?;
                self.hold(handle);
            }
            "box" => {
                let s = slot(0)?;
                let inner = self.slot(s)?.to_value().await?;
                let handle = self.manager.create(VALUE_TYPE, vec![Value::List(vec![inner])]).await?;
                self.hold(handle);
            }
            "unbox" => {
                let s = slot(0)?;
                let (value, handles) = self.slot(s)?.call(GETVALUE, vec![]).await?.into_parts()?;
                self.show(&format!("[{}]", s), &value);
                for handle in handles {
                    self.hold(handle);
                }
            }
            "release" => {
                let s = slot(0)?;
                let handle = self
                    .slots
                    .remove(&s)
                    .ok_or_else(|| format!("no handle in slot {}", s))?;
                handle.release().await?;
                if !self.quiet {
                    println!("[{}] released", s);
                }
            }
            "slots" => {
                for (s, handle) in &self.slots {
                    println!("[{}] {}", s, handle);
                }
            }
            "list" => {
                let snapshot = self.manager.introspect().await?;
                println!("{} object(s) at {}", snapshot.len(), snapshot.address);
                for info in &snapshot.objects {
                    let count = info
                        .refcount
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {:<18} {:<8} refs={:<3} resident={:<5} {}",
                        info.object_id, info.type_id, count, info.resident, info.description
                    );
                }
            }
            "count" => {
                let count = self.manager.number_of_objects().await?;
                self.show("objects", &Value::from(count));
            }
            "shutdown" => {
                self.manager.shutdown().await?;
                if !self.quiet {
                    println!("Store shutting down");
                }
            }
            _ => return Err(format!("unknown command: {}", command).into()),
        }
        Ok(())
    }

    /// Release every held handle
    async fn close(mut self) {
        for (slot, handle) in std::mem::take(&mut self.slots) {
            if let Err(e) = handle.release().await {
                eprintln!("Failed to release slot {}: {}", slot, e);
            }
        }
    }
}

/// Split "inc 2 5" into a command and its integer arguments
fn parse_operation(input: &str) -> Option<(String, Vec<i64>)> {
    let mut parts = input.split_whitespace();
    let command = parts.next()?.to_lowercase();
    let args = parts.map(|p| p.parse::<i64>().ok()).collect::<Option<Vec<_>>>()?;
    Some((command, args))
}

fn print_help() {
    println!("Available commands:");
    println!("  new [start]        Create a counter");
    println!("  inc <slot> [by]    Increment a counter");
    println!("  dec <slot> [by]    Decrement a counter");
    println!("  get <slot>         Read a counter");
    println!("  spawn <slot>       Create a counter starting at this one's value");
    println!("  clone <slot>       Take another reference to the same object");
    println!("  box <slot>         Store the handle inside a new hosted value");
    println!("  unbox <slot>       Take the handles back out of a hosted value");
    println!("  release <slot>     Release a handle");
    println!("  slots              Show the handles this client holds");
    println!("  list               Show every object in the store");
    println!("  count              Number of reference counted objects");
    println!("  shutdown           Stop the store");
    println!("  help               Show this help");
    println!("  quit/exit          Release everything and exit");
}

async fn run_interactive(session: &mut Session) -> Result<(), BoxError> {
    if !session.quiet {
        println!("========================================================");
        println!("         Shared Counter Client - Interactive Mode");
        println!("========================================================");
        println!("  Type 'help' for available commands");
        println!("  Type 'quit' or 'exit' to disconnect");
        println!("========================================================");
        println!();
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        let bytes_read = stdin.lock().read_line(&mut line)?;

        // EOF (Ctrl+D)
        if bytes_read == 0 {
            println!();
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            if !session.quiet {
                println!("Goodbye!");
            }
            break;
        }

        if line.eq_ignore_ascii_case("help") {
            print_help();
            continue;
        }

        match parse_operation(line) {
            Some((command, args)) => {
                if let Err(e) = session.execute(&command, &args).await {
                    eprintln!("Error: {}", e);
                }
                if command == "shutdown" {
                    break;
                }
            }
            None => {
                eprintln!("Invalid command. Format: <command> [numbers...]");
                eprintln!("Example: inc 1 5");
                eprintln!("Type 'help' for available commands.");
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    // Initialize tracing (unless quiet mode)
    if !args.quiet {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::WARN)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    if !args.quiet {
        println!("Connecting to counter store at {}...", addr);
    }

    let manager = Manager::connect(addr, AuthKey::from(args.key.as_str())).await?;

    if !args.quiet {
        println!("Connected!");
        println!();
    }

    let mut session = Session::new(manager, args.quiet);

    // If operation provided, execute it; otherwise enter interactive mode
    let result = if let Some(operation) = args.operation {
        match parse_operation(&operation) {
            Some((command, op_args)) => session.execute(&command, &op_args).await,
            None => {
                eprintln!("Invalid operation format. Expected: <command> [numbers...]");
                eprintln!("Example: new 5");
                std::process::exit(1);
            }
        }
    } else {
        run_interactive(&mut session).await
    };

    session.close().await;
    result
}
