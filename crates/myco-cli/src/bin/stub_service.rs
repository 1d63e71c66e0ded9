//! Stand-in service for exercising the harness end to end.
//!
//! Binds a TCP port, prints a readiness marker and then accepts and drops
//! connections until killed. Flags make it misbehave in the ways a real
//! service can: never becoming ready, or exiting during startup.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "myco-stub-service")]
struct Args {
    /// Port to listen on
    #[arg(long)]
    port: u16,

    /// Marker printed once the listener is bound, followed by the address
    #[arg(long, default_value = "Stub listening on")]
    marker: String,

    /// Bind the port but never print the marker
    #[arg(long)]
    silent: bool,

    /// Exit with this code right after starting, before binding
    #[arg(long)]
    exit_code: Option<i32>,

    /// Delay before binding, in milliseconds
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Free-form tag so tests can find this process by command line
    #[arg(long)]
    tag: Option<String>,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    println!("stub service starting (tag: {})", args.tag.as_deref().unwrap_or("-"));
    eprintln!("stub diagnostics on stderr");

    if let Some(code) = args.exit_code {
        std::process::exit(code);
    }

    tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;

    let listener = TcpListener::bind(("127.0.0.1", args.port)).await?;
    let addr = listener.local_addr()?;

    if !args.silent {
        println!("{} {addr}", args.marker);
    }

    loop {
        let (socket, peer) = listener.accept().await?;
        println!("connection from {peer}");
        drop(socket);
    }
}
