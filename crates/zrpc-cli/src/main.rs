//! # zrpc CLI Entry Point
//!
//! Runs the pieces of a zrpc deployment for demos and manual testing.
//!
//! ## Usage
//!
//! ```bash
//! # Start the registry
//! zrpc registry -b 127.0.0.1:9999
//!
//! # Start a demo server (repeat for more instances)
//! zrpc server -r http://127.0.0.1:9999/registry
//!
//! # Call Arith.Sum through the registry
//! zrpc call 1 2
//! zrpc call -m ConsistentHash 3 4
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use argh::FromArgs;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use zrpc_client::XClient;
use zrpc_common::Options;
use zrpc_registry::Registry;
use zrpc_server::{Server, Service};

/// zrpc - a small RPC runtime
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

/// Available CLI subcommands.
#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Registry(RegistryArgs),
    Server(ServerArgs),
    Call(CallArgs),
}

/// start the service registry
#[derive(FromArgs)]
#[argh(subcommand, name = "registry")]
struct RegistryArgs {
    /// address to bind the registry to
    #[argh(option, short = 'b', default = "\"127.0.0.1:9999\".into()")]
    bind: String,
}

/// start a demo rpc server hosting the Arith service
#[derive(FromArgs)]
#[argh(subcommand, name = "server")]
struct ServerArgs {
    /// registry URL to heartbeat to
    #[argh(option, short = 'r', default = "\"http://127.0.0.1:9999/registry\".into()")]
    registry: String,

    /// address to bind the server to (port 0 picks a free one)
    #[argh(option, short = 'b', default = "\"127.0.0.1:0\".into()")]
    bind: String,
}

/// call Arith.Sum through the registry
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
struct CallArgs {
    /// registry URL to discover through
    #[argh(option, short = 'r', default = "\"http://127.0.0.1:9999/registry\".into()")]
    registry: String,

    /// selection strategy name
    #[argh(option, short = 'm', default = "\"RoundRobin\".into()")]
    mode: String,

    /// left operand
    #[argh(positional)]
    a: i64,

    /// right operand
    #[argh(positional)]
    b: i64,
}

#[derive(Serialize, Deserialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

struct Arith;

/// The demo service: `Sum` adds, `Sleep` adds slowly (for exercising
/// timeouts by hand).
fn arith_service() -> zrpc_common::Result<Service> {
    Ok(Service::builder(Arith)?
        .method("Sum", |_arith: &Arith, args: SumArgs| Ok(args.a + args.b))
        .method("Sleep", |_arith: &Arith, args: SumArgs| {
            std::thread::sleep(Duration::from_secs(2));
            Ok(args.a + args.b)
        })
        .build())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli: Cli = argh::from_env();
    match cli.command {
        Commands::Registry(args) => run_registry(args).await,
        Commands::Server(args) => run_server(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_registry(args: RegistryArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.bind).await?;
    let registry = Arc::new(Registry::new());
    zrpc_registry::http::serve(registry, listener).await?;
    Ok(())
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let listener = TcpListener::bind(&args.bind).await?;
    let self_addr = format!("tcp@{}", listener.local_addr()?);
    let server = Arc::new(Server::new(args.registry, self_addr));
    server.register(arith_service()?)?;
    server.listen(listener, None).await;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let xc = XClient::new(args.registry, args.mode, Options::default(), None);
    let sum: i64 = xc
        .call(
            "Arith.Sum",
            &SumArgs { a: args.a, b: args.b },
            Some(Duration::from_secs(5)),
        )
        .await?;
    println!("{} + {} = {}", args.a, args.b, sum);
    xc.close().await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}
