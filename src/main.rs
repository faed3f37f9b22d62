//! Echo server built on `wirecall`.
//!
//! Serves an `Echo` service whose `echo` method returns the request code,
//! optionally publishing its address to a registry.

mod cli;

use std::sync::Arc;

use bincode::{Decode, Encode};
use clap::Parser;
use log::warn;
use wirecall::{RpcService, Server, config::ServerOptions, service::ServiceError};

#[derive(Debug, Encode, Decode)]
struct EchoRequest {
    code: i32,
}

#[derive(Debug, Encode, Decode)]
struct EchoResponse {
    code: i32,
}

fn echo_service() -> Result<RpcService, ServiceError> {
    RpcService::new("Echo").typed_method("echo", |req: EchoRequest| {
        Some(EchoResponse { code: req.code })
    })
}

fn options(cli: &cli::Cli) -> ServerOptions {
    let mut options = ServerOptions::default();
    options.fairness.frames_per_yield = cli.frames_per_yield;
    if let Some(max) = cli.max_pending_bytes {
        options.transport.max_pending_bytes = max;
    }
    options
}

#[tokio::main]
async fn main() -> wirecall::Result<()> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let mut server = Server::new();
    server.set_options(options(&cli));
    server.register_service(Arc::new(echo_service()?))?;
    server.listen(&cli.listen)?;
    if let Some(registry) = &cli.registry
        && let Err(e) = server.register_to(registry)
    {
        warn!("continuing without registration: registry_url={registry}, error={e}");
    }

    server.run().await;
    Ok(())
}
