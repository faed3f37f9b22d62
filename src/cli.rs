//! Command line interface for the echo server binary.
//!
//! Kept free of crate imports so the build script can include it to render
//! the manual page.

use clap::Parser;

/// Command line arguments for the `wirecall` binary.
#[derive(Debug, Parser)]
#[command(name = "wirecall", version, about = "Echo RPC server")]
pub struct Cli {
    /// Address to accept connections on.
    #[arg(default_value = "tcp://127.0.0.1:48080")]
    pub listen: String,
    /// Registry to publish the listening address to, e.g. `file:///tmp/wirecall`.
    pub registry: Option<String>,
    /// Frames dispatched per read before yielding to other connections.
    #[arg(long, default_value_t = 256)]
    pub frames_per_yield: usize,
    /// Buffered bytes allowed per connection before it is closed.
    #[arg(long)]
    pub max_pending_bytes: Option<usize>,
}
