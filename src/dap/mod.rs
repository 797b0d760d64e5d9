//! Debug Adapter Protocol front end over stdin/stdout.

mod protocol;
mod server;

use std::io;

use crate::config::AdapterConfig;

pub use protocol::{encode_dap, DapMessage, DapMessageContent};
pub use server::DapServer;

/// Serve one DAP client on the standard streams until it disconnects.
pub fn run_dap_mode(config: AdapterConfig) -> io::Result<()> {
    let stdin = io::stdin();
    let mut server = DapServer::new(stdin.lock(), Box::new(io::stdout()), config);
    server.run()
}
