//! Bridge host binary. Spawned by a controller process; announces its port
//! on stdout and serves exactly one connection.

use plugbridge_host::HostServer;
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    // Logs go to stderr; stdout carries only the PORT= line the controller
    // scrapes.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "host exiting with error");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> plugbridge::Result<()> {
    let server = HostServer::bind()?;
    server.announce()?;
    server.run()
}
