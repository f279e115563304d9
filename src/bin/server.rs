//! ArcProc - Server

use anyhow::Context;
use arcproc::server::{Server, ServerConfig, ServerConfigFile};
use arcproc::Runtime;
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut file = ServerConfigFile::default();
    let mut port = None;

    // Simple argument parsing
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                let value = args.get(i + 1).context("--port needs a value")?;
                port = Some(value.parse::<u16>().context("invalid port")?);
                i += 1;
            }
            "--config" | "-c" => {
                let path = args.get(i + 1).context("--config needs a file")?;
                file = ServerConfigFile::from_json_file(path)
                    .with_context(|| format!("loading {}", path))?;
                i += 1;
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let mut config: ServerConfig = file.server;
    if let Some(port) = port {
        config = config.port(port);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = Runtime::new(file.runtime);
    file.schema.apply(&runtime).context("loading schema")?;

    let server = Server::new(config, runtime);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }
    Ok(())
}
