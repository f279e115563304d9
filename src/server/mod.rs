//! TCP Server for ArcProc
//!
//! Clients connect over TCP and send one JSON request per line (see
//! [`protocol`]). Every connection gets its own session; disconnecting tears
//! the session down, rolling back its open transaction and releasing its row
//! locks.

pub mod config;
pub mod protocol;

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::session::{Runtime, Session};

pub use config::{ServerConfig, ServerConfigFile, DEFAULT_PORT};
pub use protocol::{handle_request, Request, Response};

/// ArcProc TCP Server
pub struct Server {
    config: ServerConfig,
    runtime: Runtime,
}

impl Server {
    pub fn new(config: ServerConfig, runtime: Runtime) -> Self {
        Self { config, runtime }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Bind the configured address and serve until the task is cancelled
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        info!(address = %self.config.bind_address(), "ArcProc server listening");
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        loop {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let runtime = self.runtime.clone();
            tokio::spawn(async move {
                info!(peer = %peer, "client connected");
                if let Err(e) = handle_connection(stream, runtime).await {
                    error!(peer = %peer, error = %e, "connection error");
                }
                info!(peer = %peer, "client disconnected");
                drop(permit);
            });
        }
    }
}

/// Serve one client until it disconnects or sends `.quit`
async fn handle_connection(stream: TcpStream, runtime: Runtime) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut session = Some(runtime.connect_default());
    writer
        .write_all(b"{\"status\":\"success\",\"message\":\"ArcProc Server v0.1.0\"}\n")
        .await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ".quit" || line == ".exit" {
            writer.write_all(Response::success().to_line().as_bytes()).await?;
            break;
        }

        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(?request, "request");
                let Some(mut current) = session.take() else {
                    return Err(Error::Internal("connection lost its session".to_string()));
                };
                // Lock waits block, so requests run off the async workers
                let (current, response) = tokio::task::spawn_blocking(move || {
                    let response = handle_request(&mut current, request);
                    (current, response)
                })
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
                session = Some(current);
                response
            }
            Err(e) => Response::error(format!("Invalid request: {}", e)),
        };
        writer.write_all(response.to_line().as_bytes()).await?;
        writer.flush().await?;
    }

    if let Some(session) = session {
        close_session(session).await;
    }
    Ok(())
}

async fn close_session(mut session: Session) {
    let id = session.id();
    let closed = tokio::task::spawn_blocking(move || session.close()).await;
    match closed {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(session = id, error = %e, "session teardown incomplete"),
        Err(e) => warn!(session = id, error = %e, "session teardown task failed"),
    }
}
