//! TCP Server
//!
//! Line-protocol listener: one tokio task per connection, sharing one
//! [`Bank`] and one [`SessionRegistry`].

pub mod handler;
pub mod protocol;
pub mod roles;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::bank::Bank;
use crate::config::ServerConfig;
use crate::session::SessionRegistry;

pub use handler::{Connection, Flow, handle_connection};
pub use protocol::{Command, Reply};

/// Everything a connection task needs
pub struct ServerContext {
    pub bank: Arc<Bank>,
    pub sessions: Arc<SessionRegistry>,
}

impl ServerContext {
    pub fn new(bank: Bank, max_sessions: usize) -> Self {
        Self {
            bank: Arc::new(bank),
            sessions: Arc::new(SessionRegistry::new(max_sessions)),
        }
    }
}

/// Accept connections on `listener` forever
pub async fn serve(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            info!(%peer, "Client connected");
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!(%peer, error = %e, "Connection ended with I/O error");
            }
            info!(%peer, "Client disconnected");
        });
    }
}

/// Bind the configured address and serve
pub async fn run(config: &ServerConfig, ctx: Arc<ServerContext>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🚀 Bank server listening on {}", addr);
    serve(listener, ctx).await;
    Ok(())
}
