use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::bridge::BridgeCore;
use crate::config::WebConfig;

pub mod health;
pub mod metrics;

#[derive(Clone)]
pub struct WebState {
    pub bridge: Arc<BridgeCore>,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> Option<&'static WebState> {
    WEB_STATE.get()
}

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health::health_check))
        .push(Router::with_path("metrics").get(metrics::metrics_endpoint))
}

pub struct WebServer {
    bind_addr: String,
}

impl WebServer {
    pub fn new(config: &WebConfig, bridge: Arc<BridgeCore>) -> Self {
        let _ = WEB_STATE.set(WebState { bridge });

        Self {
            bind_addr: format!("{}:{}", config.bind_address, config.port),
        }
    }

    pub async fn start(&self) -> Result<()> {
        info!("starting web server on {}", self.bind_addr);

        let acceptor = TcpListener::new(self.bind_addr.clone()).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
