//! Streamable HTTP transport.
//!
//! rmcp's client transport handles the POST/stream mechanics and tells
//! responses from pushes by their correlating id; pushes surface through the
//! client handler. rmcp keeps the service alive when the server's event
//! stream drops, so a keepalive task pings the server and reports a failed
//! delivery as a lost transport.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{ClientRequest, PingRequest};
use rmcp::service::{Peer, RoleClient};
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::{ServiceError, ServiceExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::{Link, McpService, Transport, header_map};
use crate::config::ServerConfig;
use crate::error::McpResult;
use crate::handler::PeriscopeClientHandler;

/// Keepalive task of a streamable HTTP connection. Dropping aborts it.
#[derive(Debug)]
pub(crate) struct HttpTransport {
    keepalive: JoinHandle<()>,
}

impl HttpTransport {
    pub(super) async fn release(mut self) {
        self.keepalive.abort();
        let _ = (&mut self.keepalive).await;
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

pub(super) async fn connect(
    config: &ServerConfig,
    keepalive: Duration,
    handler: PeriscopeClientHandler,
    link: &Arc<Link>,
) -> McpResult<(McpService, Transport)> {
    let url = config
        .parsed_url()
        .map_err(|e| link.connect_error(e.to_string()))?;
    let headers = header_map(&config.headers).map_err(|e| link.connect_error(e))?;
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| link.connect_error(format!("failed to build HTTP client: {e}")))?;

    let transport = StreamableHttpClientTransport::with_client(
        client,
        StreamableHttpClientTransportConfig::with_uri(url.as_str()),
    );
    let service = handler
        .serve(transport)
        .await
        .map_err(|e| link.connect_error(format!("handshake with {url} failed: {e}")))?;

    let keepalive = tokio::spawn(watch_liveness(
        service.peer().clone(),
        Arc::clone(link),
        keepalive,
    ));

    info!(server = %link.server_id(), url = %url, "Connected over streamable HTTP");
    Ok((service, Transport::StreamableHttp(HttpTransport { keepalive })))
}

/// Ping the server every `interval` until the link is cancelled.
///
/// A ping the transport cannot deliver, or a service that has stopped,
/// means the server is gone. A server that answers the ping with an error is
/// still reachable.
async fn watch_liveness(peer: Peer<RoleClient>, link: Arc<Link>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = link.cancelled() => return,
            _ = ticker.tick() => {},
        }

        if peer.is_transport_closed() {
            link.transport_lost("MCP service stopped");
            return;
        }

        let ping = peer.send_request(ClientRequest::PingRequest(PingRequest::default()));
        match tokio::time::timeout(interval, ping).await {
            Ok(Ok(_)) => trace!(server = %link.server_id(), "Keepalive ping answered"),
            Ok(Err(ServiceError::TransportClosed)) => {
                link.transport_lost("transport closed");
                return;
            },
            Ok(Err(ServiceError::TransportSend(e))) => {
                link.transport_lost(&format!("server unreachable: {e}"));
                return;
            },
            Ok(Err(e)) => debug!(server = %link.server_id(), error = %e, "Keepalive ping rejected"),
            Err(_) => debug!(server = %link.server_id(), "Keepalive ping timed out"),
        }
    }
}
