use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder as PrometheusEncoder, Registry, TextEncoder};
use sniproxy_config::Config;
use sniproxy_core::metrics::SessionMetrics;
use sniproxy_core::qpack::{Encoder, EncoderConfig, HeaderField};
use sniproxy_core::quic::{FakeSink, FakeTransport};
use sniproxy_core::quic::{Flusher, HeapBufferPool, InlineExecutor, ManualScheduler, QuicSession, SessionExecutor};
use std::error::Error;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub async fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    // Initialize logging
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("sniproxy=debug".parse()?),
        )
        .with_target(false)
        .json()
        .init();

    // Load configuration
    let config = Config::from_file(config_path)?;

    // Create shutdown channel for coordinating graceful shutdown
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    // Set up metrics with proper cleanup
    let (_registry, session_metrics, metrics_handle) = if config.metrics.enabled {
        let registry = Registry::new();
        let session_metrics = SessionMetrics::new(&registry)?;
        let metrics_addr: SocketAddr = config.metrics.address.parse()?;
        let metrics_listener = TcpListener::bind(metrics_addr).await?;
        info!("Metrics server listening on {}", metrics_addr);

        let registry_clone = registry.clone();
        let mut shutdown_rx_clone = shutdown_rx.resubscribe();

        // Spawn metrics server with shutdown coordination
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Check for shutdown signal
                    _ = shutdown_rx_clone.recv() => {
                        info!("Metrics server shutting down");
                        break;
                    }
                    // Accept connections
                    result = metrics_listener.accept() => {
                        if let Ok((stream, _)) = result {
                            let registry = registry_clone.clone();
                            let io = TokioIo::new(stream);

                            tokio::spawn(async move {
                                let service = hyper::service::service_fn(
                                    move |req: Request<hyper::body::Incoming>| {
                                        let registry = registry.clone();
                                        async move {
                                            match req.uri().path() {
                                                "/metrics" => {
                                                    // Serve Prometheus metrics
                                                    let encoder = TextEncoder::new();
                                                    let metric_families = registry.gather();
                                                    let mut buffer = vec![];
                                                    encoder.encode(&metric_families, &mut buffer).map_err(
                                                        |e| format!("Metrics encoding error: {}", e),
                                                    )?;
                                                    Ok::<_, String>(Response::new(Full::new(
                                                        bytes::Bytes::from(buffer),
                                                    )))
                                                }
                                                "/health" => {
                                                    // Health check endpoint
                                                    let health_response =
                                                        r#"{"status":"healthy","service":"sniproxy"}"#;
                                                    Ok::<_, String>(Response::new(Full::new(
                                                        bytes::Bytes::from(health_response),
                                                    )))
                                                }
                                                "/" => {
                                                    // Root endpoint - show available endpoints
                                                    let index_response =
                                                        r#"{"endpoints":["/health","/metrics"]}"#;
                                                    Ok::<_, String>(Response::new(Full::new(
                                                        bytes::Bytes::from(index_response),
                                                    )))
                                                }
                                                _ => {
                                                    // 404 for unknown paths
                                                    let not_found = r#"{"error":"not_found"}"#;
                                                    Ok::<_, String>(Response::new(Full::new(
                                                        bytes::Bytes::from(not_found),
                                                    )))
                                                }
                                            }
                                        }
                                    },
                                );

                                if let Err(err) = http1::Builder::new().serve_connection(io, service).await
                                {
                                    warn!("Metrics server connection error: {}", err);
                                }
                            });
                        }
                    }
                }
            }
        });

        (Some(registry), Some(session_metrics), Some(handle))
    } else {
        (None, None, None)
    };

    // Drive the demo session registry (the real UDP accept loop, TLS/ALPN
    // handshake, and backend proxying are out of scope for this workspace).
    run_demo(&config, session_metrics.as_ref());

    // Signal shutdown to metrics server
    let _ = shutdown_tx.send(());

    // Wait for metrics server to finish
    if let Some(handle) = metrics_handle {
        info!("Waiting for metrics server to shut down");
        let _ = handle.await;
    }

    Ok(())
}

/// Builds an `Http3Config`-seeded QPACK encoder and a `QuicSession` registry
/// keyed by connection id, then feeds a handful of synthetic datagrams
/// through `FakeTransport` to demonstrate the session/flusher/encoder wiring
/// end-to-end. A real deployment would instead own a UDP socket, an
/// accept/ALPN-handshake loop handing off to `QuicSession::new`, and a
/// `ConnectionFactory` per supported protocol — all out of scope here.
pub fn run_demo(config: &Config, metrics: Option<&SessionMetrics>) -> dashmap::DashMap<u64, QuicSession<FakeTransport>> {
    let encoder = Encoder::new(EncoderConfig::from(&config.http3));
    let sessions: dashmap::DashMap<u64, QuicSession<FakeTransport>> = dashmap::DashMap::new();

    let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4433);
    let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 55123);

    for connection_id in 0..2u64 {
        let mut transport = FakeTransport::new();
        transport.established = true;
        transport.alpn = Some("h3".to_string());
        transport.queue_cipher_out(b"demo-flight");

        let sink = Arc::new(FakeSink::new());
        let flusher = Flusher::new(Arc::new(HeapBufferPool), Arc::new(ManualScheduler::new()));
        let session = QuicSession::new(
            connection_id,
            remote,
            local,
            transport,
            sink.clone(),
            Arc::new(InlineExecutor) as Arc<dyn SessionExecutor>,
            flusher,
            &config.quic,
            Vec::new(),
        );

        if let Err(e) = session.on_ingress(remote, b"synthetic-client-datagram") {
            warn!(connection_id, error = %e, "demo session failed to process ingress");
        } else {
            info!(connection_id, flights_sent = sink.sent().len(), "demo session drained a flight");
        }

        sessions.insert(connection_id, session);
    }

    let fields = [HeaderField::new("x-demo", Some("value")).expect("ascii header name")];
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&mut buf, 0, &fields) {
        warn!(error = %e, "demo header encode failed");
    }

    if let Some(metrics) = metrics {
        metrics.set_dynamic_table_size(encoder.dynamic_table_size());
        metrics.set_blocked_streams(encoder.blocked_streams());
        metrics.set_active_sessions(sessions.len());
    }

    sessions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_demo_populates_one_session_per_connection_id() {
        let config = Config::default();
        let sessions = run_demo(&config, None);
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains_key(&0));
        assert!(sessions.contains_key(&1));
    }
}
