//! Connection pipe: accept loop, upstream dial, and the two per-direction
//! pump tasks.
//!
//! The server-to-client direction is always pure passthrough; only the
//! client-to-server direction is parsed and potentially rewritten. Whichever
//! direction reaches EOF (or errors) first tears down the other half of the
//! connection — there is no independent half-close support.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use proxy_metrics::{CounterStore, SharedDecisionSink};
use proxy_policy::PolicyEngine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::controller::RewriteController;
use crate::error::ProxyError;

const READ_CHUNK: usize = 65536;

/// Bind the client-facing listener and spawn one connection-handling task
/// per accepted socket until `shutdown` fires.
pub async fn run_proxy(
    config: Arc<ProxyConfig>,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    let addr = config.listen_socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: addr.clone(),
            source,
        })?;
    serve(listener, config, engine, counters, decisions, shutdown).await
}

/// Run the accept loop against an already-bound listener.
///
/// Split out from [`run_proxy`] so callers that need the bound address up
/// front (tests binding an ephemeral port) can grab it from the `TcpListener`
/// before handing it off here.
pub async fn serve(
    listener: TcpListener,
    config: Arc<ProxyConfig>,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    tracing::info!(
        addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        upstream = %config.upstream_socket_addr(),
        enforcement = ?config.enforcement_mode,
        "proxy listening"
    );

    let mut conn_seq: u64 = 0;
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(?err, "failed to accept connection");
                        continue;
                    }
                };
                conn_seq += 1;
                let conn_id = format!("conn-{conn_seq}");
                tracing::info!(%conn_id, %peer, "client connected");

                let config = Arc::clone(&config);
                let engine = engine.clone();
                let counters = Arc::clone(&counters);
                let decisions = decisions.clone();
                tokio::spawn(handle_client(socket, config, engine, counters, decisions, conn_id));
            }
        }
    }
    Ok(())
}

async fn handle_client(
    client: TcpStream,
    config: Arc<ProxyConfig>,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    conn_id: String,
) {
    let upstream_addr = config.upstream_socket_addr();
    let upstream = match TcpStream::connect(&upstream_addr).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::error!(%conn_id, %upstream_addr, ?err, "failed to connect upstream");
            return;
        }
    };
    let _ = client.set_nodelay(true);
    let _ = upstream.set_nodelay(true);

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let c2s_bytes = Arc::new(AtomicU64::new(0));
    let s2c_bytes = Arc::new(AtomicU64::new(0));

    let mut c2s = tokio::spawn(pump_client_to_server(
        client_read,
        upstream_write,
        config,
        engine,
        Arc::clone(&counters),
        decisions,
        conn_id.clone(),
        Arc::clone(&c2s_bytes),
    ));
    let mut s2c = tokio::spawn(pump_passthrough(
        upstream_read,
        client_write,
        Arc::clone(&counters),
        conn_id.clone(),
        Arc::clone(&s2c_bytes),
    ));

    tokio::select! {
        res = &mut c2s => {
            if let Err(err) = res {
                tracing::debug!(%conn_id, ?err, "c2s pump join error");
            }
            s2c.abort();
        }
        res = &mut s2c => {
            if let Err(err) = res {
                tracing::debug!(%conn_id, ?err, "s2c pump join error");
            }
            c2s.abort();
        }
    }
    let _ = tokio::join!(c2s, s2c);

    tracing::info!(
        %conn_id,
        c2s_bytes = c2s_bytes.load(Ordering::Relaxed),
        s2c_bytes = s2c_bytes.load(Ordering::Relaxed),
        "connection closed"
    );
}

async fn pump_client_to_server(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    config: Arc<ProxyConfig>,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    conn_id: String,
    total_bytes: Arc<AtomicU64>,
) {
    if !config.enable_tds_parser {
        // Structured parsing disabled: either the heuristic sniff path or a
        // bare passthrough, depending on configuration.
        if config.enable_sql_text_sniff {
            pump_with_sniff(reader, writer, engine, counters, decisions, config, conn_id, total_bytes).await;
        } else {
            pump_loop(&mut reader, &mut writer, &counters, &conn_id, &total_bytes).await;
        }
        return;
    }

    let mut controller = RewriteController::new(
        Arc::clone(&config),
        engine,
        Arc::clone(&counters),
        decisions,
        conn_id.clone(),
    );

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let start = Instant::now();
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(%conn_id, ?err, "client read error");
                break;
            }
        };
        counters.observe_bytes(n as u64);
        let out = controller.process_chunk(&buf[..n]).await;
        if out.is_empty() {
            counters.observe_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
            continue;
        }
        if let Err(err) = writer.write_all(&out).await {
            tracing::debug!(%conn_id, ?err, "upstream write error");
            break;
        }
        total_bytes.fetch_add(out.len() as u64, Ordering::Relaxed);
        counters.observe_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
    }
}

/// Heuristic fallback path (§4.9): no TDS framing at all, just a best-effort
/// latin-1 decode of each raw read, evaluated against the same policy engine
/// when the read looks like a DML statement. Mutually exclusive with the
/// structured parser per connection.
const SNIFF_KEYWORDS: [&str; 4] = ["insert ", "update ", "delete ", "select "];

async fn pump_with_sniff(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    engine: Option<Arc<PolicyEngine>>,
    counters: Arc<CounterStore>,
    decisions: SharedDecisionSink,
    config: Arc<ProxyConfig>,
    conn_id: String,
    total_bytes: Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let start = Instant::now();
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(%conn_id, ?err, "client read error");
                break;
            }
        };
        let data = &buf[..n];
        counters.observe_bytes(n as u64);

        let mut close_connection = false;
        if let Some(engine) = &engine {
            let text: String = data.iter().map(|&b| b as char).collect();
            let lower = text.to_lowercase();
            if SNIFF_KEYWORDS.iter().any(|k| lower.contains(k)) {
                let event = proxy_policy::Event {
                    sql_text: Some(text.clone()),
                    ..proxy_policy::Event::default()
                };
                let decision = engine.decide(&event);
                decisions
                    .append(
                        proxy_metrics::DecisionRecord::new(decision.action.label())
                            .with_rule(decision.rule_id.clone(), decision.reason.clone()),
                    )
                    .await;
                match decision.action {
                    proxy_policy::RuleAction::Block => {
                        counters.inc(proxy_metrics::counters::keys::BLOCKS, 1);
                        tracing::warn!(%conn_id, reason = %decision.reason, "blocked by rule");
                        close_connection = config.enforcement_mode.is_enforce();
                    }
                    proxy_policy::RuleAction::Autocorrect => {
                        counters.inc(proxy_metrics::counters::keys::AUTOCORRECT_SUGGESTED, 1);
                    }
                    proxy_policy::RuleAction::Allow => {
                        counters.inc(proxy_metrics::counters::keys::ALLOWED, 1);
                    }
                }
            }
        }

        if close_connection {
            break;
        }

        if let Err(err) = writer.write_all(data).await {
            tracing::debug!(%conn_id, ?err, "upstream write error");
            break;
        }
        total_bytes.fetch_add(n as u64, Ordering::Relaxed);
        counters.observe_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
    }
}

async fn pump_passthrough(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    counters: Arc<CounterStore>,
    conn_id: String,
    total_bytes: Arc<AtomicU64>,
) {
    pump_loop(&mut reader, &mut writer, &counters, &conn_id, &total_bytes).await;
}

/// Copy bytes from `reader` to `writer` unchanged until EOF or an I/O error,
/// recording the byte-size and per-iteration latency histograms along the way.
async fn pump_loop(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    counters: &Arc<CounterStore>,
    conn_id: &str,
    total_bytes: &Arc<AtomicU64>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let start = Instant::now();
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(%conn_id, ?err, "read error");
                break;
            }
        };
        counters.observe_bytes(n as u64);
        if let Err(err) = writer.write_all(&buf[..n]).await {
            tracing::debug!(%conn_id, ?err, "write error");
            break;
        }
        total_bytes.fetch_add(n as u64, Ordering::Relaxed);
        counters.observe_latency_ms(start.elapsed().as_secs_f64() * 1000.0);
    }
}
