//! GPSD broker client. The daemon speaks JSON over TCP; the watch mask is
//! derived from the scheme: `gpsd` watches the JSON reports, `nmea` the
//! raw NMEA pass-through, `gnss` the raw binary stream. Inbound data is
//! forwarded with a topic derived from its class: `gpsd/<CLASS>`,
//! `nmea/<talker-id>`, or `gnss/RTCM2|RTCM3|UBX|UNKNOWN`.

use crate::broker::{CallbackDescriptor, CallbackRegistry, TmxBrokerClient};
use crate::context::{BrokerContext, BrokerState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tmx_message::TmxMessage;
use tmx_value::{TmxError, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

pub const GPSD_PORT: u16 = 2947;

/// The `?WATCH` command for a scheme.
pub fn watch_command(scheme: &str) -> &'static str {
    match scheme {
        "nmea" => "?WATCH={\"enable\":true,\"nmea\":true}\n",
        "gnss" => "?WATCH={\"enable\":true,\"raw\":2}\n",
        _ => "?WATCH={\"enable\":true,\"json\":true}\n",
    }
}

/// Pull the `class` field out of a gpsd JSON report without a full parse.
fn json_class(line: &str) -> Option<&str> {
    let idx = line.find("\"class\":\"")?;
    let rest = &line[idx + 9..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

/// Topic for one line or chunk of gpsd output.
pub fn derive_topic(scheme: &str, data: &[u8]) -> String {
    match scheme {
        "nmea" => {
            let talker = std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.strip_prefix('$'))
                .filter(|s| s.len() >= 2)
                .map(|s| &s[..2])
                .unwrap_or("UNKNOWN");
            format!("nmea/{}", talker)
        }
        "gnss" => {
            let kind = match data {
                [0xD3, ..] => "RTCM3",
                [0x66, ..] => "RTCM2",
                [0xB5, 0x62, ..] => "UBX",
                _ => "UNKNOWN",
            };
            format!("gnss/{}", kind)
        }
        _ => {
            let class = std::str::from_utf8(data)
                .ok()
                .and_then(json_class)
                .unwrap_or("UNKNOWN");
            format!("gpsd/{}", class)
        }
    }
}

struct GpsdConn {
    writer: mpsc::UnboundedSender<Vec<u8>>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct GpsdShared {
    callbacks: CallbackRegistry,
    conns: Mutex<HashMap<String, GpsdConn>>,
}

impl GpsdShared {
    fn deliver(&self, ctx: &BrokerContext, data: Vec<u8>) {
        let scheme = ctx.scheme().to_string();
        let mut message = TmxMessage::new(derive_topic(&scheme, &data));
        message.source = format!("{}:{}", ctx.host(), ctx.port_or(GPSD_PORT));
        if scheme == "gpsd" {
            message.encoding = "json".to_string();
        }
        message.payload = data;
        message.stamp_now();
        self.callbacks.dispatch(ctx.id(), &message);
        ctx.receive_gate().notify_all();
    }
}

async fn gpsd_read_loop(
    shared: Arc<GpsdShared>,
    ctx: BrokerContext,
    mut stream: tokio::net::tcp::OwnedReadHalf,
) {
    let line_oriented = ctx.scheme() != "gnss";
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                ctx.set_state(BrokerState::Disconnected);
                ctx.post_error(TmxError::connection_reset("gpsd closed the stream"));
                return;
            }
            Ok(n) => {
                if line_oriented {
                    pending.extend_from_slice(&chunk[..n]);
                    while let Some(idx) = pending.iter().position(|b| *b == b'\n') {
                        let mut line: Vec<u8> = pending.drain(..=idx).collect();
                        line.pop();
                        if line.last() == Some(&b'\r') {
                            line.pop();
                        }
                        if !line.is_empty() {
                            shared.deliver(&ctx, line);
                        }
                    }
                } else {
                    shared.deliver(&ctx, chunk[..n].to_vec());
                }
            }
            Err(e) => {
                ctx.set_state(BrokerState::Disconnected);
                ctx.post_error(TmxError::new(
                    e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                    e.to_string(),
                ));
                return;
            }
        }
    }
}

pub struct GpsdBrokerClient {
    shared: Arc<GpsdShared>,
}

impl GpsdBrokerClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(GpsdShared::default()),
        }
    }
}

impl Default for GpsdBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TmxBrokerClient for GpsdBrokerClient {
    fn schemes(&self) -> &'static [&'static str] {
        &["gpsd", "gnss", "nmea"]
    }

    fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    fn initialize(&self, ctx: &BrokerContext) {
        if ctx.host().is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("gpsd context requires a host"),
            );
            return;
        }
        self.on_initialized(ctx, TmxError::none());
    }

    fn destroy(&self, ctx: &BrokerContext) {
        self.disconnect(ctx);
        self.shared.callbacks.remove_context(ctx.id());
        self.on_destroyed(ctx, TmxError::none());
    }

    fn connect(&self, ctx: &BrokerContext, params: &Value) {
        if ctx.state() == BrokerState::Uninitialized {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("gpsd context must be initialized before connect"),
            );
            return;
        }
        if ctx.is_connected() {
            self.on_connected(ctx, TmxError::none());
            return;
        }
        for key in params.keys() {
            ctx.set_param(key, params.get(key).clone());
        }
        let Some(executor) = ctx.executor() else {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("gpsd context has no executor"),
            );
            return;
        };

        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = format!("{}:{}", ctx.host(), ctx.port_or(GPSD_PORT));
        executor.spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    let (read_half, mut write_half) = stream.into_split();
                    // Writes (the watch command, further daemon commands)
                    // funnel through a channel so publish stays
                    // non-blocking.
                    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
                    let _ = tx.send(watch_command(ctx.scheme()).as_bytes().to_vec());

                    let write_ctx = ctx.clone();
                    let write_task = tokio::spawn(async move {
                        while let Some(bytes) = rx.recv().await {
                            if let Err(e) = write_half.write_all(&bytes).await {
                                write_ctx.post_error(TmxError::new(
                                    e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                                    e.to_string(),
                                ));
                                return;
                            }
                        }
                    });
                    let read_task = tokio::spawn(gpsd_read_loop(
                        shared.clone(),
                        ctx.clone(),
                        read_half,
                    ));

                    shared.conns.lock().insert(
                        ctx.id().to_string(),
                        GpsdConn {
                            writer: tx,
                            tasks: vec![read_task, write_task],
                        },
                    );
                    debug!("gpsd context {} watching {}", ctx.id(), addr);
                    ctx.set_state(BrokerState::Connected);
                    ctx.post_error(TmxError::none());
                }
                Err(e) => {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(TmxError::new(
                        e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                        e.to_string(),
                    ));
                }
            }
        });
    }

    fn disconnect(&self, ctx: &BrokerContext) {
        let conn = self.shared.conns.lock().remove(ctx.id());
        if let Some(conn) = conn {
            for task in conn.tasks {
                task.abort();
            }
            drop(conn.writer);
            ctx.post_error(TmxError::aborted("gpsd stream cancelled by disconnect"));
        }
        self.on_disconnected(ctx, TmxError::none());
    }

    fn subscribe(&self, ctx: &BrokerContext, topic: &str, descriptor: CallbackDescriptor) {
        self.shared.callbacks.register(ctx.id(), topic, descriptor);
        self.on_subscribed(ctx, topic, TmxError::none());
    }

    fn unsubscribe(&self, ctx: &BrokerContext, topic: &str, descriptor_id: &str) {
        self.shared
            .callbacks
            .unregister(ctx.id(), topic, descriptor_id);
        self.on_unsubscribed(ctx, topic, TmxError::none());
    }

    /// Writes raw daemon commands (for example a `?POLL;`).
    fn publish(&self, ctx: &BrokerContext, message: TmxMessage) {
        let conns = self.shared.conns.lock();
        let result = match conns.get(ctx.id()) {
            Some(conn) => conn
                .writer
                .send(message.payload.clone())
                .map_err(|_| TmxError::not_connected("gpsd writer is gone")),
            None => Err(TmxError::not_connected(format!(
                "context {} is not connected",
                ctx.id()
            ))),
        };
        drop(conns);
        self.on_published(ctx, result.err().unwrap_or_else(TmxError::none));
    }

    fn broker_info(&self, ctx: &BrokerContext) -> Value {
        let mut info = Value::map();
        info.insert("scheme", ctx.scheme());
        info.insert("host", ctx.host());
        info.insert("port", ctx.port_or(GPSD_PORT) as u64);
        info.insert("watch", watch_command(ctx.scheme()).trim());
        info.insert("state", Value::from_enum(ctx.state()));
        info
    }
}
