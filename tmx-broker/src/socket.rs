//! Async TCP/UDP socket bridge. `tcp` and `udp` connect out; `tcp-d` and
//! `udp-d` bind as servers. Inbound frames are bounded by the configurable
//! `message-break` delimiter; without one, TCP delivers whatever arrives
//! (at least one byte) and UDP delivers whole datagrams up to 64 KiB.

use crate::broker::{CallbackDescriptor, CallbackRegistry, TmxBrokerClient};
use crate::context::{BrokerContext, BrokerState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tmx_message::TmxMessage;
use tmx_value::{codes, TmxError, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const UDP_DATAGRAM_MAX: usize = 65535;

enum SocketConn {
    Stream {
        writer: mpsc::UnboundedSender<Vec<u8>>,
        tasks: Vec<JoinHandle<()>>,
    },
    Datagram {
        socket: Arc<UdpSocket>,
        peer: Arc<Mutex<Option<SocketAddr>>>,
        tasks: Vec<JoinHandle<()>>,
    },
    Server {
        writers: Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
        tasks: Vec<JoinHandle<()>>,
    },
}

#[derive(Default)]
struct SocketShared {
    callbacks: CallbackRegistry,
    conns: Mutex<HashMap<String, SocketConn>>,
}

impl SocketShared {
    fn deliver(&self, ctx: &BrokerContext, payload: Vec<u8>, source: String) {
        let mut message = TmxMessage::new(inbound_topic(ctx));
        message.source = source;
        message.payload = payload;
        message.stamp_now();
        self.callbacks.dispatch(ctx.id(), &message);
        ctx.receive_gate().notify_all();
    }

    /// Surface a read-side failure. A reset peer or closed stream moves
    /// the context to disconnected; cancellation stays quiet.
    fn read_failed(&self, ctx: &BrokerContext, error: TmxError) {
        warn!("socket context {} read failed: {}", ctx.id(), error);
        ctx.set_state(BrokerState::Disconnected);
        ctx.post_error(error);
    }
}

fn inbound_topic(ctx: &BrokerContext) -> String {
    if !ctx.path().is_empty() {
        ctx.path().to_string()
    } else {
        ctx.scheme().to_string()
    }
}

fn message_break(ctx: &BrokerContext) -> Option<Vec<u8>> {
    let value = ctx.param("message-break");
    if value.is_null() {
        return None;
    }
    let text = value.to_text();
    if text.is_empty() {
        None
    } else {
        Some(text.into_bytes())
    }
}

fn endpoint(ctx: &BrokerContext) -> String {
    format!("{}:{}", ctx.host(), ctx.port_or(0))
}

fn io_error(e: &std::io::Error) -> TmxError {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset => {
            TmxError::connection_reset(e.to_string())
        }
        std::io::ErrorKind::TimedOut => TmxError::timed_out(e.to_string()),
        _ => TmxError::new(e.raw_os_error().unwrap_or(codes::EIO), e.to_string()),
    }
}

/// Split an accumulation buffer on the delimiter, delivering every
/// complete frame and retaining the tail.
fn drain_frames(
    buffer: &mut Vec<u8>,
    delimiter: &[u8],
    mut deliver: impl FnMut(Vec<u8>),
) {
    loop {
        let found = buffer
            .windows(delimiter.len())
            .position(|window| window == delimiter);
        match found {
            Some(idx) => {
                let mut frame: Vec<u8> = buffer.drain(..idx + delimiter.len()).collect();
                frame.truncate(idx);
                if !frame.is_empty() {
                    deliver(frame);
                }
            }
            None => break,
        }
    }
}

async fn stream_read_loop(
    shared: Arc<SocketShared>,
    ctx: BrokerContext,
    mut reader: tokio::net::tcp::OwnedReadHalf,
    delimiter: Option<Vec<u8>>,
    source: String,
) {
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                shared.read_failed(
                    &ctx,
                    TmxError::connection_reset("peer closed the connection"),
                );
                return;
            }
            Ok(n) => match &delimiter {
                Some(delim) => {
                    pending.extend_from_slice(&chunk[..n]);
                    drain_frames(&mut pending, delim, |frame| {
                        shared.deliver(&ctx, frame, source.clone());
                    });
                }
                None => shared.deliver(&ctx, chunk[..n].to_vec(), source.clone()),
            },
            Err(e) => {
                shared.read_failed(&ctx, io_error(&e));
                return;
            }
        }
    }
}

async fn stream_write_loop(
    ctx: BrokerContext,
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            ctx.post_error(io_error(&e));
            return;
        }
        ctx.publish_gate().notify_all();
    }
}

pub struct AsyncSocketBridge {
    shared: Arc<SocketShared>,
}

impl AsyncSocketBridge {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SocketShared::default()),
        }
    }

    fn connect_stream(&self, ctx: &BrokerContext) {
        let Some(executor) = ctx.executor() else {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("socket context has no executor"),
            );
            return;
        };
        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = endpoint(&ctx);
        executor.spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    let source = stream
                        .peer_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_else(|_| addr.clone());
                    let (reader, writer) = stream.into_split();
                    let (tx, rx) = mpsc::unbounded_channel();
                    let delimiter = message_break(&ctx);

                    let read_task = tokio::spawn(stream_read_loop(
                        shared.clone(),
                        ctx.clone(),
                        reader,
                        delimiter,
                        source,
                    ));
                    let write_task =
                        tokio::spawn(stream_write_loop(ctx.clone(), writer, rx));

                    shared.conns.lock().insert(
                        ctx.id().to_string(),
                        SocketConn::Stream {
                            writer: tx,
                            tasks: vec![read_task, write_task],
                        },
                    );
                    debug!("socket context {} connected to {}", ctx.id(), addr);
                    ctx.set_state(BrokerState::Connected);
                    ctx.post_error(TmxError::none());
                }
                Err(e) => {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(io_error(&e));
                }
            }
        });
    }

    fn connect_stream_server(&self, ctx: &BrokerContext) {
        let Some(executor) = ctx.executor() else {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("socket context has no executor"),
            );
            return;
        };
        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = endpoint(&ctx);
        executor.spawn(async move {
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    let writers: Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>> =
                        Arc::new(Mutex::new(Vec::new()));
                    let accept_writers = writers.clone();
                    let accept_shared = shared.clone();
                    let accept_ctx = ctx.clone();
                    let accept_task = tokio::spawn(async move {
                        loop {
                            match listener.accept().await {
                                Ok((stream, peer)) => {
                                    let (reader, writer) = stream.into_split();
                                    let (tx, rx) = mpsc::unbounded_channel();
                                    accept_writers.lock().push(tx);
                                    tokio::spawn(stream_read_loop(
                                        accept_shared.clone(),
                                        accept_ctx.clone(),
                                        reader,
                                        message_break(&accept_ctx),
                                        peer.to_string(),
                                    ));
                                    tokio::spawn(stream_write_loop(
                                        accept_ctx.clone(),
                                        writer,
                                        rx,
                                    ));
                                }
                                Err(e) => {
                                    accept_ctx.post_error(io_error(&e));
                                    return;
                                }
                            }
                        }
                    });

                    shared.conns.lock().insert(
                        ctx.id().to_string(),
                        SocketConn::Server {
                            writers,
                            tasks: vec![accept_task],
                        },
                    );
                    // A bound server socket counts as connected.
                    debug!("socket context {} listening on {}", ctx.id(), addr);
                    ctx.set_state(BrokerState::Connected);
                    ctx.post_error(TmxError::none());
                }
                Err(e) => {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(io_error(&e));
                }
            }
        });
    }

    fn connect_datagram(&self, ctx: &BrokerContext, server: bool) {
        let Some(executor) = ctx.executor() else {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("socket context has no executor"),
            );
            return;
        };
        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = endpoint(&ctx);
        executor.spawn(async move {
            let bound = if server {
                UdpSocket::bind(&addr).await
            } else {
                UdpSocket::bind("0.0.0.0:0").await
            };
            let socket = match bound {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(io_error(&e));
                    return;
                }
            };
            if !server {
                if let Err(e) = socket.connect(&addr).await {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(io_error(&e));
                    return;
                }
            }

            let peer = Arc::new(Mutex::new(None));
            let recv_socket = socket.clone();
            let recv_peer = peer.clone();
            let recv_shared = shared.clone();
            let recv_ctx = ctx.clone();
            let recv_task = tokio::spawn(async move {
                let mut buf = vec![0u8; UDP_DATAGRAM_MAX];
                loop {
                    match recv_socket.recv_from(&mut buf).await {
                        Ok((n, from)) => {
                            *recv_peer.lock() = Some(from);
                            recv_shared.deliver(
                                &recv_ctx,
                                buf[..n].to_vec(),
                                from.to_string(),
                            );
                        }
                        Err(e) => {
                            recv_shared.read_failed(&recv_ctx, io_error(&e));
                            return;
                        }
                    }
                }
            });

            shared.conns.lock().insert(
                ctx.id().to_string(),
                SocketConn::Datagram {
                    socket,
                    peer,
                    tasks: vec![recv_task],
                },
            );
            debug!("socket context {} datagram ready on {}", ctx.id(), addr);
            ctx.set_state(BrokerState::Connected);
            ctx.post_error(TmxError::none());
        });
    }
}

impl Default for AsyncSocketBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TmxBrokerClient for AsyncSocketBridge {
    fn schemes(&self) -> &'static [&'static str] {
        &["tcp", "udp", "tcp-d", "udp-d"]
    }

    fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    fn initialize(&self, ctx: &BrokerContext) {
        if ctx.host().is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("socket context requires a host"),
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
                TmxError::invalid_argument("socket context must be initialized before connect"),
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
        match ctx.scheme() {
            "tcp" => self.connect_stream(ctx),
            "tcp-d" => self.connect_stream_server(ctx),
            "udp" => self.connect_datagram(ctx, false),
            "udp-d" => self.connect_datagram(ctx, true),
            other => self.on_connected(
                ctx,
                TmxError::not_supported(format!("unknown socket scheme {}", other)),
            ),
        }
    }

    /// Cancels outstanding reads by aborting the socket tasks; in-flight
    /// work observes OperationAborted. A second call in disconnected is a
    /// successful no-op.
    fn disconnect(&self, ctx: &BrokerContext) {
        let conn = self.shared.conns.lock().remove(ctx.id());
        if let Some(conn) = conn {
            let tasks = match conn {
                SocketConn::Stream { tasks, .. } => tasks,
                SocketConn::Datagram { tasks, .. } => tasks,
                SocketConn::Server { tasks, .. } => tasks,
            };
            for task in tasks {
                task.abort();
            }
            ctx.post_error(TmxError::aborted("socket reads cancelled by disconnect"));
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

    fn publish(&self, ctx: &BrokerContext, message: TmxMessage) {
        let mut bytes = message.payload.clone();
        if let Some(delim) = message_break(ctx) {
            bytes.extend_from_slice(&delim);
        }

        let conns = self.shared.conns.lock();
        let result = match conns.get(ctx.id()) {
            Some(SocketConn::Stream { writer, .. }) => writer
                .send(bytes)
                .map_err(|_| TmxError::not_connected("socket writer is gone")),
            Some(SocketConn::Datagram { socket, peer, .. }) => {
                if ctx.scheme() == "udp-d" {
                    match *peer.lock() {
                        Some(addr) => socket
                            .try_send_to(&bytes, addr)
                            .map(|_| ())
                            .map_err(|e| io_error(&e)),
                        None => Err(TmxError::not_connected("no datagram peer seen yet")),
                    }
                } else {
                    socket.try_send(&bytes).map(|_| ()).map_err(|e| io_error(&e))
                }
            }
            Some(SocketConn::Server { writers, .. }) => {
                let writers = writers.lock();
                for writer in writers.iter() {
                    let _ = writer.send(bytes.clone());
                }
                Ok(())
            }
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
        info.insert("port", ctx.port_or(0) as u64);
        info.insert("state", Value::from_enum(ctx.state()));
        if let Some(delim) = message_break(ctx) {
            info.insert("message-break", String::from_utf8_lossy(&delim).into_owned());
        }
        info
    }
}
