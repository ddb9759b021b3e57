//! HTTP and NTRIP client over the TCP bridge. `connect` opens the stream;
//! `subscribe` writes an HTTP/1.1 GET with optional Basic authentication,
//! parses the status line and headers into the context's `headers`
//! property bag, and treats the remainder of the stream as the topic
//! payload. The `ntrip` scheme adds the Ntrip-GGA and Ntrip-Version
//! headers and defaults to the caster port.

use crate::broker::{CallbackDescriptor, CallbackRegistry, TmxBrokerClient};
use crate::context::{BrokerContext, BrokerState};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tmx_message::TmxMessage;
use tmx_value::{TmxError, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

pub const NTRIP_PORT: u16 = 2101;
pub const HTTP_PORT: u16 = 80;

struct HttpConn {
    stream: Option<TcpStream>,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct HttpShared {
    callbacks: CallbackRegistry,
    conns: Mutex<HashMap<String, HttpConn>>,
}

/// Build the request block. The header order is fixed so casters that
/// check headers line-by-line behave deterministically.
pub fn build_request(ctx: &BrokerContext) -> String {
    let path = if ctx.path().is_empty() {
        "/".to_string()
    } else {
        format!("/{}", ctx.path())
    };
    let version = {
        let v = ctx.param("http-version");
        if v.is_null() {
            "1.1".to_string()
        } else {
            v.to_text()
        }
    };
    let agent = {
        let v = ctx.param("user-agent");
        if v.is_null() {
            format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        } else {
            v.to_text()
        }
    };

    let mut request = format!("GET {} HTTP/{}\r\n", path, version);
    request.push_str(&format!("Host: {}\r\n", ctx.host()));
    request.push_str(&format!("User-Agent: {}\r\n", agent));
    if !ctx.user().is_empty() {
        let credentials = BASE64.encode(format!("{}:{}", ctx.user(), ctx.secret()));
        request.push_str(&format!("Authorization: Basic {}\r\n", credentials));
    }
    request.push_str("Accept: */*\r\n");
    request.push_str("Connection: close\r\n");

    let additional = ctx.param("additional-headers");
    for key in additional.keys() {
        request.push_str(&format!("{}: {}\r\n", key, additional.get(key)));
    }

    if ctx.scheme() == "ntrip" {
        let gga = ctx.param("gga");
        if !gga.is_null() {
            request.push_str(&format!("Ntrip-GGA: {}\r\n", gga.to_text()));
        }
        request.push_str("Ntrip-Version: Ntrip/2.0\r\n");
    }
    request.push_str("\r\n");
    request
}

/// Parse `HTTP/1.1 200 OK` or the ICY variant some casters send.
fn parse_status_line(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

async fn run_request(
    shared: Arc<HttpShared>,
    ctx: BrokerContext,
    mut stream: TcpStream,
    topic: String,
) {
    let request = build_request(&ctx);
    debug!("http context {} sending request for {}", ctx.id(), topic);
    if let Err(e) = stream.write_all(request.as_bytes()).await {
        ctx.set_state(BrokerState::Disconnected);
        ctx.post_error(TmxError::new(
            e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
            e.to_string(),
        ));
        return;
    }

    // Accumulate until the blank line that ends the response header.
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; 4096];
    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                ctx.set_state(BrokerState::Disconnected);
                ctx.post_error(TmxError::connection_reset(
                    "stream closed before response header",
                ));
                return;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if let Some(idx) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                    break idx;
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
    };

    let header_text = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut lines = header_text.lines();
    let status = lines.next().and_then(parse_status_line);
    match status {
        Some(200) => {}
        Some(code) => {
            ctx.set_state(BrokerState::Disconnected);
            ctx.post_error(TmxError::protocol(format!(
                "unexpected HTTP status {}",
                code
            )));
            return;
        }
        None => {
            ctx.set_state(BrokerState::Disconnected);
            ctx.post_error(TmxError::malformed("unparseable HTTP status line"));
            return;
        }
    }

    // Response headers land in the context's property bag.
    {
        let mut params = ctx.parameters();
        let headers = params.get_mut("headers");
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim(), value.trim());
            }
        }
    }
    ctx.set_state(BrokerState::Registered);
    ctx.post_error(TmxError::none());

    // Everything after the header block is topic payload.
    let mut deliver = |bytes: Vec<u8>| {
        let mut message = TmxMessage::new(topic.clone());
        message.source = ctx.host().to_string();
        message.payload = bytes;
        message.stamp_now();
        shared.callbacks.dispatch(ctx.id(), &message);
        ctx.receive_gate().notify_all();
    };

    let body = buffer[header_end + 4..].to_vec();
    if !body.is_empty() {
        deliver(body);
    }
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => {
                ctx.set_state(BrokerState::Disconnected);
                ctx.post_error(TmxError::none());
                return;
            }
            Ok(n) => deliver(chunk[..n].to_vec()),
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

pub struct HttpBrokerClient {
    shared: Arc<HttpShared>,
}

impl HttpBrokerClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(HttpShared::default()),
        }
    }

    fn default_port(ctx: &BrokerContext) -> u16 {
        if ctx.scheme() == "ntrip" {
            NTRIP_PORT
        } else {
            HTTP_PORT
        }
    }
}

impl Default for HttpBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TmxBrokerClient for HttpBrokerClient {
    fn schemes(&self) -> &'static [&'static str] {
        &["http", "ntrip"]
    }

    fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    fn initialize(&self, ctx: &BrokerContext) {
        if ctx.host().is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("http context requires a host"),
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
                TmxError::invalid_argument("http context must be initialized before connect"),
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
                TmxError::invalid_argument("http context has no executor"),
            );
            return;
        };

        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = format!("{}:{}", ctx.host(), ctx.port_or(Self::default_port(&ctx)));
        executor.spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    shared.conns.lock().insert(
                        ctx.id().to_string(),
                        HttpConn {
                            stream: Some(stream),
                            tasks: Vec::new(),
                        },
                    );
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
            ctx.post_error(TmxError::aborted("http stream cancelled by disconnect"));
        }
        self.on_disconnected(ctx, TmxError::none());
    }

    /// Fires the GET request; the registered handler starts receiving the
    /// stream once the 200 response arrives.
    fn subscribe(&self, ctx: &BrokerContext, topic: &str, descriptor: CallbackDescriptor) {
        self.shared.callbacks.register(ctx.id(), topic, descriptor);

        let stream = {
            let mut conns = self.shared.conns.lock();
            conns.get_mut(ctx.id()).and_then(|c| c.stream.take())
        };
        let Some(stream) = stream else {
            self.on_subscribed(
                ctx,
                topic,
                TmxError::not_connected("subscribe requires a connected http context"),
            );
            return;
        };
        let Some(executor) = ctx.executor() else {
            self.on_subscribed(
                ctx,
                topic,
                TmxError::invalid_argument("http context has no executor"),
            );
            return;
        };

        let task = {
            let shared = self.shared.clone();
            let ctx_clone = ctx.clone();
            let topic_owned = topic.to_string();
            executor.handle().spawn(run_request(
                shared,
                ctx_clone,
                stream,
                topic_owned,
            ))
        };
        if let Some(conn) = self.shared.conns.lock().get_mut(ctx.id()) {
            conn.tasks.push(task);
        }
        self.on_subscribed(ctx, topic, TmxError::none());
    }

    fn unsubscribe(&self, ctx: &BrokerContext, topic: &str, descriptor_id: &str) {
        self.shared
            .callbacks
            .unregister(ctx.id(), topic, descriptor_id);
        self.on_unsubscribed(ctx, topic, TmxError::none());
    }

    fn publish(&self, ctx: &BrokerContext, message: TmxMessage) {
        // The streaming GET model has no write path once the request is
        // sent; report the constraint instead of silently dropping.
        let _ = message;
        self.on_published(
            ctx,
            TmxError::not_supported("http broker contexts are read-only streams"),
        );
    }

    fn broker_info(&self, ctx: &BrokerContext) -> Value {
        let mut info = Value::map();
        info.insert("scheme", ctx.scheme());
        info.insert("host", ctx.host());
        info.insert("port", ctx.port_or(Self::default_port(ctx)) as u64);
        info.insert("path", ctx.path());
        info.insert("state", Value::from_enum(ctx.state()));
        info.insert("headers", ctx.param("headers"));
        info
    }
}
