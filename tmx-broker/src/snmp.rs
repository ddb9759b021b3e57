//! SNMP broker client for the `snmpv1`, `snmpv2c`, `snmpv3` and `ntcip`
//! schemes. PDUs are BER-encoded in-crate and carried over UDP.
//!
//! A publish interprets the message topic prefix: `snmpget/...` issues a
//! GET whose object names come from the JSON payload keys, fills a result
//! properties map from the response, encodes it back to JSON and invokes
//! the registered handlers; `snmpset/...` issues a SET with values typed
//! per the registered MIB node syntax.
//!
//! SNMPv3 messages are built with the USM security parameters carried in
//! the context, but only the noAuthNoPriv level is actually encodable
//! here: the authentication and privacy transforms live in the native
//! library whose embedding is out of scope, so `authNoPriv` and
//! `authPriv` fail the connect with NotSupported.

use crate::broker::{CallbackDescriptor, CallbackRegistry, TmxBrokerClient};
use crate::context::{BrokerContext, BrokerState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tmx_message::{names, CodecRegistry, TmxMessage};
use tmx_value::hex::decode_hex;
use tmx_value::{named_enum, TmxError, TmxResult, Value};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const SNMP_PORT: u16 = 161;

/// Default bound on waiting for an agent response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

named_enum! {
    pub enum SecurityLevel: u8 {
        NoAuthNoPriv = 1,
        AuthNoPriv = 2,
        AuthPriv = 3,
    }
}

named_enum! {
    pub enum AuthProtocol: u8 {
        MD5 = 1,
        SHA = 2,
    }
}

named_enum! {
    pub enum PrivProtocol: u8 {
        DES = 1,
        AES = 2,
    }
}

/// ASN.1 syntax of a MIB node, selecting how a SET value is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibSyntax {
    Integer,
    OctetString,
    Boolean,
    TimeTicks,
    Counter,
    BitString,
    Double,
    Float,
}

#[derive(Debug, Clone)]
pub struct MibEntry {
    pub oid: Vec<u32>,
    pub syntax: MibSyntax,
}

/// Name-to-OID resolution. MIB file parsing belongs to the native
/// toolchain; the runtime resolves only what has been registered with it,
/// seeded with the RSU nodes the bus itself relays.
#[derive(Default)]
pub struct MibRegistry {
    entries: RwLock<HashMap<String, MibEntry>>,
}

impl MibRegistry {
    pub fn seeded() -> Self {
        let registry = Self::default();
        registry.register(
            "RSU-MIB::rsuMibVersion.0",
            MibEntry {
                oid: vec![1, 0, 15628, 4, 1, 17, 1, 0],
                syntax: MibSyntax::OctetString,
            },
        );
        registry.register(
            "RSU-MIB::rsuID.0",
            MibEntry {
                oid: vec![1, 0, 15628, 4, 1, 17, 4, 0],
                syntax: MibSyntax::OctetString,
            },
        );
        registry
    }

    pub fn register(&self, name: &str, entry: MibEntry) {
        self.entries.write().insert(name.to_string(), entry);
    }

    /// Resolve a name; bare dotted OIDs (`1.3.6.1...`) pass through
    /// without registration.
    pub fn resolve(&self, name: &str) -> TmxResult<MibEntry> {
        if let Some(entry) = self.entries.read().get(name) {
            return Ok(entry.clone());
        }
        let numeric: Option<Vec<u32>> = name
            .trim_start_matches('.')
            .split('.')
            .map(|part| part.parse::<u32>().ok())
            .collect();
        match numeric {
            Some(oid) if oid.len() >= 2 => Ok(MibEntry {
                oid,
                syntax: MibSyntax::OctetString,
            }),
            _ => Err(TmxError::not_supported(format!(
                "no MIB schema registered for {:?}",
                name
            ))),
        }
    }
}

/// Minimal BER primitives, enough for the SNMP message grammar.
pub mod ber {
    pub const SEQUENCE: u8 = 0x30;
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_ID: u8 = 0x06;
    pub const COUNTER: u8 = 0x41;
    pub const TIMETICKS: u8 = 0x43;
    pub const GET_REQUEST: u8 = 0xA0;
    pub const GET_RESPONSE: u8 = 0xA2;
    pub const SET_REQUEST: u8 = 0xA3;
    pub const REPORT: u8 = 0xA8;

    pub fn write_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
        out.push(tag);
        let len = content.len();
        if len < 128 {
            out.push(len as u8);
        } else {
            let bytes = len.to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            out.push(0x80 | (bytes.len() - skip) as u8);
            out.extend_from_slice(&bytes[skip..]);
        }
        out.extend_from_slice(content);
    }

    pub fn write_int(out: &mut Vec<u8>, value: i64) {
        let bytes = value.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let b = bytes[start];
            let next_msb = bytes[start + 1] & 0x80;
            if (b == 0x00 && next_msb == 0) || (b == 0xFF && next_msb != 0) {
                start += 1;
            } else {
                break;
            }
        }
        write_tlv(out, INTEGER, &bytes[start..]);
    }

    pub fn write_octets(out: &mut Vec<u8>, value: &[u8]) {
        write_tlv(out, OCTET_STRING, value);
    }

    pub fn write_null(out: &mut Vec<u8>) {
        write_tlv(out, NULL, &[]);
    }

    /// Object identifiers pack the first two arcs into one byte, the rest
    /// base-128 with continuation bits.
    pub fn write_oid(out: &mut Vec<u8>, oid: &[u32]) {
        let mut content = Vec::new();
        if oid.len() >= 2 {
            content.push((oid[0] * 40 + oid[1]) as u8);
            for &arc in &oid[2..] {
                let mut stack = [0u8; 5];
                let mut n = 0;
                let mut v = arc;
                loop {
                    stack[n] = (v & 0x7F) as u8;
                    n += 1;
                    v >>= 7;
                    if v == 0 {
                        break;
                    }
                }
                for i in (0..n).rev() {
                    let mut byte = stack[i];
                    if i != 0 {
                        byte |= 0x80;
                    }
                    content.push(byte);
                }
            }
        }
        write_tlv(out, OBJECT_ID, &content);
    }

    /// One TLV off the front: (tag, content, rest).
    pub fn read_tlv(bytes: &[u8]) -> Option<(u8, &[u8], &[u8])> {
        let tag = *bytes.first()?;
        let first_len = *bytes.get(1)?;
        let (len, header) = if first_len < 128 {
            (first_len as usize, 2)
        } else {
            let count = (first_len & 0x7F) as usize;
            if count == 0 || count > 4 || bytes.len() < 2 + count {
                return None;
            }
            let mut len = 0usize;
            for i in 0..count {
                len = (len << 8) | bytes[2 + i] as usize;
            }
            (len, 2 + count)
        };
        if bytes.len() < header + len {
            return None;
        }
        Some((tag, &bytes[header..header + len], &bytes[header + len..]))
    }

    pub fn read_int(content: &[u8]) -> i64 {
        let mut acc: i64 = if content.first().map_or(false, |b| b & 0x80 != 0) {
            -1
        } else {
            0
        };
        for &b in content {
            acc = acc.wrapping_shl(8) | b as i64;
        }
        acc
    }

    pub fn read_oid(content: &[u8]) -> Vec<u32> {
        let mut oid = Vec::new();
        let mut iter = content.iter();
        if let Some(&first) = iter.next() {
            oid.push(first as u32 / 40);
            oid.push(first as u32 % 40);
        }
        let mut acc = 0u32;
        for &b in iter {
            acc = (acc << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                oid.push(acc);
                acc = 0;
            }
        }
        oid
    }
}

struct Pending {
    topic: String,
    names_by_oid: HashMap<Vec<u32>, String>,
}

struct SnmpConn {
    socket: Arc<UdpSocket>,
    tasks: Vec<JoinHandle<()>>,
    pending: Arc<Mutex<HashMap<i32, Pending>>>,
}

struct SnmpShared {
    callbacks: CallbackRegistry,
    codecs: CodecRegistry,
    mibs: MibRegistry,
    conns: Mutex<HashMap<String, SnmpConn>>,
    request_ids: AtomicI32,
}

impl Default for SnmpShared {
    fn default() -> Self {
        Self {
            callbacks: CallbackRegistry::default(),
            codecs: CodecRegistry::standard(),
            mibs: MibRegistry::seeded(),
            conns: Mutex::new(HashMap::new()),
            request_ids: AtomicI32::new(1),
        }
    }
}

fn version_of(scheme: &str) -> i64 {
    match scheme {
        "snmpv1" => 0,
        "snmpv3" => 3,
        // NTCIP devices run v2c unless told otherwise.
        _ => 1,
    }
}

fn security_level(ctx: &BrokerContext) -> TmxResult<SecurityLevel> {
    use tmx_value::NamedEnum;
    let raw = ctx.param("security-level");
    if raw.is_null() {
        return Ok(SecurityLevel::NoAuthNoPriv);
    }
    SecurityLevel::from_name(&raw.to_text()).ok_or_else(|| {
        TmxError::invalid_argument(format!("invalid security level {:?}", raw.to_text()))
    })
}

/// Wrap a GET/SET PDU body in the version-appropriate message structure.
fn build_message(ctx: &BrokerContext, pdu: &[u8], request_id: i32) -> Vec<u8> {
    let version = version_of(ctx.scheme());
    let mut body = Vec::new();
    if version == 3 {
        // msgGlobalData
        let mut global = Vec::new();
        ber::write_int(&mut global, request_id as i64);
        ber::write_int(&mut global, 65507);
        // msgFlags: reportable, no auth, no priv
        ber::write_octets(&mut global, &[0x04]);
        ber::write_int(&mut global, 3);

        let engine_param = ctx.param("security-engine-id");
        let engine_id = engine_param
            .as_str()
            .and_then(decode_hex)
            .unwrap_or_default();

        // USM security parameters, themselves a BER blob in an OCTET STRING
        let mut usm = Vec::new();
        ber::write_octets(&mut usm, &engine_id);
        ber::write_int(&mut usm, ctx.param("engine-boots").to_int());
        ber::write_int(&mut usm, ctx.param("engine-time").to_int());
        ber::write_octets(&mut usm, ctx.user().as_bytes());
        ber::write_octets(&mut usm, &[]);
        ber::write_octets(&mut usm, &[]);
        let mut usm_seq = Vec::new();
        ber::write_tlv(&mut usm_seq, ber::SEQUENCE, &usm);

        // scoped PDU
        let mut scoped = Vec::new();
        ber::write_octets(&mut scoped, &engine_id);
        ber::write_octets(&mut scoped, &[]);
        scoped.extend_from_slice(pdu);

        ber::write_int(&mut body, 3);
        ber::write_tlv(&mut body, ber::SEQUENCE, &global);
        ber::write_octets(&mut body, &usm_seq);
        ber::write_tlv(&mut body, ber::SEQUENCE, &scoped);
    } else {
        let community = {
            let c = ctx.param("community");
            if c.is_null() {
                if ctx.secret().is_empty() {
                    "public".to_string()
                } else {
                    ctx.secret().to_string()
                }
            } else {
                c.to_text()
            }
        };
        ber::write_int(&mut body, version);
        ber::write_octets(&mut body, community.as_bytes());
        body.extend_from_slice(pdu);
    }
    let mut message = Vec::new();
    ber::write_tlv(&mut message, ber::SEQUENCE, &body);
    message
}

/// The inner GET/SET PDU: request id, zero error fields, varbind list.
fn build_pdu(tag: u8, request_id: i32, varbinds: &[(Vec<u32>, Option<(MibSyntax, Value)>)]) -> Vec<u8> {
    let mut list = Vec::new();
    for (oid, value) in varbinds {
        let mut bind = Vec::new();
        ber::write_oid(&mut bind, oid);
        match value {
            None => ber::write_null(&mut bind),
            Some((syntax, v)) => write_typed(&mut bind, *syntax, v),
        }
        ber::write_tlv(&mut list, ber::SEQUENCE, &bind);
    }
    let mut inner = Vec::new();
    ber::write_int(&mut inner, request_id as i64);
    ber::write_int(&mut inner, 0);
    ber::write_int(&mut inner, 0);
    ber::write_tlv(&mut inner, ber::SEQUENCE, &list);
    let mut pdu = Vec::new();
    ber::write_tlv(&mut pdu, tag, &inner);
    pdu
}

/// SET values are typed by the MIB node syntax.
fn write_typed(out: &mut Vec<u8>, syntax: MibSyntax, value: &Value) {
    match syntax {
        MibSyntax::Integer => ber::write_int(out, value.to_int()),
        MibSyntax::Boolean => ber::write_int(out, value.to_bool() as i64),
        MibSyntax::TimeTicks => {
            let mut content = Vec::new();
            ber::write_int(&mut content, value.to_int());
            // re-tag the INTEGER content as TimeTicks
            ber::write_tlv(out, ber::TIMETICKS, &content[2..]);
        }
        MibSyntax::Counter => {
            let mut content = Vec::new();
            ber::write_int(&mut content, value.to_int());
            ber::write_tlv(out, ber::COUNTER, &content[2..]);
        }
        MibSyntax::BitString => {
            let bits = value.to_uint();
            ber::write_tlv(out, 0x03, &[0, (bits & 0xFF) as u8]);
        }
        MibSyntax::Double | MibSyntax::Float => {
            ber::write_octets(out, value.to_float().to_string().as_bytes());
        }
        MibSyntax::OctetString => match value {
            Value::Bytes { data, .. } => ber::write_octets(out, data),
            other => ber::write_octets(out, other.to_text().as_bytes()),
        },
    }
}

/// Pull the PDU out of a v1/v2c or v3 message.
pub fn find_pdu(message: &[u8]) -> Option<&[u8]> {
    let (tag, outer, _) = ber::read_tlv(message)?;
    if tag != ber::SEQUENCE {
        return None;
    }
    let (vtag, vcontent, rest) = ber::read_tlv(outer)?;
    if vtag != ber::INTEGER {
        return None;
    }
    let version = ber::read_int(vcontent);
    if version == 3 {
        // skip msgGlobalData and the USM octets, then unwrap the scoped PDU
        let (_, _global, rest) = ber::read_tlv(rest)?;
        let (_, _usm, rest) = ber::read_tlv(rest)?;
        let (tag, scoped, _) = ber::read_tlv(rest)?;
        if tag != ber::SEQUENCE {
            return None;
        }
        let (_, _engine, rest) = ber::read_tlv(scoped)?;
        let (_, _context, rest) = ber::read_tlv(rest)?;
        Some(rest)
    } else {
        // skip community
        let (_, _community, rest) = ber::read_tlv(rest)?;
        Some(rest)
    }
}

/// Parse a GET/SET/RESPONSE PDU into (tag, request id, varbinds with the
/// values rendered as text).
pub fn parse_pdu(pdu: &[u8]) -> Option<(u8, i32, Vec<(Vec<u32>, String)>)> {
    let (pdu_tag, inner, _) = ber::read_tlv(pdu)?;
    if !matches!(
        pdu_tag,
        ber::GET_REQUEST | ber::GET_RESPONSE | ber::SET_REQUEST | ber::REPORT
    ) {
        return None;
    }
    let (_, reqid, rest) = ber::read_tlv(inner)?;
    let request_id = ber::read_int(reqid) as i32;
    let (_, _error_status, rest) = ber::read_tlv(rest)?;
    let (_, _error_index, rest) = ber::read_tlv(rest)?;
    let (tag, mut list, _) = ber::read_tlv(rest)?;
    if tag != ber::SEQUENCE {
        return None;
    }

    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let (tag, bind, rest) = ber::read_tlv(list)?;
        list = rest;
        if tag != ber::SEQUENCE {
            return None;
        }
        let (tag, oid_content, value_rest) = ber::read_tlv(bind)?;
        if tag != ber::OBJECT_ID {
            return None;
        }
        let oid = ber::read_oid(oid_content);
        let (value_tag, value_content, _) = ber::read_tlv(value_rest)?;
        let rendered = match value_tag {
            ber::INTEGER | ber::COUNTER | ber::TIMETICKS => {
                ber::read_int(value_content).to_string()
            }
            ber::OCTET_STRING => String::from_utf8_lossy(value_content).into_owned(),
            ber::NULL => String::new(),
            ber::OBJECT_ID => ber::read_oid(value_content)
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("."),
            _ => tmx_value::hex::encode_hex(value_content),
        };
        varbinds.push((oid, rendered));
    }
    Some((pdu_tag, request_id, varbinds))
}

pub struct NetSnmpBrokerClient {
    shared: Arc<SnmpShared>,
}

impl NetSnmpBrokerClient {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SnmpShared::default()),
        }
    }

    /// Register a MIB node so its name resolves in get/set topics.
    pub fn register_mib(&self, name: &str, entry: MibEntry) {
        self.shared.mibs.register(name, entry);
    }

    fn timeout_of(ctx: &BrokerContext) -> Duration {
        let ms = ctx.param("timeout").to_int();
        if ms > 0 {
            Duration::from_millis(ms as u64)
        } else {
            DEFAULT_TIMEOUT
        }
    }

    fn try_publish(&self, ctx: &BrokerContext, message: &TmxMessage) -> TmxResult<()> {
        let (operation, _mib_path) = message
            .topic
            .split_once('/')
            .ok_or_else(|| {
                TmxError::invalid_argument(format!(
                    "SNMP topic {:?} has no operation prefix",
                    message.topic
                ))
            })?;

        let payload = self.shared.codecs.decode_message(message)?;
        if !payload.is_map() {
            return Err(TmxError::invalid_argument(
                "SNMP payload must be a properties map",
            ));
        }

        let set = match operation {
            "snmpget" => false,
            "snmpset" => true,
            other => {
                return Err(TmxError::not_supported(format!(
                    "unknown SNMP operation {:?}",
                    other
                )))
            }
        };

        let mut varbinds = Vec::new();
        let mut names_by_oid = HashMap::new();
        for name in payload.keys() {
            let entry = self.shared.mibs.resolve(name)?;
            names_by_oid.insert(entry.oid.clone(), name.to_string());
            if set {
                varbinds.push((entry.oid, Some((entry.syntax, payload.get(name).clone()))));
            } else {
                varbinds.push((entry.oid, None));
            }
        }
        if varbinds.is_empty() {
            return Err(TmxError::invalid_argument("SNMP request has no objects"));
        }

        let request_id = self.shared.request_ids.fetch_add(1, Ordering::Relaxed);
        let tag = if set { ber::SET_REQUEST } else { ber::GET_REQUEST };
        let pdu = build_pdu(tag, request_id, &varbinds);
        let datagram = build_message(ctx, &pdu, request_id);

        let conns = self.shared.conns.lock();
        let conn = conns.get(ctx.id()).ok_or_else(|| {
            TmxError::not_connected(format!("context {} is not connected", ctx.id()))
        })?;
        conn.pending.lock().insert(
            request_id,
            Pending {
                topic: message.topic.clone(),
                names_by_oid,
            },
        );
        conn.socket
            .try_send(&datagram)
            .map_err(|e| TmxError::new(e.raw_os_error().unwrap_or(tmx_value::codes::EIO), e.to_string()))?;
        debug!(
            "SNMP context {} sent request {} for {}",
            ctx.id(),
            request_id,
            message.topic
        );

        // An unanswered request times out as a protocol error.
        let pending = conn.pending.clone();
        let timeout_ctx = ctx.clone();
        let bound = Self::timeout_of(ctx);
        if let Some(executor) = ctx.executor() {
            executor.spawn(async move {
                tokio::time::sleep(bound).await;
                if pending.lock().remove(&request_id).is_some() {
                    timeout_ctx.post_error(TmxError::protocol(format!(
                        "SNMP request {} timed out",
                        request_id
                    )));
                }
            });
        }
        Ok(())
    }
}

impl Default for NetSnmpBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TmxBrokerClient for NetSnmpBrokerClient {
    fn schemes(&self) -> &'static [&'static str] {
        &["snmpv1", "snmpv2c", "snmpv3", "ntcip"]
    }

    fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    fn initialize(&self, ctx: &BrokerContext) {
        if ctx.host().is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("SNMP context requires a host"),
            );
            return;
        }
        let level = match security_level(ctx) {
            Ok(level) => level,
            Err(e) => {
                self.on_initialized(ctx, e);
                return;
            }
        };
        if version_of(ctx.scheme()) == 3 && ctx.user().is_empty() {
            self.on_initialized(
                ctx,
                TmxError::invalid_argument("SNMPv3 requires a security name"),
            );
            return;
        }
        use tmx_value::NamedEnum;
        if let Some(name) = level.name() {
            ctx.set_param("security-level", name);
        }
        let engine_param = ctx.param("security-engine-id");
        if let Some(id) = engine_param.as_str() {
            if decode_hex(id).is_none() {
                self.on_initialized(
                    ctx,
                    TmxError::invalid_argument(format!("invalid engine id {:?}", id)),
                );
                return;
            }
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
                TmxError::invalid_argument("SNMP context must be initialized before connect"),
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

        let level = match security_level(ctx) {
            Ok(level) => level,
            Err(e) => {
                self.on_connected(ctx, e);
                return;
            }
        };
        if version_of(ctx.scheme()) == 3 && level != SecurityLevel::NoAuthNoPriv {
            self.on_connected(
                ctx,
                TmxError::not_supported(
                    "SNMPv3 authentication and privacy require the native security transforms",
                ),
            );
            return;
        }

        let Some(executor) = ctx.executor() else {
            self.on_connected(
                ctx,
                TmxError::invalid_argument("SNMP context has no executor"),
            );
            return;
        };

        let shared = self.shared.clone();
        let ctx = ctx.clone();
        let addr = format!("{}:{}", ctx.host(), ctx.port_or(SNMP_PORT));
        executor.spawn(async move {
            let socket = match UdpSocket::bind("0.0.0.0:0").await {
                Ok(socket) => socket,
                Err(e) => {
                    ctx.set_state(BrokerState::Disconnected);
                    ctx.post_error(TmxError::new(
                        e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                        e.to_string(),
                    ));
                    return;
                }
            };
            if let Err(e) = socket.connect(&addr).await {
                ctx.set_state(BrokerState::Disconnected);
                ctx.post_error(TmxError::new(
                    e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                    e.to_string(),
                ));
                return;
            }
            let socket = Arc::new(socket);
            let pending: Arc<Mutex<HashMap<i32, Pending>>> =
                Arc::new(Mutex::new(HashMap::new()));

            let recv_socket = socket.clone();
            let recv_pending = pending.clone();
            let recv_shared = shared.clone();
            let recv_ctx = ctx.clone();
            let recv_task = tokio::spawn(async move {
                let mut buf = vec![0u8; 65535];
                loop {
                    let n = match recv_socket.recv(&mut buf).await {
                        Ok(n) => n,
                        Err(e) => {
                            recv_ctx.set_state(BrokerState::Disconnected);
                            recv_ctx.post_error(TmxError::new(
                                e.raw_os_error().unwrap_or(tmx_value::codes::EIO),
                                e.to_string(),
                            ));
                            return;
                        }
                    };
                    let Some(pdu) = find_pdu(&buf[..n]) else {
                        warn!("SNMP context {} received unparseable datagram", recv_ctx.id());
                        continue;
                    };
                    let Some((tag, request_id, varbinds)) = parse_pdu(pdu) else {
                        warn!("SNMP context {} received unexpected PDU", recv_ctx.id());
                        continue;
                    };
                    if tag != ber::GET_RESPONSE && tag != ber::REPORT {
                        continue;
                    }
                    let Some(entry) = recv_pending.lock().remove(&request_id) else {
                        continue;
                    };

                    let mut result = Value::map();
                    for (oid, rendered) in varbinds {
                        let key = entry
                            .names_by_oid
                            .get(&oid)
                            .cloned()
                            .unwrap_or_else(|| {
                                oid.iter()
                                    .map(u32::to_string)
                                    .collect::<Vec<_>>()
                                    .join(".")
                            });
                        result.insert(key, rendered);
                    }

                    match recv_shared.codecs.encode(names::JSON, &result) {
                        Ok(payload) => {
                            let mut message = TmxMessage::new(entry.topic.clone());
                            message.encoding = names::JSON.to_string();
                            message.source = recv_ctx.to_url_string();
                            message.payload = payload;
                            message.stamp_now();
                            recv_shared.callbacks.dispatch(recv_ctx.id(), &message);
                            recv_ctx.receive_gate().notify_all();
                        }
                        Err(e) => recv_ctx.post_error(e),
                    }
                }
            });

            shared.conns.lock().insert(
                ctx.id().to_string(),
                SnmpConn {
                    socket,
                    tasks: vec![recv_task],
                    pending,
                },
            );
            ctx.set_state(BrokerState::Connected);
            ctx.post_error(TmxError::none());
        });
    }

    fn disconnect(&self, ctx: &BrokerContext) {
        let conn = self.shared.conns.lock().remove(ctx.id());
        if let Some(conn) = conn {
            for task in conn.tasks {
                task.abort();
            }
            ctx.post_error(TmxError::aborted("SNMP requests cancelled by disconnect"));
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
        let result = self.try_publish(ctx, &message);
        self.on_published(ctx, result.err().unwrap_or_else(TmxError::none));
    }

    fn broker_info(&self, ctx: &BrokerContext) -> Value {
        let mut info = Value::map();
        info.insert("scheme", ctx.scheme());
        info.insert("host", ctx.host());
        info.insert("port", ctx.port_or(SNMP_PORT) as u64);
        info.insert("version", version_of(ctx.scheme()));
        info.insert("security-level", ctx.param("security-level"));
        info.insert("state", Value::from_enum(ctx.state()));
        info
    }
}
