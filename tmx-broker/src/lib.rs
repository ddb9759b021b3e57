//! The broker layer of the TMX runtime: a uniform lifecycle over
//! wire-protocol clients (the process-local kafka hub, async TCP/UDP,
//! HTTP/NTRIP, GPSD and SNMP), per-connection contexts with their locking
//! discipline, and the channel binding that ties a context to a plugin.

pub mod broker;
pub mod channel;
pub mod context;
pub mod exec;
pub mod gpsd;
pub mod http;
pub mod hub;
pub mod kafka;
pub mod snmp;
pub mod socket;

pub use broker::{
    topic_matches, BrokerRegistry, CallbackDescriptor, CallbackRegistry, MessageCallback,
    TmxBrokerClient,
};
pub use channel::TmxChannel;
pub use context::{BrokerContext, BrokerState};
pub use exec::TmxExecutor;
