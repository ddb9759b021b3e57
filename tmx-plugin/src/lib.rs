//! The plugin host layer of the TMX runtime.

pub mod dao;
pub mod plugin;

pub use dao::{TmxErrorReport, TmxPluginDataUpdate};
pub use plugin::{
    OnConfigUpdate, OnError, OnStatusUpdate, PluginDescriptor, TmxPlugin, WeakPlugin,
};
