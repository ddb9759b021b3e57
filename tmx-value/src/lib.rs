//! The typed-value layer of the TMX runtime: the polymorphic [`Value`]
//! container, the hierarchical [`TypeRegistry`], the bus error currency and
//! the MSB-first bit packing primitives everything binary is built on.

pub mod error;
pub mod hex;
pub mod packing;
pub mod registry;
pub mod value;

pub use error::{codes, TmxError, TmxResult};
pub use registry::{
    full_type_name, short_type_name, TmxTypeDescriptor, TypeRegistry,
    BUILTIN_NAMESPACE,
};
pub use value::{ByteOrder, NamedEnum, Value};
