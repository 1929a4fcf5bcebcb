//! dcslink-core: Pure decode library for the DCS-BIOS export stream.
//!
//! No async, no I/O — just algorithms. This crate is the shared core used by
//! both `dcslink-client` (live session clients) and `dcslink-cli` (offline
//! capture decoding).

pub mod assembler;
pub mod config;
pub mod decode;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod types;

// Re-export commonly used types at crate root
pub use assembler::{FieldAssembler, Notification};
pub use config::{LinkConfig, NetworkConfig};
pub use decode::FieldDecoder;
pub use protocol::StreamDecoder;
pub use registry::{AddressRegistry, FieldDescriptor, FieldKind};
pub use schema::{ControlDef, OutputDef, SchemaSet};
pub use types::*;
