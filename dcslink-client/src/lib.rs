//! dcslink-client: live session clients.
//!
//! [`ExportClient`] receives the UDP export stream, decodes it through
//! `dcslink-core`, and dispatches field notifications to subscribers.
//! [`CallClient`] speaks the TCP call protocol for request/response API
//! invocations against the host.

pub mod call;
pub mod export;

pub use call::{ApiDef, CallClient};
pub use export::{ExportClient, SubscriptionId};
