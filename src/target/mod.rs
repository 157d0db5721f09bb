//! Storage targets as seen by the container service.
//!
//! Each pool is spread over a set of targets. The container service never
//! stores anything on them directly; it broadcasts [`TargetRequest`]s so
//! per-target state follows the committed metadata.

pub mod rpc;
pub mod server;
pub mod service;
pub mod transport;

pub use self::rpc::{TargetCloseRec, TargetReply, TargetRequest};
pub use self::server::{run_target_server, target_router};
pub use self::service::TargetService;
pub use self::transport::{HttpTransport, LocalTransport, RoutedTransport, TargetTransport};
