//! plexvol-storage: pluggable object store keyed by volume id
//!
//! Three transports implement [`Backend`]: a local directory, an HTTP object
//! server and a TCP object server. `server` holds the serving side of the
//! HTTP and TCP protocols so both ends live in one crate.

pub mod backend;
pub mod debounce;
pub mod fs;
pub mod http;
pub mod protocol;
pub mod server;
pub mod tcp;

pub use backend::{build_backend, Backend, SharedBackend};
pub use debounce::{Clock, ManualClock, RecentWindow, SystemClock};
pub use fs::FsBackend;
pub use http::{HttpBackend, HttpOptions};
pub use tcp::TcpBackend;
