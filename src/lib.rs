//! relisten - A retrying, access-controlled listen/accept engine on socket2.

pub mod diag;
pub mod endpoint;
pub mod error;
pub mod listen;
pub mod options;
pub mod peer;
pub mod runtime; // Tokio wrapper and spawner
pub mod spawn;
mod sys;

// Re-export core types for user convenience
pub use endpoint::{Endpoint, RetryPolicy, SocketSpec, TcpWrapConfig, DEFAULT_RETRY_INTERVAL};
pub use error::ListenError;
pub use listen::{AttemptOutcome, Listener, DEFAULT_BACKLOG};
pub use options::{OptName, OptValue, OptionSet, Phase};
pub use peer::{AddressRange, Admission, HostAcl, PeerAdmission, PeerCheck};
pub use runtime::{listen_and_accept_async, Accepted, TokioSpawner};
#[cfg(all(unix, feature = "fork"))]
pub use spawn::ForkSpawner;
pub use spawn::{ConnectionSpawner, Spawned, ThreadSpawner};
