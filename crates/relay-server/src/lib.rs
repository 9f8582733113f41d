pub mod channel;
pub mod registry;
pub mod relay;
pub mod server;

pub use registry::ConnectionRegistry;
pub use relay::{RelayOptions, RelayOutcome, RelayPhase, RelaySession};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
