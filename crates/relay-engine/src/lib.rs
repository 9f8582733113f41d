pub mod echo;
pub mod mock;
pub mod reliable;

pub use echo::EchoEngine;
pub use mock::{MockEngine, MockReply};
pub use reliable::{ReliableConfig, ReliableEngine};
