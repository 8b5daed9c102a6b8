pub mod auth;
pub mod engine;
pub mod merge;
pub mod status;

pub use auth::{Connectivity, ConnectivityFlag, Session, SessionProvider, StaticSession};
pub use engine::{PullOutcome, PushOutcome, RetryPolicy, SyncEngine, SyncEngineBuilder};
pub use merge::{MergeConfig, MergeResolver, MergeRule, merge};
pub use status::{StatusSignal, SyncStatus};
