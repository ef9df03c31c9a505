//! UseCase 層
//!
//! ビジネスロジックを実装するレイヤー。
//! UI 層から呼び出され、Domain 層と接続レジストリを操作します。

pub mod error;
pub mod presence;
pub mod relay;
pub mod retry;
pub mod serial;
pub mod team;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ConnectError, PresenceError, TeamError};
pub use presence::{DeferredWrite, PresenceSynchronizer};
pub use relay::SignalingRelay;
pub use retry::RetryPolicy;
pub use serial::KeyedLock;
pub use team::TeamCoordinator;
