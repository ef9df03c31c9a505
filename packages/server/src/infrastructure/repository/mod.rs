//! 永続ストアの実装
//!
//! ドメイン層の `PresenceStore` trait を実装します。
//! UseCase 層は trait のみに依存し、実装の差し替え（テスト用の障害注入など）を可能にします。

pub mod inmemory;

pub use inmemory::InMemoryStore;
