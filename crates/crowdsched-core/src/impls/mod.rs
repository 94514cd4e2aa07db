//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryLockManager / InMemoryContributionsGuard**: 開発・テスト用の KV ストア
//! - **InMemoryTaskStore**: 開発・テスト用のリレーショナルストア
//! - **RedisLockManager / RedisContributionsGuard**: `redis` feature
//! - **PgTaskStore**: `postgres` feature

pub mod inmem_guard;
pub mod inmem_lock;
pub mod inmem_store;

#[cfg(feature = "postgres")]
pub mod pg_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::inmem_guard::InMemoryContributionsGuard;
pub use self::inmem_lock::InMemoryLockManager;
pub use self::inmem_store::InMemoryTaskStore;

#[cfg(feature = "postgres")]
pub use self::pg_store::PgTaskStore;
#[cfg(feature = "redis")]
pub use self::redis_store::{RedisContributionsGuard, RedisLockManager};
