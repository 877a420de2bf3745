//! # harbor-db: Durable Store for Harbor
//!
//! This crate provides the local persistence behind the sync engine.
//! It uses SQLite with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harbor Data Flow                                 │
//! │                                                                         │
//! │  QueueManager.enqueue / MessageStore.load / DrainPass.run              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     harbor-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌─────────────────┐  ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories   │  │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                 │  │  (embedded)  │   │   │
//! │  │   │               │    │ OperationRepo   │  │ 001_init.sql │   │   │
//! │  │   │ SqlitePool    │◄───│ EntityRepo      │  │              │   │   │
//! │  │   │ clear / stats │    │ SettingsRepo    │  │              │   │   │
//! │  │   └───────────────┘    └─────────────────┘  └──────────────┘   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/harbor.db  (every row keyed by user_id)           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and user-wide operations
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Operation queue, entity cache and settings
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/harbor.db")).await?;
//!
//! let op = db.operations().queue(&user, &request).await?;
//! let pending = db.operations().pending_for_user(&user).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::entities::EntityRepository;
pub use repository::operations::OperationRepository;
pub use repository::settings::SettingsRepository;
