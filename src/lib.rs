//! Relationship-based authorization engine
//!
//! This crate answers the question "does subject S have permission P on
//! resource R?" over a graph of relationship tuples, providing:
//! - Relationship-based access control (ReBAC) with nested groups
//! - Per-resource-type permission hierarchies (admin implies write implies read)
//! - Resource containment (access to a folder reaches the documents inside)
//! - Time-bound grants with expiration management
//! - Multi-tenant isolation with fail-closed tenant context
//! - Append-only, month-partitioned audit capture for every mutation
//!
//! # Core Concepts
//!
//! - **Tuple**: one directed edge of the authorization graph:
//!   "subject has relation to resource"
//! - **Namespace**: the tenant scope every tuple, rule, and audit event
//!   belongs to
//! - **Userset**: a subject meaning "holders of relation R on X" rather
//!   than X itself
//! - **Hierarchy rule**: "holding this permission implies holding that one"
//!
//! # Example
//!
//! ```rust,no_run
//! use authz_engine::{AuthzEngine, MemoryStore, RequestContext, ResourceRef, SubjectRef};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = AuthzEngine::new(Arc::new(MemoryStore::new()));
//!     let mut ctx = RequestContext::new();
//!     ctx.set_tenant("acme")?;
//!     ctx.set_actor(Some("admin@acme.com"), Some("req-1"), None, None, None)?;
//!
//!     // alice belongs to the engineering team, the team may read the repo
//!     engine.write(&ctx, &ResourceRef::new("team", "eng"), "member",
//!                  "user", "alice", "acme", None).await?;
//!     engine.write(&ctx, &ResourceRef::new("repo", "api"), "read",
//!                  "team", "eng", "acme", None).await?;
//!
//!     let allowed = engine.check(&ctx, "alice", "read", "repo", "api", "acme").await?;
//!     assert!(allowed);
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod check;
pub mod config;
pub mod context;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod explain;
pub mod expiration;
pub mod graph;
pub mod listing;
pub mod locks;
pub mod maintenance;
pub mod models;
pub mod store;
pub mod validation;
pub mod write;

pub use config::{EngineConfig, DEFAULT_NAMESPACE};
pub use context::{ActorContext, RequestContext};
pub use engine::AuthzEngine;
pub use error::{AuthzError, Result};
pub use models::*;
pub use store::{AuthzStore, MemoryStore, PostgresStore, TupleFilter};
