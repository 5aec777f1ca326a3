//! # Warden Authorization Engine
//!
//! Role-based access control with row-level filters.
//!
//! ## Features
//!
//! - **Three-valued decisions**: grant, deny, or a filter predicate that
//!   restricts access to matching records
//! - **Declared type hierarchy** with operator overrides and deterministic
//!   precedence
//! - **Pluggable policies** built by name from a [`PolicyFactory`]
//! - **Role inheritance** with cycle detection at startup
//! - **Record probes** that settle a filter for a single record through a
//!   [`RecordStore`]
//! - **Collection guard** that narrows reads and refuses writes
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_authz::policy::{PolicyInvocation, PolicyRef, PolicyTableBuilder, ResourceTypeDecl};
//! use warden_authz::{Decision, MemoryStore, Predicate, Principal, RbacEngine, RequestContext, ResourceContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     store.insert("notes", serde_json::json!({"id": "n1", "ownerId": "U1"})).await?;
//!
//!     let engine = RbacEngine::builder()
//!         .declare(ResourceTypeDecl::new("Note").with_policies(
//!             PolicyTableBuilder::new()
//!                 .bind(
//!                     "registered",
//!                     "find",
//!                     PolicyRef::from(PolicyInvocation::new("is_owner").with("owner_attribute", "ownerId")),
//!                 )
//!                 .build(),
//!         ))
//!         .collection("notes", "Note")
//!         .store(Arc::new(store))
//!         .build()?;
//!
//!     let ctx = RequestContext::for_principal(Principal::new("U1"));
//!     let decision = engine.can(&ctx, &ResourceContext::new("Note", "find"))?;
//!     assert_eq!(decision, Decision::Filter(Predicate::eq("ownerId", "U1")));
//!
//!     let n1 = ResourceContext::instance("Note", "n1", "find");
//!     assert!(engine.can_access_record(&ctx, &n1).await?);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod policy;
pub mod predicate;
pub mod roles;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::RbacConfig;
pub use engine::{Decision, PrincipalSource, RbacEngine, RbacEngineBuilder, RequestContext};
pub use error::{AuthzError, Result};
pub use guard::CollectionGuard;
pub use policy::{Policy, PolicyContext, PolicyFactory, PolicyOutcome, PolicyRef};
pub use predicate::Predicate;
pub use roles::RoleResolver;
pub use store::{MemoryStore, Query, RecordStore};
pub use types::{Params, Principal, ResourceContext, ResourceRef, RoleId, RoleSet};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
