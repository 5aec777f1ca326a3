//! Roles module
//!
//! Provides role definitions, the role catalog, an inheritance graph with
//! cycle detection, and the resolver that turns a principal into its
//! effective role set.
//!
//! # Example
//!
//! ```rust
//! use warden_authz::roles::{RoleCatalog, RoleDefinition, RoleResolver};
//! use warden_authz::Principal;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut catalog = RoleCatalog::default();
//! catalog.roles.insert("viewer".to_string(), RoleDefinition::new("Viewer"));
//! catalog.roles.insert(
//!     "editor".to_string(),
//!     RoleDefinition::new("Editor").with_inherits(["viewer"]),
//! );
//!
//! let resolver = RoleResolver::new(catalog)?;
//! let alice = Principal::new("alice").with_roles(["editor"]);
//! let roles = resolver.resolve_roles(Some(&alice));
//!
//! assert!(roles.contains("viewer"));
//! assert!(roles.contains("registered"));
//! # Ok(())
//! # }
//! ```

pub mod graph;
pub mod resolver;
pub mod types;

pub use graph::{GraphError, RoleGraph, RoleGraphBuilder};
pub use resolver::RoleResolver;
pub use types::{RoleCatalog, RoleDefinition};
