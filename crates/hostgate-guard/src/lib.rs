//! hostgate Guard
//!
//! Security primitives shared by every capability:
//!
//! - [`Role`] / [`RoleAuthorizer`]: the total order of caller privilege
//! - [`AppSlug`]: filesystem-safe application identifier
//! - [`PathGuard`]: confinement of every path to `<root>/<slug>`
//!
//! # Example
//!
//! ```rust,ignore
//! use hostgate_guard::{PathGuard, Role, RoleAuthorizer};
//!
//! let guard = PathGuard::new("/srv/apps")?;
//! let slug = guard.sanitize("My App")?;             // "my-app"
//! let src = guard.resolve(&slug, "src")?;            // /srv/apps/my-app/src
//! assert!(RoleAuthorizer::new().permits(Role::Admin, Role::Builder));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod path;
mod role;

pub use path::{AppSlug, GuardError, PathGuard, MAX_SLUG_LEN};
pub use role::{Role, RoleAuthorizer, RoleError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
