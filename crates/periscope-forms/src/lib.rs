//! Periscope Forms - reactive field validation for inspector actions.
//!
//! Every action the inspector can run (calling a tool, fetching a prompt,
//! reading a templated resource) is gated by a [`FormSession`]. The session
//! owns the action's fields, recomputes aggregate validity on each edit and
//! reports transitions as [`ValidityChanged`] events, so the UI can enable
//! or disable the run button without polling.
//!
//! # Example
//!
//! ```rust
//! use periscope_forms::{FieldSpec, FormSession};
//!
//! let session = FormSession::new(
//!     "tool:tag_item",
//!     vec![FieldSpec::text("name").required(), FieldSpec::array("tags").required()],
//! );
//! session.mount_all();
//! assert!(!session.can_execute());
//!
//! session.set_value("name", "widget").unwrap();
//! session.push_element("tags", "blue").unwrap();
//! assert!(session.can_execute());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod field;
mod schema;
mod session;

pub use error::{FormError, FormResult};
pub use field::{ElementKind, FieldKind, FieldSpec, FieldValue, FormField, SelectOption};
pub use schema::fields_from_schema;
pub use session::{FormSession, ValidityChanged};
