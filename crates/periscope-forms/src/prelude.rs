//! Prelude module - commonly used types for convenient import.
//!
//! Use `use periscope_forms::prelude::*;` to import all essential types.

// Errors
pub use crate::{FormError, FormResult};

// Fields
pub use crate::{ElementKind, FieldKind, FieldSpec, FieldValue, FormField, SelectOption};

// Sessions
pub use crate::{FormSession, ValidityChanged};
