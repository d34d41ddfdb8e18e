//! Control registry for Vigil.
//!
//! Controls are declarative YAML/JSON records (id, title, severity, categories,
//! check, remediation). This crate parses them, validates required fields and
//! check structure, and builds an immutable [`Registry`] with an explicit
//! policy for duplicate ids.
//!
//! ```no_run
//! use vigil_registry::{ControlSource, DuplicatePolicy, Registry};
//!
//! # fn example() -> Result<(), vigil_registry::RegistryError> {
//! let sources = vec![ControlSource::resolve("controls/")?];
//! let registry = Registry::load(&sources, DuplicatePolicy::Reject)?;
//! for control in registry.list() {
//!     println!("{} {}", control.key, control.control.title);
//! }
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod error;
pub mod loader;
pub mod ordering;
pub mod registry;
pub mod schema;

pub use condition::{Comparator, Comparison, Condition};
pub use error::RegistryError;
pub use loader::{ControlOrigin, ControlSource, SourceFormat};
pub use ordering::compare_ids;
pub use registry::{
    ControlKey, DuplicateNotice, DuplicatePolicy, RegisteredControl, Registry, Selection,
};
pub use schema::{CheckSpec, Control, EmptyOutcome, Expectation, PredicateRule, Severity};

/// Built-in catalogs embedded at compile time.
///
/// Format: (catalog_name, catalog_yaml_content)
pub static BUILTIN_CATALOGS: &[(&str, &str)] = &[(
    "cis-azure-foundations",
    include_str!("../catalogs/cis-azure-foundations.yaml"),
)];

/// Look up a built-in catalog by name.
pub fn get_builtin_catalog(name: &str) -> Option<&'static str> {
    BUILTIN_CATALOGS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, content)| *content)
}
