//! Explicit per-run inputs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vigil_registry::Selection;

/// Everything a run needs to know about its environment.
///
/// Passed by reference to every component; nothing reads scope, exclusions
/// or credentials from globals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunContext {
    /// Subscription / account the run targets.
    pub scope: String,
    /// Control ids reported as not applicable without evaluation.
    pub excluded_controls: BTreeSet<String>,
    /// Resource ids removed from evidence before evaluation.
    pub excluded_resources: BTreeSet<String>,
    /// Which controls to schedule.
    pub selection: Selection,
    /// Opaque label naming the credentials the provider was built with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

impl RunContext {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    pub fn exclude_control(mut self, id: impl Into<String>) -> Self {
        self.excluded_controls.insert(id.into());
        self
    }

    pub fn exclude_resource(mut self, id: impl Into<String>) -> Self {
        self.excluded_resources.insert(id.into());
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_credentials(mut self, label: impl Into<String>) -> Self {
        self.credentials = Some(label.into());
        self
    }

    pub fn is_control_excluded(&self, id: &str) -> bool {
        self.excluded_controls.contains(id)
    }

    pub fn is_resource_excluded(&self, id: &str) -> bool {
        self.excluded_resources.contains(id)
    }
}
