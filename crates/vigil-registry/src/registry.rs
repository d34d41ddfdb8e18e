//! The immutable control registry.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RegistryError, RegistryResult};
use crate::loader::{ControlOrigin, ControlSource};
use crate::ordering::compare_ids;
use crate::schema::Control;

/// What to do when two sources declare the same control id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail the load.
    #[default]
    Reject,
    /// Register every definition under a distinct variant key.
    KeepAll,
    /// The definition loaded last replaces earlier ones.
    KeepLast,
}

impl DuplicatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicatePolicy::Reject => "reject",
            DuplicatePolicy::KeepAll => "keep_all",
            DuplicatePolicy::KeepLast => "keep_last",
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "keep_all" => Ok(DuplicatePolicy::KeepAll),
            "keep_last" => Ok(DuplicatePolicy::KeepLast),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected reject, keep_all or keep_last)",
                other
            )),
        }
    }
}

/// Registry identity of a control.
///
/// `variant` is 0 for the primary definition of an id; under
/// [`DuplicatePolicy::KeepAll`] later definitions get 1, 2, ... in load order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub variant: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl ControlKey {
    pub fn new(id: impl Into<String>, variant: u32) -> Self {
        Self {
            id: id.into(),
            variant,
        }
    }

    pub fn primary(id: impl Into<String>) -> Self {
        Self::new(id, 0)
    }
}

impl Ord for ControlKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(&self.id, &other.id).then(self.variant.cmp(&other.variant))
    }
}

impl PartialOrd for ControlKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ControlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant == 0 {
            f.write_str(&self.id)
        } else {
            write!(f, "{}#{}", self.id, self.variant)
        }
    }
}

/// A control as held by the registry.
#[derive(Debug, Clone)]
pub struct RegisteredControl {
    pub key: ControlKey,
    pub control: Arc<Control>,
    pub origin: ControlOrigin,
}

impl RegisteredControl {
    pub fn id(&self) -> &str {
        &self.key.id
    }
}

/// Record of a duplicate id seen while loading under a permissive policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateNotice {
    pub id: String,
    pub kept: ControlOrigin,
    pub other: ControlOrigin,
    pub policy: DuplicatePolicy,
}

/// Subset filter over registry ids and categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Selection {
    /// Id globs; empty means every id.
    pub include: Vec<String>,
    /// Id globs removed after inclusion.
    pub exclude: Vec<String>,
    /// Keep controls tagged with any of these categories; empty means no filter.
    pub categories: Vec<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.categories.is_empty()
    }
}

/// Immutable, validated collection of controls ordered by natural id order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    controls: BTreeMap<ControlKey, RegisteredControl>,
    duplicates: Vec<DuplicateNotice>,
    policy: DuplicatePolicy,
}

impl Registry {
    /// Load and validate every source in order.
    ///
    /// Fails on the first invalid record. Under [`DuplicatePolicy::Reject`]
    /// a repeated id fails the whole load, naming both origins.
    pub fn load(sources: &[ControlSource], policy: DuplicatePolicy) -> RegistryResult<Self> {
        let mut registry = Registry {
            policy,
            ..Registry::default()
        };

        for source in sources {
            let controls = source.read()?;
            tracing::debug!(source = %source, controls = controls.len(), "read control source");
            for (control, origin) in controls {
                registry.insert(control, origin)?;
            }
        }

        tracing::info!(
            controls = registry.len(),
            duplicates = registry.duplicates.len(),
            policy = %policy,
            "control registry loaded"
        );
        Ok(registry)
    }

    /// Build a registry from already-validated controls.
    pub fn from_controls(
        controls: impl IntoIterator<Item = (Control, ControlOrigin)>,
        policy: DuplicatePolicy,
    ) -> RegistryResult<Self> {
        let mut registry = Registry {
            policy,
            ..Registry::default()
        };
        for (control, origin) in controls {
            registry.insert(control, origin)?;
        }
        Ok(registry)
    }

    fn insert(&mut self, control: Control, origin: ControlOrigin) -> RegistryResult<()> {
        let primary = ControlKey::primary(control.id.clone());

        let Some(existing) = self.controls.get(&primary) else {
            self.controls.insert(
                primary.clone(),
                RegisteredControl {
                    key: primary,
                    control: Arc::new(control),
                    origin,
                },
            );
            return Ok(());
        };

        match self.policy {
            DuplicatePolicy::Reject => Err(RegistryError::DuplicateControlId {
                id: control.id,
                first: existing.origin.clone(),
                second: origin,
            }),
            DuplicatePolicy::KeepLast => {
                tracing::warn!(
                    id = %control.id,
                    replaced = %existing.origin,
                    by = %origin,
                    "duplicate control id, keeping last definition"
                );
                self.duplicates.push(DuplicateNotice {
                    id: control.id.clone(),
                    kept: origin.clone(),
                    other: existing.origin.clone(),
                    policy: self.policy,
                });
                self.controls.insert(
                    primary.clone(),
                    RegisteredControl {
                        key: primary,
                        control: Arc::new(control),
                        origin,
                    },
                );
                Ok(())
            }
            DuplicatePolicy::KeepAll => {
                let variant = self.variants(&control.id).count() as u32;
                let key = ControlKey::new(control.id.clone(), variant);
                tracing::warn!(
                    id = %control.id,
                    first = %existing.origin,
                    other = %origin,
                    key = %key,
                    "duplicate control id, keeping both definitions"
                );
                self.duplicates.push(DuplicateNotice {
                    id: control.id.clone(),
                    kept: origin.clone(),
                    other: existing.origin.clone(),
                    policy: self.policy,
                });
                self.controls.insert(
                    key.clone(),
                    RegisteredControl {
                        key,
                        control: Arc::new(control),
                        origin,
                    },
                );
                Ok(())
            }
        }
    }

    /// Every registered control in natural id order.
    pub fn list(&self) -> Vec<&RegisteredControl> {
        self.controls.values().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredControl> {
        self.controls.values()
    }

    /// Primary definition for `id`.
    pub fn get(&self, id: &str) -> Option<&RegisteredControl> {
        self.controls.get(&ControlKey::primary(id))
    }

    pub fn get_key(&self, key: &ControlKey) -> Option<&RegisteredControl> {
        self.controls.get(key)
    }

    /// All definitions registered for `id`, primary first.
    pub fn variants<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a RegisteredControl> + 'a {
        self.controls
            .range(ControlKey::primary(id)..)
            .take_while(move |(key, _)| key.id == id)
            .map(|(_, control)| control)
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    pub fn duplicates(&self) -> &[DuplicateNotice] {
        &self.duplicates
    }

    /// Controls matching `selection`, in natural id order.
    pub fn select(&self, selection: &Selection) -> RegistryResult<Vec<&RegisteredControl>> {
        let include = build_globs(&selection.include)?;
        let exclude = build_globs(&selection.exclude)?;

        Ok(self
            .controls
            .values()
            .filter(|c| include.as_ref().map_or(true, |set| set.is_match(c.id())))
            .filter(|c| !exclude.as_ref().is_some_and(|set| set.is_match(c.id())))
            .filter(|c| {
                selection.categories.is_empty()
                    || c.control
                        .categories
                        .iter()
                        .any(|cat| selection.categories.contains(cat))
            })
            .collect())
    }

    /// Stable content digest (`sha256:<hex>`) over keys and definitions.
    ///
    /// Origins are excluded so that moving a file does not change the digest.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, registered) in &self.controls {
            hasher.update(key.to_string().as_bytes());
            hasher.update([0u8]);
            match serde_json::to_vec(registered.control.as_ref()) {
                Ok(bytes) => hasher.update(&bytes),
                Err(_) => hasher.update(registered.control.id.as_bytes()),
            }
            hasher.update([0u8]);
        }
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

fn build_globs(patterns: &[String]) -> RegistryResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| RegistryError::InvalidSelection {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| RegistryError::InvalidSelection {
            pattern: patterns.join(","),
            message: e.to_string(),
        })
}
