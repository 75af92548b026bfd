//! Object types shared across fleetgrid crates.
//!
//! An [`Instance`] is a schedulable workload that asks for one unit of a
//! resource class. A [`Fleet`] is a placement target that reports how many
//! units of each class it can hold, plus labels and taints that restrict
//! which instances may land on it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Name of a fleet; fleets are keyed by name.
pub type FleetName = String;

/// Metadata common to every stored object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ObjectMeta {
    pub name: String,
    /// Assigned by the store on create. Fleets leave it empty.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Bumped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
    /// Unix timestamp (seconds) at which deletion was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<u64>,
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

// ── Instance ──────────────────────────────────────────────────────

/// A workload awaiting or holding a placement on a fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub meta: ObjectMeta,
    pub spec: InstanceSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InstanceSpec {
    /// Resource class this instance consumes one unit of.
    pub resource_class: String,
    /// Restricts candidate fleets by label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fleet_selector: Option<LabelSelector>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    /// Fleet this instance is bound to. Empty while pending.
    #[serde(default)]
    pub fleet_name: FleetName,
}

impl Instance {
    /// Build an unbound instance requesting `resource_class`.
    pub fn new(name: impl Into<String>, resource_class: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::named(name),
            spec: InstanceSpec {
                resource_class: resource_class.into(),
                ..InstanceSpec::default()
            },
        }
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.meta.uid = uid.into();
        self
    }

    pub fn with_fleet(mut self, fleet: impl Into<String>) -> Self {
        self.spec.fleet_name = fleet.into();
        self
    }

    pub fn with_toleration(mut self, toleration: Toleration) -> Self {
        self.spec.tolerations.push(toleration);
        self
    }

    pub fn with_selector(mut self, selector: LabelSelector) -> Self {
        self.spec.fleet_selector = Some(selector);
        self
    }

    pub fn uid(&self) -> &str {
        &self.meta.uid
    }

    pub fn is_bound(&self) -> bool {
        !self.spec.fleet_name.is_empty()
    }

    pub fn is_deleting(&self) -> bool {
        self.meta.deletion_timestamp.is_some()
    }
}

// ── Fleet ─────────────────────────────────────────────────────────

/// A resource container that instances are placed on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fleet {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: FleetSpec,
    #[serde(default)]
    pub status: FleetStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FleetSpec {
    #[serde(default)]
    pub taints: Vec<Taint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FleetStatus {
    /// Resource class → units the fleet can hold in total.
    #[serde(default)]
    pub allocatable: HashMap<String, i64>,
}

impl Fleet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::named(name),
            spec: FleetSpec::default(),
            status: FleetStatus::default(),
        }
    }

    pub fn with_allocatable(mut self, class: impl Into<String>, units: i64) -> Self {
        self.status.allocatable.insert(class.into(), units);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.spec.taints.push(taint);
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Declared units of `class`; zero when the class is not offered.
    pub fn allocatable(&self, class: &str) -> i64 {
        self.status.allocatable.get(class).copied().unwrap_or(0)
    }
}

// ── Taints and tolerations ────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

/// Marks a fleet as off-limits to instances that do not tolerate it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Taint {
    pub key: String,
    #[serde(default)]
    pub value: String,
    pub effect: TaintEffect,
}

impl Taint {
    pub fn new(key: impl Into<String>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            effect,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Toleration {
    /// Empty matches every key, but only with [`TolerationOperator::Exists`].
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: String,
    /// `None` matches every effect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    pub fn exists(key: impl Into<String>, effect: Option<TaintEffect>) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Exists,
            value: String::new(),
            effect,
        }
    }

    pub fn equal(
        key: impl Into<String>,
        value: impl Into<String>,
        effect: Option<TaintEffect>,
    ) -> Self {
        Self {
            key: key.into(),
            operator: TolerationOperator::Equal,
            value: value.into(),
            effect,
        }
    }

    /// Whether this toleration permits the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }

        if self.key.is_empty() {
            if self.operator != TolerationOperator::Exists {
                return false;
            }
        } else if self.key != taint.key {
            return false;
        }

        match self.operator {
            TolerationOperator::Exists => true,
            TolerationOperator::Equal => self.value == taint.value,
        }
    }
}

/// Returns the first taint not tolerated by any of `tolerations`.
pub fn find_untolerated_taint<'a>(
    taints: &'a [Taint],
    tolerations: &[Toleration],
) -> Option<&'a Taint> {
    taints
        .iter()
        .find(|taint| !tolerations.iter().any(|t| t.tolerates(taint)))
}

// ── Label selectors ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Label query over fleet labels. An empty selector matches every fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_expression(
        mut self,
        key: impl Into<String>,
        operator: SelectorOperator,
        values: &[&str],
    ) -> Self {
        self.match_expressions.push(SelectorRequirement {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let labels_ok = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v));
        labels_ok && self.match_expressions.iter().all(|req| req.matches(labels))
    }
}

impl SelectorRequirement {
    fn matches(&self, labels: &HashMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            SelectorOperator::In => value.is_some_and(|v| self.values.contains(v)),
            SelectorOperator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            SelectorOperator::Exists => value.is_some(),
            SelectorOperator::DoesNotExist => value.is_none(),
        }
    }
}
