//! Fleet filtering for a pending instance.
//!
//! A fleet is feasible when it passes every check:
//! - **Taints**: each fleet taint is tolerated by some instance toleration
//! - **Selector**: the instance's fleet selector (if any) matches the fleet labels
//! - **Capacity**: at least one unit of the instance's resource class is free

use std::collections::BTreeMap;
use std::fmt;

use fleet_core::{Instance, find_untolerated_taint};

use crate::fleet_info::FleetInfo;

/// Why a fleet was rejected. Ordered the way checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterReason {
    UntoleratedTaint,
    SelectorMismatch,
    InsufficientCapacity,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FilterReason::UntoleratedTaint => "untolerated taint",
            FilterReason::SelectorMismatch => "fleet selector mismatch",
            FilterReason::InsufficientCapacity => "insufficient capacity",
        };
        f.write_str(text)
    }
}

/// Check one fleet. Returns the first failing reason.
pub fn check_fleet(instance: &Instance, info: &FleetInfo) -> Result<(), FilterReason> {
    let Some(fleet) = info.fleet() else {
        return Err(FilterReason::InsufficientCapacity);
    };

    if find_untolerated_taint(&fleet.spec.taints, &instance.spec.tolerations).is_some() {
        return Err(FilterReason::UntoleratedTaint);
    }

    if let Some(selector) = &instance.spec.fleet_selector {
        if !selector.matches(&fleet.meta.labels) {
            return Err(FilterReason::SelectorMismatch);
        }
    }

    if info.max_allocatable(&instance.spec.resource_class) < 1 {
        return Err(FilterReason::InsufficientCapacity);
    }

    Ok(())
}

/// Outcome of filtering every fleet of a snapshot.
#[derive(Debug, Default)]
pub struct FilterResult<'a> {
    /// Feasible fleets, in input order.
    pub feasible: Vec<&'a FleetInfo>,
    pub rejected: BTreeMap<FilterReason, usize>,
}

impl FilterResult<'_> {
    /// Human-readable account of the rejections, e.g.
    /// `0/3 fleets are available: 1 untolerated taint, 2 insufficient capacity`.
    pub fn summary(&self, total: usize) -> String {
        let mut out = format!("{}/{total} fleets are available", self.feasible.len());
        if !self.rejected.is_empty() {
            let parts: Vec<String> = self
                .rejected
                .iter()
                .map(|(reason, count)| format!("{count} {reason}"))
                .collect();
            out.push_str(": ");
            out.push_str(&parts.join(", "));
        }
        out
    }
}

pub fn filter_fleets<'a>(instance: &Instance, fleets: &'a [FleetInfo]) -> FilterResult<'a> {
    let mut result = FilterResult::default();
    for info in fleets {
        match check_fleet(instance, info) {
            Ok(()) => result.feasible.push(info),
            Err(reason) => *result.rejected.entry(reason).or_insert(0) += 1,
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{Fleet, LabelSelector, SelectorOperator, Taint, TaintEffect, Toleration};

    fn info(fleet: Fleet) -> FleetInfo {
        FleetInfo::new(fleet)
    }

    #[test]
    fn untolerated_taint_rejects_fleet() {
        // C1 and C3 are tainted; the instance tolerates nothing.
        let fleets = vec![
            info(
                Fleet::new("C1")
                    .with_allocatable("typeX", 5)
                    .with_taint(Taint::new("k", TaintEffect::NoSchedule)),
            ),
            info(Fleet::new("C2").with_allocatable("typeX", 5)),
            info(
                Fleet::new("C3")
                    .with_allocatable("typeX", 5)
                    .with_taint(Taint::new("k", TaintEffect::NoSchedule)),
            ),
        ];
        let w = Instance::new("w", "typeX").with_uid("w");

        let result = filter_fleets(&w, &fleets);
        let names: Vec<&str> = result.feasible.iter().map(|f| f.name()).collect();
        assert_eq!(names, ["C2"]);
        assert_eq!(result.rejected.get(&FilterReason::UntoleratedTaint), Some(&2));
    }

    #[test]
    fn toleration_matches_only_its_own_key() {
        let w = Instance::new("w", "typeX")
            .with_toleration(Toleration::exists("k", Some(TaintEffect::NoSchedule)));
        let matching = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("k", TaintEffect::NoSchedule)),
        );
        let other_key = info(
            Fleet::new("C2")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("k2", TaintEffect::NoSchedule)),
        );
        assert_eq!(check_fleet(&w, &matching), Ok(()));
        assert_eq!(check_fleet(&w, &other_key), Err(FilterReason::UntoleratedTaint));
    }

    #[test]
    fn wildcard_exists_toleration_passes_every_taint() {
        let fleet = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("a", TaintEffect::NoSchedule))
                .with_taint(Taint::new("b", TaintEffect::NoExecute).with_value("x")),
        );
        let w = Instance::new("w", "typeX").with_toleration(Toleration::exists("", None));
        assert_eq!(check_fleet(&w, &fleet), Ok(()));
    }

    #[test]
    fn empty_key_with_equal_tolerates_nothing() {
        let fleet = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("a", TaintEffect::NoSchedule)),
        );
        let w = Instance::new("w", "typeX").with_toleration(Toleration::equal("", "", None));
        assert_eq!(check_fleet(&w, &fleet), Err(FilterReason::UntoleratedTaint));
    }

    #[test]
    fn effect_must_match_when_set() {
        let fleet = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("a", TaintEffect::NoExecute)),
        );
        let wrong = Instance::new("w", "typeX")
            .with_toleration(Toleration::exists("a", Some(TaintEffect::NoSchedule)));
        let right = Instance::new("w", "typeX")
            .with_toleration(Toleration::exists("a", Some(TaintEffect::NoExecute)));
        assert_eq!(check_fleet(&wrong, &fleet), Err(FilterReason::UntoleratedTaint));
        assert_eq!(check_fleet(&right, &fleet), Ok(()));
    }

    #[test]
    fn every_taint_needs_a_toleration() {
        let fleet = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_taint(Taint::new("a", TaintEffect::NoSchedule).with_value("1"))
                .with_taint(Taint::new("b", TaintEffect::NoSchedule)),
        );
        let partial = Instance::new("w", "typeX")
            .with_toleration(Toleration::equal("a", "1", None));
        assert_eq!(check_fleet(&partial, &fleet), Err(FilterReason::UntoleratedTaint));

        let full = partial.with_toleration(Toleration::exists("b", None));
        assert_eq!(check_fleet(&full, &fleet), Ok(()));
    }

    #[test]
    fn selector_mismatch_rejects_fleet() {
        let fleet = info(
            Fleet::new("C1")
                .with_allocatable("typeX", 1)
                .with_label("region", "eu"),
        );
        let us = Instance::new("w", "typeX")
            .with_selector(LabelSelector::default().with_label("region", "us"));
        let not_us = Instance::new("w", "typeX").with_selector(
            LabelSelector::default().with_expression("region", SelectorOperator::NotIn, &["us"]),
        );
        assert_eq!(check_fleet(&us, &fleet), Err(FilterReason::SelectorMismatch));
        assert_eq!(check_fleet(&not_us, &fleet), Ok(()));
    }

    #[test]
    fn zero_capacity_rejects_fleet() {
        let fleet = info(Fleet::new("C1").with_allocatable("typeX", 0));
        let w = Instance::new("w", "typeX");
        assert_eq!(check_fleet(&w, &fleet), Err(FilterReason::InsufficientCapacity));

        let other_class = Instance::new("w", "typeY");
        let fleet = info(Fleet::new("C1").with_allocatable("typeX", 3));
        assert_eq!(
            check_fleet(&other_class, &fleet),
            Err(FilterReason::InsufficientCapacity)
        );
    }

    #[test]
    fn summary_lists_counts_per_reason() {
        let fleets = vec![
            info(
                Fleet::new("C1")
                    .with_allocatable("typeX", 1)
                    .with_taint(Taint::new("k", TaintEffect::NoSchedule)),
            ),
            info(Fleet::new("C2")),
            info(Fleet::new("C3")),
        ];
        let w = Instance::new("w", "typeX");
        let result = filter_fleets(&w, &fleets);
        assert!(result.feasible.is_empty());
        assert_eq!(
            result.summary(fleets.len()),
            "0/3 fleets are available: 1 untolerated taint, 2 insufficient capacity"
        );
    }
}
