//! Fleet selection among feasible candidates.

use crate::fleet_info::FleetInfo;

/// Pick the fleet with the most free units of `class`.
///
/// Only a strictly greater value replaces the current best, so ties keep
/// the earliest candidate. Returns the fleet and its free units.
pub fn select_most_available<'a>(
    candidates: &[&'a FleetInfo],
    class: &str,
) -> Option<(&'a FleetInfo, i64)> {
    let mut best: Option<(&'a FleetInfo, i64)> = None;
    for &info in candidates {
        let free = info.max_allocatable(class);
        if best.is_none_or(|(_, top)| free > top) {
            best = Some((info, free));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Fleet;

    fn infos(caps: &[(&str, i64)]) -> Vec<FleetInfo> {
        caps.iter()
            .map(|(name, units)| FleetInfo::new(Fleet::new(*name).with_allocatable("typeX", *units)))
            .collect()
    }

    #[test]
    fn picks_greatest_free_capacity() {
        let fleets = infos(&[("C1", 2), ("C2", 5), ("C3", 3)]);
        let refs: Vec<&FleetInfo> = fleets.iter().collect();
        let (best, free) = select_most_available(&refs, "typeX").unwrap();
        assert_eq!(best.name(), "C2");
        assert_eq!(free, 5);
    }

    #[test]
    fn ties_keep_first_candidate() {
        let fleets = infos(&[("C1", 4), ("C2", 4)]);
        let refs: Vec<&FleetInfo> = fleets.iter().collect();
        assert_eq!(select_most_available(&refs, "typeX").unwrap().0.name(), "C1");
    }

    #[test]
    fn empty_candidates_select_nothing() {
        assert!(select_most_available(&[], "typeX").is_none());
    }
}
