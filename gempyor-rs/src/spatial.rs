//! Spatial grouping of the subpops a modifier affects.
//!
//! Every affected subpop ends up in exactly one unit: either alone in
//! `ungrouped` (own draw) or inside one of the `grouped` clusters (one draw
//! shared by all members). Units are sorted so the on-disk group key, the
//! members joined by `,`, does not depend on config ordering.

use std::collections::BTreeSet;

use crate::config::SubpopGroupsConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialGroups {
    pub ungrouped: Vec<String>,
    pub grouped: Vec<Vec<String>>,
}

impl SpatialGroups {
    /// Partition `affected` according to `subpop_groups`.
    pub fn resolve(
        modifier: &str,
        subpop_groups: Option<&SubpopGroupsConfig>,
        affected: &[String],
    ) -> Result<Self> {
        let mut groups = match subpop_groups {
            None => SpatialGroups {
                ungrouped: affected.to_vec(),
                grouped: Vec::new(),
            },
            Some(SubpopGroupsConfig::Keyword(word)) if word == "all" => SpatialGroups {
                ungrouped: Vec::new(),
                grouped: vec![affected.to_vec()],
            },
            Some(SubpopGroupsConfig::Keyword(word)) => {
                return Err(Error::InvalidField {
                    modifier: modifier.to_string(),
                    field: "subpop_groups",
                    reason: format!("expected \"all\" or a list of subpops, got \"{word}\""),
                });
            }
            Some(SubpopGroupsConfig::Flat(group)) => {
                Self::with_remainder(vec![group.clone()], affected)
            }
            Some(SubpopGroupsConfig::Nested(grouped)) => {
                Self::with_remainder(grouped.clone(), affected)
            }
        };
        groups.grouped.retain(|g| !g.is_empty());

        let members: Vec<String> = groups.members().map(str::to_string).collect();
        let resolved: BTreeSet<String> = members.iter().cloned().collect();
        let expected: BTreeSet<String> = affected.iter().cloned().collect();
        if resolved != expected {
            return Err(Error::IncompletePartition {
                modifier: modifier.to_string(),
                resolved,
                affected: expected,
            });
        }
        if resolved.len() != members.len() {
            return Err(Error::DuplicateGroupMembership {
                modifier: modifier.to_string(),
                members,
            });
        }

        for group in &mut groups.grouped {
            group.sort();
        }
        groups.grouped.sort();
        groups.ungrouped.sort();
        Ok(groups)
    }

    fn with_remainder(grouped: Vec<Vec<String>>, affected: &[String]) -> Self {
        let taken: BTreeSet<&String> = grouped.iter().flatten().collect();
        let ungrouped = affected
            .iter()
            .filter(|s| !taken.contains(s))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        SpatialGroups { ungrouped, grouped }
    }

    /// Every subpop, grouped members first.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.grouped
            .iter()
            .flatten()
            .chain(self.ungrouped.iter())
            .map(String::as_str)
    }

    /// Draw units: each ungrouped subpop alone, then each group.
    pub fn units(&self) -> impl Iterator<Item = &[String]> {
        self.ungrouped
            .iter()
            .map(std::slice::from_ref)
            .chain(self.grouped.iter().map(Vec::as_slice))
    }

    pub fn len(&self) -> usize {
        self.ungrouped.len() + self.grouped.iter().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key under which a unit is persisted: members joined by `,`.
pub fn group_key(unit: &[String]) -> String {
    unit.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_groups_means_all_ungrouped() {
        let affected = names(&["C", "A", "B"]);
        let groups = SpatialGroups::resolve("m", None, &affected).unwrap();
        assert_eq!(groups.ungrouped, names(&["A", "B", "C"]));
        assert!(groups.grouped.is_empty());
    }

    #[test]
    fn test_all_keyword_makes_one_group() {
        let affected = names(&["B", "A"]);
        let cfg = SubpopGroupsConfig::Keyword("all".to_string());
        let groups = SpatialGroups::resolve("m", Some(&cfg), &affected).unwrap();
        assert_eq!(groups.grouped, vec![names(&["A", "B"])]);
        assert!(groups.ungrouped.is_empty());
    }

    #[test]
    fn test_flat_list_is_single_group_with_remainder() {
        let affected = names(&["A", "B", "C"]);
        let cfg = SubpopGroupsConfig::Flat(names(&["B", "A"]));
        let groups = SpatialGroups::resolve("m", Some(&cfg), &affected).unwrap();
        assert_eq!(groups.grouped, vec![names(&["A", "B"])]);
        assert_eq!(groups.ungrouped, names(&["C"]));
        let keys: Vec<String> = groups.units().map(group_key).collect();
        assert_eq!(keys, vec!["C".to_string(), "A,B".to_string()]);
    }

    #[test]
    fn test_partition_covers_affected_exactly() {
        let affected = names(&["A", "B", "C", "D", "E"]);
        let cfg = SubpopGroupsConfig::Nested(vec![names(&["E", "C"]), names(&["A"])]);
        let groups = SpatialGroups::resolve("m", Some(&cfg), &affected).unwrap();
        let mut members: Vec<&str> = groups.members().collect();
        members.sort();
        assert_eq!(members, vec!["A", "B", "C", "D", "E"]);
        assert_eq!(groups.len(), affected.len());
    }

    #[test]
    fn test_group_outside_affected_is_rejected() {
        let affected = names(&["A", "B"]);
        let cfg = SubpopGroupsConfig::Nested(vec![names(&["A", "Z"])]);
        let err = SpatialGroups::resolve("m", Some(&cfg), &affected).unwrap_err();
        assert!(matches!(err, Error::IncompletePartition { .. }));
    }

    #[test]
    fn test_subpop_in_two_groups_is_rejected() {
        let affected = names(&["A", "B", "C"]);
        let cfg = SubpopGroupsConfig::Nested(vec![names(&["A", "B"]), names(&["B", "C"])]);
        let err = SpatialGroups::resolve("m", Some(&cfg), &affected).unwrap_err();
        assert!(matches!(err, Error::DuplicateGroupMembership { .. }));
    }

    #[test]
    fn test_unknown_keyword_is_rejected() {
        let cfg = SubpopGroupsConfig::Keyword("some".to_string());
        assert!(SpatialGroups::resolve("m", Some(&cfg), &names(&["A"])).is_err());
    }
}
