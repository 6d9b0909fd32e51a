use std::collections::BTreeMap;

use log::{debug, info};

use crate::config::*;

/// The (level, district) pairs a precinct cast votes in.
pub type PrecinctAssignmentList = Vec<(OfficeLevel, String)>;

/// Levels at which a precinct spans several districts, with the districts found.
pub type SplitAssignment = BTreeMap<OfficeLevel, Vec<String>>;

/// Collects the districts a precinct reported votes for.
///
/// Only non-zero districted columns count. A precinct with no votes at a level
/// does not appear at that level, even if it belongs to a district there.
/// Pairs are unique and kept in column order.
pub fn precinct_assignments(row: &ResultRow, columns: &[VoteColumn]) -> PrecinctAssignmentList {
    let mut res: PrecinctAssignmentList = Vec::new();
    for col in columns.iter() {
        if row.votes_for(&col.id) == 0 {
            continue;
        }
        if let Some(Office {
            level,
            district: Some(district),
        }) = &col.office
        {
            let pair = (*level, district.clone());
            if !res.contains(&pair) {
                res.push(pair);
            }
        }
    }
    res
}

/// Returns the levels where the precinct is split, or None if it is not split.
///
/// A level is split when more than one distinct district shows up for it.
/// Absence of votes is not treated as absence of membership: a precinct that
/// straddles two districts but only reported votes in one of them is not
/// detected.
pub fn detect_split(assignments: &[(OfficeLevel, String)]) -> Option<SplitAssignment> {
    let mut by_level: BTreeMap<OfficeLevel, Vec<String>> = BTreeMap::new();
    for (level, district) in assignments.iter() {
        let e = by_level.entry(*level).or_insert_with(Vec::new);
        if !e.contains(district) {
            e.push(district.clone());
        }
    }
    by_level.retain(|_, districts| districts.len() > 1);
    if by_level.is_empty() {
        None
    } else {
        Some(by_level)
    }
}

/// The districts at one level of a split, if the precinct is split at that level.
pub fn splits_at_level(split: &SplitAssignment, level: OfficeLevel) -> Option<&Vec<String>> {
    split.get(&level)
}

/// Runs the detector on every row of the table.
pub fn detect_table_splits(table: &ResultTable) -> BTreeMap<String, SplitAssignment> {
    let mut res: BTreeMap<String, SplitAssignment> = BTreeMap::new();
    for row in table.rows.iter() {
        let assignments = precinct_assignments(row, &table.vote_columns);
        if let Some(split) = detect_split(&assignments) {
            debug!(
                "detect_table_splits: precinct {} is split: {:?}",
                row.precinct_key, split
            );
            res.insert(row.precinct_key.clone(), split);
        }
    }
    for level in OfficeLevel::ALL {
        let count = res.values().filter(|s| s.contains_key(&level)).count();
        if count > 0 {
            info!("{} precincts split at level {}", count, level);
        }
    }
    info!(
        "{} split precincts out of {} rows",
        res.len(),
        table.rows.len()
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_column;

    fn pair(level: OfficeLevel, d: &str) -> (OfficeLevel, String) {
        (level, d.to_string())
    }

    #[test]
    fn single_district_per_level_is_not_split() {
        let a = vec![
            pair(OfficeLevel::Congress, "05"),
            pair(OfficeLevel::StateHouse, "012"),
            pair(OfficeLevel::StateSenate, "03"),
        ];
        assert_eq!(detect_split(&a), None);
        assert_eq!(detect_split(&[]), None);
    }

    #[test]
    fn split_levels_are_reported() {
        let a = vec![
            pair(OfficeLevel::Congress, "05"),
            pair(OfficeLevel::StateHouse, "012"),
            pair(OfficeLevel::Congress, "06"),
            pair(OfficeLevel::Congress, "05"),
        ];
        let split = detect_split(&a).unwrap();
        assert_eq!(split.len(), 1);
        assert_eq!(
            splits_at_level(&split, OfficeLevel::Congress),
            Some(&vec!["05".to_string(), "06".to_string()])
        );
        assert_eq!(splits_at_level(&split, OfficeLevel::StateHouse), None);
    }

    #[test]
    fn zero_votes_do_not_count_as_membership() {
        let columns = vec![
            classify_column("U.S. Representative in Congress District 5-A Bee-PARTY:DEM").unwrap(),
            classify_column("U.S. Representative in Congress District 6-C Dee-PARTY:REP").unwrap(),
            classify_column("President-E Eff-PARTY:DEM").unwrap(),
        ];
        let mut votes = BTreeMap::new();
        votes.insert(columns[0].id.clone(), 10);
        votes.insert(columns[1].id.clone(), 0);
        votes.insert(columns[2].id.clone(), 30);
        let row = ResultRow {
            precinct_key: "P1".to_string(),
            attributes: BTreeMap::new(),
            votes,
            districts: BTreeMap::new(),
            geometry: None,
        };
        let a = precinct_assignments(&row, &columns);
        assert_eq!(a, vec![pair(OfficeLevel::Congress, "05")]);
        assert_eq!(detect_split(&a), None);
    }
}
