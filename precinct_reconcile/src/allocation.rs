use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use snafu::prelude::*;

use crate::config::*;

/// One entry of an apportionment: the share of the pool for this entry is
/// `value / denominator * pool`.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct ShareInput {
    pub value: u64,
    /// A zero denominator is treated as 1 so that the share stays defined.
    pub denominator: u64,
}

// Exact share of one entry: floor plus a fraction rem / denom.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
struct Share {
    floor: u64,
    rem: u128,
    denom: u128,
}

impl Share {
    fn compute(input: &ShareInput, pool: u64) -> Share {
        let denom = input.denominator.max(1) as u128;
        let numer = input.value as u128 * pool as u128;
        Share {
            floor: (numer / denom) as u64,
            rem: numer % denom,
            denom,
        }
    }

    // Compares the fractional parts without rounding.
    fn cmp_remainder(&self, other: &Share) -> Ordering {
        (self.rem * other.denom).cmp(&(other.rem * self.denom))
    }
}

/// Largest-remainder (Hamilton) apportionment of `pool` over the entries.
///
/// Every entry first receives the floor of its share. The units still missing
/// to reach the pool go one each to the entries with the largest fractional
/// remainders. Equal remainders are resolved in input order.
///
/// Returns None when the shares cannot add up to the pool (the floors already
/// exceed it, or more units are missing than there are entries).
///
/// ```
/// use precinct_reconcile::allocation::{largest_remainder, ShareInput};
///
/// let inputs: Vec<ShareInput> = [34, 33, 33]
///     .iter()
///     .map(|&value| ShareInput { value, denominator: 100 })
///     .collect();
/// assert_eq!(largest_remainder(10, &inputs), Some(vec![4, 3, 3]));
/// ```
pub fn largest_remainder(pool: u64, inputs: &[ShareInput]) -> Option<Vec<u64>> {
    // First pass: floors and remainders.
    let shares: Vec<Share> = inputs.iter().map(|i| Share::compute(i, pool)).collect();
    let floor_total: u64 = shares.iter().map(|s| s.floor).sum();
    if floor_total > pool {
        return None;
    }
    let remaining = (pool - floor_total) as usize;
    if remaining > shares.len() {
        return None;
    }

    // Second pass: round up the largest remainders.
    let mut order: Vec<usize> = (0..shares.len()).collect();
    // Stable sort: ties keep the input order.
    order.sort_by(|&a, &b| shares[b].cmp_remainder(&shares[a]));
    let mut res: Vec<u64> = shares.iter().map(|s| s.floor).collect();
    for &idx in order.iter().take(remaining) {
        res[idx] += 1;
    }
    debug!(
        "largest_remainder: pool {} floors {} rounded up {}",
        pool, floor_total, remaining
    );
    Some(res)
}

/// Distributes the votes reported for whole groups (typically counties) to the
/// precincts of each group, in proportion to the votes the precincts already have.
///
/// Arguments:
/// * `table` the precinct table, consumed
/// * `aggregates` the votes to distribute, keyed by group. Several rows for the
///   same group are added up.
/// * `races` the vote columns to distribute
/// * `group_column` the attribute holding the group of each precinct
/// * `all_groups_empty` every precinct reported zero votes: every precinct
///   then counts for one vote when the shares are computed
///
/// For every group and race with a non-zero pool:
/// - if the precincts of the group have votes for the race, each precinct gets
///   its share of the race votes;
/// - otherwise the pool is spread by the total votes of the precincts, and if
///   the group has no votes at all, evenly.
///
/// The totals of every group and race are checked after the allocation: the
/// table is only returned if they equal the votes before plus the pool.
pub fn allocate(
    table: ResultTable,
    aggregates: &[AggregateRow],
    races: &[String],
    group_column: &str,
    all_groups_empty: bool,
) -> ReconcileResult<(ResultTable, Vec<AllocationStats>)> {
    for race in races.iter() {
        ensure!(
            table.vote_column(race).is_some(),
            UnknownVoteColumnSnafu { column: race }
        );
    }

    // The pools to distribute, per group and race.
    let mut pools: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
    for agg in aggregates.iter() {
        let group_pools = pools.entry(agg.group.clone()).or_insert_with(BTreeMap::new);
        for (column, count) in agg.votes.iter() {
            ensure!(
                table.vote_column(column).is_some(),
                UnknownVoteColumnSnafu { column }
            );
            if !races.contains(column) {
                debug!("allocate: column {} is not allocated", column);
                continue;
            }
            *group_pools.entry(column.clone()).or_insert(0) += count;
        }
    }

    let ResultTable {
        attribute_columns,
        vote_columns,
        mut rows,
    } = table;

    // Members of every group, in table order.
    let mut members: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        let group = row
            .attributes
            .get(group_column)
            .context(MissingAttributeSnafu {
                precinct: row.precinct_key.clone(),
                column: group_column,
            })?;
        members.entry(group.clone()).or_insert_with(Vec::new).push(idx);
    }

    let total_votes: Vec<u64> = rows
        .iter()
        .map(|row| {
            if all_groups_empty {
                1
            } else {
                races.iter().map(|r| row.votes_for(r)).sum()
            }
        })
        .collect();

    if all_groups_empty {
        for race in races.iter() {
            if rows.iter().any(|r| r.votes_for(race) > 0) {
                warn!(
                    "Allocating to all empty precincts, but race {} already has votes",
                    race
                );
                break;
            }
        }
    }

    let before: HashMap<&String, u64> = races
        .iter()
        .map(|r| (r, rows.iter().map(|row| row.votes_for(r)).sum()))
        .collect();

    let no_members: Vec<usize> = Vec::new();
    let mut stats: Vec<AllocationStats> = Vec::new();
    for (group, group_pools) in pools.iter() {
        let idxs = members.get(group).unwrap_or(&no_members);
        for race in races.iter() {
            let pool = group_pools.get(race).cloned().unwrap_or(0);
            if pool == 0 {
                continue;
            }
            let race_before: u64 = idxs.iter().map(|&i| rows[i].votes_for(race)).sum();

            let special = race_before == 0;
            let inputs: Vec<ShareInput> = if !special {
                idxs.iter()
                    .map(|&i| ShareInput {
                        value: rows[i].votes_for(race),
                        denominator: race_before,
                    })
                    .collect()
            } else {
                warn!(
                    "Special allocation needed for race {} in group {}: no precinct votes for {} votes to allocate",
                    race, group, pool
                );
                let group_total: u64 = idxs.iter().map(|&i| total_votes[i]).sum();
                if group_total == 0 {
                    // Nothing to be proportional to: every precinct counts for one.
                    idxs.iter()
                        .map(|_| ShareInput {
                            value: 1,
                            denominator: idxs.len() as u64,
                        })
                        .collect()
                } else {
                    idxs.iter()
                        .map(|&i| ShareInput {
                            value: total_votes[i],
                            denominator: group_total,
                        })
                        .collect()
                }
            };

            let expected = race_before + pool;
            let allocated = largest_remainder(pool, &inputs).context(AllocationMismatchSnafu {
                group: group.clone(),
                race: race.clone(),
                expected,
                actual: race_before,
            })?;

            let floor_total: u64 = inputs
                .iter()
                .map(|i| Share::compute(i, pool).floor)
                .sum();
            for (&i, add) in idxs.iter().zip(allocated.iter()) {
                *rows[i].votes.entry(race.clone()).or_insert(0) += add;
            }

            let actual: u64 = idxs.iter().map(|&i| rows[i].votes_for(race)).sum();
            ensure!(
                actual == expected,
                AllocationMismatchSnafu {
                    group: group.clone(),
                    race: race.clone(),
                    expected,
                    actual,
                }
            );
            debug!(
                "allocate: group {} race {}: {} votes allocated to {} precincts",
                group,
                race,
                pool,
                idxs.len()
            );
            stats.push(AllocationStats {
                group: group.clone(),
                race: race.clone(),
                pool,
                rounded_up: pool - floor_total,
                special,
            });
        }
    }

    // Whole-table check, per race.
    for race in races.iter() {
        let pool_total: u64 = pools.values().filter_map(|p| p.get(race)).sum();
        let expected = before.get(race).cloned().unwrap_or(0) + pool_total;
        let actual: u64 = rows.iter().map(|row| row.votes_for(race)).sum();
        ensure!(
            actual == expected,
            AllocationMismatchSnafu {
                group: "*",
                race: race.clone(),
                expected,
                actual,
            }
        );
    }

    info!(
        "allocate: {} group/race pools allocated, {} special",
        stats.len(),
        stats.iter().filter(|s| s.special).count()
    );

    Ok((
        ResultTable {
            attribute_columns,
            vote_columns,
            rows,
        },
        stats,
    ))
}
