mod config;
pub mod allocation;
pub mod builder;
pub mod classifier;
pub mod manual;
pub mod splits;
pub mod splitter;

use log::{debug, info, warn};
use snafu::prelude::*;

use std::collections::BTreeMap;

pub use crate::config::*;
pub use crate::splitter::DistrictSet;

use crate::allocation::allocate;
use crate::splits::detect_table_splits;
use crate::splitter::split_table;

/// Runs the reconciliation with the given rules.
///
/// Arguments:
/// * `table` the precinct results. The table is consumed and a new table is
/// returned.
/// * `aggregates` the votes reported for whole allocation groups only
/// * `districts` the authoritative district shapes, used for splitting
/// * `rules` which levels to split, how to group the allocation, in which order
///
/// The totals of every vote column in the returned table are checked: they
/// equal the totals of the input plus the allocated pools.
pub fn run_reconciliation(
    table: ResultTable,
    aggregates: &[AggregateRow],
    districts: &DistrictSet,
    rules: &ReconcileRules,
) -> ReconcileResult<Reconciliation> {
    info!(
        "Processing {:?} precincts, {:?} vote columns, {:?} aggregate rows, {:?} district shapes, rules: {:?}",
        table.rows.len(),
        table.vote_columns.len(),
        aggregates.len(),
        districts.len(),
        rules
    );

    let totals_before: BTreeMap<String, u64> = table
        .vote_columns
        .iter()
        .map(|c| (c.id.clone(), table.column_total(&c.id)))
        .collect();

    let mut report = ReconcileReport {
        split_precincts: detect_table_splits(&table),
        ..Default::default()
    };

    let (cur, allocated) = match rules.stage_order {
        StageOrder::SplitThenAllocate => {
            let split = run_splits(table, districts, rules, &mut report)?;
            run_allocation(split, aggregates, rules, &mut report)?
        }
        StageOrder::AllocateThenSplit => {
            let (alloc, allocated) = run_allocation(table, aggregates, rules, &mut report)?;
            (run_splits(alloc, districts, rules, &mut report)?, allocated)
        }
    };

    // Final check of the column totals.
    for (column, before) in totals_before.iter() {
        let pool: u64 = if allocated {
            aggregates
                .iter()
                .filter_map(|a| a.votes.get(column))
                .sum()
        } else {
            0
        };
        let actual = cur.column_total(column);
        debug!(
            "run_reconciliation: column {}: {} + {} -> {}",
            column, before, pool, actual
        );
        ensure!(
            actual == before + pool,
            AllocationMismatchSnafu {
                group: "*",
                race: column.clone(),
                expected: before + pool,
                actual,
            }
        );
    }

    info!(
        "Done: {} precincts flagged as split, {} split, {} output rows, {} pools allocated",
        report.split_precincts.len(),
        report.splits.len(),
        cur.rows.len(),
        report.allocations.len()
    );
    Ok(Reconciliation { table: cur, report })
}

fn run_splits(
    table: ResultTable,
    districts: &DistrictSet,
    rules: &ReconcileRules,
    report: &mut ReconcileReport,
) -> ReconcileResult<ResultTable> {
    let mut cur = table;
    for &level in rules.split_levels.iter() {
        // Detection runs again at every level: the keys change when rows are split.
        let splits = detect_table_splits(&cur);
        let columns = cur.vote_columns.clone();
        let (next, stats) = split_table(
            cur,
            &splits,
            level,
            districts,
            &columns,
            &rules.excluded_precincts,
        )?;
        cur = next;
        report.splits.extend(stats);
    }
    Ok(cur)
}

fn run_allocation(
    table: ResultTable,
    aggregates: &[AggregateRow],
    rules: &ReconcileRules,
    report: &mut ReconcileReport,
) -> ReconcileResult<(ResultTable, bool)> {
    let group_column = match &rules.allocation_group {
        Some(g) => g,
        None => {
            if !aggregates.is_empty() {
                warn!(
                    "{} aggregate rows but no allocation group: the aggregate votes are not allocated",
                    aggregates.len()
                );
            }
            return Ok((table, false));
        }
    };
    let races: Vec<String> = table.vote_columns.iter().map(|c| c.id.clone()).collect();
    let (res, stats) = allocate(
        table,
        aggregates,
        &races,
        group_column,
        rules.all_groups_empty,
    )?;
    report.allocations.extend(stats);
    Ok((res, true))
}
