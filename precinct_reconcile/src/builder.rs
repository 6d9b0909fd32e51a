pub use crate::config::*;

use std::collections::{BTreeMap, HashSet};

use geo::MultiPolygon;
use snafu::prelude::*;

use crate::classifier::classify_column;

/// Marker used by the result files for "no district at this level".
pub const NOT_APPLICABLE: &str = "NA";

/// A builder for the working table.
///
/// ```
/// pub use precinct_reconcile::builder::Builder;
/// # use precinct_reconcile::ReconcileError;
///
/// let mut builder = Builder::new(&["county".to_string()])?
///     .contests(&[
///         "U.S. Representative in Congress District 5-Ann Bee-PARTY:DEM".to_string(),
///         "U.S. Representative in Congress District 6-Cy Dee-PARTY:REP".to_string(),
///     ])?;
///
/// builder.add_row_simple("P1", &["ALA".to_string()], &[12, 0])?;
/// let table = builder.build();
/// assert_eq!(table.rows.len(), 1);
///
/// # Ok::<(), ReconcileError>(())
/// ```
pub struct Builder {
    pub(crate) _attribute_columns: Vec<String>,
    pub(crate) _vote_columns: Vec<VoteColumn>,
    pub(crate) _membership_columns: Vec<(OfficeLevel, String)>,
    pub(crate) _rows: Vec<ResultRow>,
    pub(crate) _keys: HashSet<String>,
}

impl Builder {
    pub fn new(attribute_columns: &[String]) -> ReconcileResult<Builder> {
        Ok(Builder {
            _attribute_columns: attribute_columns.to_vec(),
            _vote_columns: Vec::new(),
            _membership_columns: Vec::new(),
            _rows: Vec::new(),
            _keys: HashSet::new(),
        })
    }

    /// Adds vote columns from contest labels. Every label must be recognized
    /// by the classifier.
    pub fn contests(mut self, labels: &[String]) -> ReconcileResult<Builder> {
        for label in labels.iter() {
            self._vote_columns.push(classify_column(label)?);
        }
        Ok(self)
    }

    /// Adds vote columns that are not attributed to an office.
    pub fn unclassified(mut self, ids: &[String]) -> ReconcileResult<Builder> {
        self._vote_columns
            .extend(ids.iter().map(|id| VoteColumn::unclassified(id)));
        Ok(self)
    }

    /// Declares which attribute column holds the district of each precinct at a level.
    pub fn membership_column(mut self, level: OfficeLevel, column: &str) -> ReconcileResult<Builder> {
        ensure!(
            self._attribute_columns.iter().any(|c| c == column),
            MissingAttributeSnafu {
                precinct: "*",
                column
            }
        );
        self._membership_columns.push((level, column.to_string()));
        Ok(self)
    }

    /// Adds a row, with the attributes and the votes in the order of the columns.
    pub fn add_row_simple(
        &mut self,
        precinct_key: &str,
        attributes: &[String],
        votes: &[u64],
    ) -> ReconcileResult<()> {
        ensure!(
            attributes.len() == self._attribute_columns.len(),
            MalformedRowSnafu {
                precinct: precinct_key,
                expected: self._attribute_columns.len(),
                found: attributes.len(),
            }
        );
        ensure!(
            votes.len() == self._vote_columns.len(),
            MalformedRowSnafu {
                precinct: precinct_key,
                expected: self._vote_columns.len(),
                found: votes.len(),
            }
        );
        let attributes: BTreeMap<String, String> = self
            ._attribute_columns
            .iter()
            .cloned()
            .zip(attributes.iter().cloned())
            .collect();
        let mut districts: BTreeMap<OfficeLevel, DistrictMembership> = BTreeMap::new();
        for (level, column) in self._membership_columns.iter() {
            let membership = match attributes.get(column).map(|s| s.trim()) {
                None | Some("") | Some(NOT_APPLICABLE) => DistrictMembership::NotApplicable,
                Some(d) => DistrictMembership::District(level.pad_district(d)),
            };
            districts.insert(*level, membership);
        }
        let row = ResultRow {
            precinct_key: precinct_key.to_string(),
            attributes,
            votes: self
                ._vote_columns
                .iter()
                .map(|c| c.id.clone())
                .zip(votes.iter().cloned())
                .collect(),
            districts,
            geometry: None,
        };
        self.add_row(row)
    }

    pub fn add_row(&mut self, row: ResultRow) -> ReconcileResult<()> {
        ensure!(
            self._keys.insert(row.precinct_key.clone()),
            DuplicatePrecinctSnafu {
                precinct: row.precinct_key.clone()
            }
        );
        self._rows.push(row);
        Ok(())
    }

    /// Attaches the shape of a precinct that was already added.
    pub fn geometry(&mut self, precinct_key: &str, geometry: MultiPolygon<f64>) -> ReconcileResult<()> {
        let row = self
            ._rows
            .iter_mut()
            .find(|r| r.precinct_key == precinct_key)
            .context(UnknownPrecinctSnafu {
                precinct: precinct_key,
            })?;
        row.geometry = Some(geometry);
        Ok(())
    }

    pub fn build(self) -> ResultTable {
        ResultTable {
            attribute_columns: self._attribute_columns,
            vote_columns: self._vote_columns,
            rows: self._rows,
        }
    }
}
