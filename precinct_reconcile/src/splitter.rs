use std::collections::{BTreeMap, HashMap};

use geo::{Area, BooleanOps, HasDimensions, MultiPolygon, Validation};
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::config::*;
use crate::splits::{splits_at_level, SplitAssignment};

/// The authoritative district boundaries, indexed by level and padded code.
#[derive(Debug, Clone)]
pub struct DistrictSet {
    shapes: HashMap<(OfficeLevel, String), DistrictShape>,
}

impl DistrictSet {
    /// Indexes the shapes. Codes are padded to the width of their level so that
    /// `5` from a boundary file joins with `05` from the results. Invalid
    /// shapes are repaired here, once.
    pub fn new(shapes: Vec<DistrictShape>) -> ReconcileResult<DistrictSet> {
        let mut res: HashMap<(OfficeLevel, String), DistrictShape> = HashMap::new();
        for shape in shapes {
            let code = shape.level.pad_district(&shape.code);
            let level = shape.level;
            ensure!(
                !res.contains_key(&(level, code.clone())),
                DuplicateDistrictSnafu {
                    level,
                    district: code
                }
            );
            let geometry =
                repair_geometry(&shape.geometry, &format!("{} district {}", level, code))?;
            res.insert(
                (level, code.clone()),
                DistrictShape {
                    level,
                    code,
                    name: shape.name,
                    geometry,
                },
            );
        }
        Ok(DistrictSet { shapes: res })
    }

    pub fn get(&self, level: OfficeLevel, code: &str) -> ReconcileResult<&DistrictShape> {
        let code = level.pad_district(code);
        self.shapes
            .get(&(level, code.clone()))
            .context(UnknownDistrictSnafu {
                level,
                district: code,
            })
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Makes a shape valid before it enters an overlay.
///
/// Valid shapes are returned as they are. Otherwise the shape is overlaid with
/// nothing (the equivalent of a zero-width buffer), which re-nodes
/// self-intersecting rings. If that still does not give a valid shape, or if
/// nothing of the shape is left, the shape is rejected.
pub fn repair_geometry(geom: &MultiPolygon<f64>, what: &str) -> ReconcileResult<MultiPolygon<f64>> {
    if geom.is_valid() {
        return Ok(geom.clone());
    }
    warn!("repair_geometry: {} is not valid, attempting repair", what);
    let repaired = geom.union(&MultiPolygon::new(vec![]));
    ensure!(
        repaired.is_valid() && !repaired.is_empty() && repaired.unsigned_area() > 0.0,
        InvalidGeometrySnafu { what }
    );
    debug!(
        "repair_geometry: {} repaired, area {}",
        what,
        repaired.unsigned_area()
    );
    Ok(repaired)
}

/// The key of the fragment of a precinct in one district.
pub fn fragment_key(old_key: &str, level: OfficeLevel, district: &str) -> String {
    format!("{}-({}-{})", old_key, level.code(), district)
}

// The index of the fragment that receives the votes of a column.
// Columns of the split level go to the fragment of their district. Columns of
// another districted level go to the fragment that overlaps their district the
// most. Statewide and unclassified columns go to the first fragment.
fn column_owner(
    col: &VoteColumn,
    level: OfficeLevel,
    pieces: &[(String, MultiPolygon<f64>)],
    districts: &DistrictSet,
) -> usize {
    if let Some(d) = col.district_at(level) {
        return pieces.iter().position(|(code, _)| code == d).unwrap_or(0);
    }
    let other = match &col.office {
        Some(Office {
            level: l,
            district: Some(d),
        }) => districts.get(*l, d).ok(),
        _ => None,
    };
    let shape = match other {
        Some(shape) => shape,
        None => return 0,
    };
    let mut best = 0;
    let mut best_area = 0.0;
    for (idx, (_, piece)) in pieces.iter().enumerate() {
        let area = piece.intersection(&shape.geometry).unsigned_area();
        // Strict comparison: equal overlaps stay with the earlier fragment.
        if area > best_area {
            best = idx;
            best_area = area;
        }
    }
    best
}

/// Cuts one precinct along the boundaries of the given districts.
///
/// Arguments:
/// * `row` the precinct, with its geometry
/// * `level` the level of the districts
/// * `district_codes` the districts the precinct overlaps, in order
/// * `districts` the authoritative shapes
/// * `vote_columns` the columns subject to attribution. Other columns are
///   copied to every fragment.
///
/// Every fragment inherits all the values of the precinct, then each column in
/// `vote_columns` is kept by one fragment only and zeroed on the others:
/// - a column of `level` stays with the fragment of its district;
/// - a column of another districted level stays with the fragment that
///   overlaps its district the most, so that the next level can be split;
/// - statewide and unclassified columns stay whole on the first fragment.
///   They cannot be attributed geographically, and zeroing them everywhere
///   would lose votes.
///
/// An empty intersection with one of the districts is a `GeometryMismatch`.
pub fn split_precinct(
    row: &ResultRow,
    level: OfficeLevel,
    district_codes: &[String],
    districts: &DistrictSet,
    vote_columns: &[VoteColumn],
) -> ReconcileResult<Vec<ResultRow>> {
    let old_key = row.precinct_key.as_str();
    let raw_shape = row
        .geometry
        .as_ref()
        .context(MissingGeometrySnafu { precinct: old_key })?;
    let shape = repair_geometry(raw_shape, &format!("precinct {}", old_key))?;

    // Intersections first, so that columns can be given to fragments.
    let mut pieces: Vec<(String, MultiPolygon<f64>)> = Vec::new();
    for code in district_codes.iter() {
        let district = districts.get(level, code)?;
        if pieces.iter().any(|(c, _)| *c == district.code) {
            debug!(
                "split_precinct: {}: district {} listed twice, skipping",
                old_key, district.code
            );
            continue;
        }

        let piece = shape.intersection(&district.geometry);
        if piece.is_empty() || piece.unsigned_area() == 0.0 {
            warn!(
                "***Issue merging {} district {} and precinct {}***",
                level, district.code, old_key
            );
            return GeometryMismatchSnafu {
                precinct: old_key,
                level,
                district: district.code.clone(),
                precinct_area: shape.unsigned_area(),
                district_area: district.geometry.unsigned_area(),
                precinct_shape: shape.clone(),
                district_shape: district.geometry.clone(),
            }
            .fail();
        }
        pieces.push((district.code.clone(), piece));
    }

    let owners: Vec<(&VoteColumn, usize)> = vote_columns
        .iter()
        .filter(|col| row.votes_for(&col.id) > 0)
        .map(|col| (col, column_owner(col, level, &pieces, districts)))
        .collect();

    let mut fragments: Vec<ResultRow> = Vec::new();
    for (idx, (code, piece)) in pieces.into_iter().enumerate() {
        let mut fragment = row.clone();
        for (col, owner) in owners.iter() {
            if *owner != idx {
                if let Some(v) = fragment.votes.get_mut(&col.id) {
                    *v = 0;
                }
            }
        }
        fragment.precinct_key = fragment_key(old_key, level, &code);
        fragment
            .districts
            .insert(level, DistrictMembership::District(code));
        debug!(
            "split_precinct: fragment {} area {}",
            fragment.precinct_key,
            piece.unsigned_area()
        );
        fragment.geometry = Some(piece);
        fragments.push(fragment);
    }
    Ok(fragments)
}

/// Replaces a row by its fragments, at the position of the row.
pub fn replace_with_fragments(
    table: ResultTable,
    precinct_key: &str,
    fragments: Vec<ResultRow>,
) -> ReconcileResult<ResultTable> {
    let ResultTable {
        attribute_columns,
        vote_columns,
        mut rows,
    } = table;
    let pos = rows
        .iter()
        .position(|r| r.precinct_key == precinct_key)
        .context(UnknownPrecinctSnafu {
            precinct: precinct_key,
        })?;
    for f in fragments.iter() {
        ensure!(
            !rows.iter().any(|r| r.precinct_key == f.precinct_key),
            DuplicatePrecinctSnafu {
                precinct: f.precinct_key.clone()
            }
        );
    }
    rows.splice(pos..pos + 1, fragments);
    Ok(ResultTable {
        attribute_columns,
        vote_columns,
        rows,
    })
}

/// Splits all the precincts flagged at `level`, except the excluded ones.
///
/// Fragments are computed before their precinct is removed. On error, the
/// partially split table is dropped and the caller has to start again from
/// its own copy.
pub fn split_table(
    table: ResultTable,
    splits: &BTreeMap<String, SplitAssignment>,
    level: OfficeLevel,
    districts: &DistrictSet,
    vote_columns: &[VoteColumn],
    excluded: &[String],
) -> ReconcileResult<(ResultTable, Vec<SplitStats>)> {
    let to_split: Vec<(String, Vec<String>)> = table
        .rows
        .iter()
        .filter(|r| !excluded.contains(&r.precinct_key))
        .filter_map(|r| {
            splits
                .get(&r.precinct_key)
                .and_then(|s| splits_at_level(s, level))
                .map(|codes| (r.precinct_key.clone(), codes.clone()))
        })
        .collect();

    let mut stats: Vec<SplitStats> = Vec::new();
    let mut cur = table;
    for (key, codes) in to_split.iter() {
        info!("Splitting precinct {} => {} {:?}", key, level, codes);
        let row = cur
            .row(key)
            .context(UnknownPrecinctSnafu { precinct: key })?;
        let fragments = split_precinct(row, level, codes, districts, vote_columns)?;
        let fragment_keys: Vec<String> = fragments.iter().map(|f| f.precinct_key.clone()).collect();
        cur = replace_with_fragments(cur, key, fragments)?;
        stats.push(SplitStats {
            precinct_key: key.clone(),
            level,
            fragment_keys,
        });
    }
    info!(
        "split_table: {} precincts split at level {}",
        stats.len(),
        level
    );
    Ok((cur, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_column;
    use crate::splits::{detect_split, detect_table_splits, precinct_assignments};
    use geo::{coord, LineString, Polygon, Rect};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![
            Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }).to_polygon(),
        ])
    }

    fn district(code: &str, geometry: MultiPolygon<f64>) -> DistrictShape {
        DistrictShape {
            level: OfficeLevel::Congress,
            code: code.to_string(),
            name: None,
            geometry,
        }
    }

    fn districts() -> DistrictSet {
        DistrictSet::new(vec![
            district("5", square(0.0, 0.0, 1.0, 2.0)),
            district("6", square(1.0, 0.0, 3.0, 2.0)),
            district("7", square(10.0, 10.0, 11.0, 11.0)),
        ])
        .unwrap()
    }

    fn columns() -> Vec<VoteColumn> {
        vec![
            classify_column("U.S. Representative in Congress District 5-A Bee-PARTY:DEM").unwrap(),
            classify_column("U.S. Representative in Congress District 6-C Dee-PARTY:REP").unwrap(),
            classify_column("President-E Eff-PARTY:DEM").unwrap(),
        ]
    }

    fn table(con5: u64, con6: u64) -> ResultTable {
        let cols = columns();
        let mut rows = Vec::new();
        for (key, c5, c6, geometry) in [
            ("P0", 3, 0, square(0.0, 0.0, 1.0, 1.0)),
            ("P1", con5, con6, square(0.0, 0.0, 2.0, 2.0)),
        ] {
            let mut votes = BTreeMap::new();
            votes.insert(cols[0].id.clone(), c5);
            votes.insert(cols[1].id.clone(), c6);
            votes.insert(cols[2].id.clone(), 40);
            votes.insert("Amendment 1".to_string(), 7);
            let mut attributes = BTreeMap::new();
            attributes.insert("county".to_string(), "ALA".to_string());
            rows.push(ResultRow {
                precinct_key: key.to_string(),
                attributes,
                votes,
                districts: BTreeMap::new(),
                geometry: Some(geometry),
            });
        }
        ResultTable {
            attribute_columns: vec!["county".to_string()],
            vote_columns: cols,
            rows,
        }
    }

    #[test]
    fn district_codes_are_padded() {
        let ds = districts();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(OfficeLevel::Congress, "05").unwrap().code, "05");
        assert_eq!(ds.get(OfficeLevel::Congress, "6").unwrap().code, "06");
        assert!(matches!(
            ds.get(OfficeLevel::StateHouse, "005"),
            Err(ReconcileError::UnknownDistrict { .. })
        ));
    }

    #[test]
    fn duplicate_districts_are_rejected() {
        let res = DistrictSet::new(vec![
            district("5", square(0.0, 0.0, 1.0, 1.0)),
            district("05", square(0.0, 0.0, 1.0, 1.0)),
        ]);
        assert!(matches!(res, Err(ReconcileError::DuplicateDistrict { .. })));
    }

    #[test]
    fn fragments_only_keep_their_district() {
        let t = table(10, 20);
        let cols = columns();
        let row = t.row("P1").unwrap();
        let fragments = split_precinct(
            row,
            OfficeLevel::Congress,
            &["05".to_string(), "06".to_string()],
            &districts(),
            &cols,
        )
        .unwrap();
        assert_eq!(fragments.len(), 2);
        let (f5, f6) = (&fragments[0], &fragments[1]);
        assert_eq!(f5.precinct_key, "P1-(CON-05)");
        assert_eq!(f6.precinct_key, "P1-(CON-06)");
        assert_ne!(f5.precinct_key, row.precinct_key);

        assert_eq!(f5.votes_for(&cols[0].id), 10);
        assert_eq!(f5.votes_for(&cols[1].id), 0);
        assert_eq!(f6.votes_for(&cols[0].id), 0);
        assert_eq!(f6.votes_for(&cols[1].id), 20);
        // Statewide votes stay whole on the first fragment.
        assert_eq!(f5.votes_for(&cols[2].id), 40);
        assert_eq!(f6.votes_for(&cols[2].id), 0);
        // Columns outside the list are inherited.
        assert_eq!(f5.votes_for("Amendment 1"), 7);
        assert_eq!(f6.votes_for("Amendment 1"), 7);
        assert_eq!(f6.attributes.get("county").map(|s| s.as_str()), Some("ALA"));
        assert_eq!(
            f6.districts.get(&OfficeLevel::Congress),
            Some(&DistrictMembership::District("06".to_string()))
        );

        let a5 = f5.geometry.as_ref().unwrap().unsigned_area();
        let a6 = f6.geometry.as_ref().unwrap().unsigned_area();
        assert!((a5 - 2.0).abs() < 1e-6);
        assert!((a6 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn empty_intersection_is_a_mismatch() {
        let t = table(10, 20);
        let res = split_precinct(
            t.row("P1").unwrap(),
            OfficeLevel::Congress,
            &["05".to_string(), "07".to_string()],
            &districts(),
            &columns(),
        );
        match res {
            Err(ReconcileError::GeometryMismatch {
                precinct, district, ..
            }) => {
                assert_eq!(precinct, "P1");
                assert_eq!(district, "07");
            }
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn missing_geometry() {
        let mut t = table(10, 20);
        t.rows[1].geometry = None;
        let res = split_precinct(
            t.row("P1").unwrap(),
            OfficeLevel::Congress,
            &["05".to_string(), "06".to_string()],
            &districts(),
            &columns(),
        );
        assert!(matches!(res, Err(ReconcileError::MissingGeometry { .. })));
    }

    #[test]
    fn split_table_replaces_in_place() {
        let t = table(10, 20);
        let total_before = t.column_total(&t.vote_columns[2].id);
        let splits = detect_table_splits(&t);
        let cols = t.vote_columns.clone();
        let (t2, stats) =
            split_table(t, &splits, OfficeLevel::Congress, &districts(), &cols, &[]).unwrap();
        assert_eq!(stats.len(), 1);
        let keys: Vec<&str> = t2.rows.iter().map(|r| r.precinct_key.as_str()).collect();
        assert_eq!(keys, vec!["P0", "P1-(CON-05)", "P1-(CON-06)"]);
        assert_eq!(t2.column_total(&cols[2].id), total_before);
        assert_eq!(t2.column_total(&cols[0].id), 13);
        assert_eq!(t2.column_total(&cols[1].id), 20);

        // No split precinct left: running again changes nothing.
        let splits2 = detect_table_splits(&t2);
        assert!(splits2.is_empty());
        let (t3, stats3) = split_table(
            t2.clone(),
            &splits2,
            OfficeLevel::Congress,
            &districts(),
            &cols,
            &[],
        )
        .unwrap();
        assert!(stats3.is_empty());
        assert_eq!(t3, t2);
    }

    #[test]
    fn excluded_precincts_are_kept() {
        let t = table(10, 20);
        let splits = detect_table_splits(&t);
        let cols = t.vote_columns.clone();
        let (t2, stats) = split_table(
            t.clone(),
            &splits,
            OfficeLevel::Congress,
            &districts(),
            &cols,
            &["P1".to_string()],
        )
        .unwrap();
        assert!(stats.is_empty());
        assert_eq!(t2, t);
    }

    fn ring(points: &[(f64, f64)]) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(LineString::from(points.to_vec()), vec![])])
    }

    #[test]
    fn self_intersecting_shape_is_repaired() {
        let bowtie = ring(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0)]);
        assert!(!bowtie.is_valid());
        let repaired = repair_geometry(&bowtie, "bowtie").unwrap();
        assert!(repaired.is_valid());
        assert!((repaired.unsigned_area() - 2.0).abs() < 1e-9);

        let valid = square(0.0, 0.0, 1.0, 1.0);
        assert_eq!(repair_geometry(&valid, "square").unwrap(), valid);
    }

    #[test]
    fn unrepairable_precinct_is_rejected() {
        let mut t = table(10, 20);
        t.rows[1].geometry = Some(ring(&[(0.0, 0.0), (1.0, 0.0)]));
        let res = split_precinct(
            t.row("P1").unwrap(),
            OfficeLevel::Congress,
            &["05".to_string(), "06".to_string()],
            &districts(),
            &columns(),
        );
        match res {
            Err(ReconcileError::InvalidGeometry { what }) => assert_eq!(what, "precinct P1"),
            x => panic!("unexpected result {:?}", x),
        }
    }

    #[test]
    fn other_level_columns_follow_the_overlap() {
        let sl10 = classify_column("State Representative District 10-F Gee-PARTY:DEM").unwrap();
        let sl11 = classify_column("State Representative District 11-H Eye-PARTY:REP").unwrap();
        let mut ds = vec![
            district("5", square(0.0, 0.0, 1.0, 2.0)),
            district("6", square(1.0, 0.0, 3.0, 2.0)),
        ];
        for (code, geometry) in [("10", square(0.0, 0.0, 1.0, 2.0)), ("11", square(1.0, 0.0, 3.0, 2.0))] {
            ds.push(DistrictShape {
                level: OfficeLevel::StateHouse,
                code: code.to_string(),
                name: None,
                geometry,
            });
        }
        let ds = DistrictSet::new(ds).unwrap();

        let mut cols = columns();
        cols.push(sl10.clone());
        cols.push(sl11.clone());
        let mut row = table(10, 20).rows[1].clone();
        row.votes.insert(sl10.id.clone(), 8);
        row.votes.insert(sl11.id.clone(), 9);

        let fragments = split_precinct(
            &row,
            OfficeLevel::Congress,
            &["05".to_string(), "06".to_string()],
            &ds,
            &cols,
        )
        .unwrap();
        assert_eq!(fragments[0].votes_for(&sl10.id), 8);
        assert_eq!(fragments[0].votes_for(&sl11.id), 0);
        assert_eq!(fragments[1].votes_for(&sl10.id), 0);
        assert_eq!(fragments[1].votes_for(&sl11.id), 9);
        // Neither fragment spans two state house districts anymore.
        for f in fragments.iter() {
            assert!(detect_split(&precinct_assignments(f, &cols)).is_none());
        }
    }
}
