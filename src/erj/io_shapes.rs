// Shapes are stored as JSON arrays of features, with the geometry in the serde
// representation of the geo crate:
//
// [{"code": "5", "name": "Fifth", "geometry": [{"exterior": [{"x": 0.0, "y": 0.0}, ...], "interiors": []}]}]

use std::io::{Read, Write};

use geo::{MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

use crate::erj::io_common::simplify_file_name;
use crate::erj::*;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ShapeFeature {
    /// The district code, or the precinct key for precinct shapes.
    pub code: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

pub fn read_shapes_file(path: &str) -> ErjResult<Vec<ShapeFeature>> {
    info!("Reading shapes file {:?}", simplify_file_name(path));
    let f = fs::File::open(path).context(OpeningJsonSnafu { path })?;
    read_shapes(f)
}

pub fn read_shapes<R: Read>(input: R) -> ErjResult<Vec<ShapeFeature>> {
    let features: Vec<ShapeFeature> = serde_json::from_reader(input).context(ParsingJsonSnafu {})?;
    Ok(features
        .into_iter()
        .map(|f| ShapeFeature {
            geometry: close_rings(&f.geometry),
            ..f
        })
        .collect())
}

/// The deserialized rings are taken as they are written. Rebuilding the
/// polygons closes the rings that are left open in the file.
fn close_rings(geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(
        geometry
            .iter()
            .map(|p| Polygon::new(p.exterior().clone(), p.interiors().to_vec()))
            .collect(),
    )
}

pub fn district_shapes(level: OfficeLevel, features: Vec<ShapeFeature>) -> Vec<DistrictShape> {
    features
        .into_iter()
        .map(|f| DistrictShape {
            level,
            code: f.code,
            name: f.name,
            geometry: f.geometry,
        })
        .collect()
}

/// The shapes of the rows of the table, in the order of the rows. Rows
/// without geometry are skipped.
pub fn table_shapes(table: &ResultTable) -> Vec<ShapeFeature> {
    table
        .rows
        .iter()
        .filter_map(|r| {
            r.geometry.as_ref().map(|g| ShapeFeature {
                code: r.precinct_key.clone(),
                name: None,
                geometry: g.clone(),
            })
        })
        .collect()
}

pub fn write_shapes<W: Write>(output: W, features: &[ShapeFeature]) -> ErjResult<()> {
    serde_json::to_writer(output, features).context(ParsingJsonSnafu {})
}
