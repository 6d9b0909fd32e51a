pub mod config_reader;
mod io_common;
mod io_csv;
mod io_excel;
mod io_shapes;

use log::{debug, info, warn};

use precinct_reconcile::builder::{Builder, NOT_APPLICABLE};
use precinct_reconcile::classifier::{field_id, overlong_field_names, GIS_FIELD_NAME_LIMIT};
use precinct_reconcile::*;
use snafu::{prelude::*, Snafu};

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use text_diff::print_diff;

use crate::erj::config_reader::*;
use crate::erj::io_common::*;
use crate::erj::io_csv::*;
use crate::erj::io_excel::read_excel_file;
use crate::erj::io_shapes::*;

#[derive(Debug, Snafu)]
pub enum ErjError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The workbook has no worksheet"))]
    EmptyExcel {},
    #[snafu(display("Worksheet {name} not found"))]
    MissingWorksheet { name: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON content"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Expected a positive integer or a column letter"))]
    ParsingJsonNumber {},
    #[snafu(display("Error opening file {path}"))]
    CsvOpen {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("{path}: error reading line {lineno}"))]
    CsvLineParse {
        source: csv::Error,
        path: String,
        lineno: usize,
    },
    #[snafu(display("{path}: line {lineno}: expected {expected} values, found {found}"))]
    MalformedLine {
        path: String,
        lineno: usize,
        expected: usize,
        found: usize,
    },
    #[snafu(display("Error writing CSV content"))]
    CsvWrite { source: csv::Error },
    #[snafu(display("Error writing file {path}"))]
    WritingFile {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Precinct {precinct}, column {column}: not a vote count: {content:?}"))]
    ParsingCount {
        precinct: String,
        column: String,
        content: String,
    },
    #[snafu(display("{path}: missing column {column}"))]
    MissingColumn { column: String, path: String },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Reconciliation failed: {source}"))]
    Reconcile { source: ReconcileError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ErjResult<T> = Result<T, ErjError>;

fn validate_rules(rules: &ErjRules) -> ErjResult<ReconcileRules> {
    let mut split_levels: Vec<OfficeLevel> = Vec::new();
    for code in rules.split_levels.clone().unwrap_or_default() {
        let level = parse_level(&code)?;
        if split_levels.contains(&level) {
            whatever!("split level {} is listed more than once", code);
        }
        split_levels.push(level);
    }
    let res = ReconcileRules {
        split_levels,
        allocation_group: rules.allocation_group.clone(),
        all_groups_empty: rules.allocate_to_all_empty_precincts.unwrap_or(false),
        stage_order: match rules.stage_order.as_deref() {
            None | Some("splitThenAllocate") => StageOrder::SplitThenAllocate,
            Some("allocateThenSplit") => StageOrder::AllocateThenSplit,
            Some(x) => whatever!(
                "Cannot use stage order {:?} (expected splitThenAllocate or allocateThenSplit)",
                x
            ),
        },
        excluded_precincts: rules.excluded_precincts.clone().unwrap_or_default(),
    };
    Ok(res)
}

fn read_precinct_table(root: &Path, source: &PrecinctSource) -> ErjResult<RawTable> {
    let p = resolve_path(root, &source.file_path);
    match source.provider.as_str() {
        "csv" => read_csv_file(&p),
        "xlsx" => read_excel_file(&p, &source.excel_worksheet_name),
        x => whatever!("Provider not implemented {:?}", x),
    }
}

/// Builds the working table from the raw precinct results.
///
/// The columns before the first vote column are attributes, the others are vote
/// columns. Every vote column is a contest recognized by the classifier, unless
/// it is listed as unclassified.
fn build_table(
    raw: &RawTable,
    source: &PrecinctSource,
    shapes: Vec<ShapeFeature>,
) -> ErjResult<ResultTable> {
    let path = source.file_path.as_str();
    let key_idx = column_index(&raw.header, &source.precinct_column, path)?;
    let first_vote_idx = source.first_vote_column_index()?;
    if key_idx >= first_vote_idx || first_vote_idx >= raw.header.len() {
        whatever!(
            "{}: the precinct column must come before the vote columns, and the first vote column index must be at most {}",
            path,
            raw.header.len()
        );
    }

    let attribute_idxs: Vec<usize> = (0..first_vote_idx).filter(|i| *i != key_idx).collect();
    let attribute_columns: Vec<String> = attribute_idxs
        .iter()
        .map(|i| raw.header[*i].clone())
        .collect();
    let unclassified: HashSet<String> = source
        .unclassified_columns
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut builder = Builder::new(&attribute_columns).context(ReconcileSnafu {})?;
    for column in raw.header[first_vote_idx..].iter() {
        let cols = [column.clone()];
        builder = if unclassified.contains(column) {
            builder.unclassified(&cols)
        } else {
            builder.contests(&cols)
        }
        .context(ReconcileSnafu {})?;
    }
    for (level, column) in source.membership_columns()? {
        builder = builder
            .membership_column(level, &column)
            .context(ReconcileSnafu {})?;
    }

    for row in raw.rows.iter() {
        let key = row[key_idx].trim();
        // Trimmed like the group keys of the aggregate file, so that both join.
        let attributes: Vec<String> = attribute_idxs
            .iter()
            .map(|i| row[*i].trim().to_string())
            .collect();
        let mut votes: Vec<u64> = Vec::new();
        for (column, cell) in raw.header[first_vote_idx..]
            .iter()
            .zip(row[first_vote_idx..].iter())
        {
            votes.push(parse_count(key, column, cell)?);
        }
        builder
            .add_row_simple(key, &attributes, &votes)
            .context(ReconcileSnafu {})?;
    }

    for feature in shapes {
        match builder.geometry(&feature.code, feature.geometry) {
            Err(ReconcileError::UnknownPrecinct { precinct }) => {
                warn!("Shape for unknown precinct {:?}: skipped", precinct);
            }
            x => x.context(ReconcileSnafu {})?,
        }
    }
    Ok(builder.build())
}

fn read_districts(root: &Path, sources: &[DistrictSource]) -> ErjResult<DistrictSet> {
    let mut shapes: Vec<DistrictShape> = Vec::new();
    for source in sources.iter() {
        let level = parse_level(&source.level)?;
        let features = read_shapes_file(&resolve_path(root, &source.file_path))?;
        info!("{} {} district shapes", features.len(), level);
        shapes.extend(district_shapes(level, features));
    }
    DistrictSet::new(shapes).context(ReconcileSnafu {})
}

/// Reads the votes reported for whole groups. Only the columns that are vote
/// columns of the table are read.
fn read_aggregates(
    raw: &RawTable,
    source: &AggregateSource,
    table: &ResultTable,
) -> ErjResult<Vec<AggregateRow>> {
    let path = source.file_path.as_str();
    let group_idx = column_index(&raw.header, &source.group_column, path)?;
    let vote_idxs: Vec<usize> = (0..raw.header.len())
        .filter(|i| {
            let known = table.vote_column(&raw.header[*i]).is_some();
            if !known && *i != group_idx {
                debug!("read_aggregates: ignoring column {:?}", raw.header[*i]);
            }
            known
        })
        .collect();
    let mut res: Vec<AggregateRow> = Vec::new();
    for row in raw.rows.iter() {
        let group = row[group_idx].trim().to_string();
        let mut votes: BTreeMap<String, u64> = BTreeMap::new();
        for i in vote_idxs.iter() {
            let count = parse_count(&group, &raw.header[*i], &row[*i])?;
            if count > 0 {
                votes.insert(raw.header[*i].clone(), count);
            }
        }
        res.push(AggregateRow { group, votes });
    }
    Ok(res)
}

/// Writes the district of every row back into the membership columns. The
/// fragments of split precincts carry their own district.
fn sync_memberships(table: &mut ResultTable, membership_columns: &[(OfficeLevel, String)]) {
    for row in table.rows.iter_mut() {
        for (level, column) in membership_columns.iter() {
            let value = match row.districts.get(level) {
                Some(DistrictMembership::District(d)) => d.clone(),
                Some(DistrictMembership::NotApplicable) => NOT_APPLICABLE.to_string(),
                None => continue,
            };
            row.attributes.insert(column.clone(), value);
        }
    }
}

/// The output table, in the layout of the input file.
fn output_table(
    table: &ResultTable,
    precinct_column: &str,
    output_settings: &OutputSettings,
) -> ErjResult<RawTable> {
    let election_type = output_settings
        .election_type
        .clone()
        .unwrap_or_else(|| "G".to_string());
    let mut vote_headers: Vec<String> = Vec::new();
    for c in table.vote_columns.iter() {
        let name = match (&c.office, output_settings.standardize_field_names) {
            (Some(_), Some(true)) => field_id(&election_type, &c.id).context(ReconcileSnafu {})?,
            _ => c.id.clone(),
        };
        vote_headers.push(name);
    }
    if output_settings.standardize_field_names == Some(true) {
        let overlong = overlong_field_names(&vote_headers);
        if !overlong.is_empty() {
            warn!(
                "{} field names are longer than {} characters: {:?}",
                overlong.len(),
                GIS_FIELD_NAME_LIMIT,
                overlong
            );
        }
    }

    let mut header: Vec<String> = vec![precinct_column.to_string()];
    header.extend(table.attribute_columns.iter().cloned());
    header.extend(vote_headers);

    let rows: Vec<Vec<String>> = table
        .rows
        .iter()
        .map(|r| {
            let mut line: Vec<String> = vec![r.precinct_key.clone()];
            line.extend(
                table
                    .attribute_columns
                    .iter()
                    .map(|c| r.attributes.get(c).cloned().unwrap_or_default()),
            );
            line.extend(table.vote_columns.iter().map(|c| r.votes_for(&c.id).to_string()));
            line
        })
        .collect();
    Ok(RawTable { header, rows })
}

fn log_report(report: &ReconcileReport) {
    for (key, split) in report.split_precincts.iter() {
        debug!("split precinct {}: {:?}", key, split);
    }
    for s in report.splits.iter() {
        info!(
            "Precinct {} split at level {} into {:?}",
            s.precinct_key, s.level, s.fragment_keys
        );
    }
    let special: Vec<&AllocationStats> =
        report.allocations.iter().filter(|a| a.special).collect();
    for a in special.iter() {
        warn!(
            "No votes for {} in group {}: {} votes spread by precinct totals",
            a.race, a.group, a.pool
        );
    }
    let allocated: u64 = report.allocations.iter().map(|a| a.pool).sum();
    info!(
        "{} votes allocated over {} group races ({} special allocations)",
        allocated,
        report.allocations.len(),
        special.len()
    );
}

/// Runs a complete job described by a configuration file.
///
/// Arguments:
/// * `config_path` the JSON configuration of the job. The paths it contains are
/// relative to its directory.
/// * `out_o` overrides the output path of the configuration. `stdout` prints
/// the table.
/// * `reference_o` a CSV file with the expected output. The run fails if the
/// output differs.
pub fn run_job(
    config_path: &str,
    out_o: &Option<String>,
    reference_o: &Option<String>,
) -> ErjResult<()> {
    let config = read_config(config_path)?;
    info!("config: {:?}", config);

    let rules = validate_rules(&config.rules)?;

    let config_p = Path::new(config_path);
    let root_p = config_p.parent().context(MissingParentDirSnafu {})?;

    let source = &config.precinct_source;
    let raw = read_precinct_table(root_p, source)?;
    let shapes = match &source.shapes_path {
        Some(p) => read_shapes_file(&resolve_path(root_p, p))?,
        None => Vec::new(),
    };
    let table = build_table(&raw, source, shapes)?;
    info!(
        "{} precincts, {} vote columns",
        table.rows.len(),
        table.vote_columns.len()
    );

    let districts = read_districts(root_p, &config.district_sources.clone().unwrap_or_default())?;

    let aggregates = match &config.aggregate_source {
        Some(agg) => {
            let agg_raw = read_csv_file(&resolve_path(root_p, &agg.file_path))?;
            read_aggregates(&agg_raw, agg, &table)?
        }
        None => Vec::new(),
    };

    let res = run_reconciliation(table, &aggregates, &districts, &rules).context(ReconcileSnafu {})?;
    log_report(&res.report);

    let mut result_table = res.table;
    sync_memberships(&mut result_table, &source.membership_columns()?);
    let output = output_table(
        &result_table,
        &source.precinct_column,
        &config.output_settings,
    )?;

    let mut buf: Vec<u8> = Vec::new();
    write_csv_table(&mut buf, &output)?;
    let output_str = String::from_utf8_lossy(&buf).to_string();

    let out_path = match out_o {
        Some(p) => Some(p.clone()),
        None => config
            .output_settings
            .output_path
            .as_ref()
            .map(|p| resolve_path(root_p, p)),
    };
    match out_path.as_deref() {
        Some("stdout") | None => {
            println!("{}", output_str);
        }
        Some(p) => {
            info!("Writing output to {:?}", p);
            let mut f = fs::File::create(p).context(WritingFileSnafu { path: p })?;
            f.write_all(buf.as_slice())
                .context(WritingFileSnafu { path: p })?;
        }
    }

    if let Some(p) = &config.output_settings.output_shapes_path {
        let shapes_p = resolve_path(root_p, p);
        info!("Writing shapes to {:?}", shapes_p);
        let f = fs::File::create(&shapes_p).context(WritingFileSnafu {
            path: shapes_p.clone(),
        })?;
        write_shapes(f, &table_shapes(&result_table))?;
    }

    // The reference output, if provided for comparison
    if let Some(reference_p) = reference_o {
        let reference = read_csv_file(reference_p)?;
        let mut ref_buf: Vec<u8> = Vec::new();
        write_csv_table(&mut ref_buf, &reference)?;
        let reference_str = String::from_utf8_lossy(&ref_buf).to_string();
        if reference_str != output_str {
            warn!("Found differences with the reference output");
            print_diff(reference_str.as_str(), output_str.as_str(), "\n");
            whatever!("Difference detected between the output and the reference output")
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CON5: &str = "U.S. Representative in Congress District 5-Ann Bee-PARTY:DEM";
    const CON6: &str = "U.S. Representative in Congress District 6-Cy Dee-PARTY:REP";

    fn raw() -> RawTable {
        let data = format!(
            "county,pct,cd,\"{}\",\"{}\",Amendment 1\n\
             ALA,P1,5,10,0,4\n\
             ALA,P2,5,6,14,1\n\
             BAK,P3,6,0,9,\n",
            CON5, CON6
        );
        read_csv_table(data.as_bytes(), "results.csv").unwrap()
    }

    fn source() -> PrecinctSource {
        parse_config(
            r#"{
            "outputSettings": {},
            "precinctSource": {
                "provider": "csv",
                "filePath": "results.csv",
                "precinctColumn": "pct",
                "firstVoteColumnIndex": 4,
                "unclassifiedColumns": ["Amendment 1"],
                "districtColumns": {"CON": "cd"}
            },
            "rules": {}
        }"#,
        )
        .unwrap()
        .precinct_source
    }

    #[test]
    fn builds_table() {
        let t = build_table(&raw(), &source(), Vec::new()).unwrap();
        assert_eq!(t.attribute_columns, vec!["county", "cd"]);
        assert_eq!(t.vote_columns.len(), 3);
        assert_eq!(t.vote_columns[2].office, None);
        assert_eq!(t.column_total(CON6), 23);
        assert_eq!(t.column_total("Amendment 1"), 5);
        assert_eq!(
            t.row("P3").unwrap().districts.get(&OfficeLevel::Congress),
            Some(&DistrictMembership::District("06".to_string()))
        );
    }

    #[test]
    fn padded_group_cells_join_the_aggregates() {
        let data = format!(
            "county,pct,cd,\"{}\",\"{}\",Amendment 1\n\
             \"ALA \",P1,5,10,0,4\n\
             \" ALA\",P2,5,6,0,1\n",
            CON5, CON6
        );
        let padded = read_csv_table(data.as_bytes(), "results.csv").unwrap();
        let t = build_table(&padded, &source(), Vec::new()).unwrap();
        assert_eq!(
            t.row("P1").unwrap().attributes.get("county").map(|s| s.as_str()),
            Some("ALA")
        );

        let agg_raw = read_csv_table(format!("county,\"{}\"\nALA,4\n", CON5).as_bytes(), "agg.csv").unwrap();
        let agg_source = AggregateSource {
            file_path: "agg.csv".to_string(),
            group_column: "county".to_string(),
        };
        let aggs = read_aggregates(&agg_raw, &agg_source, &t).unwrap();
        let rules = ReconcileRules {
            allocation_group: Some("county".to_string()),
            ..ReconcileRules::DEFAULT_RULES
        };
        let districts = DistrictSet::new(Vec::new()).unwrap();
        let res = run_reconciliation(t, &aggs, &districts, &rules).unwrap();
        assert_eq!(res.table.column_total(CON5), 20);
    }

    #[test]
    fn unknown_contest_is_an_error() {
        let mut s = source();
        s.unclassified_columns = None;
        let res = build_table(&raw(), &s, Vec::new());
        assert!(matches!(
            res,
            Err(ErjError::Reconcile {
                source: ReconcileError::UnrecognizedContest { .. }
            })
        ));
    }

    #[test]
    fn reads_aggregates() {
        let t = build_table(&raw(), &source(), Vec::new()).unwrap();
        let data = format!("county,\"{}\",Notes\nALA,5,x\nBAK,,y\n", CON5);
        let agg_raw = read_csv_table(data.as_bytes(), "agg.csv").unwrap();
        let agg_source = AggregateSource {
            file_path: "agg.csv".to_string(),
            group_column: "county".to_string(),
        };
        let aggs = read_aggregates(&agg_raw, &agg_source, &t).unwrap();
        assert_eq!(aggs.len(), 2);
        assert_eq!(aggs[0].votes.get(CON5), Some(&5));
        assert!(aggs[1].votes.is_empty());

        let bad_source = AggregateSource {
            group_column: "region".to_string(),
            ..agg_source
        };
        assert!(matches!(
            read_aggregates(&agg_raw, &bad_source, &t),
            Err(ErjError::MissingColumn { .. })
        ));
    }

    #[test]
    fn rules() {
        let rules: ErjRules = serde_json::from_str(
            r#"{"splitLevels": ["CON", "SL"], "stageOrder": "allocateThenSplit", "allocationGroup": "county"}"#,
        )
        .unwrap();
        let r = validate_rules(&rules).unwrap();
        assert_eq!(
            r.split_levels,
            vec![OfficeLevel::Congress, OfficeLevel::StateHouse]
        );
        assert_eq!(r.stage_order, StageOrder::AllocateThenSplit);
        assert!(!r.all_groups_empty);

        let bad = ErjRules {
            stage_order: Some("shuffle".to_string()),
            ..rules.clone()
        };
        assert!(validate_rules(&bad).is_err());
        let twice = ErjRules {
            split_levels: Some(vec!["CON".to_string(), "CON".to_string()]),
            ..rules
        };
        assert!(validate_rules(&twice).is_err());
    }

    #[test]
    fn output_layout() {
        let mut t = build_table(&raw(), &source(), Vec::new()).unwrap();
        t.rows[0]
            .districts
            .insert(OfficeLevel::Congress, DistrictMembership::NotApplicable);
        sync_memberships(&mut t, &source().membership_columns().unwrap());
        let settings = OutputSettings {
            output_path: None,
            output_shapes_path: None,
            standardize_field_names: Some(true),
            election_type: None,
        };
        let out = output_table(&t, "pct", &settings).unwrap();
        assert_eq!(
            out.header,
            vec!["pct", "county", "cd", "GCON05DBEE", "GCON06RDEE", "Amendment 1"]
        );
        assert_eq!(out.rows[0], vec!["P1", "ALA", "NA", "10", "0", "4"]);
        assert_eq!(out.rows[2], vec!["P3", "BAK", "06", "0", "9", "0"]);
    }
}
