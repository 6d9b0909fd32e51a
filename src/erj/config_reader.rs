use crate::erj::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(rename = "outputPath")]
    pub output_path: Option<String>,
    #[serde(rename = "outputShapesPath")]
    pub output_shapes_path: Option<String>,
    #[serde(rename = "standardizeFieldNames")]
    pub standardize_field_names: Option<bool>,
    /// Prefix of the standardized field names (`G` for a general election).
    #[serde(rename = "electionType")]
    pub election_type: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PrecinctSource {
    /// `csv` or `xlsx`
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "precinctColumn")]
    pub precinct_column: String,
    #[serde(rename = "firstVoteColumnIndex")]
    _first_vote_column_index: Option<JSValue>,
    /// Vote columns that are not contests for an office (ballot measures, ...).
    #[serde(rename = "unclassifiedColumns")]
    pub unclassified_columns: Option<Vec<String>>,
    /// Level code (`CON`, `SU`, `SL`) -> column with the district of the precinct.
    #[serde(rename = "districtColumns")]
    pub district_columns: Option<BTreeMap<String, String>>,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
    #[serde(rename = "shapesPath")]
    pub shapes_path: Option<String>,
}

impl PrecinctSource {
    pub fn first_vote_column_index(&self) -> ErjResult<usize> {
        let x = read_js_int(&self._first_vote_column_index)?;
        ensure!(x >= 1, ParsingJsonNumberSnafu {});
        Ok(x - 1)
    }

    pub fn membership_columns(&self) -> ErjResult<Vec<(OfficeLevel, String)>> {
        let mut res: Vec<(OfficeLevel, String)> = Vec::new();
        for (code, column) in self.district_columns.clone().unwrap_or_default() {
            let level = parse_level(&code)?;
            res.push((level, column));
        }
        Ok(res)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct DistrictSource {
    pub level: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "groupColumn")]
    pub group_column: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ErjRules {
    #[serde(rename = "splitLevels")]
    pub split_levels: Option<Vec<String>>,
    #[serde(rename = "allocationGroup")]
    pub allocation_group: Option<String>,
    #[serde(rename = "allocateToAllEmptyPrecincts")]
    pub allocate_to_all_empty_precincts: Option<bool>,
    /// `splitThenAllocate` (default) or `allocateThenSplit`
    #[serde(rename = "stageOrder")]
    pub stage_order: Option<String>,
    #[serde(rename = "excludedPrecincts")]
    pub excluded_precincts: Option<Vec<String>>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ErjConfig {
    #[serde(rename = "outputSettings")]
    pub output_settings: OutputSettings,
    #[serde(rename = "precinctSource")]
    pub precinct_source: PrecinctSource,
    #[serde(rename = "districtSources")]
    pub district_sources: Option<Vec<DistrictSource>>,
    #[serde(rename = "aggregateSource")]
    pub aggregate_source: Option<AggregateSource>,
    pub rules: ErjRules,
}

pub fn read_config(path: &str) -> ErjResult<ErjConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> ErjResult<ErjConfig> {
    serde_json::from_str(contents).context(ParsingJsonSnafu {})
}

pub fn parse_level(code: &str) -> ErjResult<OfficeLevel> {
    match OfficeLevel::from_code(code) {
        Some(level) if level.is_districted() => Ok(level),
        _ => whatever!("unknown district level: {:?} (expected CON, SU or SL)", code),
    }
}

fn read_js_int(x: &Option<JSValue>) -> ErjResult<usize> {
    match x {
        Some(JSValue::Number(n)) => n
            .as_u64()
            .map(|x| x as usize)
            .context(ParsingJsonNumberSnafu {}),
        // Excel-style column letters, starting at A = 1
        Some(JSValue::String(s)) if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic()) => {
            s.to_ascii_lowercase()
                .chars()
                .try_fold(0_usize, |acc, c| {
                    acc.checked_mul(26)?
                        .checked_add(c as usize - 'a' as usize + 1)
                })
                .context(ParsingJsonNumberSnafu {})
        }
        Some(JSValue::String(s)) => s.parse::<usize>().ok().context(ParsingJsonNumberSnafu {}),
        _ => None.context(ParsingJsonNumberSnafu {}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "outputSettings": {"outputPath": "out.csv", "standardizeFieldNames": true},
        "precinctSource": {
            "provider": "csv",
            "filePath": "results.csv",
            "precinctColumn": "pct_std",
            "firstVoteColumnIndex": "C",
            "districtColumns": {"CON": "cd"}
        },
        "districtSources": [{"level": "CON", "filePath": "cd.json"}],
        "rules": {"splitLevels": ["CON"], "allocationGroup": "county"}
    }"#;

    #[test]
    fn reads_config() {
        let config = parse_config(CONFIG).unwrap();
        assert_eq!(config.precinct_source.first_vote_column_index().unwrap(), 2);
        assert_eq!(
            config.precinct_source.membership_columns().unwrap(),
            vec![(OfficeLevel::Congress, "cd".to_string())]
        );
        assert_eq!(config.aggregate_source, None);
        assert_eq!(config.output_settings.standardize_field_names, Some(true));
    }

    #[test]
    fn column_indexes() {
        assert_eq!(read_js_int(&Some(serde_json::json!(4))).unwrap(), 4);
        assert_eq!(read_js_int(&Some(serde_json::json!("12"))).unwrap(), 12);
        assert_eq!(read_js_int(&Some(serde_json::json!("a"))).unwrap(), 1);
        assert_eq!(read_js_int(&Some(serde_json::json!("AB"))).unwrap(), 28);
        assert!(read_js_int(&None).is_err());
        let too_long = "Z".repeat(40);
        assert!(matches!(
            read_js_int(&Some(serde_json::json!(too_long))),
            Err(ErjError::ParsingJsonNumber {})
        ));
    }

    #[test]
    fn levels() {
        assert_eq!(parse_level("SL").unwrap(), OfficeLevel::StateHouse);
        assert!(parse_level("PRE").is_err());
        assert!(parse_level("XX").is_err());
    }
}
