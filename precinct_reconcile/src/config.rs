// ********* Input data structures ***********

use std::collections::BTreeMap;
use std::fmt::Display;

use geo::MultiPolygon;
use snafu::Snafu;

/// The office levels that the engine knows how to attribute to districts.
///
/// The order of the variants is the order used when reporting splits.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum OfficeLevel {
    President,
    Congress,
    StateSenate,
    StateHouse,
}

impl OfficeLevel {
    pub const ALL: [OfficeLevel; 4] = [
        OfficeLevel::President,
        OfficeLevel::Congress,
        OfficeLevel::StateSenate,
        OfficeLevel::StateHouse,
    ];

    /// The short code used in field identifiers and fragment keys.
    pub fn code(&self) -> &'static str {
        match self {
            OfficeLevel::President => "PRE",
            OfficeLevel::Congress => "CON",
            OfficeLevel::StateSenate => "SU",
            OfficeLevel::StateHouse => "SL",
        }
    }

    /// Parses the short code back (`CON`, `SU`, `SL`, `PRE`).
    pub fn from_code(code: &str) -> Option<OfficeLevel> {
        OfficeLevel::ALL.iter().find(|l| l.code() == code).cloned()
    }

    /// Number of digits district numbers are padded to at this level.
    /// Zero for the levels that are not districted.
    pub fn district_width(&self) -> usize {
        match self {
            OfficeLevel::President => 0,
            OfficeLevel::Congress => 2,
            OfficeLevel::StateSenate => 2,
            OfficeLevel::StateHouse => 3,
        }
    }

    pub fn is_districted(&self) -> bool {
        self.district_width() > 0
    }

    /// Left-pads a district number with zeros to the width of this level.
    /// Codes already at or above the width are returned unchanged.
    pub fn pad_district(&self, district: &str) -> String {
        format!("{:0>width$}", district, width = self.district_width())
    }
}

impl Display for OfficeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The office that a vote column is attributed to, as found by the classifier.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct Office {
    pub level: OfficeLevel,
    /// Zero-padded district number. None for statewide offices.
    pub district: Option<String>,
}

/// A vote column of the working table.
///
/// The identifier is opaque to the engine. The office is only known when
/// the column was built from a contest label that the classifier recognized.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct VoteColumn {
    pub id: String,
    pub office: Option<Office>,
}

impl VoteColumn {
    /// A column for a contest that is not attributed to any office
    /// (ballot measures for example).
    pub fn unclassified(id: &str) -> VoteColumn {
        VoteColumn {
            id: id.to_string(),
            office: None,
        }
    }

    /// The district of this column at the given level, if it has one.
    pub fn district_at(&self, level: OfficeLevel) -> Option<&str> {
        match &self.office {
            Some(Office {
                level: l,
                district: Some(d),
            }) if *l == level => Some(d.as_str()),
            _ => None,
        }
    }
}

/// The value of a district-membership column.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum DistrictMembership {
    District(String),
    /// The precinct does not take part in any contest at this level.
    NotApplicable,
}

/// One precinct (or fragment of a precinct) in the working table.
#[derive(PartialEq, Debug, Clone)]
pub struct ResultRow {
    pub precinct_key: String,
    /// Descriptive columns (county, names, ...), carried through untouched.
    pub attributes: BTreeMap<String, String>,
    /// Vote counts, keyed by vote column identifier.
    pub votes: BTreeMap<String, u64>,
    pub districts: BTreeMap<OfficeLevel, DistrictMembership>,
    pub geometry: Option<MultiPolygon<f64>>,
}

impl ResultRow {
    pub fn votes_for(&self, column: &str) -> u64 {
        self.votes.get(column).cloned().unwrap_or(0)
    }
}

/// The working table. Rows keep their input order, which is also the order
/// used to break ties during allocation.
#[derive(PartialEq, Debug, Clone)]
pub struct ResultTable {
    pub attribute_columns: Vec<String>,
    pub vote_columns: Vec<VoteColumn>,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn row(&self, precinct_key: &str) -> Option<&ResultRow> {
        self.rows.iter().find(|r| r.precinct_key == precinct_key)
    }

    pub fn vote_column(&self, id: &str) -> Option<&VoteColumn> {
        self.vote_columns.iter().find(|c| c.id == id)
    }

    /// Sum of one vote column over all the rows.
    pub fn column_total(&self, column: &str) -> u64 {
        self.rows.iter().map(|r| r.votes_for(column)).sum()
    }
}

/// An authoritative district boundary.
#[derive(PartialEq, Debug, Clone)]
pub struct DistrictShape {
    pub level: OfficeLevel,
    pub code: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

/// Votes reported at the level of an allocation group (typically a county)
/// and not yet attributed to any precinct.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AggregateRow {
    pub group: String,
    pub votes: BTreeMap<String, u64>,
}

// ******** Output data structures *********

/// Statistics for the allocation of one race in one group.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct AllocationStats {
    pub group: String,
    pub race: String,
    pub pool: u64,
    /// Number of votes given by rounding up the largest remainders.
    pub rounded_up: u64,
    /// The race had no votes in the group and the pool was spread by total votes.
    pub special: bool,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct SplitStats {
    pub precinct_key: String,
    pub level: OfficeLevel,
    pub fragment_keys: Vec<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Precinct key -> districts found per level, for all the split precincts.
    pub split_precincts: BTreeMap<String, BTreeMap<OfficeLevel, Vec<String>>>,
    pub splits: Vec<SplitStats>,
    pub allocations: Vec<AllocationStats>,
}

#[derive(PartialEq, Debug, Clone)]
pub struct Reconciliation {
    pub table: ResultTable,
    pub report: ReconcileReport,
}

/// Faults that abort a reconciliation run.
///
/// None of them is retried: they point at malformed input data or at an
/// inconsistency between the results and the boundaries.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ReconcileError {
    #[snafu(display("Unrecognized contest: {label:?}"))]
    UnrecognizedContest { label: String },

    #[snafu(display("Unrecognized party in {label:?}"))]
    UnrecognizedParty { label: String },

    #[snafu(display("Invalid geometry for {what}: repair did not produce a valid shape"))]
    InvalidGeometry { what: String },

    #[snafu(display(
        "Precinct {precinct} does not intersect {level} district {district} (precinct area {precinct_area}, district area {district_area})"
    ))]
    GeometryMismatch {
        precinct: String,
        level: OfficeLevel,
        district: String,
        precinct_area: f64,
        district_area: f64,
        precinct_shape: MultiPolygon<f64>,
        district_shape: MultiPolygon<f64>,
    },

    #[snafu(display(
        "Allocation mismatch for race {race} in group {group}: expected {expected} votes, found {actual}"
    ))]
    AllocationMismatch {
        group: String,
        race: String,
        expected: u64,
        actual: u64,
    },

    #[snafu(display("No {level} district with code {district}"))]
    UnknownDistrict { level: OfficeLevel, district: String },

    #[snafu(display("{level} district {district} is defined more than once"))]
    DuplicateDistrict { level: OfficeLevel, district: String },

    #[snafu(display("Precinct {precinct} has no geometry"))]
    MissingGeometry { precinct: String },

    #[snafu(display("Unknown precinct {precinct}"))]
    UnknownPrecinct { precinct: String },

    #[snafu(display("Precinct {precinct} appears more than once"))]
    DuplicatePrecinct { precinct: String },

    #[snafu(display("Precinct {precinct} has no value for column {column}"))]
    MissingAttribute { precinct: String, column: String },

    #[snafu(display("Unknown vote column {column}"))]
    UnknownVoteColumn { column: String },

    #[snafu(display("Row {precinct}: expected {expected} values, found {found}"))]
    MalformedRow {
        precinct: String,
        expected: usize,
        found: usize,
    },
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

// ********* Configuration **********

/// In which order the splitter and the allocator run. Both orders are valid,
/// it depends on which kind of unattributed votes a dataset has.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum StageOrder {
    SplitThenAllocate,
    AllocateThenSplit,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ReconcileRules {
    /// The levels at which split precincts are cut along district lines,
    /// applied one after the other.
    pub split_levels: Vec<OfficeLevel>,
    /// The attribute column holding the allocation group of each precinct.
    /// No allocation happens when it is not set.
    pub allocation_group: Option<String>,
    /// Every precinct in scope legitimately reported zero votes: pools are
    /// spread evenly.
    pub all_groups_empty: bool,
    pub stage_order: StageOrder,
    /// Precincts that are never split, even when flagged by the detector.
    pub excluded_precincts: Vec<String>,
}

impl ReconcileRules {
    pub const DEFAULT_RULES: ReconcileRules = ReconcileRules {
        split_levels: Vec::new(),
        allocation_group: None,
        all_groups_empty: false,
        stage_order: StageOrder::SplitThenAllocate,
        excluded_precincts: Vec::new(),
    };
}
