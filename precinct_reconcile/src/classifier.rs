/*!
Maps free-text contest labels to office levels and districts, and derives the
standardized field identifiers of the vote columns.

Labels are matched against a fixed table of office patterns, in order:

| pattern                        | level         | district width |
|--------------------------------|---------------|----------------|
| `President`                    | `PRE`         | -              |
| `Representative in Congress`   | `CON`         | 2              |
| `State Senator`                | `SU`          | 2              |
| `State Representative`         | `SL`          | 3              |

A label that matches none of them, or a districted label without a
`District <n>` part, is an `UnrecognizedContest`. There is no default level.
*/

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use snafu::prelude::*;

use crate::config::*;

struct OfficePattern {
    pattern: &'static str,
    level: OfficeLevel,
}

const OFFICE_PATTERNS: [OfficePattern; 4] = [
    OfficePattern {
        pattern: "President",
        level: OfficeLevel::President,
    },
    OfficePattern {
        pattern: "Representative in Congress",
        level: OfficeLevel::Congress,
    },
    OfficePattern {
        pattern: "State Senator",
        level: OfficeLevel::StateSenate,
    },
    OfficePattern {
        pattern: "State Representative",
        level: OfficeLevel::StateHouse,
    },
];

const PARTY_CODES: [(&str, char); 10] = [
    ("PARTY:DEM", 'D'),
    ("PARTY:REP", 'R'),
    ("PARTY:LPF", 'L'),
    ("PARTY:REF", 'O'),
    ("PARTY:PSL", 'S'),
    ("PARTY:GRE", 'G'),
    ("PARTY:CPF", 'C'),
    ("PARTY:WRI", 'O'),
    ("PARTY:NPA", 'N'),
    ("PARTY:NOP", 'N'),
];

const NAME_SUFFIXES: [&str; 4] = ["JR", "III", "II", "SR"];

/// Field names longer than this do not fit in a shapefile attribute table.
pub const GIS_FIELD_NAME_LIMIT: usize = 10;

lazy_static! {
    static ref DISTRICT_RX: Regex = Regex::new(r"District\s+([0-9A-Za-z]+)").unwrap();
}

/// Finds the office level and the zero-padded district of a contest label.
///
/// ```
/// use precinct_reconcile::classifier::classify;
/// use precinct_reconcile::OfficeLevel;
///
/// let office = classify("U.S. Representative in Congress District 5")?;
/// assert_eq!(office.level, OfficeLevel::Congress);
/// assert_eq!(office.district, Some("05".to_string()));
/// # Ok::<(), precinct_reconcile::ReconcileError>(())
/// ```
pub fn classify(label: &str) -> ReconcileResult<Office> {
    let pattern = OFFICE_PATTERNS
        .iter()
        .find(|p| label.contains(p.pattern))
        .context(UnrecognizedContestSnafu { label })?;
    let level = pattern.level;
    if !level.is_districted() {
        return Ok(Office {
            level,
            district: None,
        });
    }
    let caps = DISTRICT_RX
        .captures(label)
        .context(UnrecognizedContestSnafu { label })?;
    let district = level.pad_district(&caps[1]);
    debug!("classify: {:?} -> {} {}", label, level, district);
    Ok(Office {
        level,
        district: Some(district),
    })
}

/// Builds a vote column from a contest label, keeping the label as identifier.
pub fn classify_column(label: &str) -> ReconcileResult<VoteColumn> {
    Ok(VoteColumn {
        id: label.to_string(),
        office: Some(classify(label)?),
    })
}

/// The race part of a field identifier: `PRE`, or the level and the district (`CON05`).
pub fn race_code(label: &str) -> ReconcileResult<String> {
    let office = classify(label)?;
    Ok(match office.district {
        Some(d) => format!("{}{}", office.level.code(), d),
        None => office.level.code().to_string(),
    })
}

pub fn party_code(label: &str) -> ReconcileResult<char> {
    PARTY_CODES
        .iter()
        .find(|(marker, _)| label.contains(marker))
        .map(|(_, c)| *c)
        .context(UnrecognizedPartySnafu { label })
}

/// The first three letters of the candidate surname.
///
/// The candidate is the second `-`-separated segment of the label. Generational
/// suffixes are skipped: `John Smith Jr` gives `SMI`.
pub fn candidate_code(label: &str) -> ReconcileResult<String> {
    let upper = label.to_uppercase();
    let name = upper
        .split('-')
        .nth(1)
        .context(UnrecognizedContestSnafu { label })?;
    let words: Vec<&str> = name.split_whitespace().collect();
    let surname = match words.as_slice() {
        [.., before, last] if NAME_SUFFIXES.iter().any(|s| s == last) => *before,
        [.., last] => *last,
        [] => {
            return UnrecognizedContestSnafu { label }.fail();
        }
    };
    Ok(surname.chars().take(3).collect())
}

/// Standardized field identifier, e.g. `GCON05DSMI`.
pub fn field_id(election_type: &str, label: &str) -> ReconcileResult<String> {
    Ok(format!(
        "{}{}{}{}",
        election_type,
        race_code(label)?,
        party_code(label)?,
        candidate_code(label)?
    ))
}

/// The names that would be truncated by the GIS attribute limit.
pub fn overlong_field_names<'a>(names: &'a [String]) -> Vec<&'a str> {
    names
        .iter()
        .filter(|n| n.chars().count() > GIS_FIELD_NAME_LIMIT)
        .map(|n| n.as_str())
        .collect()
}
