use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::erj::io_common::simplify_file_name;
use crate::erj::io_csv::RawTable;
use crate::erj::*;

/// Reads a results table from an Excel workbook. The first worksheet is used
/// unless a worksheet name is given.
pub fn read_excel_file(path: &str, worksheet_name: &Option<String>) -> ErjResult<RawTable> {
    info!("Reading Excel file {:?}", simplify_file_name(path));
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = match worksheet_name {
        Some(name) => workbook
            .worksheet_range(name)
            .context(MissingWorksheetSnafu { name: name.clone() })?
            .context(OpeningExcelSnafu { path })?,
        None => workbook
            .worksheet_range_at(0)
            .context(EmptyExcelSnafu {})?
            .context(OpeningExcelSnafu { path })?,
    };

    let mut iter = wrange.rows();
    let header_row = iter.next().context(EmptyExcelSnafu {})?;
    let header: Vec<String> = header_row
        .iter()
        .map(|c| read_cell(c, path, 1).map(|s| s.trim().to_string()))
        .collect::<ErjResult<Vec<String>>>()?;
    debug!("read_excel_file: header: {:?}", header);

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, row) in iter.enumerate() {
        let lineno = idx + 2;
        let cells = row
            .iter()
            .map(|c| read_cell(c, path, lineno))
            .collect::<ErjResult<Vec<String>>>()?;
        if cells.iter().all(|s| s.trim().is_empty()) {
            continue;
        }
        debug!("read_excel_file: lineno: {:?} row: {:?}", lineno, cells);
        rows.push(cells);
    }
    Ok(RawTable { header, rows })
}

fn read_cell(cell: &DataType, path: &str, lineno: usize) -> ErjResult<String> {
    match cell {
        DataType::String(s) => Ok(s.clone()),
        DataType::Int(i) => Ok(i.to_string()),
        // District numbers and counts are often stored as floats.
        DataType::Float(f) if f.fract() == 0.0 => Ok(format!("{}", *f as i64)),
        DataType::Float(f) => Ok(f.to_string()),
        DataType::Bool(b) => Ok(b.to_string()),
        DataType::Empty => Ok("".to_string()),
        _ => whatever!(
            "{}: line {}: could not understand cell {:?}",
            path,
            lineno,
            cell
        ),
    }
}
