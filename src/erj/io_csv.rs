// Primitives for reading and writing CSV files.

use std::io::{Read, Write};

use crate::erj::io_common::simplify_file_name;
use crate::erj::*;

/// A table of strings, as found in a file, with the first row as header.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn read_csv_file(path: &str) -> ErjResult<RawTable> {
    info!("Reading CSV file {:?}", simplify_file_name(path));
    let f = fs::File::open(path).context(CsvOpenSnafu { path })?;
    read_csv_table(f, path)
}

/// Reads a table from CSV content. `path` is only used in error messages.
pub fn read_csv_table<R: Read>(input: R, path: &str) -> ErjResult<RawTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);
    let mut records = rdr.records();
    let header: Vec<String> = match records.next() {
        Some(line_r) => line_r
            .context(CsvLineParseSnafu { path, lineno: 1_usize })?
            .iter()
            .map(|s| s.trim().to_string())
            .collect(),
        None => whatever!("file {} is empty", path),
    };
    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, line_r) in records.enumerate() {
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { path, lineno })?;
        debug!("read_csv_table: lineno: {:?} row: {:?}", lineno, line);
        // Trailing blank lines of spreadsheet exports
        if line.iter().all(|s| s.trim().is_empty()) {
            continue;
        }
        ensure!(
            line.len() == header.len(),
            MalformedLineSnafu {
                path,
                lineno,
                expected: header.len(),
                found: line.len(),
            }
        );
        rows.push(line.iter().map(|s| s.to_string()).collect());
    }
    Ok(RawTable { header, rows })
}

pub fn write_csv_table<W: Write>(output: W, table: &RawTable) -> ErjResult<()> {
    let mut wtr = csv::Writer::from_writer(output);
    wtr.write_record(&table.header).context(CsvWriteSnafu {})?;
    for row in table.rows.iter() {
        wtr.write_record(row).context(CsvWriteSnafu {})?;
    }
    wtr.flush().context(WritingFileSnafu { path: "<csv>" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_table() {
        let data = "pct,county,A\nP1,ALA,3\n\nP2,BAK,\n";
        let t = read_csv_table(data.as_bytes(), "test.csv").unwrap();
        assert_eq!(t.header, vec!["pct", "county", "A"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1], vec!["P2", "BAK", ""]);
    }

    #[test]
    fn short_lines_are_rejected() {
        let data = "pct,county,A\nP1,ALA\n";
        let res = read_csv_table(data.as_bytes(), "test.csv");
        assert!(matches!(res, Err(ErjError::MalformedLine { lineno: 2, .. })));
    }

    #[test]
    fn writes_table() {
        let t = RawTable {
            header: vec!["pct".to_string(), "name, long".to_string()],
            rows: vec![vec!["P1".to_string(), "3".to_string()]],
        };
        let mut buf: Vec<u8> = Vec::new();
        write_csv_table(&mut buf, &t).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "pct,\"name, long\"\nP1,3\n");
    }
}
