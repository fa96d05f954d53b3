//! FASTA reading (via needletail) and writing.

use std::io::{Cursor, Write};
use std::path::Path;

use needletail::{parse_fastx_file, parse_fastx_reader, FastxReader};
use pairdist_core::{PairdistError, Result};

/// Line width used when writing FASTA.
pub const LINE_WIDTH: usize = 60;

/// Read every record of a FASTA file as `(header, sequence)` pairs.
///
/// The header is the full description line without the leading `>`.
pub fn read_fasta(path: impl AsRef<Path>) -> Result<Vec<(String, Vec<u8>)>> {
    let path = path.as_ref();
    let reader = parse_fastx_file(path).map_err(|e| {
        PairdistError::Parse(format!("{}: {}", path.display(), e))
    })?;
    collect_records(reader)
}

/// Parse FASTA records from an in-memory buffer.
pub fn parse_fasta(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let reader = parse_fastx_reader(Cursor::new(data.to_vec()))
        .map_err(|e| PairdistError::Parse(e.to_string()))?;
    collect_records(reader)
}

fn collect_records(mut reader: Box<dyn FastxReader>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut records = Vec::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| PairdistError::Parse(e.to_string()))?;
        let name = String::from_utf8_lossy(record.id()).trim().to_string();
        records.push((name, record.seq().into_owned()));
    }
    Ok(records)
}

/// Write `(name, sequence)` records as FASTA, wrapping sequence lines at
/// [`LINE_WIDTH`] columns.
pub fn write_fasta<W, N, S>(out: &mut W, records: &[(N, S)]) -> Result<()>
where
    W: Write,
    N: AsRef<str>,
    S: AsRef<[u8]>,
{
    for (name, seq) in records {
        writeln!(out, ">{}", name.as_ref())?;
        for chunk in seq.as_ref().chunks(LINE_WIDTH) {
            out.write_all(chunk)?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}
