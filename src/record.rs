//! Scan records on disk.
//!
//! Exported scans hold only the usable pixel range, one `index,value` row
//! per pixel with indices re-based to zero and no header. The same two-column
//! layout, read as floating point, feeds offline calibration fits.

use std::fs::File;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;

use rs_usb4000::IntensityFrame;

use crate::error::{Error, Result};

/// Write the usable part of `frame` as CSV rows.
///
/// The range is clipped to the frame, so a short frame yields fewer rows.
pub fn write_usable_range<W: Write>(
    writer: W,
    frame: &IntensityFrame,
    usable: Range<usize>,
) -> Result<usize> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    let window = frame.window(usable);
    for (index, value) in window.iter().enumerate() {
        wtr.write_record(&[index.to_string(), value.to_string()])?;
    }
    wtr.flush()?;
    Ok(window.len())
}

/// Save the usable part of `frame` to `path`, returning the row count.
pub fn export_csv<P: AsRef<Path>>(
    path: P,
    frame: &IntensityFrame,
    usable: Range<usize>,
) -> Result<usize> {
    let rows = write_usable_range(File::create(path.as_ref())?, frame, usable)?;
    tracing::info!("Wrote {} rows to {}", rows, path.as_ref().display());
    Ok(rows)
}

/// Read `(x, y)` pairs from two-column CSV.
///
/// Fields are trimmed, lines starting with `#` are skipped, and columns past
/// the second are ignored.
pub fn read_pairs<R: Read>(reader: R) -> Result<Vec<(f64, f64)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut pairs = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |i: usize| -> Result<f64> {
            let text = record
                .get(i)
                .ok_or_else(|| Error::format(format!("line {}: expected two columns", line)))?;
            text.parse()
                .map_err(|_| Error::format(format!("line {}: {:?} is not a number", line, text)))
        };
        pairs.push((field(0)?, field(1)?));
    }
    Ok(pairs)
}

/// Load `(x, y)` pairs from a CSV file.
pub fn load_pairs<P: AsRef<Path>>(path: P) -> Result<Vec<(f64, f64)>> {
    read_pairs(File::open(path)?)
}
