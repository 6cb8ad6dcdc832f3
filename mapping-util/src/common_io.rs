//! Delimited text I/O for named matrices and attribute tables.
//!
//! All readers and writers treat a `.gz` extension as gzip-compressed.
//! Matrix files carry a header row of column (cell) names and a first
//! column of row (feature) names.

use flate2::read::GzDecoder;
use nalgebra::DMatrix;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const FIELD_DELIMS: [char; 3] = ['\t', ',', ' '];

/// Open a buffered reader, gzip-decoding if the extension is `.gz`
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

/// Open a buffered writer, gzip-encoding if the extension is `.gz`
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

/// Split one line on tab, comma, or space, skipping empty fields
pub fn split_words(line: &str) -> Vec<Box<str>> {
    line.split(&FIELD_DELIMS[..])
        .filter(|x| !x.is_empty())
        .map(|x| x.into())
        .collect()
}

/// Read every non-empty line of a delimited file into word vectors
pub fn read_lines_of_words(input_file: &str) -> anyhow::Result<Vec<Vec<Box<str>>>> {
    let reader = open_buf_reader(input_file)?;
    let mut lines = vec![];
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines.push(split_words(&line));
    }
    Ok(lines)
}

/// A dense matrix with row and column names attached
pub struct NamedMatrix {
    pub rows: Vec<Box<str>>,
    pub columns: Vec<Box<str>>,
    pub values: DMatrix<f32>,
}

/// Read a named matrix.
///
/// Expected layout: header line of `ncol` column names (an optional
/// leading corner token is tolerated), then one line per row of
/// `row_name v1 ... v{ncol}`.
pub fn read_named_matrix(input_file: &str) -> anyhow::Result<NamedMatrix> {
    let lines = read_lines_of_words(input_file)?;

    if lines.len() < 2 {
        return Err(anyhow::anyhow!(
            "matrix file '{}' needs a header and at least one row",
            input_file
        ));
    }

    let mut rows = Vec::with_capacity(lines.len() - 1);
    let mut data = Vec::with_capacity(lines.len() - 1);
    let mut ncol = 0_usize;

    for words in lines.iter().skip(1) {
        if words.len() < 2 {
            continue;
        }
        let vals = words[1..]
            .iter()
            .map(|x| x.parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|_| {
                anyhow::anyhow!("non-numeric value in matrix row '{}'", words[0])
            })?;

        if ncol == 0 {
            ncol = vals.len();
        } else if vals.len() != ncol {
            return Err(anyhow::anyhow!(
                "ragged matrix row '{}': {} values, expected {}",
                words[0],
                vals.len(),
                ncol
            ));
        }
        rows.push(words[0].clone());
        data.push(vals);
    }

    let header = &lines[0];
    let columns: Vec<Box<str>> = if header.len() == ncol + 1 {
        header[1..].to_vec() // header carries a corner token
    } else if header.len() == ncol {
        header.to_vec()
    } else {
        return Err(anyhow::anyhow!(
            "header of '{}' has {} names for {} columns",
            input_file,
            header.len(),
            ncol
        ));
    };

    let nrow = rows.len();
    let values = DMatrix::from_fn(nrow, ncol, |i, j| data[i][j]);

    Ok(NamedMatrix {
        rows,
        columns,
        values,
    })
}

/// Write a named matrix as TSV: header of column names, then
/// `row_name\tv1\t...` per row
pub fn write_named_matrix(
    output_file: &str,
    rows: &[Box<str>],
    columns: &[Box<str>],
    values: &DMatrix<f32>,
) -> anyhow::Result<()> {
    debug_assert_eq!(rows.len(), values.nrows());
    debug_assert_eq!(columns.len(), values.ncols());

    let mut writer = open_buf_writer(output_file)?;

    let header = columns
        .iter()
        .map(|x| x.as_ref())
        .collect::<Vec<_>>()
        .join("\t");
    writeln!(writer, "row\t{}", header)?;

    for (i, name) in rows.iter().enumerate() {
        write!(writer, "{}", name)?;
        for j in 0..values.ncols() {
            write!(writer, "\t{}", values[(i, j)])?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write rows of tab-joined fields with a header line
pub fn write_tsv_rows(
    output_file: &str,
    header: &[&str],
    rows: impl Iterator<Item = Vec<String>>,
) -> anyhow::Result<()> {
    let mut writer = open_buf_writer(output_file)?;
    writeln!(writer, "{}", header.join("\t"))?;
    for fields in rows {
        writeln!(writer, "{}", fields.join("\t"))?;
    }
    writer.flush()?;
    Ok(())
}
