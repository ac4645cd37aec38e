use anyhow::anyhow;
use flate2::read::GzDecoder;
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let input_file = File::open(input_file)?;
            let decoder = GzDecoder::new(input_file);
            Ok(Box::new(BufReader::new(decoder)))
        }
        _ => {
            let input_file = File::open(input_file)?;
            Ok(Box::new(BufReader::new(input_file)))
        }
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    match ext {
        Some("gz") => {
            let output_file = File::create(output_file)?;
            let encoder =
                flate2::write::GzEncoder::new(output_file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => {
            let output_file = File::create(output_file)?;
            Ok(Box::new(BufWriter::new(output_file)))
        }
    }
}

///
/// Write every line into the output_file
///
/// * `lines` - vector of lines
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}

///
/// Read a whitespace-delimited numeric matrix, one row per line.
/// Empty lines and lines starting with `#` are skipped.
///
pub fn read_matrix(input_file: &str) -> anyhow::Result<Array2<f32>> {
    let buf = open_buf_reader(input_file)?;
    let lines = buf
        .lines()
        .collect::<std::io::Result<Vec<String>>>()?
        .into_iter()
        .filter(|l| {
            let l = l.trim();
            !l.is_empty() && !l.starts_with('#')
        })
        .collect::<Vec<_>>();

    let rows = lines
        .par_iter()
        .enumerate()
        .map(|(i, line)| {
            line.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|w| !w.is_empty())
                .map(|w| {
                    w.parse::<f32>()
                        .map_err(|e| anyhow!("line {}: failed to parse `{}`: {}", i + 1, w, e))
                })
                .collect::<anyhow::Result<Vec<f32>>>()
        })
        .collect::<anyhow::Result<Vec<Vec<f32>>>>()?;

    if rows.is_empty() {
        return Err(anyhow!("no data in {}", input_file));
    }

    let ncols = rows[0].len();
    if let Some((i, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
        return Err(anyhow!(
            "{}: row {} has {} columns, expected {}",
            input_file,
            i + 1,
            r.len(),
            ncols
        ));
    }

    let nrows = rows.len();
    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Array2::from_shape_vec((nrows, ncols), data)?)
}

///
/// Write a numeric matrix as space-delimited text, one row per line
///
pub fn write_matrix(mat: &ArrayView2<f32>, output_file: &str) -> anyhow::Result<()> {
    let lines: Vec<Box<str>> = mat
        .outer_iter()
        .map(|row| {
            row.iter()
                .map(|x| format!("{}", x))
                .collect::<Vec<_>>()
                .join(" ")
                .into_boxed_str()
        })
        .collect();
    write_lines(&lines, output_file)
}
