// ========================================================================================
//
//                      Matrix boundary: probability input, decision output
//
// ========================================================================================
//
// The engine itself only sees in-memory matrices. This module is the flat-file boundary
// around it: it reads one probability CSV per model and writes the final decision matrix,
// the optional weighted vote matrix, and the diagnostic report.
//
// Probability files have a header row. The first column holds the sample identity
// (e.g. an image filename) and every further column one label probability. Outputs are
// written to a hidden temporary sibling and renamed into place once complete, and an
// existing output file is never overwritten.

use crate::types::{EnsembleError, ProbabilityMatrix, SampleIds, Shape};
use csv::{ByteRecord, ReaderBuilder, Trim, WriterBuilder};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{Array2, ArrayView2};
use std::fmt::Write as FmtWrite;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Rows between progress bar refreshes while parsing a probability file.
const PROGRESS_UPDATE_BATCH_SIZE: u64 = 1024;

/// One model's probability file, parsed and validated.
#[derive(Debug, Clone)]
pub struct LoadedMatrix {
    /// The header of the identity column, reused for the decision file.
    pub id_column: String,
    pub label_names: Vec<String>,
    pub sample_ids: SampleIds,
    pub probabilities: ProbabilityMatrix,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read probability file '{path}': {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error(
        "Probability file '{path}' has a header with {found} column(s). An identity column followed by at least one label column is required."
    )]
    MissingLabelColumns { path: PathBuf, found: usize },
    #[error("Probability file '{0}' contains a header but no samples.")]
    NoSamples(PathBuf),
    #[error(
        "Sample identity in '{path}', data row {row}, is not valid UTF-8. Identities are compared byte for byte and cannot be repaired."
    )]
    InvalidSampleId { path: PathBuf, row: usize },
    #[error(
        "Could not parse '{text}' as a probability in '{path}', data row {row}, column '{column}'."
    )]
    Parse {
        path: PathBuf,
        row: usize,
        column: String,
        text: String,
    },
    #[error(
        "Label columns of model '{model}' do not match model '{reference}': column {index} is '{found}' but '{expected}' was expected."
    )]
    LabelMismatch {
        model: String,
        reference: String,
        index: usize,
        expected: String,
        found: String,
    },
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error(
        "Output file '{0}' already exists. It will not be overwritten. Please remove it or choose another path."
    )]
    Exists(PathBuf),
    #[error("Failed to write output file '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(
        "Output path '{0}' was requested for more than one output. Every output needs its own file."
    )]
    DuplicatePath(PathBuf),
    #[error("Failed to serialize the report to TOML: {0}")]
    Toml(#[from] toml::ser::Error),
}

fn create_progress_bar(message: String) -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(None, draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {pos} rows {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb
}

/// Reads and validates one model's probability CSV.
///
/// Ragged rows are reported as `ShapeMismatch` for `model`; values outside `[0, 1]` as
/// `ProbabilityOutOfRange`.
pub fn read_probability_csv(model: &str, path: &Path) -> Result<LoadedMatrix, LoadError> {
    let csv_err = |source: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers = reader.headers().map_err(csv_err)?.clone();
    if headers.len() < 2 {
        return Err(LoadError::MissingLabelColumns {
            path: path.to_path_buf(),
            found: headers.len(),
        });
    }
    let id_column = headers[0].to_string();
    let label_names: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    let num_labels = label_names.len();

    let pb = create_progress_bar(format!("Loading {model}"));
    let mut sample_ids: Vec<String> = Vec::new();
    let mut flat: Vec<f64> = Vec::new();
    let mut record = ByteRecord::new();
    let mut row = 0usize;

    while reader.read_byte_record(&mut record).map_err(csv_err)? {
        if record.len() != num_labels + 1 {
            return Err(EnsembleError::ShapeMismatch {
                model: model.to_string(),
                expected: Shape {
                    rows: row + 1,
                    cols: num_labels,
                },
                found: Shape {
                    rows: row + 1,
                    cols: record.len().saturating_sub(1),
                },
            }
            .into());
        }

        // A lossy decode would map distinct identities onto the same text.
        let id = std::str::from_utf8(&record[0]).map_err(|_| LoadError::InvalidSampleId {
            path: path.to_path_buf(),
            row: row + 1,
        })?;
        sample_ids.push(id.to_string());
        for (j, field) in record.iter().skip(1).enumerate() {
            let value = lexical_core::parse::<f64>(field).map_err(|_| LoadError::Parse {
                path: path.to_path_buf(),
                row: row + 1,
                column: label_names[j].clone(),
                text: String::from_utf8_lossy(field).into_owned(),
            })?;
            flat.push(value);
        }

        row += 1;
        if row as u64 % PROGRESS_UPDATE_BATCH_SIZE == 0 {
            pb.set_position(row as u64);
        }
    }
    pb.finish_and_clear();

    if row == 0 {
        return Err(LoadError::NoSamples(path.to_path_buf()));
    }

    let values = Array2::from_shape_vec((row, num_labels), flat).map_err(|_| {
        EnsembleError::ShapeMismatch {
            model: model.to_string(),
            expected: Shape {
                rows: row,
                cols: num_labels,
            },
            found: Shape {
                rows: row,
                cols: num_labels,
            },
        }
    })?;

    Ok(LoadedMatrix {
        id_column,
        label_names,
        sample_ids: sample_ids.into(),
        probabilities: ProbabilityMatrix::new(model, values)?,
    })
}

/// Fails with `LabelMismatch` when a model's label header differs from the reference's.
pub fn check_same_labels(
    reference: &str,
    expected: &[String],
    model: &str,
    found: &[String],
) -> Result<(), LoadError> {
    let index = expected
        .iter()
        .zip(found)
        .position(|(e, f)| e != f)
        .or_else(|| (expected.len() != found.len()).then(|| expected.len().min(found.len())));

    match index {
        None => Ok(()),
        Some(index) => Err(LoadError::LabelMismatch {
            model: model.to_string(),
            reference: reference.to_string(),
            index,
            expected: expected.get(index).cloned().unwrap_or_default(),
            found: found.get(index).cloned().unwrap_or_default(),
        }),
    }
}

/// Fails with `Exists` when `path` is already present.
pub fn ensure_absent(path: &Path) -> Result<(), OutputError> {
    if path.exists() {
        return Err(OutputError::Exists(path.to_path_buf()));
    }
    Ok(())
}

/// Writes the final decision matrix as CSV: the identity column, then one `0/1` column
/// per label.
pub fn write_decisions(
    path: &Path,
    id_column: &str,
    label_names: &[String],
    sample_ids: &[String],
    decision: &ArrayView2<'_, u8>,
) -> Result<(), OutputError> {
    write_atomically(path, |file| {
        let mut writer = WriterBuilder::new().from_writer(file);
        writer.write_record(
            std::iter::once(id_column).chain(label_names.iter().map(String::as_str)),
        )?;

        let mut record: Vec<&str> = Vec::with_capacity(label_names.len() + 1);
        for (id, row) in sample_ids.iter().zip(decision.rows()) {
            record.clear();
            record.push(id);
            record.extend(row.iter().map(|&d| if d == 1 { "1" } else { "0" }));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Writes the weighted vote matrix as TSV, with the same header layout as the decisions.
pub fn write_votes(
    path: &Path,
    id_column: &str,
    label_names: &[String],
    sample_ids: &[String],
    votes: &ArrayView2<'_, f64>,
) -> Result<(), OutputError> {
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        write!(writer, "{id_column}")?;
        for name in label_names {
            write!(writer, "\t{name}")?;
        }
        writeln!(writer)?;

        let mut line_buffer = String::with_capacity(label_names.len() * 20);
        let mut ryu_buffer = ryu::Buffer::new();
        for (id, row) in sample_ids.iter().zip(votes.rows()) {
            line_buffer.clear();
            line_buffer.push_str(id);
            for &v in row {
                write!(&mut line_buffer, "\t{}", ryu_buffer.format(v))?;
            }
            writeln!(writer, "{line_buffer}")?;
        }
        writer.flush()?;
        Ok(())
    })
}

/// Serializes `value` as pretty TOML.
pub fn write_toml<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), OutputError> {
    let text = toml::to_string_pretty(value)?;
    write_atomically(path, |file| {
        let mut writer = BufWriter::new(file);
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    })
}

/// Fails with `DuplicatePath` when two requested outputs name the same file.
///
/// Paths are compared after making them absolute, so `out.csv` and `./out.csv` collide.
pub fn ensure_distinct(paths: &[&Path]) -> Result<(), OutputError> {
    let mut seen: Vec<PathBuf> = Vec::with_capacity(paths.len());
    for &path in paths {
        let resolved = std::path::absolute(path).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if seen.contains(&resolved) {
            return Err(OutputError::DuplicatePath(path.to_path_buf()));
        }
        seen.push(resolved);
    }
    Ok(())
}

/// Runs `body` against a fresh temporary file beside `path`, syncs it, and links it
/// into place. The temporary file is removed on any failure.
fn write_atomically<F>(path: &Path, body: F) -> Result<(), OutputError>
where
    F: FnOnce(&mut File) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
{
    ensure_absent(path)?;
    let io_err = |source: io::Error| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let output_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let output_name = path
        .file_name()
        .map_or_else(|| "concord_output".into(), |n| n.to_string_lossy().into_owned());
    let pid = std::process::id();
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut temp = None;
    for attempt in 0..32u32 {
        let candidate = output_dir.join(format!(
            ".{output_name}.{pid}.{}.tmp",
            ts_nanos + attempt as u128
        ));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                temp = Some((candidate, file));
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_err(e)),
        }
    }
    let (temp_path, mut temp_file) = temp.ok_or_else(|| {
        io_err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!(
                "Failed to allocate a unique temporary output file in '{}'.",
                output_dir.display()
            ),
        ))
    })?;

    let write_result = body(&mut temp_file)
        .map_err(io::Error::other)
        .and_then(|()| temp_file.sync_all());
    drop(temp_file);

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(err));
    }

    let persisted = persist_no_clobber(&temp_path, path);
    if let Err(e) = fs::remove_file(&temp_path) {
        log::warn!(
            "Could not remove temporary file '{}': {e}",
            temp_path.display()
        );
    }
    persisted
}

/// Publishes `temp_path` at `path` with a hard link, which fails instead of replacing a
/// file that appeared at `path` after the up-front existence check.
fn persist_no_clobber(temp_path: &Path, path: &Path) -> Result<(), OutputError> {
    match fs::hard_link(temp_path, path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(OutputError::Exists(path.to_path_buf()))
        }
        Err(source) => Err(OutputError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
