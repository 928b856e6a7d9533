//! Binary archive for handing hourly profiles to downstream capacity-expansion
//! tooling.
//!
//! A frame is stored as a NumPy `.npz` container (a zip of `.npy` arrays):
//!
//! - `index_{i}.npy`: values of index level `i` (`<i8`, or text as below)
//! - `index_names.npy`: the index level names
//! - `columns.npy`: the column names
//! - `data.npy`: the `(rows, columns)` payload, deflated (omitted for empty frames)
//!
//! Text arrays are `(n, width)` `u8` matrices of NUL-padded UTF-8 bytes.
//! `numpy.load` opens the container directly. It is not HDF5.

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array1, Array2};
use ndarray_npy::{ReadNpyError, ReadNpyExt, WriteNpyError, WriteNpyExt};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::models::MultiYearProfile;

/// Entries that may hold the payload when reading.
pub const VALID_DATA_KEYS: [&str; 4] = ["data", "cf", "load", "evload"];

/// File extension of written archives.
pub const ARCHIVE_EXTENSION: &str = "npz";

const NPY_SUFFIX: &str = ".npy";

/// Width used for text index levels.
const INDEX_STRING_WIDTH: usize = 30;

const DATA_COMPRESSION_LEVEL: i32 = 4;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{} can only contain one datatype but it contains {:?}", .path.display(), .dtypes)]
    MixedDtypes { path: PathBuf, dtypes: Vec<String> },

    #[error("multiple data keys {:?} found in {}", .keys, .path.display())]
    AmbiguousDataKeys { path: PathBuf, keys: Vec<String> },

    #[error("malformed archive entry '{entry}': {reason}")]
    MalformedEntry { entry: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("npy read error: {0}")]
    ReadNpy(#[from] ReadNpyError),

    #[error("npy write error: {0}")]
    WriteNpy(#[from] WriteNpyError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type ArchiveResult<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexLevel {
    Int(Vec<i64>),
    Text(Vec<String>),
}

impl IndexLevel {
    pub fn len(&self) -> usize {
        match self {
            IndexLevel::Int(v) => v.len(),
            IndexLevel::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl ColumnData {
    fn dtype(&self) -> &'static str {
        match self {
            ColumnData::Float(_) => "<f8",
            ColumnData::Int(_) => "<i8",
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Float(v) => v.len(),
            ColumnData::Int(v) => v.len(),
        }
    }
}

/// A table with named index levels and typed columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveFrame {
    pub index_names: Vec<String>,
    pub index: Vec<IndexLevel>,
    pub columns: Vec<String>,
    pub data: Vec<ColumnData>,
}

impl ArchiveFrame {
    pub fn height(&self) -> usize {
        self.data
            .first()
            .map(ColumnData::len)
            .or_else(|| self.index.first().map(IndexLevel::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.height() == 0
    }
}

fn encode_strings(values: &[String], width: usize) -> ArchiveResult<Array2<u8>> {
    let mut flat = Vec::with_capacity(values.len() * width);
    for value in values {
        let mut raw = value.as_bytes().to_vec();
        raw.resize(width, 0);
        flat.extend_from_slice(&raw);
    }
    Ok(Array2::from_shape_vec((values.len(), width), flat)?)
}

fn decode_strings(array: &Array2<u8>) -> Vec<String> {
    array
        .outer_iter()
        .map(|row| {
            let bytes: Vec<u8> = row.iter().copied().take_while(|b| *b != 0).collect();
            String::from_utf8_lossy(&bytes).into_owned()
        })
        .collect()
}

fn is_datetime_level(name: &str) -> bool {
    matches!(name, "datetime" | "weather_datetime")
}

/// Format a timestamp string as ISO-8601 (`YYYY-MM-DDTHH:MM:SS`).
pub fn to_isoformat(value: &str) -> String {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return dt.format("%Y-%m-%dT%H:%M:%S").to_string();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return format!("{}T00:00:00", date.format("%Y-%m-%d"));
    }
    value.to_string()
}

fn max_width(values: &[String]) -> usize {
    values.iter().map(String::len).max().unwrap_or(0)
}

fn entry_name(key: &str) -> String {
    format!("{}{}", key, NPY_SUFFIX)
}

/// Array key of a zip entry, with any `.npy` suffix removed.
fn entry_key(name: &str) -> &str {
    name.strip_suffix(NPY_SUFFIX).unwrap_or(name)
}

/// Write `frame` to `path`. All data columns must share one dtype.
pub fn write_archive(path: &Path, frame: &ArchiveFrame) -> ArchiveResult<()> {
    let mut dtypes: Vec<String> = Vec::new();
    for column in &frame.data {
        let dtype = column.dtype().to_string();
        if !dtypes.contains(&dtype) {
            dtypes.push(dtype);
        }
    }
    if dtypes.len() > 1 {
        return Err(ArchiveError::MixedDtypes {
            path: path.to_path_buf(),
            dtypes,
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(path)?);
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    let compressed = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DATA_COMPRESSION_LEVEL));

    for (i, level) in frame.index.iter().enumerate() {
        let name = frame.index_names.get(i).map(String::as_str).unwrap_or("");
        zip.start_file(entry_name(&format!("index_{}", i)), stored)?;
        match level {
            IndexLevel::Int(values) => Array1::from(values.clone()).write_npy(&mut zip)?,
            IndexLevel::Text(values) => {
                let values: Vec<String> = if is_datetime_level(name) {
                    values.iter().map(|v| to_isoformat(v)).collect()
                } else {
                    values.clone()
                };
                encode_strings(&values, INDEX_STRING_WIDTH)?.write_npy(&mut zip)?
            }
        }
    }

    if !frame.index_names.is_empty() {
        let names = encode_strings(&frame.index_names, max_width(&frame.index_names))?;
        zip.start_file(entry_name("index_names"), stored)?;
        names.write_npy(&mut zip)?;
    }

    if !frame.columns.is_empty() {
        let columns = encode_strings(&frame.columns, max_width(&frame.columns))?;
        zip.start_file(entry_name("columns"), stored)?;
        columns.write_npy(&mut zip)?;
    }

    if !frame.is_empty() {
        let rows = frame.height();
        zip.start_file(entry_name("data"), compressed)?;
        match dtypes[0].as_str() {
            "<i8" => {
                let columns: Vec<&Vec<i64>> = frame
                    .data
                    .iter()
                    .filter_map(|c| match c {
                        ColumnData::Int(v) => Some(v),
                        ColumnData::Float(_) => None,
                    })
                    .collect();
                Array2::from_shape_fn((rows, columns.len()), |(r, c)| columns[c][r])
                    .write_npy(&mut zip)?;
            }
            _ => {
                let columns: Vec<&Vec<f64>> = frame
                    .data
                    .iter()
                    .filter_map(|c| match c {
                        ColumnData::Float(v) => Some(v),
                        ColumnData::Int(_) => None,
                    })
                    .collect();
                Array2::from_shape_fn((rows, columns.len()), |(r, c)| columns[c][r])
                    .write_npy(&mut zip)?;
            }
        }
    }

    zip.finish()?;
    Ok(())
}

fn read_text(zip: &mut ZipArchive<File>, name: &str) -> ArchiveResult<Vec<String>> {
    let array = Array2::<u8>::read_npy(zip.by_name(name)?)?;
    Ok(decode_strings(&array))
}

fn read_index_level(zip: &mut ZipArchive<File>, name: &str) -> ArchiveResult<IndexLevel> {
    if let Ok(values) = Array1::<i64>::read_npy(zip.by_name(name)?) {
        return Ok(IndexLevel::Int(values.to_vec()));
    }
    Ok(IndexLevel::Text(read_text(zip, name)?))
}

fn read_data(zip: &mut ZipArchive<File>, name: &str) -> ArchiveResult<Vec<ColumnData>> {
    if let Ok(matrix) = Array2::<f64>::read_npy(zip.by_name(name)?) {
        return Ok(matrix
            .columns()
            .into_iter()
            .map(|c| ColumnData::Float(c.to_vec()))
            .collect());
    }
    match Array2::<i64>::read_npy(zip.by_name(name)?) {
        Ok(matrix) => Ok(matrix
            .columns()
            .into_iter()
            .map(|c| ColumnData::Int(c.to_vec()))
            .collect()),
        Err(err) => Err(ArchiveError::MalformedEntry {
            entry: name.to_string(),
            reason: format!("expected a 2-D <f8 or <i8 array: {}", err),
        }),
    }
}

/// Read an archive written by [`write_archive`] (or any `.npz` using one of
/// the recognised data keys).
pub fn read_archive(path: &Path) -> ArchiveResult<ArchiveFrame> {
    let mut zip = ZipArchive::new(File::open(path)?)?;
    let names: Vec<String> = zip.file_names().map(str::to_string).collect();

    let data_names: Vec<String> = names
        .iter()
        .filter(|n| VALID_DATA_KEYS.contains(&entry_key(n)))
        .cloned()
        .collect();
    if data_names.len() > 1 {
        return Err(ArchiveError::AmbiguousDataKeys {
            path: path.to_path_buf(),
            keys: data_names.iter().map(|n| entry_key(n).to_string()).collect(),
        });
    }

    let mut frame = ArchiveFrame::default();

    if let Some(name) = data_names.first() {
        frame.data = read_data(&mut zip, name)?;
    }

    if let Some(name) = names.iter().find(|n| entry_key(n) == "columns") {
        frame.columns = read_text(&mut zip, name)?;
    }

    let index_pattern = Regex::new(r"^index_([0-9]+)$").map_err(|e| ArchiveError::MalformedEntry {
        entry: "index".to_string(),
        reason: e.to_string(),
    })?;
    let mut levels: BTreeMap<usize, String> = BTreeMap::new();
    for name in &names {
        if let Some(caps) = index_pattern.captures(entry_key(name)) {
            if let Ok(position) = caps[1].parse::<usize>() {
                levels.insert(position, name.clone());
            }
        }
    }
    for name in levels.values() {
        frame.index.push(read_index_level(&mut zip, name)?);
    }

    if let Some(name) = names.iter().find(|n| entry_key(n) == "index_names") {
        frame.index_names = read_text(&mut zip, name)?;
    }

    if frame.data.len() != frame.columns.len() && !frame.data.is_empty() {
        return Err(ArchiveError::MalformedEntry {
            entry: "columns".to_string(),
            reason: format!(
                "{} column names for {} data columns",
                frame.columns.len(),
                frame.data.len()
            ),
        });
    }

    Ok(frame)
}

impl From<&MultiYearProfile> for ArchiveFrame {
    fn from(profile: &MultiYearProfile) -> Self {
        ArchiveFrame {
            index_names: vec!["year".to_string(), "weather_datetime".to_string()],
            index: vec![
                IndexLevel::Int(profile.years.iter().map(|y| i64::from(*y)).collect()),
                IndexLevel::Text(profile.timestamps.clone()),
            ],
            columns: profile.columns.clone(),
            data: profile.values.iter().cloned().map(ColumnData::Float).collect(),
        }
    }
}

impl TryFrom<ArchiveFrame> for MultiYearProfile {
    type Error = ArchiveError;

    fn try_from(frame: ArchiveFrame) -> ArchiveResult<Self> {
        let malformed = |reason: &str| ArchiveError::MalformedEntry {
            entry: "index".to_string(),
            reason: reason.to_string(),
        };
        let mut levels = frame.index.into_iter();
        let years = match levels.next() {
            Some(IndexLevel::Int(years)) => years
                .into_iter()
                .map(|y| i32::try_from(y).map_err(|_| malformed("year out of range")))
                .collect::<ArchiveResult<Vec<_>>>()?,
            _ => return Err(malformed("first index level must be integer years")),
        };
        let timestamps = match levels.next() {
            Some(IndexLevel::Text(ts)) => ts,
            _ => return Err(malformed("second index level must be timestamps")),
        };
        let values = frame
            .data
            .into_iter()
            .map(|column| match column {
                ColumnData::Float(v) => v,
                ColumnData::Int(v) => v.into_iter().map(|x| x as f64).collect(),
            })
            .collect();

        Ok(MultiYearProfile {
            years,
            timestamps,
            columns: frame.columns,
            values,
        })
    }
}
