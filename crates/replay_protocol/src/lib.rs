//! JSON-lines dab recordings.
//!
//! A recording is one `Header` line followed by `Dab`, `Flush` and `Clear`
//! records in the order the surface received them.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayHeader {
    pub schema_version: u16,
    pub tile_size: u32,
    /// Export size used when the recording is replayed to an image.
    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl ReplayHeader {
    pub fn new(tile_size: u32, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            tile_size,
            canvas_width,
            canvas_height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DabRecord {
    pub center: [f32; 2],
    pub radius: f32,
    pub color: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplayRecord {
    Header(ReplayHeader),
    Dab(DabRecord),
    Flush,
    Clear,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse replay record JSON at line {line} failed: {message}")]
    Parse { line: usize, message: String },
    #[error("serialize replay record failed: {0}")]
    Serialize(String),
}

pub fn write_jsonl_record(
    writer: &mut dyn Write,
    record: &ReplayRecord,
) -> Result<(), ReplayError> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|error| ReplayError::Serialize(error.to_string()))?;
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn read_jsonl_records(reader: &mut dyn BufRead) -> Result<Vec<ReplayRecord>, ReplayError> {
    let mut records = Vec::new();
    let mut line_buffer = String::new();
    let mut line_number = 0usize;
    loop {
        line_buffer.clear();
        let bytes = reader.read_line(&mut line_buffer)?;
        if bytes == 0 {
            break;
        }
        line_number += 1;
        if line_buffer.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<ReplayRecord>(&line_buffer).map_err(|error| {
            ReplayError::Parse {
                line: line_number,
                message: error.to_string(),
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("recording is empty")]
    EmptyRecording,
    #[error("recording does not start with a header")]
    MissingHeader,
    #[error("schema version {found} is not supported (expected {expected})")]
    UnsupportedSchema { found: u16, expected: u16 },
    #[error("tile size {0} is not a power of two")]
    InvalidTileSize(u32),
    #[error("canvas size {width}x{height} is empty")]
    EmptyCanvas { width: u32, height: u32 },
    #[error("record {index} repeats the header")]
    DuplicateHeader { index: usize },
    #[error("dab at record {index} has a non-finite center")]
    NonFiniteCenter { index: usize },
    #[error("dab at record {index} has radius {radius}")]
    InvalidRadius { index: usize, radius: f32 },
    #[error("dab at record {index} has color channel {channel} = {value}")]
    ColorOutOfRange {
        index: usize,
        channel: usize,
        value: f32,
    },
}

/// Checks a whole recording and returns its header.
pub fn validate_records(records: &[ReplayRecord]) -> Result<&ReplayHeader, ValidationError> {
    let Some(first) = records.first() else {
        return Err(ValidationError::EmptyRecording);
    };
    let ReplayRecord::Header(header) = first else {
        return Err(ValidationError::MissingHeader);
    };
    if header.schema_version != SCHEMA_VERSION {
        return Err(ValidationError::UnsupportedSchema {
            found: header.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    if !header.tile_size.is_power_of_two() {
        return Err(ValidationError::InvalidTileSize(header.tile_size));
    }
    if header.canvas_width == 0 || header.canvas_height == 0 {
        return Err(ValidationError::EmptyCanvas {
            width: header.canvas_width,
            height: header.canvas_height,
        });
    }

    for (index, record) in records.iter().enumerate().skip(1) {
        match record {
            ReplayRecord::Header(_) => return Err(ValidationError::DuplicateHeader { index }),
            ReplayRecord::Dab(dab) => validate_dab(index, dab)?,
            ReplayRecord::Flush | ReplayRecord::Clear => {}
        }
    }
    Ok(header)
}

fn validate_dab(index: usize, dab: &DabRecord) -> Result<(), ValidationError> {
    if !dab.center.iter().all(|value| value.is_finite()) {
        return Err(ValidationError::NonFiniteCenter { index });
    }
    if !dab.radius.is_finite() || dab.radius <= 0.0 {
        return Err(ValidationError::InvalidRadius {
            index,
            radius: dab.radius,
        });
    }
    for (channel, value) in dab.color.iter().copied().enumerate() {
        if !(0.0..=1.0).contains(&value) {
            return Err(ValidationError::ColorOutOfRange {
                index,
                channel,
                value,
            });
        }
    }
    Ok(())
}
