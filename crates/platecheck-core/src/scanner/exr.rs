//! OpenEXR header reader.
//!
//! Only the attribute list of the first part is read; pixel data is never
//! touched. Layout: 4-byte magic, 4-byte version/flags, then attributes as
//! `name\0 type\0 size:i32le value`, terminated by an empty name.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use indexmap::IndexMap;

use crate::errors::{PlatecheckError, PlatecheckResult};
use crate::scanner::metadata::{HeaderAttributes, MetadataReader};

const EXR_MAGIC: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];
const LONG_NAMES_FLAG: u32 = 0x400;
const MAX_NAME_LEN: usize = 255;
const MAX_ATTRIBUTE_SIZE: usize = 16 * 1024 * 1024;

// Attribute names read by the verifier.
const ATTR_FRAMERATE_NUMERATOR: &str = "framerate_numerator";
const ATTR_FRAMERATE_DENOMINATOR: &str = "framerate_denominator";
const ATTR_FRAMES_PER_SECOND: &str = "framesPerSecond";
const ATTR_ABSOLUTE_TIMECODE: &str = "frame_absolute_timecode";
const ATTR_TIMECODE: &str = "timeCode";
const ATTR_REEL_ID: &str = "reel_id_full";
const ATTR_ASC_SAT: &str = "mpl.asc_sat";
const ATTR_ASC_SOP: &str = "mpl.asc_sop";

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Str(String),
    Int(i32),
    Float(f32),
    Double(f64),
    Rational(i32, u32),
    Timecode { time_and_flags: u32, user_data: u32 },
    Other { type_name: String, size: usize },
}

impl AttributeValue {
    fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(i64::from(*v)),
            AttributeValue::Str(s) => s.trim().parse().ok(),
            AttributeValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttributeValue::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(f64::from(*v)),
            AttributeValue::Float(v) => Some(f64::from(*v)),
            AttributeValue::Double(v) => Some(*v),
            AttributeValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }
}

/// Render a packed SMPTE time-code as `HH:MM:SS:FF` (`;` before the frame
/// field when the drop-frame bit is set).
pub fn format_packed_timecode(time_and_flags: u32) -> String {
    let bcd = |shift: u32, units_mask: u32, tens_mask: u32| {
        ((time_and_flags >> shift) & units_mask) + ((time_and_flags >> (shift + 4)) & tens_mask) * 10
    };
    let frames = bcd(0, 0x0f, 0x03);
    let drop_frame = (time_and_flags >> 6) & 1 == 1;
    let seconds = bcd(8, 0x0f, 0x07);
    let minutes = bcd(16, 0x0f, 0x07);
    let hours = bcd(24, 0x0f, 0x03);
    let sep = if drop_frame { ';' } else { ':' };
    format!("{hours:02}:{minutes:02}:{seconds:02}{sep}{frames:02}")
}

fn truncated(e: io::Error) -> PlatecheckError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PlatecheckError::Metadata("truncated EXR header".to_string())
    } else {
        PlatecheckError::Io(e)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> PlatecheckResult<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_name<R: Read>(reader: &mut R, max_len: usize) -> PlatecheckResult<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).map_err(truncated)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() >= max_len {
            return Err(PlatecheckError::Metadata(
                "EXR attribute name is too long".to_string(),
            ));
        }
        bytes.push(byte[0]);
    }
    String::from_utf8(bytes)
        .map_err(|_| PlatecheckError::Metadata("EXR attribute name is not UTF-8".to_string()))
}

fn decode_value(type_name: &str, data: &[u8]) -> AttributeValue {
    let u32_at = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
    match (type_name, data.len()) {
        ("string", _) => {
            AttributeValue::Str(String::from_utf8_lossy(data).trim_end_matches('\0').to_string())
        }
        ("int", 4) => AttributeValue::Int(u32_at(0) as i32),
        ("float", 4) => AttributeValue::Float(f32::from_bits(u32_at(0))),
        ("double", 8) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(data);
            AttributeValue::Double(f64::from_le_bytes(buf))
        }
        ("rational", 8) => AttributeValue::Rational(u32_at(0) as i32, u32_at(4)),
        ("timecode", 8) => AttributeValue::Timecode {
            time_and_flags: u32_at(0),
            user_data: u32_at(4),
        },
        _ => AttributeValue::Other {
            type_name: type_name.to_string(),
            size: data.len(),
        },
    }
}

/// Read the attribute list of the first header part.
pub fn read_attributes<R: Read>(reader: &mut R) -> PlatecheckResult<IndexMap<String, AttributeValue>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(truncated)?;
    if magic != EXR_MAGIC {
        return Err(PlatecheckError::Metadata("not an OpenEXR file".to_string()));
    }
    let version = read_u32(reader)?;
    let max_name = if version & LONG_NAMES_FLAG != 0 {
        MAX_NAME_LEN
    } else {
        31
    };

    let mut attributes = IndexMap::new();
    loop {
        let name = read_name(reader, max_name)?;
        if name.is_empty() {
            break;
        }
        let type_name = read_name(reader, max_name)?;
        let size = read_u32(reader)? as usize;
        if size > MAX_ATTRIBUTE_SIZE {
            return Err(PlatecheckError::Metadata(format!(
                "EXR attribute {name:?} claims {size} bytes"
            )));
        }
        let mut data = vec![0u8; size];
        reader.read_exact(&mut data).map_err(truncated)?;
        attributes.insert(name, decode_value(&type_name, &data));
    }
    Ok(attributes)
}

/// Map raw attributes onto what the verifier reads.
pub fn header_attributes(attributes: &IndexMap<String, AttributeValue>) -> HeaderAttributes {
    let get = |name: &str| attributes.get(name);

    let (mut numerator, mut denominator) = (
        get(ATTR_FRAMERATE_NUMERATOR).and_then(AttributeValue::as_i64),
        get(ATTR_FRAMERATE_DENOMINATOR).and_then(AttributeValue::as_i64),
    );
    if numerator.is_none() || denominator.is_none() {
        if let Some(AttributeValue::Rational(n, d)) = get(ATTR_FRAMES_PER_SECOND) {
            numerator = Some(i64::from(*n));
            denominator = Some(i64::from(*d));
        }
    }

    let absolute_timecode = match (get(ATTR_ABSOLUTE_TIMECODE), get(ATTR_TIMECODE)) {
        (Some(v), _) if v.as_str().is_some() => v.as_str().map(str::to_string),
        (_, Some(AttributeValue::Timecode { time_and_flags, .. })) => {
            Some(format_packed_timecode(*time_and_flags))
        }
        _ => None,
    };

    HeaderAttributes {
        framerate_numerator: numerator,
        framerate_denominator: denominator,
        absolute_timecode,
        reel_id_full: get(ATTR_REEL_ID)
            .and_then(AttributeValue::as_str)
            .map(str::to_string),
        asc_sat: get(ATTR_ASC_SAT).and_then(AttributeValue::as_f64),
        asc_sop: get(ATTR_ASC_SOP)
            .and_then(AttributeValue::as_str)
            .map(str::to_string),
    }
}

/// [`MetadataReader`] over OpenEXR files on disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExrHeaderReader;

impl MetadataReader for ExrHeaderReader {
    fn read_header(&self, path: &Path) -> PlatecheckResult<HeaderAttributes> {
        let mut reader = BufReader::new(File::open(path)?);
        let attributes = read_attributes(&mut reader)?;
        Ok(header_attributes(&attributes))
    }
}
