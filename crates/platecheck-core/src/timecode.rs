//! SMPTE time-code arithmetic.
//!
//! Frame numbers are 1-based: `00:00:00:00` is frame 1. Millisecond offsets
//! stored on plate versions are derived from that frame number, so the same
//! convention has to hold on both sides of a comparison.

use crate::errors::{PlatecheckError, PlatecheckResult};

#[derive(Clone, Copy, Debug)]
pub struct Timecode {
    rate: f64,
    frames: u64,
}

impl Timecode {
    /// Parse `HH:MM:SS:FF`. A `;` before the frame field marks drop-frame,
    /// which is honoured at 29.97 and 59.94.
    pub fn from_string(rate: f64, text: &str) -> PlatecheckResult<Self> {
        let invalid = || PlatecheckError::Metadata(format!("invalid time-code {text:?}"));
        if rate.is_nan() || rate <= 0.0 {
            return Err(PlatecheckError::Metadata(format!("invalid frame rate {rate}")));
        }
        let drop_frame = text.contains(';') && is_drop_frame_rate(rate);
        let parts: Vec<u64> = text
            .trim()
            .split([':', ';', '.'])
            .map(|p| p.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        let &[hh, mm, ss, ff] = parts.as_slice() else {
            return Err(invalid());
        };

        let base = rate.round() as u64;
        if mm > 59 || ss > 59 || ff >= base {
            return Err(invalid());
        }
        let overflow =
            || PlatecheckError::Metadata(format!("time-code {text:?} out of range at {rate} fps"));
        let total_minutes = hh
            .checked_mul(60)
            .and_then(|m| m.checked_add(mm))
            .ok_or_else(overflow)?;
        let mut number = total_minutes
            .checked_mul(60)
            .and_then(|s| s.checked_add(ss))
            .and_then(|s| s.checked_mul(base))
            .and_then(|n| n.checked_add(ff))
            .ok_or_else(overflow)?;
        if drop_frame {
            let dropped = (rate * 0.066666).round() as u64;
            number = dropped
                .checked_mul(total_minutes - total_minutes / 10)
                .and_then(|d| number.checked_sub(d))
                .ok_or_else(invalid)?;
        }

        Ok(Self {
            rate,
            frames: number.checked_add(1).ok_or_else(overflow)?,
        })
    }

    /// Time-code for an offset in seconds, rounded to the nearest frame.
    pub fn from_seconds(rate: f64, seconds: f64) -> Self {
        let frames = (seconds * rate).round().max(1.0) as u64;
        Self { rate, frames }
    }

    /// Time-code for a stored millisecond offset.
    pub fn from_millis(rate: f64, millis: i64) -> Self {
        Self::from_seconds(rate, millis as f64 / 1000.0)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn to_millis(&self) -> i64 {
        (self.frames as f64 / self.rate * 1000.0).floor() as i64
    }
}

impl PartialEq for Timecode {
    fn eq(&self, other: &Self) -> bool {
        self.frames == other.frames
    }
}

impl Eq for Timecode {}

impl std::fmt::Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base = (self.rate.round() as u64).max(1);
        let number = self.frames.saturating_sub(1);
        let ff = number % base;
        let total_seconds = number / base;
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            total_seconds / 3600,
            (total_seconds / 60) % 60,
            total_seconds % 60,
            ff
        )
    }
}

fn is_drop_frame_rate(rate: f64) -> bool {
    (rate - 29.97).abs() < 0.01 || (rate - 59.94).abs() < 0.01
}
