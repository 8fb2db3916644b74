//! Fixed-width node segment decoder.
//!
//! A segment is exactly 11 characters:
//!
//! ```text
//!  0..3   node id (opaque)
//!  3..5   temperature      two digits
//!  5..7   humidity         two digits
//!  7..9   pm25             two digits
//!  9      worker_state     0 | 1
//!  10     worker_presence  0 | 1
//! ```
//!
//! Decoding is pure; the ingestion timestamp is assigned by the caller.

use crate::error::DecodeError;
use crate::models::{Reading, WorkerPresence, WorkerState};

/// Number of characters in one node segment.
pub const SEGMENT_LEN: usize = 11;

const NODE_ID_LEN: usize = 3;

// ---

/// Decode one segment into a [`Reading`].
pub fn decode(segment: &str) -> Result<Reading, DecodeError> {
    // ---
    let chars: Vec<char> = segment.chars().collect();
    if chars.len() != SEGMENT_LEN {
        return Err(DecodeError::InvalidLength(chars.len()));
    }

    let node_id: String = chars[..NODE_ID_LEN].iter().collect();
    let temperature = two_digits("temperature", &chars[3..5])?;
    let humidity = two_digits("humidity", &chars[5..7])?;
    let pm25 = two_digits("pm25", &chars[7..9])?;

    let worker_state = match digit("worker_state", chars[9])? {
        0 => WorkerState::Normal,
        1 => WorkerState::Alert,
        d => return Err(flag_out_of_range("worker_state", d)),
    };

    let worker_presence = match digit("worker_presence", chars[10])? {
        0 => WorkerPresence::Absent,
        1 => WorkerPresence::Present,
        d => return Err(flag_out_of_range("worker_presence", d)),
    };

    Ok(Reading {
        node_id,
        temperature,
        humidity,
        pm25,
        worker_state,
        worker_presence,
    })
}

fn two_digits(field: &'static str, chars: &[char]) -> Result<u8, DecodeError> {
    // ---
    let tens = digit(field, chars[0])?;
    let ones = digit(field, chars[1])?;
    Ok(tens * 10 + ones)
}

fn digit(field: &'static str, c: char) -> Result<u8, DecodeError> {
    // ---
    // to_digit(10) only accepts ASCII '0'..='9'
    c.to_digit(10)
        .map(|d| d as u8)
        .ok_or_else(|| DecodeError::MalformedField {
            field,
            reason: format!("expected a digit, got {c:?}"),
        })
}

fn flag_out_of_range(field: &'static str, d: u8) -> DecodeError {
    DecodeError::MalformedField {
        field,
        reason: format!("expected 0 or 1, got {d}"),
    }
}
