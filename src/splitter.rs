//! Splits a message payload into node segments and decodes each one.

use crate::decoder::decode;
use crate::error::DecodeError;
use crate::models::Reading;

/// One comma-delimited token of a payload and its decode result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome<'a> {
    pub segment: &'a str,
    pub outcome: Result<Reading, DecodeError>,
}

// ---

/// Lazily decode every comma-delimited segment of `payload`, left to right.
///
/// The payload is trimmed first. An empty payload yields nothing; otherwise
/// every token (including empty ones between consecutive commas) yields
/// exactly one outcome, so a bad segment never hides the ones after it.
pub fn split(payload: &str) -> impl Iterator<Item = SegmentOutcome<'_>> {
    // ---
    let trimmed = payload.trim();
    let tokens = if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.split(','))
    };

    tokens.into_iter().flatten().map(|segment| SegmentOutcome {
        segment,
        outcome: decode(segment),
    })
}
