//! Byte ranges: the `Range` request header, `Content-Range` on partial `PUT` and
//! `multipart/byteranges` framing.
//!
//! A [`Ranges`] set keeps its members merged: overlapping or adjacent ranges are combined as
//! they are added, so a set never holds two ranges that could be one.

use std::fmt;

use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range syntax: {0}")]
    Syntax(String),

    #[error("multiple ranges are not supported here")]
    MultipleRanges,

    #[error("range not satisfiable")]
    Unsatisfiable,
}

impl RangeError {
    fn syntax<S: ToString>(s: S) -> Self {
        Self::Syntax(s.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Syntax(_) => StatusCode::BAD_REQUEST,
            Self::MultipleRanges => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Unsatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }
}

/// One byte range, positions inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last`
    Bounded { start: u64, end: u64 },
    /// `first-`: from an offset through the end of the resource
    FromOffset(u64),
    /// `-n`: the last n bytes of the resource
    Suffix(u64),
}

impl ByteRange {
    /// Position in the canonical order: offset ranges by start, suffixes last.
    fn sort_key(self) -> (u8, u64) {
        match self {
            Self::Bounded { start, .. } | Self::FromOffset(start) => (0, start),
            Self::Suffix(len) => (1, len),
        }
    }

    /// Combines two ranges that overlap or touch, `None` if they are disjoint.
    pub fn merge(self, other: ByteRange) -> Option<ByteRange> {
        use ByteRange::{Bounded, FromOffset, Suffix};

        match (self, other) {
            (Bounded { start: s1, end: e1 }, Bounded { start: s2, end: e2 }) => {
                (s2 <= e1.saturating_add(1) && s1 <= e2.saturating_add(1)).then(|| Bounded { start: s1.min(s2), end: e1.max(e2) })
            }
            (Bounded { start, end }, FromOffset(from)) | (FromOffset(from), Bounded { start, end }) => {
                (from <= end.saturating_add(1)).then(|| FromOffset(start.min(from)))
            }
            (FromOffset(a), FromOffset(b)) => Some(FromOffset(a.min(b))),
            (Suffix(a), Suffix(b)) => Some(Suffix(a.max(b))),
            _ => None,
        }
    }

    /// The inclusive positions within a resource of `size` bytes, `None` if none of it exists.
    pub fn resolve(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            Self::Bounded { start, end } => (start <= last).then(|| (start, end.min(last))),
            Self::FromOffset(start) => (start <= last).then_some((start, last)),
            Self::Suffix(0) => None,
            Self::Suffix(len) => Some((size - len.min(size), last)),
        }
    }

    fn parse(spec: &str) -> Result<Self, RangeError> {
        let (first, last) = spec.trim().split_once('-').ok_or_else(|| RangeError::syntax(spec))?;
        let number = |s: &str| s.trim().parse::<u64>().ok().ok_or_else(|| RangeError::syntax(spec));
        match (first.trim().is_empty(), last.trim().is_empty()) {
            (true, true) => Err(RangeError::syntax(spec)),
            (true, false) => Ok(Self::Suffix(number(last)?)),
            (false, true) => Ok(Self::FromOffset(number(first)?)),
            (false, false) => {
                let (start, end) = (number(first)?, number(last)?);
                if end < start {
                    return Err(RangeError::syntax(spec));
                }
                Ok(Self::Bounded { start, end })
            }
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded { start, end } => write!(f, "{start}-{end}"),
            Self::FromOffset(start) => write!(f, "{start}-"),
            Self::Suffix(len) => write!(f, "-{len}"),
        }
    }
}

/// A merged set of byte ranges.
///
/// A single range stays a scalar; the set turns into a sorted list only once a second range
/// that can't be combined with the first is added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Ranges {
    #[default]
    Empty,
    Single(ByteRange),
    Multi(Vec<ByteRange>),
}

impl Ranges {
    pub fn new() -> Self {
        Self::Empty
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::Multi(ranges) => ranges.len(),
        }
    }

    pub fn as_slice(&self) -> &[ByteRange] {
        match self {
            Self::Empty => &[],
            Self::Single(range) => std::slice::from_ref(range),
            Self::Multi(ranges) => ranges,
        }
    }

    pub fn add(&mut self, range: ByteRange) {
        *self = match std::mem::take(self) {
            Self::Empty => Self::Single(range),
            Self::Single(current) => match current.merge(range) {
                Some(merged) => Self::Single(merged),
                None => Self::from_list(vec![current, range]),
            },
            Self::Multi(mut ranges) => {
                ranges.push(range);
                Self::from_list(ranges)
            }
        };
    }

    /// Sorts and merges `ranges`, demoting a list of one to a scalar.
    fn from_list(mut ranges: Vec<ByteRange>) -> Self {
        ranges.sort_by_key(|range| range.sort_key());
        let mut merged: Vec<ByteRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            if let Some(last) = merged.last_mut()
                && let Some(combined) = last.merge(range)
            {
                *last = combined;
                continue;
            }
            merged.push(range);
        }

        match merged.len() {
            0 => Self::Empty,
            1 => Self::Single(merged[0]),
            _ => Self::Multi(merged),
        }
    }

    /// Parses a `Range` header value such as `bytes=0-99,200-`.
    pub fn parse_header(value: &str) -> Result<Self, RangeError> {
        let (unit, specs) = value.trim().split_once('=').ok_or_else(|| RangeError::syntax(value))?;
        if !unit.trim().eq_ignore_ascii_case("bytes") {
            return Err(RangeError::syntax(value));
        }

        let mut ranges = Self::Empty;
        for spec in specs.split(',').filter(|spec| !spec.trim().is_empty()) {
            ranges.add(ByteRange::parse(spec)?);
        }
        if ranges.is_empty() {
            return Err(RangeError::syntax(value));
        }
        Ok(ranges)
    }

    /// Resolves the set against a resource of `size` bytes.
    ///
    /// Ranges starting past the end are dropped and the rest merged again, since suffix and
    /// open ranges may overlap once their positions are known. Fails when nothing is left.
    pub fn resolve(&self, size: u64) -> Result<Vec<(u64, u64)>, RangeError> {
        let mut resolved = Self::Empty;
        for range in self.as_slice() {
            if let Some((start, end)) = range.resolve(size) {
                resolved.add(ByteRange::Bounded { start, end });
            }
        }

        let positions: Vec<_> = resolved
            .as_slice()
            .iter()
            .filter_map(|range| match *range {
                ByteRange::Bounded { start, end } => Some((start, end)),
                _ => None,
            })
            .collect();
        if positions.is_empty() {
            return Err(RangeError::Unsatisfiable);
        }
        Ok(positions)
    }
}

/// The `Content-Range` of a partial `PUT` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// the complete length, `None` for `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parses `bytes first-last/total` or `bytes first-last/*`.
    ///
    /// A list of ranges is rejected as unsupported, bounds past the complete length as not
    /// satisfiable.
    pub fn parse(value: &str) -> Result<Self, RangeError> {
        let value = value.trim();
        if value.contains(',') {
            return Err(RangeError::MultipleRanges);
        }
        let rest = value
            .get(..6)
            .filter(|unit| unit.eq_ignore_ascii_case("bytes "))
            .map(|_| &value[6..])
            .ok_or_else(|| RangeError::syntax(value))?;
        let (range, total) = rest.split_once('/').ok_or_else(|| RangeError::syntax(value))?;
        if range.trim_start().starts_with('-') {
            return Err(RangeError::Unsatisfiable);
        }
        let (start, end) = range.split_once('-').ok_or_else(|| RangeError::syntax(value))?;

        let number = |s: &str| s.trim().parse::<u64>().ok().ok_or_else(|| RangeError::syntax(value));
        let (start, end) = (number(start)?, number(end)?);
        let total = match total.trim() {
            "*" => None,
            total => Some(number(total)?),
        };

        if end < start || end == u64::MAX || total.is_some_and(|total| end >= total) {
            return Err(RangeError::Unsatisfiable);
        }
        Ok(Self { start, end, total })
    }

    /// Number of bytes the range spans.
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// The value sent with a `416` response for a resource of `size` bytes.
    pub fn unsatisfied(size: u64) -> String {
        format!("bytes */{size}")
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "bytes {}-{}/{}", self.start, self.end, total),
            None => write!(f, "bytes {}-{}/*", self.start, self.end),
        }
    }
}

/// Framing of a `multipart/byteranges` body.
#[derive(Debug, Clone)]
pub struct MultipartRanges {
    boundary: String,
    content_type: String,
    size: u64,
    ranges: Vec<(u64, u64)>,
}

impl MultipartRanges {
    pub fn new(content_type: impl Into<String>, size: u64, ranges: Vec<(u64, u64)>) -> Self {
        let boundary = format!("loom-{}", uuid::Uuid::new_v4().simple());
        Self { boundary, content_type: content_type.into(), size, ranges }
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// The `Content-Type` of the whole body.
    pub fn content_type(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    /// The delimiter and headers preceding part `index`.
    pub fn part_head(&self, index: usize) -> String {
        let (start, end) = self.ranges[index];
        let range = ContentRange { start, end, total: Some(self.size) };
        let lead = if index == 0 { "" } else { "\r\n" };
        format!("{lead}--{}\r\nContent-Type: {}\r\nContent-Range: {range}\r\n\r\n", self.boundary, self.content_type)
    }

    /// The closing delimiter.
    pub fn tail(&self) -> String {
        format!("\r\n--{}--\r\n", self.boundary)
    }

    /// The exact length of the whole body.
    pub fn content_length(&self) -> u64 {
        let parts: u64 = (0..self.ranges.len()).map(|i| self.part_head(i).len() as u64 + self.ranges[i].1 - self.ranges[i].0 + 1).sum();
        parts + self.tail().len() as u64
    }
}
