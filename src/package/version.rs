//! Version ordering per ecosystem.
//!
//! npm, Go and crates.io versions are semantic versions and compare with
//! [`semver`]. Python and Maven versions are compared segment by segment: runs
//! of digits compare numerically, and a textual qualifier such as `rc1` or
//! `SNAPSHOT` sorts before the release it qualifies.

use std::cmp::Ordering;

use super::Scheme;

/// Compare two versions of the same package.
///
/// Versions that fail to parse as semver in a semver ecosystem fall back to
/// the segment-wise comparison, so sorting never fails.
pub fn compare(scheme: Scheme, a: &str, b: &str) -> Ordering {
    if scheme.uses_semver() {
        if let (Some(a), Some(b)) = (parse_semver(a), parse_semver(b)) {
            return a.cmp(&b);
        }
    }
    compare_loose(a, b)
}

fn parse_semver(version: &str) -> Option<semver::Version> {
    semver::Version::parse(version.strip_prefix('v').unwrap_or(version)).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    let version = version.strip_prefix('v').unwrap_or(version);
    let mut result = Vec::new();
    let mut start = 0;
    let bytes = version.as_bytes();

    while start < bytes.len() {
        if matches!(bytes[start], b'.' | b'-' | b'_' | b'+') {
            start += 1;
            continue;
        }
        let numeric = bytes[start].is_ascii_digit();
        let end = bytes[start..]
            .iter()
            .position(|b| matches!(b, b'.' | b'-' | b'_' | b'+') || b.is_ascii_digit() != numeric)
            .map_or(bytes.len(), |offset| start + offset);

        let text = &version[start..end];
        result.push(match text.parse::<u64>() {
            Ok(n) if numeric => Segment::Number(n),
            _ => Segment::Text(text),
        });
        start = end;
    }
    result
}

/// Rank of a textual qualifier; unknown qualifiers sort after the known
/// pre-release markers and compare alphabetically among themselves.
fn qualifier_rank(text: &str) -> u8 {
    match text.to_ascii_lowercase().as_str() {
        "dev" => 0,
        "alpha" | "a" => 1,
        "beta" | "b" => 2,
        "milestone" | "m" => 3,
        "rc" | "c" | "cr" | "pre" | "preview" => 4,
        "snapshot" => 5,
        "final" | "ga" | "release" => 7,
        "post" | "sp" | "rev" | "r" => 8,
        _ => 6,
    }
}

/// Whether a trailing qualifier marks a release at or after the base version.
fn is_release_or_later(text: &str) -> bool {
    qualifier_rank(text) >= 7
}

fn compare_loose(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);

    for (l, r) in left.iter().zip(right.iter()) {
        let ord = match (l, r) {
            (Segment::Number(x), Segment::Number(y)) => x.cmp(y),
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
            (Segment::Text(x), Segment::Text(y)) => qualifier_rank(x)
                .cmp(&qualifier_rank(y))
                .then_with(|| x.to_ascii_lowercase().cmp(&y.to_ascii_lowercase())),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    // One side has extra segments: a number or post-release marker makes it
    // newer, a pre-release qualifier makes it older.
    match left.len().cmp(&right.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => extra_segment_order(left[right.len()]),
        Ordering::Less => extra_segment_order(right[left.len()]).reverse(),
    }
}

fn extra_segment_order(segment: Segment<'_>) -> Ordering {
    match segment {
        Segment::Number(_) => Ordering::Greater,
        Segment::Text(text) if is_release_or_later(text) => Ordering::Greater,
        Segment::Text(_) => Ordering::Less,
    }
}
