//! Library version strings as reported by Python package metadata.
//!
//! Ordering follows the usual release semantics: numeric release components
//! compare left to right (missing components count as `0`), a pre-release tag
//! sorts below the bare release, a post-release (`.post1`, `-1`) sorts above
//! it, and a `+local` suffix is ignored.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

const TAG_SEPARATORS: [char; 3] = ['-', '.', '_'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("version '{0}' does not start with a numeric release")]
    NoRelease(String),
    #[error("version '{raw}' has an invalid release component '{component}'")]
    BadComponent { raw: String, component: String },
}

/// A parsed version.
///
/// Equality is defined by ordering, so `1.0` equals `1.0.0` and
/// `3.4.4+cu118` equals `3.4.4`.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Version {
    release: Vec<u64>,
    pre: Option<String>,
    post: Option<u64>,
    raw: String,
}

impl Version {
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let unprefixed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        let public = match unprefixed.split_once('+') {
            Some((public, _local)) => public,
            None => unprefixed,
        };

        let release_len = public
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(public.len());
        let (release_part, rest) = public.split_at(release_len);
        let release_part = release_part.trim_end_matches('.');
        if release_part.is_empty() {
            return Err(VersionParseError::NoRelease(trimmed.to_string()));
        }

        let release = release_part
            .split('.')
            .map(|component| {
                component
                    .parse::<u64>()
                    .map_err(|_| VersionParseError::BadComponent {
                        raw: trimmed.to_string(),
                        component: component.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // `1.0-1` is the implicit post-release spelling.
        if let Some(post) = rest.strip_prefix('-').and_then(|n| n.parse::<u64>().ok()) {
            return Ok(Self {
                release,
                pre: None,
                post: Some(post),
                raw: trimmed.to_string(),
            });
        }

        let tag = rest.trim_start_matches(TAG_SEPARATORS).to_ascii_lowercase();
        let (pre, post) = split_post(&tag);

        Ok(Self {
            release,
            pre: (!pre.is_empty()).then(|| pre.to_string()),
            post,
            raw: trimmed.to_string(),
        })
    }

    /// Build a plain release version such as `1.0.0`.
    #[must_use]
    pub fn from_release(components: &[u64]) -> Self {
        let raw = components
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self {
            release: components.to_vec(),
            pre: None,
            post: None,
            raw,
        }
    }

    #[must_use]
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    #[must_use]
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    #[must_use]
    pub fn is_postrelease(&self) -> bool {
        self.post.is_some()
    }

    /// The version string as it was written (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `self >= minimum`.
    #[must_use]
    pub fn satisfies(&self, minimum: &Version) -> bool {
        self >= minimum
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

/// Split a lowercased tag such as `rc1.post2` at its `post`/`rev`/`r`
/// marker into the pre-release part and the post-release number.
fn split_post(tag: &str) -> (&str, Option<u64>) {
    let bytes = tag.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !bytes[start].is_ascii_alphabetic() {
            start += 1;
            continue;
        }
        let end = bytes[start..]
            .iter()
            .position(|b| !b.is_ascii_alphabetic())
            .map_or(bytes.len(), |offset| start + offset);
        if matches!(&tag[start..end], "post" | "rev" | "r") {
            let pre = tag[..start].trim_end_matches(TAG_SEPARATORS);
            let digits = tag[end..].trim_start_matches(TAG_SEPARATORS);
            let digits_len = digits
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(digits.len());
            return (pre, Some(digits[..digits_len].parse().unwrap_or(0)));
        }
        start = end;
    }
    (tag, None)
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreSegment<'a> {
    Number(u64),
    Word(&'a str),
}

/// Split a pre-release tag into alternating numeric and alphabetic runs,
/// so `rc10` sorts after `rc9` and `a1` before `b1`.
fn pre_segments(tag: &str) -> Vec<PreSegment<'_>> {
    let mut segments = Vec::new();
    for piece in tag.split(['.', '-', '_']).filter(|p| !p.is_empty()) {
        let mut start = 0;
        let bytes = piece.as_bytes();
        while start < bytes.len() {
            let numeric = bytes[start].is_ascii_digit();
            let end = bytes[start..]
                .iter()
                .position(|b| b.is_ascii_digit() != numeric)
                .map_or(bytes.len(), |offset| start + offset);
            let run = &piece[start..end];
            segments.push(match run.parse::<u64>() {
                Ok(n) if numeric => PreSegment::Number(n),
                _ => PreSegment::Word(run),
            });
            start = end;
        }
    }
    segments
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => pre_segments(a).cmp(&pre_segments(b)),
            })
            .then_with(|| self.post.cmp(&other.post))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
