use std::fmt;

use crate::access::errors::AccessError;

/// Ant-style path pattern.
///
/// `?` matches one character and `*` any run of characters within a single
/// segment; a segment that is exactly `**` matches zero or more whole
/// segments. Empty segments are ignored on both sides, so `/list/` and
/// `/list` are the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    AnyPath,
    Glob(Vec<char>),
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, AccessError> {
        if !raw.starts_with('/') {
            return Err(AccessError::InvalidPattern(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in raw.split('/').filter(|s| !s.is_empty()) {
            if part == "**" {
                // consecutive `**` segments are equivalent to one
                if segments.last() != Some(&Segment::AnyPath) {
                    segments.push(Segment::AnyPath);
                }
            } else if part.contains("**") {
                return Err(AccessError::InvalidPattern(raw.to_string()));
            } else {
                segments.push(Segment::Glob(part.chars().collect()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match_segments(&self.segments, &parts)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyPath, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Glob(glob), rest)) => match path.split_first() {
            Some((head, tail)) => glob_match(glob, head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Single-segment wildcard match with backtracking on the last `*`.
fn glob_match(glob: &[char], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut g, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match glob.get(g) {
            Some('*') => {
                star = Some((g, t));
                g += 1;
            }
            Some('?') => {
                g += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                g += 1;
                t += 1;
            }
            _ => match star {
                Some((sg, st)) => {
                    g = sg + 1;
                    t = st + 1;
                    star = Some((sg, st + 1));
                }
                None => return false,
            },
        }
    }

    glob[g..].iter().all(|c| *c == '*')
}

/// Normalize a request path: collapse repeated slashes and resolve `.` and
/// `..` segments. `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
