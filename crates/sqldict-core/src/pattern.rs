//! Path-to-pattern matching and map selection.
//!
//! A pattern looks like a path with `$` as a single-segment wildcard,
//! e.g. `shared/quota/$/$/limit`. Matching `shared/quota/a/b/limit` against
//! it binds `["a", "b"]`. Iteration uses *partial* matching, where a path may
//! stop inside the pattern as long as it stops on a `/` boundary; the
//! consumed prefix lengths let the iteration engine rebuild full keys from
//! result rows.

use sqldict_error::{DictError, Result};
use sqldict_types::settings::{DictMap, DictSettings};

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Path segments bound to the pattern's wildcards, in order.
    pub values: Vec<String>,
    /// Bytes of the pattern consumed. Shorter than the pattern for partial
    /// matches; excludes a trailing wildcard so iteration can substitute it.
    pub pattern_consumed: usize,
    /// Bytes of the path consumed. Excludes the final partial segment.
    pub path_consumed: usize,
}

/// Outcome of matching one pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The path matches.
    Match(PatternMatch),
    /// The path does not belong to this pattern.
    Mismatch,
    /// The pattern was fully consumed but the path continues into deeper
    /// segments. Lookups report this as a distinct error.
    PastPattern,
}

/// Match `path` against `pattern`.
///
/// With `partial_ok` (iteration), the path may end inside the pattern. A
/// partial match must end on a `/` boundary; when recursion is off, the
/// unconsumed pattern tail must additionally be a single trailing `$`, so
/// there is exactly one enumerable child segment.
pub fn match_pattern(pattern: &str, path: &str, partial_ok: bool, recurse: bool) -> MatchOutcome {
    let pat = pattern.as_bytes();
    let pth = path.as_bytes();
    let mut values = Vec::new();
    let mut pi = 0;
    let mut xi = 0;

    while pi < pat.len() && xi < pth.len() {
        if pat[pi] == b'$' {
            pi += 1;
            if pi == pat.len() {
                // The pattern ends with this variable; it matches the rest of
                // the path.
                let rest = &path[xi..];
                if partial_ok {
                    // Iterating: the last field never matches fully, and a
                    // trailing '/' is dropped. The consumed prefix stops
                    // before the variable so the caller substitutes it.
                    pi -= 1;
                    values.push(rest.strip_suffix('/').unwrap_or(rest).to_owned());
                } else {
                    values.push(rest.to_owned());
                    xi = pth.len();
                }
                return MatchOutcome::Match(PatternMatch {
                    values,
                    pattern_consumed: pi,
                    path_consumed: xi,
                });
            }
            // The variable matches up to the next '/' in the path.
            match path[xi..].find('/') {
                Some(sep) => {
                    values.push(path[xi..xi + sep].to_owned());
                    xi += sep;
                }
                None => {
                    // No '/' left; still a partial-match candidate. Skip the
                    // '/' that follows the variable in the pattern.
                    values.push(path[xi..].to_owned());
                    xi = pth.len();
                    pi += 1;
                }
            }
        } else if pat[pi] == pth[xi] {
            pi += 1;
            xi += 1;
        } else {
            return MatchOutcome::Mismatch;
        }
    }

    if pi == pat.len() {
        return if xi == pth.len() {
            MatchOutcome::Match(PatternMatch {
                values,
                pattern_consumed: pi,
                path_consumed: xi,
            })
        } else if pth[xi] == b'/' {
            MatchOutcome::PastPattern
        } else {
            MatchOutcome::Mismatch
        };
    }
    if !partial_ok {
        return MatchOutcome::Mismatch;
    }

    // Partial matches must end on a '/' boundary: either the last consumed
    // pattern byte is '/', or the path ended right before one (which is then
    // consumed, so `path/` and `path` iterate identically).
    if pi != 0 && pat[pi - 1] != b'/' {
        if pat[pi] != b'/' {
            return MatchOutcome::Mismatch;
        }
        pi += 1;
    }
    let done = MatchOutcome::Match(PatternMatch {
        values,
        pattern_consumed: pi,
        path_consumed: xi,
    });
    if recurse || pi == pat.len() {
        return done;
    }
    // Without recursion there must be exactly one variable left, with no
    // deeper segments behind it.
    if pat[pi] == b'$' && !pat[pi..].contains(&b'/') {
        done
    } else {
        MatchOutcome::Mismatch
    }
}

/// Pick the first map whose pattern matches `path` exactly; first match wins
/// in declaration order.
///
/// If no map matches but some map's pattern is a proper prefix of the path,
/// the error distinguishes "key continues past the matched pattern" from a
/// plainly unmapped key.
pub fn find_map<'a>(settings: &'a DictSettings, path: &str) -> Result<(&'a DictMap, Vec<String>)> {
    let mut past: Option<&DictMap> = None;
    for map in &settings.maps {
        match match_pattern(&map.pattern, path, false, false) {
            MatchOutcome::Match(m) => return Ok((map, m.values)),
            MatchOutcome::PastPattern => {
                if past.is_none() {
                    past = Some(map);
                }
            }
            MatchOutcome::Mismatch => {}
        }
    }
    match past {
        Some(map) => Err(DictError::KeyPastPattern {
            pattern: map.pattern.clone(),
        }),
        None => Err(DictError::unmapped(path)),
    }
}
