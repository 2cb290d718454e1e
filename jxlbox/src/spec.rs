// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Box selector expressions.
//!
//! A selector is either an index range (`i=2..5`, `i=3`, `i=..7`) or a type
//! pattern:
//!
//! * `TYPE=abcd` matches the outer box type literally — a `brob` box is only
//!   matched as `brob`.
//! * `type=abcd` matches literally, but a `brob` box is matched by the type
//!   of the box it wraps.
//! * `itype=abcd` is `type=` with ASCII-case-insensitive matching.
//! * A `~` before the `=` (e.g. `type~=jxl*`) enables glob wildcards: `*`,
//!   `?` and `[…]` character classes.
//!
//! Literal type values shorter than four characters are padded with spaces.
//! The aliases `@jxl` and `@JXL` expand to selector lists covering the box
//! types a JXL decoder consumes, without and with metadata respectively.

use crate::box_header::{BoxInfo, BoxType};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BoxSpec {
    /// Matches boxes whose stream index lies in `lo..=hi`.
    Index { lo: u64, hi: u64 },
    /// Matches boxes by (possibly inner) type.
    Type {
        pattern: Vec<u8>,
        /// Match `brob` boxes by the type they wrap, when known.
        brob_aware: bool,
        fold_case: bool,
        wildcard: bool,
    },
}

impl BoxSpec {
    /// Parse one selector argument, expanding aliases. Returns one selector
    /// for plain expressions and several for `@`-aliases.
    pub fn parse(expr: &str) -> Result<Vec<BoxSpec>> {
        match expr {
            "@jxl" => Ok(Self::jxl_alias()),
            "@JXL" => {
                let mut specs = Self::jxl_alias();
                specs.push(Self::type_pattern("jbrd", false, false, false)?);
                specs.push(Self::type_pattern("Exif", true, false, false)?);
                specs.push(Self::type_pattern("xml ", true, false, false)?);
                specs.push(Self::type_pattern("jumb", true, false, false)?);
                Ok(specs)
            }
            _ => Ok(vec![Self::parse_single(expr)?]),
        }
    }

    /// Parse a whole selector list; `None` when no expressions were given,
    /// which matches everything.
    pub fn parse_list<T: AsRef<str>>(exprs: &[T]) -> Result<Option<Vec<BoxSpec>>> {
        if exprs.is_empty() {
            return Ok(None);
        }
        let mut specs = Vec::new();
        for expr in exprs {
            specs.extend(Self::parse(expr.as_ref())?);
        }
        Ok(Some(specs))
    }

    fn jxl_alias() -> Vec<BoxSpec> {
        vec![
            BoxSpec::Type {
                pattern: b"jxl*".to_vec(),
                brob_aware: true,
                fold_case: true,
                wildcard: true,
            },
            BoxSpec::Type {
                pattern: b"ftyp".to_vec(),
                brob_aware: false,
                fold_case: false,
                wildcard: false,
            },
        ]
    }

    fn parse_single(expr: &str) -> Result<BoxSpec> {
        let Some((key, value)) = expr.split_once('=') else {
            return Err(Error::InvalidBoxSpec(format!(
                "`{expr}` has no `=`; expected i=LO..HI or [i]TYPE[~]=PATTERN"
            )));
        };
        let (key, wildcard) = match key.strip_suffix('~') {
            Some(key) => (key, true),
            None => (key, false),
        };
        match key {
            "i" => {
                if wildcard {
                    return Err(Error::InvalidBoxSpec(format!(
                        "`{expr}`: index ranges don't support wildcards"
                    )));
                }
                Self::index_range(expr, value)
            }
            "TYPE" => Self::type_pattern(value, false, false, wildcard),
            "type" => Self::type_pattern(value, true, false, wildcard),
            "itype" => Self::type_pattern(value, true, true, wildcard),
            _ => Err(Error::InvalidBoxSpec(format!(
                "`{expr}`: unknown selector key `{key}`"
            ))),
        }
    }

    fn index_range(expr: &str, value: &str) -> Result<BoxSpec> {
        let parse_bound = |bound: &str, default: u64| -> Result<u64> {
            if bound.is_empty() {
                return Ok(default);
            }
            bound
                .parse()
                .map_err(|_| Error::InvalidBoxSpec(format!("`{expr}`: bad index `{bound}`")))
        };
        let (lo, hi) = match value.split_once("..") {
            Some((lo, hi)) => (parse_bound(lo, 0)?, parse_bound(hi, u64::MAX)?),
            None => {
                let n = parse_bound(value, 0)?;
                if value.is_empty() {
                    return Err(Error::InvalidBoxSpec(format!("`{expr}`: empty index")));
                }
                (n, n)
            }
        };
        Ok(BoxSpec::Index { lo, hi })
    }

    fn type_pattern(value: &str, brob_aware: bool, fold_case: bool, wildcard: bool) -> Result<BoxSpec> {
        if !value.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return Err(Error::InvalidBoxSpec(format!(
                "`{value}`: type patterns must be printable ASCII"
            )));
        }
        let mut pattern = value.as_bytes().to_vec();
        if !wildcard {
            if pattern.len() > 4 {
                return Err(Error::InvalidBoxSpec(format!(
                    "`{value}`: literal types are at most 4 characters"
                )));
            }
            while pattern.len() < 4 {
                pattern.push(b' ');
            }
        }
        if fold_case {
            pattern.make_ascii_lowercase();
        }
        Ok(BoxSpec::Type {
            pattern,
            brob_aware,
            fold_case,
            wildcard,
        })
    }

    /// Whether this selector accepts the box at `index`. `inner_type` is the
    /// wrapped type of a `brob` box, when known. `instance` is the number of
    /// boxes of the same effective type seen before this one; it is reserved
    /// for per-type instance ranges.
    pub fn matches(
        &self,
        index: u64,
        info: &BoxInfo,
        inner_type: Option<BoxType>,
        _instance: u64,
    ) -> bool {
        match self {
            BoxSpec::Index { lo, hi } => *lo <= index && index <= *hi,
            BoxSpec::Type {
                pattern,
                brob_aware,
                fold_case,
                wildcard,
            } => {
                let ty = match (brob_aware, inner_type) {
                    (true, Some(inner)) => inner,
                    _ => info.boxtype,
                };
                let ty = if *fold_case {
                    ty.to_ascii_lowercase()
                } else {
                    ty
                };
                if *wildcard {
                    glob_match(pattern, &ty.0)
                } else {
                    pattern[..] == ty.0[..]
                }
            }
        }
    }
}

/// Whether any selector in `specs` accepts the box. An empty list matches
/// nothing; `None` (no selectors given) matches everything.
pub fn spec_list_matches(
    specs: Option<&[BoxSpec]>,
    index: u64,
    info: &BoxInfo,
    inner_type: Option<BoxType>,
    instance: u64,
) -> bool {
    match specs {
        None => true,
        Some(specs) => specs
            .iter()
            .any(|spec| spec.matches(index, info, inner_type, instance)),
    }
}

/// `fnmatch`-style glob over raw bytes: `*`, `?`, and `[…]` classes with
/// ranges and `!`/`^` negation. An unterminated `[` matches itself.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        let mut advanced = false;
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    advanced = true;
                }
                b'[' => match match_class(pattern, p, text[t]) {
                    Some((true, next)) => {
                        p = next;
                        t += 1;
                        advanced = true;
                    }
                    Some((false, _)) => {}
                    None => {
                        if text[t] == b'[' {
                            p += 1;
                            t += 1;
                            advanced = true;
                        }
                    }
                },
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        advanced = true;
                    }
                }
            }
        }
        if !advanced {
            match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Evaluate the character class starting at `pattern[start] == b'['`.
/// Returns the match result and the index just past the closing `]`, or
/// `None` when the class is unterminated.
fn match_class(pattern: &[u8], start: usize, ch: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(pattern.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        if pattern[i] == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;
        if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            if (pattern[i]..=pattern[i + 2]).contains(&ch) {
                matched = true;
            }
            i += 3;
        } else {
            if pattern[i] == ch {
                matched = true;
            }
            i += 1;
        }
    }
    None
}
