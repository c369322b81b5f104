//! List filtering primitives shared by kernel selection and file selection.
//!
//! Wildcard matching uses [`glob::Pattern`], which follows Unix shell
//! rules: `*` and `?` plus `[...]` classes, with backslash treated as an
//! ordinary character.

use std::cmp::Ordering;

use anyhow::{anyhow, Result};
use glob::Pattern;

/// Return the elements of `names` matching the wildcard `pattern`.
///
/// A pattern that fails to compile is an internal error, not a non-match:
/// the patterns used here are either fixed strings or come from sidecar
/// files whose authors expect a bad pattern to abort the build rather than
/// silently drop files from the appliance.
pub fn filter_glob(names: &[String], pattern: &str) -> Result<Vec<String>> {
    let compiled = Pattern::new(pattern)
        .map_err(|e| anyhow!("internal error: bad glob pattern '{}': {}", pattern, e))?;
    Ok(names
        .iter()
        .filter(|name| compiled.matches(name))
        .cloned()
        .collect())
}

/// Return the elements of `names` which do NOT contain `sub`.
pub fn filter_excluding_substring(names: &[String], sub: &str) -> Vec<String> {
    names
        .iter()
        .filter(|name| !name.contains(sub))
        .cloned()
        .collect()
}

/// Version-aware string ordering.
///
/// Embedded runs of ASCII digits compare numerically, everything else
/// compares bytewise, so "vmlinuz-5.10.0" sorts after "vmlinuz-5.4.0".
/// Strings that differ only in leading zeroes fall back to plain byte
/// order to keep the ordering total.
pub fn version_cmp(a: &str, b: &str) -> Ordering {
    let ab = a.as_bytes();
    let bb = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < ab.len() && j < bb.len() {
        if ab[i].is_ascii_digit() && bb[j].is_ascii_digit() {
            let ie = digit_run_end(ab, i);
            let je = digit_run_end(bb, j);
            let da = trim_leading_zeroes(&ab[i..ie]);
            let db = trim_leading_zeroes(&bb[j..je]);
            let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
            if ord != Ordering::Equal {
                return ord;
            }
            i = ie;
            j = je;
        } else {
            let ord = ab[i].cmp(&bb[j]);
            if ord != Ordering::Equal {
                return ord;
            }
            i += 1;
            j += 1;
        }
    }

    (ab.len() - i).cmp(&(bb.len() - j)).then_with(|| a.cmp(b))
}

fn digit_run_end(s: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < s.len() && s[end].is_ascii_digit() {
        end += 1;
    }
    end
}

fn trim_leading_zeroes(digits: &[u8]) -> &[u8] {
    let mut start = 0;
    while start + 1 < digits.len() && digits[start] == b'0' {
        start += 1;
    }
    &digits[start..]
}
