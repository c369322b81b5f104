//! Kernel module selection.
//!
//! The module tree is mirrored into the appliance wholesale - directory
//! structure, modules.dep and friends - except that `.ko` files are only
//! included when a whitelist pattern matches them. The whitelist keeps
//! the appliance small: a full module tree is tens of megabytes of
//! hardware drivers the appliance VM will never see.

use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use walkdir::WalkDir;

use crate::appliance::cpio::CpioWriter;
use crate::appliance::load_lines;
use crate::trace::Trace;

/// Ordered glob patterns from `kmod.whitelist`, one per line.
struct Whitelist {
    patterns: Vec<(String, Pattern)>,
}

impl Whitelist {
    fn load(path: &Path) -> Result<Self> {
        let mut patterns = Vec::new();
        for line in load_lines(path)? {
            let compiled = Pattern::new(&line).map_err(|e| {
                anyhow!(
                    "internal error: bad whitelist pattern '{}' in {}: {}",
                    line,
                    path.display(),
                    e
                )
            })?;
            patterns.push((line, compiled));
        }
        Ok(Whitelist { patterns })
    }

    /// First pattern matching `name`, if any. Later patterns are not
    /// consulted, so a module matching several patterns is included once.
    fn first_match(&self, name: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, pattern)| pattern.matches(name))
            .map(|(text, _)| text.as_str())
    }
}

/// Walk the module tree at `modpath` and append the selected entries.
///
/// Directories are visited pre-order only; everything that is not a
/// `.ko` file is included unconditionally so the tree structure and the
/// module metadata survive intact.
pub(crate) fn write_modules<W: Write>(
    writer: &mut CpioWriter<W>,
    sourcedir: &Path,
    modpath: &Path,
    trace: &Trace,
) -> Result<()> {
    let whitelist = Whitelist::load(&sourcedir.join("kmod.whitelist"))?;

    for entry in WalkDir::new(modpath) {
        let entry =
            entry.with_context(|| format!("walking module tree '{}'", modpath.display()))?;

        if entry.file_name().as_bytes().ends_with(b".ko") {
            let name = entry.file_name().to_string_lossy();
            if let Some(pattern) = whitelist.first_match(&name) {
                if trace.detailed() {
                    trace.detail(&format!(
                        "including kernel module {} (matches whitelist entry {})",
                        name, pattern
                    ));
                }
                append_entry(writer, &entry)?;
            }
        } else {
            append_entry(writer, &entry)?;
        }
    }

    Ok(())
}

fn append_entry<W: Write>(writer: &mut CpioWriter<W>, entry: &walkdir::DirEntry) -> Result<()> {
    match entry.metadata() {
        Ok(meta) => writer.append_with_metadata(entry.path(), &meta),
        // The walker could not stat this entry; retry with a fresh lstat
        // and let that report the error if the entry is really gone.
        Err(_) => writer.append_path(entry.path()),
    }
}
