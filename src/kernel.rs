//! Kernel selection.
//!
//! Picks the newest installed kernel that has a matching module
//! directory, preferring images built for the requested CPU architecture,
//! and publishes the choice as a symlink at the caller-supplied output
//! path.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::dircache::DirCache;
use crate::filter::{filter_excluding_substring, filter_glob, version_cmp};
use crate::trace::Trace;

/// Directory containing candidate kernel images.
pub const KERNEL_DIR: &str = "/boot";

/// Root of the per-version kernel module trees.
pub const MODULES_ROOT: &str = "/lib/modules";

/// Choose a kernel for `host_cpu` from `kernel_dir` and symlink it to
/// `kernel_out`. Returns the module directory of the chosen kernel.
///
/// Candidates are `vmlinuz-*.<arch>*` images (any `vmlinuz-*.i?86*` image
/// for 32-bit x86), never Xen variants. Some distributions do not append
/// the architecture to the kernel name, so a bare `vmlinuz-*` scan runs
/// when the qualified one comes up empty. Among the candidates, newest
/// version first, the chosen kernel is the first whose
/// `<modules_root>/<version>` exists as a directory.
pub fn choose_kernel(
    cache: &mut DirCache,
    kernel_dir: &Path,
    modules_root: &Path,
    host_cpu: &str,
    kernel_out: &Path,
    trace: &Trace,
) -> Result<PathBuf> {
    let listing = cache.list(kernel_dir)?;

    let pattern = if is_ia32(host_cpu) {
        "vmlinuz-*.i?86*".to_string()
    } else {
        format!("vmlinuz-*.{}*", host_cpu)
    };

    let mut candidates = filter_excluding_substring(&filter_glob(listing, &pattern)?, "xen");
    if candidates.is_empty() {
        candidates = filter_excluding_substring(&filter_glob(listing, "vmlinuz-*")?, "xen");
    }
    if candidates.is_empty() {
        bail!(no_kernel_message(kernel_dir, modules_root));
    }

    candidates.sort_by(|a, b| version_cmp(b, a));

    for candidate in &candidates {
        if trace.detailed() {
            trace.detail(&format!(
                "candidate kernel: {}",
                kernel_dir.join(candidate).display()
            ));
        }

        // Kernel images are named vmlinuz-<version>.
        let version = candidate.strip_prefix("vmlinuz-").unwrap_or(candidate);
        let modpath = modules_root.join(version);

        if trace.detailed() {
            trace.detail(&format!(
                "checking modpath {} is a directory",
                modpath.display()
            ));
        }

        if modpath.is_dir() {
            let image = kernel_dir.join(candidate);
            if trace.detailed() {
                trace.detail(&format!(
                    "picked {} because modpath {} exists",
                    candidate,
                    modpath.display()
                ));
                trace.detail(&format!(
                    "creating symlink {} -> {}",
                    kernel_out.display(),
                    image.display()
                ));
            }

            std::os::unix::fs::symlink(&image, kernel_out)
                .with_context(|| format!("symlink kernel: {}", kernel_out.display()))?;

            return Ok(modpath);
        }
    }

    bail!(no_kernel_message(kernel_dir, modules_root))
}

/// 32-bit x86 names (i386, i486, i586, i686) all share one kernel pool.
fn is_ia32(host_cpu: &str) -> bool {
    let b = host_cpu.as_bytes();
    b.len() == 4 && b[0] == b'i' && b[2] == b'8' && b[3] == b'6'
}

fn no_kernel_message(kernel_dir: &Path, modules_root: &Path) -> String {
    format!(
        "failed to find a suitable kernel.\n\
         I looked for kernels in {} and modules in {}.\n\
         If this is a Xen guest, and you only have Xen domU kernels\n\
         installed, try installing a fullvirt kernel (only for building\n\
         the appliance, you shouldn't boot the Xen guest with it).",
        kernel_dir.display(),
        modules_root.display()
    )
}
