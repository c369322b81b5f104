//! Build the supermin appliance initramfs on the fly.
//!
//! The appliance is a plain cpio ("newc") stream concatenated from three
//! parts: a prebuilt skeleton archive copied verbatim, the whitelisted
//! kernel modules of the chosen host kernel, and host files named by a
//! sidecar manifest. It is rebuilt at every appliance boot, so assembly is
//! a single sequential pass writing straight to the output file - no
//! temporary staging directory and no external cpio program.
//!
//! - [`kernel`] - candidate kernel scan and module directory selection
//! - [`appliance`] - cpio encoding and appliance assembly
//! - [`dircache`] - per-run directory listing cache
//! - [`filter`] - wildcard and substring list filters, version ordering
//! - [`trace`] - timestamped verbose diagnostics

pub mod appliance;
pub mod dircache;
pub mod filter;
pub mod kernel;
pub mod trace;
