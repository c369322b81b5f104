use std::fs;
use std::path::Path;

use anyhow::{bail, Result};

use supermin_builder::appliance::build_appliance;
use supermin_builder::dircache::DirCache;
use supermin_builder::kernel::{self, choose_kernel};
use supermin_builder::trace::Trace;

fn usage() -> &'static str {
    "supermin-builder: build the supermin appliance on the fly\n\
     \n\
     Usage:\n\
     \x20 supermin-builder [-options] sourcedir host_cpu repo kernel initrd\n\
     \x20 supermin-builder --help\n\
     \x20 supermin-builder --version\n\
     \n\
     The appliance (kernel and initrd output files) is assembled from the\n\
     prebuilt skeleton image, the whitelisted kernel modules and the host\n\
     files found under sourcedir.  You should NOT need to run this program\n\
     directly except when debugging tricky appliance problems.\n\
     \n\
     NB: The kernel and initrd parameters are OUTPUT parameters.  If\n\
     those files exist, they are overwritten by the output.\n\
     \n\
     Options:\n\
     \x20 --help\n\
     \x20      Display this help text and exit.\n\
     \x20 --verbose | -v\n\
     \x20      Enable verbose messages (give multiple times for more verbosity).\n\
     \x20 --version | -V\n\
     \x20      Display version number and exit."
}

fn main() -> Result<()> {
    let mut verbose: u8 = 0;
    let mut positional: Vec<String> = Vec::new();
    let mut no_more_options = false;

    for arg in std::env::args().skip(1) {
        if no_more_options {
            positional.push(arg);
            continue;
        }
        match arg.as_str() {
            "--help" => {
                println!("{}", usage());
                return Ok(());
            }
            "-v" | "--verbose" => verbose = verbose.saturating_add(1),
            "-V" | "--version" => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--" => no_more_options = true,
            opt if opt.starts_with('-') && opt.len() > 1 => bail!(usage()),
            _ => positional.push(arg),
        }
    }

    match positional.as_slice() {
        [sourcedir, host_cpu, repo, kernel_out, initrd] => {
            run(sourcedir, host_cpu, repo, kernel_out, initrd, verbose)
        }
        _ => bail!(usage()),
    }
}

fn run(
    sourcedir: &str,
    host_cpu: &str,
    repo: &str,
    kernel_out: &str,
    initrd: &str,
    verbose: u8,
) -> Result<()> {
    let trace = Trace::new(verbose);
    trace.message(&format!(
        "sourcedir = {}, host_cpu = {}, repo = {}, kernel = {}, initrd = {}",
        sourcedir, host_cpu, repo, kernel_out, initrd
    ));

    // Both output files are overwritten; remove leftovers from earlier
    // runs so the kernel symlink can be created fresh.
    let _ = fs::remove_file(kernel_out);
    let _ = fs::remove_file(initrd);

    let mut cache = DirCache::new();

    let modpath = choose_kernel(
        &mut cache,
        Path::new(kernel::KERNEL_DIR),
        Path::new(kernel::MODULES_ROOT),
        host_cpu,
        Path::new(kernel_out),
        &trace,
    )?;
    trace.message("finished creating kernel");

    build_appliance(
        Path::new(sourcedir),
        host_cpu,
        repo,
        &modpath,
        Path::new(initrd),
        &mut cache,
        &trace,
    )?;
    trace.message("finished creating appliance");

    Ok(())
}
