use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use uring_cp::{CopyError, ProgressEvent, RingConfig};

/// Copy a file with a fixed-size pool of reusable buffers driven over
/// io_uring, bypassing the page cache on both ends.
#[derive(Parser, Debug)]
#[command(name = "uring-cp", version, about)]
struct Args {
    source: PathBuf,
    dest: PathBuf,

    /// Max in-flight reads. Must be a power of two.
    #[arg(long, default_value_t = 8)]
    rq_cap: u32,

    /// Max in-flight writes. Must be a power of two.
    #[arg(long, default_value_t = 8)]
    wq_cap: u32,

    /// Transfer block size in bytes. Must be a power of two, at least 512.
    #[arg(long, default_value_t = 128 * 1024)]
    block_size: u32,
}

#[cfg(target_os = "linux")]
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("uring-cp: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(target_os = "linux")]
fn run(args: &Args) -> Result<(), CopyError> {
    let config = RingConfig {
        rq_cap: args.rq_cap,
        wq_cap: args.wq_cap,
        block_size: args.block_size,
    };
    config.validate_for_direct_io()?;

    let source = std::fs::OpenOptions::new()
        .read(true)
        .custom_flags(uring_cp::platform::direct_open_flags(false))
        .open(&args.source)?;
    uring_cp::platform::configure_direct_io(source.as_raw_fd())?;

    let meta = source.metadata()?;
    if !meta.is_file() {
        return Err(CopyError::Invalid("source must be a regular file"));
    }
    let size = meta.len();

    let dest = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .custom_flags(uring_cp::platform::direct_open_flags(true))
        .open(&args.dest)?;
    uring_cp::platform::configure_direct_io(dest.as_raw_fd())?;

    let padded = uring_cp::platform::roundup(size, config.block_size as u64);
    let rc = unsafe { libc::fallocate(dest.as_raw_fd(), 0, 0, padded as libc::off_t) };
    if rc < 0 {
        return Err(CopyError::Io(std::io::Error::last_os_error()));
    }

    let start = std::time::Instant::now();
    let mut copied = 0u64;
    uring_cp::copy(source.as_raw_fd(), dest.as_raw_fd(), size, config, |event: &ProgressEvent| {
        copied += event.len as u64;
        tracing::debug!(offset = event.offset, len = event.len, "wrote block");
    })?;

    let elapsed = start.elapsed();
    let mib = copied as f64 / (1024.0 * 1024.0);
    let secs = elapsed.as_secs_f64().max(1e-9);
    tracing::info!(bytes = copied, mib_per_sec = mib / secs, "copy complete");
    println!("{copied} bytes copied in {secs:.3}s ({:.1} MiB/s)", mib / secs);

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> ExitCode {
    eprintln!("uring-cp: io_uring is only available on linux");
    ExitCode::FAILURE
}
