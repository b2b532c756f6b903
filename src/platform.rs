use std::os::fd::RawFd;

/// Return platform-specific open flags for direct, block-aligned I/O.
#[cfg(target_os = "linux")]
pub fn direct_open_flags(writable: bool) -> libc::c_int {
    let base = if writable {
        libc::O_WRONLY | libc::O_CREAT
    } else {
        libc::O_RDONLY
    };
    base | libc::O_DIRECT
}

#[cfg(target_os = "macos")]
pub fn direct_open_flags(writable: bool) -> libc::c_int {
    if writable {
        libc::O_WRONLY | libc::O_CREAT
    } else {
        libc::O_RDONLY
    }
}

/// Configure direct I/O on an already-open file descriptor.
///
/// - Linux: O_DIRECT is set at open time; nothing to do here.
/// - macOS: uses fcntl(F_NOCACHE) to disable the buffer cache.
#[cfg(target_os = "macos")]
pub fn configure_direct_io(fd: RawFd) -> std::io::Result<()> {
    let ret = unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) };
    if ret == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn configure_direct_io(_fd: RawFd) -> std::io::Result<()> {
    Ok(())
}

/// Round `value` up to the next multiple of `align` (`align` a power of two).
pub fn roundup(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
