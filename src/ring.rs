use std::os::fd::RawFd;

use crate::error::CopyError;
use crate::request::{Handle, RequestKind};

/// One reaped kernel completion: the tag it was submitted with and the
/// raw `res` field (non-negative byte count, or `-errno`).
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub tag: u64,
    pub result: i32,
}

/// Pack a [`Handle`] into the 64-bit tag the kernel hands back unchanged
/// on completion (`user_data`). Layout: kind in bit 63, a 31-bit
/// generation, then a 32-bit slot index.
pub fn pack_tag(handle: Handle) -> u64 {
    let kind_bit: u64 = match handle.kind {
        RequestKind::Read => 0,
        RequestKind::Write => 1,
    };
    (kind_bit << 63) | ((handle.generation as u64 & 0x7fff_ffff) << 32) | handle.slot as u64
}

pub fn unpack_tag(tag: u64) -> Handle {
    let kind = if tag >> 63 == 1 { RequestKind::Write } else { RequestKind::Read };
    let generation = ((tag >> 32) & 0x7fff_ffff) as u32;
    let slot = (tag & 0xffff_ffff) as u32;
    Handle { kind, slot, generation }
}

/// Abstraction over the kernel submission/completion ring, so the copy
/// driver and [`crate::context::RingContext`] can run against either the
/// real io_uring backend or, in tests, a backend that injects short
/// completions, `EAGAIN`, or permanent failures on demand.
pub trait KernelRing {
    /// Stage a read SQE. `Err(Full)` if no submission slot is free.
    fn queue_read(&mut self, fd: RawFd, ptr: *mut u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError>;
    /// Stage a write SQE. `Err(Full)` if no submission slot is free.
    fn queue_write(&mut self, fd: RawFd, ptr: *const u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError>;
    /// Flush staged submissions to the kernel without blocking.
    fn submit(&mut self) -> Result<(), CopyError>;
    /// Block until at least one completion is available, then drain every
    /// completion currently available. The only blocking operation.
    fn wait_one(&mut self) -> Result<Vec<Completion>, CopyError>;
}

#[cfg(target_os = "linux")]
pub use linux::IoUringRing;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use crate::iolog::IoLog;
    use io_uring::{IoUring, opcode, types};

    /// The real backend: a thin wrapper over an `io_uring` submission and
    /// completion queue pair, sized to exactly `RQ_CAP + WQ_CAP` entries.
    pub struct IoUringRing {
        ring: IoUring,
        io_log: Option<IoLog>,
    }

    impl IoUringRing {
        pub fn new(entries: u32) -> Result<Self, CopyError> {
            let ring = IoUring::new(entries).map_err(CopyError::Io)?;
            Ok(Self { ring, io_log: IoLog::from_env() })
        }
    }

    impl KernelRing for IoUringRing {
        fn queue_read(&mut self, fd: RawFd, ptr: *mut u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError> {
            if let Some(log) = &mut self.io_log {
                log.log("read", offset, len);
            }
            let sqe = opcode::Read::new(types::Fd(fd), ptr, len)
                .offset(offset)
                .build()
                .user_data(tag);
            let mut sq = self.ring.submission();
            unsafe { sq.push(&sqe) }.map_err(|_| CopyError::Full)
        }

        fn queue_write(&mut self, fd: RawFd, ptr: *const u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError> {
            if let Some(log) = &mut self.io_log {
                log.log("write", offset, len);
            }
            let sqe = opcode::Write::new(types::Fd(fd), ptr, len)
                .offset(offset)
                .build()
                .user_data(tag);
            let mut sq = self.ring.submission();
            unsafe { sq.push(&sqe) }.map_err(|_| CopyError::Full)
        }

        fn submit(&mut self) -> Result<(), CopyError> {
            self.ring.submit().map(|_| ()).map_err(CopyError::Io)
        }

        fn wait_one(&mut self) -> Result<Vec<Completion>, CopyError> {
            loop {
                match self.ring.submit_and_wait(1) {
                    Ok(_) => break,
                    Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
                    Err(e) => return Err(CopyError::Io(e)),
                }
            }
            let cq = self.ring.completion();
            Ok(cq
                .map(|cqe| Completion {
                    tag: cqe.user_data(),
                    result: cqe.result(),
                })
                .collect())
        }
    }
}

/// A backend used only by tests: performs the I/O synchronously with
/// `pread`/`pwrite` so byte content stays real, but lets a test script
/// rewrite each completion's reported result before it reaches the
/// context (to inject `EAGAIN`, a short count, or a permanent failure).
#[cfg(test)]
pub struct MockRing {
    pending: std::collections::VecDeque<Completion>,
    /// Called once per queued operation with (is_write, real_result);
    /// returns the result to report for that completion.
    pub intercept: Box<dyn FnMut(bool, i32) -> i32>,
}

#[cfg(test)]
impl MockRing {
    pub fn new(intercept: Box<dyn FnMut(bool, i32) -> i32>) -> Self {
        Self {
            pending: std::collections::VecDeque::new(),
            intercept,
        }
    }

    fn do_io(&mut self, is_write: bool, fd: RawFd, ptr: *mut u8, len: u32, offset: u64, tag: u64) {
        let real = unsafe {
            if is_write {
                libc::pwrite(fd, ptr as *const libc::c_void, len as usize, offset as libc::off_t)
            } else {
                libc::pread(fd, ptr as *mut libc::c_void, len as usize, offset as libc::off_t)
            }
        };
        let real = if real < 0 { -std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO) } else { real as i32 };
        let result = (self.intercept)(is_write, real);
        self.pending.push_back(Completion { tag, result });
    }
}

#[cfg(test)]
impl KernelRing for MockRing {
    fn queue_read(&mut self, fd: RawFd, ptr: *mut u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError> {
        self.do_io(false, fd, ptr, len, offset, tag);
        Ok(())
    }

    fn queue_write(&mut self, fd: RawFd, ptr: *const u8, len: u32, offset: u64, tag: u64) -> Result<(), CopyError> {
        self.do_io(true, fd, ptr as *mut u8, len, offset, tag);
        Ok(())
    }

    fn submit(&mut self) -> Result<(), CopyError> {
        Ok(())
    }

    fn wait_one(&mut self) -> Result<Vec<Completion>, CopyError> {
        Ok(self.pending.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestKind;

    #[test]
    fn tag_roundtrips() {
        for kind in [RequestKind::Read, RequestKind::Write] {
            let handle = Handle { kind, slot: 7, generation: 42 };
            let tag = pack_tag(handle);
            let back = unpack_tag(tag);
            assert_eq!(back, handle);
        }
    }
}
