use std::os::fd::RawFd;

use crate::arena::Arena;
use crate::config::RingConfig;
use crate::error::CopyError;
use crate::fifo::Fifo;
use crate::request::{BufferView, Handle, Request, RequestKind};
use crate::ring::{Completion, KernelRing, pack_tag, unpack_tag};

/// Owns the kernel ring, both in-flight-request FIFOs, and the block
/// arena for the lifetime of one copy. No [`Request`] outlives this.
///
/// Field order matters: `ring` is declared first so `Drop` tears the
/// kernel ring down before the FIFOs and arena are released, cancelling
/// whatever is still in flight rather than freeing buffers the kernel
/// might still be touching.
pub struct RingContext<R: KernelRing> {
    ring: R,
    read_fifo: Fifo,
    write_fifo: Fifo,
    arena: Arena,
}

impl<R: KernelRing> RingContext<R> {
    pub fn new(ring: R, config: RingConfig) -> Result<Self, CopyError> {
        config.validate()?;
        let arena = Arena::new(config.total_entries() as usize, config.block_size as usize)?;
        Ok(Self {
            ring,
            read_fifo: Fifo::new(config.rq_cap),
            write_fifo: Fifo::new(config.wq_cap),
            arena,
        })
    }

    pub fn read_fifo(&self) -> &Fifo {
        &self.read_fifo
    }

    pub fn write_fifo(&self) -> &Fifo {
        &self.write_fifo
    }

    pub fn block_size(&self) -> usize {
        self.arena.block_size()
    }

    pub fn arena_free_count(&self) -> usize {
        self.arena.free_count()
    }

    pub fn alloc(&mut self) -> Result<BufferView, CopyError> {
        self.arena.alloc()
    }

    pub fn free(&mut self, buffer: BufferView) -> Result<(), CopyError> {
        self.arena.free(buffer)
    }

    pub fn pop_read_ready(&mut self) -> Request {
        debug_assert!(self.read_fifo.ready());
        self.read_fifo.pop()
    }

    pub fn pop_write_ready(&mut self) -> Request {
        debug_assert!(self.write_fifo.ready());
        self.write_fifo.pop()
    }

    /// Enqueue a fresh read. `Err(Full)` if the read FIFO is already full;
    /// callers must check `read_fifo().is_full()` first.
    pub fn enqueue_read(&mut self, fd: RawFd, buffer: BufferView, offset: u64) -> Result<(), CopyError> {
        self.enqueue(RequestKind::Read, fd, buffer, offset)
    }

    /// Enqueue a fresh write, reusing a buffer a promoted read already
    /// populated. `Err(Full)` if the write FIFO is already full.
    pub fn enqueue_write(&mut self, fd: RawFd, buffer: BufferView, offset: u64) -> Result<(), CopyError> {
        self.enqueue(RequestKind::Write, fd, buffer, offset)
    }

    fn enqueue(&mut self, kind: RequestKind, fd: RawFd, buffer: BufferView, offset: u64) -> Result<(), CopyError> {
        let fifo = self.fifo_mut(kind);
        if fifo.is_full() {
            return Err(CopyError::Full);
        }
        let block_size = self.arena.block_size();
        debug_assert_eq!(offset % block_size as u64, 0, "request offset must be block-aligned");
        debug_assert!(buffer.len <= block_size, "logical payload cannot exceed the arena block size");

        let submit = BufferView { ptr: buffer.ptr, len: block_size };
        let req = Request {
            kind,
            fd,
            buffer,
            offset,
            submit,
            submit_offset: offset,
            residual: 0,
            ready: false,
            failed: None,
        };

        let fifo = self.fifo_mut(kind);
        let (slot, generation) = fifo.push(req);
        let handle = Handle { kind, slot, generation };
        self.submit_to_kernel(handle, fd, submit, offset)
    }

    /// Re-submit an already-owned request after a transient failure or a
    /// short completion, preserving its accumulated `residual`.
    fn restart(&mut self, handle: Handle) -> Result<(), CopyError> {
        let fifo = self.fifo_mut(handle.kind);
        let req = fifo
            .get_mut(handle.slot, handle.generation)
            .expect("restart of a handle whose request has already left the fifo");
        self.submit_to_kernel(handle, req.fd, req.submit, req.submit_offset)
    }

    fn submit_to_kernel(&mut self, handle: Handle, fd: RawFd, submit: BufferView, submit_offset: u64) -> Result<(), CopyError> {
        let tag = pack_tag(handle);
        match handle.kind {
            RequestKind::Read => self.ring.queue_read(fd, submit.ptr, submit.len as u32, submit_offset, tag),
            RequestKind::Write => self.ring.queue_write(fd, submit.ptr as *const u8, submit.len as u32, submit_offset, tag),
        }
    }

    /// Flush staged submissions to the kernel without blocking.
    pub fn submit(&mut self) -> Result<(), CopyError> {
        self.ring.submit()
    }

    /// Block for at least one completion, then drain and react to every
    /// completion currently available: restart on `EAGAIN` or a short
    /// transfer, mark `ready` on full success, or surface a fatal error.
    pub fn wait_one(&mut self) -> Result<(), CopyError> {
        let completions = self.ring.wait_one()?;
        for completion in completions {
            self.reap(completion)?;
        }
        Ok(())
    }

    fn fifo_mut(&mut self, kind: RequestKind) -> &mut Fifo {
        match kind {
            RequestKind::Read => &mut self.read_fifo,
            RequestKind::Write => &mut self.write_fifo,
        }
    }

    fn reap(&mut self, completion: Completion) -> Result<(), CopyError> {
        let handle = unpack_tag(completion.tag);

        enum Outcome {
            Restart,
            Fatal(i32),
            Done,
        }

        let outcome = {
            let fifo = self.fifo_mut(handle.kind);
            let req = match fifo.get_mut(handle.slot, handle.generation) {
                Some(req) => req,
                // Stale tag for a slot already recycled; nothing to do.
                None => return Ok(()),
            };

            if completion.result < 0 {
                let errno = -completion.result;
                if errno == libc::EAGAIN {
                    tracing::debug!(offset = req.offset, "restarting request after EAGAIN");
                    Outcome::Restart
                } else {
                    req.failed = Some(errno);
                    Outcome::Fatal(errno)
                }
            } else {
                let returned = completion.result as usize;
                // Reads target the logical length, not the padded submit length:
                // the trailing block's read legitimately runs past the source's
                // real EOF into the padding, so comparing against submit.len
                // would treat an EOF-truncated read as perpetually short. Writes
                // have no such gap (destination is pre-extended) and still
                // target the full submit length.
                let target = match handle.kind {
                    RequestKind::Read => req.buffer.len,
                    RequestKind::Write => req.submit.len + req.residual,
                };
                if req.residual + returned < target {
                    tracing::debug!(offset = req.offset, returned, target, "short completion, restarting remainder");
                    req.submit.ptr = unsafe { req.submit.ptr.add(returned) };
                    req.submit.len -= returned;
                    req.submit_offset += returned as u64;
                    req.residual += returned;
                    Outcome::Restart
                } else {
                    req.residual += returned;
                    req.ready = true;
                    Outcome::Done
                }
            }
        };

        match outcome {
            Outcome::Restart => self.restart(handle),
            Outcome::Fatal(errno) => Err(CopyError::Fatal(std::io::Error::from_raw_os_error(errno))),
            Outcome::Done => Ok(()),
        }
    }
}
