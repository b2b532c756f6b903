use std::os::fd::RawFd;

use crate::config::RingConfig;
use crate::context::RingContext;
use crate::error::CopyError;
use crate::request::BufferView;
use crate::ring::KernelRing;

#[cfg(target_os = "linux")]
use crate::ring::IoUringRing;

/// One write-completed notification: the offset and logical length of a
/// block that has been durably written to the destination, in strictly
/// ascending offset order. The only externally visible event the core
/// emits.
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub offset: u64,
    pub len: usize,
}

/// Copy `n` bytes from `in_fd` to `out_fd` using a fresh io_uring-backed
/// ring context sized by `config`. `in_fd`/`out_fd` must already be open
/// for direct, block-aligned I/O; `out_fd` must already be extended to at
/// least `roundup(n, config.block_size)` bytes (the external collaborator's
/// job, not this function's).
#[cfg(target_os = "linux")]
pub fn copy<F: FnMut(&ProgressEvent)>(
    in_fd: RawFd,
    out_fd: RawFd,
    n: u64,
    config: RingConfig,
    on_progress: F,
) -> Result<(), CopyError> {
    config.validate_for_direct_io()?;
    let ring = IoUringRing::new(config.total_entries())?;
    let ctx = RingContext::new(ring, config)?;
    copy_with_context(ctx, in_fd, out_fd, n, on_progress)
}

/// Same state machine as [`copy`], but against any [`KernelRing`]
/// backend — used directly by tests that inject short completions,
/// `EAGAIN`, or permanent failures via a mock ring.
pub fn copy_with_context<R: KernelRing, F: FnMut(&ProgressEvent)>(
    mut ctx: RingContext<R>,
    in_fd: RawFd,
    out_fd: RawFd,
    n: u64,
    mut on_progress: F,
) -> Result<(), CopyError> {
    if n == 0 {
        return Ok(());
    }

    let block_size = ctx.block_size() as u64;
    let mut cursor_in = 0u64;
    let mut cursor_out = 0u64;

    prime(&mut ctx, in_fd, &mut cursor_in, n, block_size)?;

    loop {
        ctx.submit()?;
        ctx.wait_one()?;

        while ctx.write_fifo().ready() {
            let req = ctx.pop_write_ready();
            let event = ProgressEvent {
                offset: req.offset,
                len: req.buffer.len,
            };
            ctx.free(req.buffer)?;
            on_progress(&event);
            cursor_out += req.buffer.len as u64;
            if cursor_out >= n {
                return finish(out_fd, n);
            }
        }

        while ctx.read_fifo().ready() && !ctx.write_fifo().is_full() {
            let req = ctx.pop_read_ready();
            ctx.enqueue_write(out_fd, req.buffer, req.offset)?;
            if cursor_in < n {
                prime_one(&mut ctx, in_fd, &mut cursor_in, n, block_size)?;
            }
        }
    }
}

fn prime<R: KernelRing>(
    ctx: &mut RingContext<R>,
    in_fd: RawFd,
    cursor_in: &mut u64,
    n: u64,
    block_size: u64,
) -> Result<(), CopyError> {
    while !ctx.read_fifo().is_full() && *cursor_in < n {
        prime_one(ctx, in_fd, cursor_in, n, block_size)?;
    }
    Ok(())
}

fn prime_one<R: KernelRing>(
    ctx: &mut RingContext<R>,
    in_fd: RawFd,
    cursor_in: &mut u64,
    n: u64,
    block_size: u64,
) -> Result<(), CopyError> {
    debug_assert!(*cursor_in < n);
    let buf = ctx.alloc()?;
    let len = std::cmp::min(block_size, n - *cursor_in) as usize;
    let view = BufferView { ptr: buf.ptr, len };
    ctx.enqueue_read(in_fd, view, *cursor_in)?;
    *cursor_in += len as u64;
    Ok(())
}

fn finish(out_fd: RawFd, n: u64) -> Result<(), CopyError> {
    let rc = unsafe { libc::ftruncate(out_fd, n as libc::off_t) };
    if rc < 0 {
        return Err(CopyError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::MockRing;
    use std::io::{Read, Write as _};
    use std::os::fd::AsRawFd;

    fn write_source(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    fn dest_file(size: u64) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        f.as_file().set_len(size).unwrap();
        f
    }

    fn run_copy(
        src: &[u8],
        rq_cap: u32,
        wq_cap: u32,
        block_size: u32,
        intercept: Box<dyn FnMut(bool, i32) -> i32>,
    ) -> (Vec<u8>, Vec<ProgressEvent>) {
        let n = src.len() as u64;
        let source = write_source(src);
        let block_align = block_size as u64;
        let dest_len = ((n + block_align - 1) / block_align).max(1) * block_align;
        let dest = dest_file(dest_len);

        let config = RingConfig { rq_cap, wq_cap, block_size };
        let ring = MockRing::new(intercept);
        let ctx = RingContext::new(ring, config).unwrap();

        let mut events = Vec::new();
        copy_with_context(ctx, source.as_file().as_raw_fd(), dest.as_file().as_raw_fd(), n, |e| {
            events.push(*e)
        })
        .unwrap();

        let mut out = Vec::new();
        let mut f = dest.reopen().unwrap();
        f.read_to_end(&mut out).unwrap();
        (out, events)
    }

    #[test]
    fn zero_length_copy_is_a_noop() {
        let (out, events) = run_copy(&[], 2, 2, 512, Box::new(|_, r| r));
        assert!(out.is_empty());
        assert!(events.is_empty());
    }

    #[test]
    fn exact_multiple_of_block_size() {
        let src: Vec<u8> = (0u8..16).collect();
        let (out, events) = run_copy(&src, 2, 2, 4, Box::new(|_, r| r));
        assert_eq!(out, src);
        let offsets: Vec<u64> = events.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8, 12]);
        assert!(events.iter().all(|e| e.len == 4));
    }

    #[test]
    fn trailing_partial_block() {
        let src = vec![b'A'; 17];
        let (out, events) = run_copy(&src, 2, 2, 8, Box::new(|_, r| r));
        assert_eq!(out, src);
        assert_eq!(out.len(), 17);
        assert_eq!(events[0].offset, 0);
        assert_eq!(events[0].len, 8);
        assert_eq!(events[1].offset, 8);
        assert_eq!(events[1].len, 8);
        assert_eq!(events[2].offset, 16);
        assert_eq!(events[2].len, 1);
    }

    #[test]
    fn single_buffer_of_each_kind_is_strictly_serial() {
        let src: Vec<u8> = (0u8..32).collect();
        let (out, events) = run_copy(&src, 1, 1, 8, Box::new(|_, r| r));
        assert_eq!(out, src);
        let offsets: Vec<u64> = events.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16, 24]);
    }

    #[test]
    fn writes_are_offset_ascending_beyond_the_initial_fill() {
        // 4 blocks of fill plus one more cycle.
        let src = vec![42u8; 4096 * 5];
        let (out, events) = run_copy(&src, 4, 4, 4096, Box::new(|_, r| r));
        assert_eq!(out, src);
        let offsets: Vec<u64> = events.iter().map(|e| e.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted, "progress events must be strictly ascending");
        assert_eq!(offsets.len(), 5);
    }

    #[test]
    fn sixty_four_kib_random_source_round_trips_in_sixteen_blocks() {
        // A deterministic pseudo-random fill is enough here; the point is
        // byte-for-byte fidelity across a full multi-cycle pipeline run,
        // not randomness quality.
        let mut state = 0x2545F4914F6CDD1Du64;
        let src: Vec<u8> = (0..65536u32)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state & 0xff) as u8
            })
            .collect();
        let (out, events) = run_copy(&src, 4, 4, 4096, Box::new(|_, r| r));
        assert_eq!(out, src);
        assert_eq!(events.len(), 16);
        let offsets: Vec<u64> = events.iter().map(|e| e.offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        assert_eq!(offsets, sorted);
    }

    #[test]
    fn short_completion_is_transparently_restarted() {
        let src: Vec<u8> = (0u8..64).collect();
        // Every real completion is reported as half-done on its first sighting.
        let mut seen = std::collections::HashSet::new();
        let (out, _events) = run_copy(
            &src,
            2,
            2,
            16,
            Box::new(move |is_write, real| {
                if real <= 0 {
                    return real;
                }
                let key = (is_write, real);
                if seen.insert(key) && real > 1 {
                    real / 2
                } else {
                    real
                }
            }),
        );
        assert_eq!(out, src);
    }

    #[test]
    fn transient_again_is_retried_until_it_completes() {
        let src: Vec<u8> = (0u8..64).collect();
        let mut call = 0u32;
        let (out, _events) = run_copy(
            &src,
            2,
            2,
            16,
            Box::new(move |_is_write, real| {
                call += 1;
                if call <= 10 && call % 2 == 0 {
                    -libc::EAGAIN
                } else {
                    real
                }
            }),
        );
        assert_eq!(out, src);
    }

    #[test]
    fn permanent_failure_aborts_the_copy() {
        let src: Vec<u8> = (0u8..64).collect();
        let mut writes = 0u32;
        let n = src.len() as u64;
        let source = write_source(&src);
        let dest = dest_file(64);
        let config = RingConfig { rq_cap: 2, wq_cap: 2, block_size: 16 };
        let ring = MockRing::new(Box::new(move |is_write, real| {
            if is_write {
                writes += 1;
                if writes == 3 {
                    return -libc::EIO;
                }
            }
            real
        }));
        let ctx = RingContext::new(ring, config).unwrap();
        let err = copy_with_context(ctx, source.as_file().as_raw_fd(), dest.as_file().as_raw_fd(), n, |_| {})
            .unwrap_err();
        assert!(matches!(err, CopyError::Fatal(_)));
    }
}
