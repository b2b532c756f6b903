use crate::aligned_buf::IO_ALIGN;
use crate::error::CopyError;

/// Tunables for a [`crate::context::RingContext`].
///
/// `rq_cap` and `wq_cap` bound how many read requests and write requests,
/// respectively, may be in flight at once; the block arena is sized to
/// exactly `rq_cap + wq_cap` blocks so the pipeline never allocates once
/// steady state is reached.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub rq_cap: u32,
    pub wq_cap: u32,
    pub block_size: u32,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            rq_cap: 8,
            wq_cap: 8,
            block_size: 128 * 1024,
        }
    }
}

impl RingConfig {
    /// Validate caller-supplied capacities and block size, per the `Invalid`
    /// caller-misuse taxonomy: non-power-of-two capacities, a zero capacity,
    /// or a capacity sum that overflows the kernel ring's entry count are
    /// all refused here rather than later. This is the core invariant the
    /// arena and FIFOs themselves rely on; it does not know about any
    /// particular device's O_DIRECT alignment requirement — see
    /// [`Self::validate_for_direct_io`] for that.
    pub fn validate(&self) -> Result<(), CopyError> {
        if self.rq_cap == 0 || !self.rq_cap.is_power_of_two() {
            return Err(CopyError::Invalid("rq_cap must be a nonzero power of two"));
        }
        if self.wq_cap == 0 || !self.wq_cap.is_power_of_two() {
            return Err(CopyError::Invalid("wq_cap must be a nonzero power of two"));
        }
        if self.rq_cap.checked_add(self.wq_cap).is_none() {
            return Err(CopyError::Invalid("rq_cap + wq_cap overflows the kernel ring size"));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(CopyError::Invalid("block_size must be a nonzero power of two"));
        }
        Ok(())
    }

    /// Same as [`Self::validate`], plus the additional real-world
    /// requirement that `block_size` be large enough for O_DIRECT:
    /// a power of two at least as large as [`IO_ALIGN`]. Applied by the
    /// CLI and by [`crate::driver::copy`], which actually open files with
    /// O_DIRECT; not required by the core state machine itself, which is
    /// exercised against plain buffered files in tests.
    pub fn validate_for_direct_io(&self) -> Result<(), CopyError> {
        self.validate()?;
        if (self.block_size as usize) < IO_ALIGN {
            return Err(CopyError::Invalid("block_size must be >= the direct-I/O alignment (512)"));
        }
        Ok(())
    }

    pub fn total_entries(&self) -> u32 {
        self.rq_cap + self.wq_cap
    }
}
