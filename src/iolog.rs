use std::io::Write;

/// Optional CSV trace of every I/O submitted to the kernel ring, enabled by
/// setting `URING_CP_IO_LOG` to a file path; `URING_CP_IO_LOG_LIMIT` caps
/// how many rows get written.
pub struct IoLog {
    writer: std::io::BufWriter<std::fs::File>,
    remaining: usize,
}

impl IoLog {
    pub fn from_env() -> Option<Self> {
        let path = std::env::var("URING_CP_IO_LOG").ok()?;
        let limit = std::env::var("URING_CP_IO_LOG_LIMIT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(usize::MAX);
        let f = std::fs::File::create(&path).ok()?;
        let mut writer = std::io::BufWriter::new(f);
        let _ = writeln!(writer, "phase,offset,len");
        Some(Self { writer, remaining: limit })
    }

    pub fn log(&mut self, phase: &str, offset: u64, len: u32) {
        if self.remaining == 0 {
            return;
        }
        let _ = writeln!(self.writer, "{phase},{offset},{len}");
        self.remaining -= 1;
    }
}
