pub mod aligned_buf;
pub mod arena;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fifo;
pub mod iolog;
pub mod platform;
pub mod request;
pub mod ring;

pub use config::RingConfig;
pub use context::RingContext;
pub use driver::{ProgressEvent, copy_with_context};
pub use error::CopyError;
pub use request::{BufferView, Handle, Request, RequestKind};
pub use ring::KernelRing;

#[cfg(target_os = "linux")]
pub use driver::copy;
#[cfg(target_os = "linux")]
pub use ring::IoUringRing;
