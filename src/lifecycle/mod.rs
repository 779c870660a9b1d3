//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Caller / registry owner:
//!     CancelHandle::cancel()
//!     → every CancelToken resolves
//!     → confirmation polling returns Cancelled
//!     → subscription registry task exits
//! ```

pub mod cancel;

pub use cancel::{CancelHandle, CancelToken};
