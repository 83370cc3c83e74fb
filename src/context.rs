//! Per-call option carrier.
use std::fmt;

use tokio::io::AsyncRead;
use tokio::time::Instant;

/// Default bytes per CopyData frame: 64 KiB.
pub const DEFAULT_COPY_BLOCK_SIZE: usize = 65536;

/// A byte source feeding `COPY ... FROM STDIN`.
pub type CopyInput = Box<dyn AsyncRead + Send + Unpin>;

/// Options scoped to a single query call.
///
/// The default carrier imposes no deadline, keeps every row in memory,
/// and feeds COPY from the process standard input in 64 KiB blocks.
pub struct QueryContext {
    pub(crate) copy_input: Option<CopyInput>,
    pub(crate) copy_block_size: usize,
    pub(crate) in_mem_row_limit: usize,
    pub(crate) deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> QueryContext {
        QueryContext {
            copy_input: None,
            copy_block_size: DEFAULT_COPY_BLOCK_SIZE,
            in_mem_row_limit: 0,
            deadline: None,
        }
    }

    /// Stream to feed STDIN during COPY, instead of the process stdin.
    pub fn set_copy_input_stream(&mut self, input: impl AsyncRead + Send + Unpin + 'static) -> &mut Self {
        self.copy_input = Some(Box::new(input));
        self
    }

    /// Maximum bytes per CopyData frame. Zero is rejected.
    pub fn set_copy_block_size(&mut self, bytes: usize) -> Result<&mut Self, InvalidContextOption> {
        if bytes == 0 {
            return Err(InvalidContextOption("copy block size must be positive"));
        }
        self.copy_block_size = bytes;
        Ok(self)
    }

    /// Rows kept in memory before a result set spills to disk; 0 keeps
    /// everything in memory.
    pub fn set_in_memory_row_limit(&mut self, rows: usize) -> &mut Self {
        self.in_mem_row_limit = rows;
        self
    }

    /// Absolute deadline for the call. Every suspension point honors it;
    /// on expiry the connection fires CancelRequest on a side channel and
    /// the call fails with a cancellation error.
    pub fn set_deadline(&mut self, deadline: Instant) -> &mut Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline as a timeout from now.
    pub fn set_timeout(&mut self, timeout: std::time::Duration) -> &mut Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("copy_input", &self.copy_input.as_ref().map(|_| ".."))
            .field("copy_block_size", &self.copy_block_size)
            .field("in_mem_row_limit", &self.in_mem_row_limit)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A context option failed validation; reported before any network I/O.
#[derive(Debug)]
pub struct InvalidContextOption(&'static str);

impl std::error::Error for InvalidContextOption {}

impl fmt::Display for InvalidContextOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid context option: {}", self.0)
    }
}
