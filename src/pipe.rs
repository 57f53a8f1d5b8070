use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd};

use tracing::trace;

use crate::redirect::DescriptorTable;
use crate::spawn::System;

/// Chains command `i`'s stdout to command `i + 1`'s stdin.
///
/// Pipes are created one at a time as commands are prepared. A read end
/// waiting for the next command is owned here and closed on drop if that
/// command never claims it.
#[derive(Debug)]
pub struct PipeFabric {
	len: usize,
	next: usize,
	pending_read: Option<OwnedFd>,
}

impl PipeFabric {
	pub fn new(len: usize) -> PipeFabric {
		PipeFabric { len: len, next: 0, pending_read: None }
	}

	/// Pipe candidates for the next command in pipeline order.
	pub fn next_candidate<S: System + ?Sized>(&mut self, sys: &S) -> io::Result<DescriptorTable> {
		assert!(self.next < self.len, "pipe fabric exhausted");
		let i = self.next;
		self.next += 1;

		let mut table = DescriptorTable::inherit();
		if let Some(read) = self.pending_read.take() {
			table.connect_pipe(0, read);
		}
		if i + 1 != self.len {
			let (read, write) = sys.pipe()?;
			trace!(command = i, read = read.as_raw_fd(), write = write.as_raw_fd(), "created pipe");
			table.connect_pipe(1, write);
			self.pending_read = Some(read);
		}
		Ok(table)
	}
}
