use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;

use thiserror::Error;
use tracing::trace;

use crate::spawn::System;
use crate::term::{EvalError, Evaluate};
use crate::types::Redirect;

/// Permission bits for files created by output redirections.
pub const CREATE_MODE: u32 = 0o644;

fn slot_name(fd: &i32) -> &'static str {
	match *fd {
		0 => "input",
		1 => "output",
		2 => "error output",
		_ => "descriptor",
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection { Pipe, Redirect }

impl fmt::Display for Connection {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			Connection::Pipe => f.write_str("pipe"),
			Connection::Redirect => f.write_str("an earlier redirection"),
		}
	}
}

#[derive(Debug, Error)]
pub enum RedirectError {
	#[error("redirection on fd {0} not supported")]
	UnsupportedFd(i32),
	#[error("{} already connected to {by}", slot_name(.fd))]
	AlreadyConnected { fd: i32, by: Connection },
	#[error("fd redirection from fd {0} not supported")]
	UnsupportedDupSource(i32),
	#[error("failed to open file {path:?}: {source}")]
	OpenFailure { path: PathBuf, #[source] source: io::Error },
	#[error("failed to evaluate filename: {0}")]
	Filename(#[source] EvalError),
}

/// Final assignment of one standard descriptor of a child.
#[derive(Debug, Clone)]
pub enum Slot {
	/// The parent's descriptor with this number, as-is.
	Inherit(RawFd),
	Closed,
	/// A descriptor opened by the parent; shared between slots after `n>&m`.
	Handle(Rc<OwnedFd>),
}

impl Slot {
	/// The parent-side descriptor the child slot is copied from.
	pub fn source_fd(&self) -> Option<RawFd> {
		match *self {
			Slot::Inherit(fd) => Some(fd),
			Slot::Closed => None,
			Slot::Handle(ref h) => Some(h.as_raw_fd()),
		}
	}
}

/// Where a child's stdin, stdout and stderr come from.
///
/// Owns every handle installed into it; dropping the table closes the
/// parent's copies.
#[derive(Debug)]
pub struct DescriptorTable {
	slots: [Slot; 3],
	connected: [bool; 3],
}

impl Default for DescriptorTable {
	fn default() -> DescriptorTable {
		DescriptorTable::inherit()
	}
}

impl DescriptorTable {
	pub fn inherit() -> DescriptorTable {
		DescriptorTable {
			slots: [Slot::Inherit(0), Slot::Inherit(1), Slot::Inherit(2)],
			connected: [false; 3],
		}
	}

	pub fn slots(&self) -> &[Slot; 3] {
		&self.slots
	}

	pub fn slot(&self, fd: usize) -> &Slot {
		&self.slots[fd]
	}

	/// Installs a pipe end; only the pipe fabric does this.
	pub fn connect_pipe(&mut self, fd: usize, end: OwnedFd) {
		self.slots[fd] = Slot::Handle(Rc::new(end));
		self.connected[fd] = true;
	}

	pub fn is_connected(&self, fd: usize) -> bool {
		self.connected[fd]
	}
}

fn check_slot(fd: i32, table: &DescriptorTable, assigned: &[bool; 3]) -> Result<usize, RedirectError> {
	if fd < 0 || fd > 2 {
		return Err(RedirectError::UnsupportedFd(fd));
	}
	let slot = fd as usize;
	if slot < 2 && table.is_connected(slot) {
		Err(RedirectError::AlreadyConnected { fd: fd, by: Connection::Pipe })
	} else if assigned[slot] {
		Err(RedirectError::AlreadyConnected { fd: fd, by: Connection::Redirect })
	} else {
		Ok(slot)
	}
}

/// Applies `redirects` in order on top of the pipe candidates.
///
/// Slots never mentioned keep the pipe end they were given, or the parent's
/// descriptor of the same number. On error every handle opened so far is
/// dropped with the partial table.
pub fn resolve<S, E>(sys: &S, eval: &E, redirects: &[Redirect], candidate: DescriptorTable) -> Result<DescriptorTable, RedirectError>
	where S: System + ?Sized, E: Evaluate + ?Sized
{
	let mut table = candidate;
	let mut assigned = [false; 3];
	for r in redirects {
		let slot = check_slot(r.fd(), &table, &assigned)?;
		let new = match *r {
			Redirect::Close(_) => Slot::Closed,
			Redirect::Duplicate(_, source) => {
				if source < 0 || source > 2 {
					return Err(RedirectError::UnsupportedDupSource(source));
				}
				match table.slots[source as usize] {
					Slot::Closed => return Err(RedirectError::UnsupportedDupSource(source)),
					ref s => s.clone(),
				}
			},
			Redirect::Open(_, ref term, flags) => {
				let path = PathBuf::from(eval.evaluate(term).map_err(RedirectError::Filename)?);
				let file = sys.open(&path, flags)
					.map_err(|e| RedirectError::OpenFailure { path: path.clone(), source: e })?;
				trace!(fd = file.as_raw_fd(), path = %path.display(), "opened redirection target");
				Slot::Handle(Rc::new(file))
			},
		};
		table.slots[slot] = new;
		assigned[slot] = true;
	}
	Ok(table)
}
