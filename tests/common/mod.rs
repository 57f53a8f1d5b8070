#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, CString, OsString};
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use ish_exec::{DescriptorTable, Native, Session, System};
use nix::fcntl::OFlag;
use nix::unistd::Pid;

fn link(fd: RawFd) -> Option<String> {
	fs::read_link(format!("/proc/self/fd/{}", fd)).ok().map(|p| p.to_string_lossy().into_owned())
}

/// Everything currently open in this process, by what the descriptor points at.
pub fn open_links() -> Vec<String> {
	let mut links = vec![];
	if let Ok(entries) = fs::read_dir("/proc/self/fd") {
		for entry in entries.flatten() {
			if let Ok(target) = fs::read_link(entry.path()) {
				links.push(target.to_string_lossy().into_owned());
			}
		}
	}
	links
}

/// A `System` that creates real pipes and files, fakes spawning, and fails
/// on request.
///
/// Commands resolve when they live under `/fake/bin`, unless named in
/// `missing`. Fault ordinals count calls of each kind from zero.
#[derive(Default)]
pub struct Faulty {
	pub missing: Vec<String>,
	pub fail_pipe: Option<usize>,
	pub fail_open: Option<usize>,
	pub fail_spawn: Vec<usize>,
	pub pipes: Cell<usize>,
	pub opens: Cell<usize>,
	pub spawns: Cell<usize>,
	pub created: RefCell<Vec<String>>,
}

impl Faulty {
	fn bump(counter: &Cell<usize>) -> usize {
		let n = counter.get();
		counter.set(n + 1);
		n
	}

	fn track(&self, fd: &OwnedFd) {
		if let Some(l) = link(fd.as_raw_fd()) {
			self.created.borrow_mut().push(l);
		}
	}

	/// Descriptors created through this system that are still open.
	pub fn leaked(&self) -> Vec<String> {
		let created = self.created.borrow();
		open_links().into_iter().filter(|l| created.contains(l)).collect()
	}

	pub fn created(&self) -> usize {
		self.created.borrow().len()
	}
}

impl System for Faulty {
	fn is_executable(&self, path: &Path) -> bool {
		path.starts_with("/fake/bin") && !self.missing.iter().any(|m| path.ends_with(m))
	}

	fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
		if Some(Faulty::bump(&self.pipes)) == self.fail_pipe {
			return Err(io::Error::from_raw_os_error(libc::EMFILE));
		}
		let (r, w) = Native.pipe()?;
		self.track(&r);
		Ok((r, w))
	}

	fn open(&self, path: &Path, flags: OFlag) -> io::Result<OwnedFd> {
		if Some(Faulty::bump(&self.opens)) == self.fail_open {
			return Err(io::Error::from_raw_os_error(libc::EACCES));
		}
		let f = Native.open(path, flags)?;
		self.track(&f);
		Ok(f)
	}

	fn spawn(&self, _: &CStr, _: &[CString], _: &DescriptorTable, _: &[CString]) -> io::Result<Pid> {
		let n = Faulty::bump(&self.spawns);
		if self.fail_spawn.contains(&n) {
			Err(io::Error::from_raw_os_error(libc::ENOEXEC))
		} else {
			Ok(Pid::from_raw(4000 + n as i32))
		}
	}
}

pub fn fake_session() -> Session {
	Session::new(vec![PathBuf::from("/fake/bin")], HashMap::new())
}

pub fn system_session() -> Session {
	let mut env: HashMap<OsString, OsString> = HashMap::new();
	env.insert("PATH".into(), "/bin:/usr/bin".into());
	env.insert("LC_ALL".into(), "C".into());
	let mut session = Session::new(vec![], env);
	session.rehash();
	session
}
