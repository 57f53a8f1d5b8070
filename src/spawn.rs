use std::ffi::{CStr, CString};
use std::fs;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{OwnedFd, RawFd};
use std::path::Path;
use std::ptr;

use libc::{c_char, c_int};
use nix::fcntl::OFlag;
use nix::sys::signal::{SigSet, Signal};
use nix::unistd::{self, Pid};

use crate::redirect::{DescriptorTable, Slot, CREATE_MODE};
use crate::search;

/// The operating system as seen by the pipeline executor.
pub trait System {
	fn is_executable(&self, path: &Path) -> bool {
		search::is_executable(path)
	}

	/// A close-on-exec pipe, `(read, write)`.
	fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)>;

	/// Opens a redirection target, creating it with `CREATE_MODE` if `flags` ask to.
	fn open(&self, path: &Path, flags: OFlag) -> io::Result<OwnedFd>;

	/// Starts `path` with its standard descriptors taken from `table`.
	fn spawn(&self, path: &CStr, argv: &[CString], table: &DescriptorTable, envp: &[CString]) -> io::Result<Pid>;
}

/// The real thing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Native;

impl System for Native {
	fn pipe(&self) -> io::Result<(OwnedFd, OwnedFd)> {
		Ok(unistd::pipe2(OFlag::O_CLOEXEC)?)
	}

	fn open(&self, path: &Path, flags: OFlag) -> io::Result<OwnedFd> {
		let mut oopt = fs::OpenOptions::new();
		let access = flags & OFlag::O_ACCMODE;
		if access == OFlag::O_RDWR {
			oopt.read(true).write(true);
		} else if access == OFlag::O_WRONLY {
			oopt.write(true);
		} else {
			oopt.read(true);
		}
		oopt.custom_flags((flags & !OFlag::O_ACCMODE).bits()).mode(CREATE_MODE);
		Ok(oopt.open(path)?.into())
	}

	fn spawn(&self, path: &CStr, argv: &[CString], table: &DescriptorTable, envp: &[CString]) -> io::Result<Pid> {
		posix_spawn(path, argv, table, envp)
	}
}

fn check(ret: c_int) -> io::Result<()> {
	if ret == 0 { Ok(()) } else { Err(io::Error::from_raw_os_error(ret)) }
}

struct FileActions(libc::posix_spawn_file_actions_t);

impl FileActions {
	fn new() -> io::Result<FileActions> {
		let mut raw = MaybeUninit::uninit();
		check(unsafe { libc::posix_spawn_file_actions_init(raw.as_mut_ptr()) })?;
		Ok(FileActions(unsafe { raw.assume_init() }))
	}

	fn dup2(&mut self, from: RawFd, to: RawFd) -> io::Result<()> {
		check(unsafe { libc::posix_spawn_file_actions_adddup2(&mut self.0, from, to) })
	}

	fn close(&mut self, fd: RawFd) -> io::Result<()> {
		check(unsafe { libc::posix_spawn_file_actions_addclose(&mut self.0, fd) })
	}
}

impl Drop for FileActions {
	fn drop(&mut self) {
		unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
	}
}

struct Attr(libc::posix_spawnattr_t);

impl Attr {
	fn new() -> io::Result<Attr> {
		let mut raw = MaybeUninit::uninit();
		check(unsafe { libc::posix_spawnattr_init(raw.as_mut_ptr()) })?;
		let mut this = Attr(unsafe { raw.assume_init() });
		// Rust ignores SIGPIPE in the parent; ignored signals survive exec.
		let mut sigdef = SigSet::empty();
		sigdef.add(Signal::SIGPIPE);
		let sigdef: &libc::sigset_t = sigdef.as_ref();
		check(unsafe { libc::posix_spawnattr_setsigdefault(&mut this.0, sigdef) })?;
		check(unsafe { libc::posix_spawnattr_setflags(&mut this.0, libc::POSIX_SPAWN_SETSIGDEF as libc::c_short) })?;
		Ok(this)
	}
}

impl Drop for Attr {
	fn drop(&mut self) {
		unsafe { libc::posix_spawnattr_destroy(&mut self.0) };
	}
}

/// Translates a descriptor table into spawn file actions.
///
/// Every source is first parked above all descriptors the table mentions, so
/// installing slot `k` can never clobber the source of a later slot.
fn file_actions(table: &DescriptorTable) -> io::Result<FileActions> {
	let slots = table.slots();
	let base = slots.iter().filter_map(Slot::source_fd).fold(2, RawFd::max) + 1;
	let parked = |k: usize| base + k as RawFd;
	let moves = |k: usize| match slots[k] {
		Slot::Inherit(fd) => fd != k as RawFd,
		Slot::Closed => false,
		Slot::Handle(_) => true,
	};

	let mut actions = FileActions::new()?;
	for k in 0..3 {
		if moves(k) {
			if let Some(src) = slots[k].source_fd() {
				actions.dup2(src, parked(k))?;
			}
		}
	}
	for k in 0..3 {
		if moves(k) {
			actions.dup2(parked(k), k as RawFd)?;
			actions.close(parked(k))?;
		} else if let Slot::Closed = slots[k] {
			actions.close(k as RawFd)?;
		}
	}
	Ok(actions)
}

fn nul_terminated(strings: &[CString]) -> Vec<*mut c_char> {
	strings.iter()
		.map(|s| s.as_ptr() as *mut c_char)
		.chain(Some(ptr::null_mut()))
		.collect()
}

/// Starts a process in one call, without a separate fork and exec.
pub fn posix_spawn(path: &CStr, argv: &[CString], table: &DescriptorTable, envp: &[CString]) -> io::Result<Pid> {
	let actions = file_actions(table)?;
	let attr = Attr::new()?;
	let argv = nul_terminated(argv);
	let envp = nul_terminated(envp);
	let mut pid: libc::pid_t = 0;
	check(unsafe {
		libc::posix_spawn(&mut pid, path.as_ptr(), &actions.0, &attr.0, argv.as_ptr(), envp.as_ptr())
	})?;
	Ok(Pid::from_raw(pid))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::redirect;
	use crate::term::Literal;
	use crate::types::Redirect;
	use nix::sys::wait::{waitpid, WaitStatus};

	fn cstrings(words: &[&str]) -> Vec<CString> {
		words.iter().map(|w| CString::new(*w).unwrap()).collect()
	}

	fn run(path: &str, argv: &[&str], redirects: &[Redirect]) -> WaitStatus {
		let table = redirect::resolve(&Native, &Literal, redirects, DescriptorTable::inherit()).unwrap();
		let path = CString::new(path).unwrap();
		let envp = cstrings(&["PATH=/bin:/usr/bin", "LC_ALL=C"]);
		let pid = Native.spawn(&path, &cstrings(argv), &table, &envp).unwrap();
		waitpid(pid, None).unwrap()
	}

	fn sh(script: &str, redirects: &[Redirect]) -> WaitStatus {
		run("/bin/sh", &["sh", "-c", script], redirects)
	}

	#[test]
	fn stdout_goes_to_file() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("out");
		let status = sh("echo hello", &[Redirect::output(1, out.to_str().unwrap())]);
		assert!(matches!(status, WaitStatus::Exited(_, 0)));
		assert_eq!(fs::read_to_string(&out).unwrap(), "hello\n");
	}

	#[test]
	fn stderr_follows_stdout() {
		let dir = tempfile::tempdir().unwrap();
		let out = dir.path().join("out");
		sh("echo oops >&2", &[Redirect::output(1, out.to_str().unwrap()), Redirect::Duplicate(2, 1)]);
		assert_eq!(fs::read_to_string(&out).unwrap(), "oops\n");
	}

	#[test]
	fn stdin_from_file() {
		let dir = tempfile::tempdir().unwrap();
		let input = dir.path().join("in");
		let out = dir.path().join("out");
		fs::write(&input, "line\n").unwrap();
		sh("read x; echo \"got $x\"", &[Redirect::input(0, input.to_str().unwrap()), Redirect::output(1, out.to_str().unwrap())]);
		assert_eq!(fs::read_to_string(&out).unwrap(), "got line\n");
	}

	#[test]
	fn closed_slot_is_closed_in_child() {
		let dir = tempfile::tempdir().unwrap();
		let err = dir.path().join("err");
		let status = run("/bin/ls", &["ls", "/"], &[Redirect::Close(1), Redirect::output(2, err.to_str().unwrap())]);
		assert!(!matches!(status, WaitStatus::Exited(_, 0)), "{:?}", status);
		let msg = fs::read_to_string(&err).unwrap();
		assert!(msg.contains("Bad file descriptor"), "{:?}", msg);
	}

	#[test]
	fn sigpipe_is_default_in_child() {
		let status = sh("kill -s PIPE $$; exit 3", &[]);
		assert!(matches!(status, WaitStatus::Signaled(_, Signal::SIGPIPE, _)), "{:?}", status);
	}

	#[test]
	fn missing_binary_is_an_error() {
		let path = CString::new("/nonexistent/binary").unwrap();
		let r = Native.spawn(&path, &cstrings(&["binary"]), &DescriptorTable::inherit(), &[]);
		assert_eq!(r.unwrap_err().kind(), io::ErrorKind::NotFound);
	}
}
