use std::collections::HashMap;
use std::env;
use std::ffi::{CString, OsStr, OsString};
use std::path::PathBuf;

use tracing::warn;

const PATH_KEY: &'static str = "PATH";

/// What a spawned program sees as `argv[0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Argv0 {
	/// The command name as the user typed it.
	#[default]
	Typed,
	/// The executable path it resolved to.
	Resolved,
}

/// Ambient inputs of pipeline execution, read-only for the duration of a call.
#[derive(Debug, Clone, Default)]
pub struct Session {
	pub search_path: Vec<PathBuf>,
	pub env: HashMap<OsString, OsString>,
	pub argv0: Argv0,
}

impl Session {
	pub fn new(search_path: Vec<PathBuf>, env: HashMap<OsString, OsString>) -> Session {
		Session { search_path: search_path, env: env, argv0: Argv0::default() }
	}

	/// Snapshot of the current process environment.
	pub fn from_process() -> Session {
		let env: HashMap<OsString, OsString> = env::vars_os().collect();
		let mut this = Session::new(vec![], env);
		this.rehash();
		this
	}

	pub fn with_argv0(mut self, argv0: Argv0) -> Session {
		self.argv0 = argv0;
		self
	}

	/// Recomputes the search path from `PATH` in `env`.
	pub fn rehash(&mut self) {
		self.search_path = match self.env.get(OsStr::new(PATH_KEY)) {
			Some(path) => env::split_paths(path).collect(),
			None => vec![],
		};
	}

	/// `NAME=VALUE` entries for exec, in no particular order.
	pub fn envp(&self) -> Vec<CString> {
		use std::os::unix::ffi::OsStringExt;
		self.env.iter().filter_map(|(k, v)| {
			let mut entry = k.clone();
			entry.push("=");
			entry.push(v);
			match CString::new(entry.into_vec()) {
				Ok(s) => Some(s),
				Err(_) => {
					warn!(name = ?k, "dropping environment entry containing a nul byte");
					None
				},
			}
		}).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn env(pairs: &[(&str, &str)]) -> HashMap<OsString, OsString> {
		pairs.iter().map(|&(k, v)| (k.into(), v.into())).collect()
	}

	#[test]
	fn rehash_splits_path() {
		let mut s = Session::new(vec![], env(&[("PATH", "/usr/bin:/bin")]));
		s.rehash();
		assert_eq!(s.search_path, vec![PathBuf::from("/usr/bin"), PathBuf::from("/bin")]);
	}

	#[test]
	fn rehash_without_path_clears() {
		let mut s = Session::new(vec![PathBuf::from("/bin")], env(&[]));
		s.rehash();
		assert!(s.search_path.is_empty());
	}

	#[test]
	fn envp_entries() {
		let s = Session::new(vec![], env(&[("A", "1"), ("B", "x=y"), ("BAD", "a\0b")]));
		let mut entries: Vec<_> = s.envp().into_iter().map(|c| c.into_string().unwrap()).collect();
		entries.sort();
		assert_eq!(entries, vec!["A=1", "B=x=y"]);
	}

	#[test]
	fn typed_name_is_the_default() {
		assert_eq!(Session::default().argv0, Argv0::Typed);
		assert_eq!(Session::default().with_argv0(Argv0::Resolved).argv0, Argv0::Resolved);
	}
}
