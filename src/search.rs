use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::spawn::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResolveError {
	#[error("not executable")]
	NotExecutable,
	#[error("not found")]
	NotFound,
}

const EXPLICIT_PREFIXES: [&'static str; 3] = ["/", "./", "../"];

/// A regular file carrying at least one execute bit.
pub fn is_executable(path: &Path) -> bool {
	use std::os::unix::fs::PermissionsExt;
	match fs::metadata(path) {
		Ok(m) => !m.is_dir() && m.permissions().mode() & 0o111 != 0,
		Err(_) => false,
	}
}

/// Maps a command token to the executable that would run.
///
/// Tokens spelled as paths are checked as-is and never searched for.
pub fn resolve<S: System + ?Sized>(sys: &S, token: &str, search_path: &[PathBuf]) -> Result<PathBuf, ResolveError> {
	if EXPLICIT_PREFIXES.iter().any(|p| token.starts_with(p)) {
		let path = PathBuf::from(token);
		return if sys.is_executable(&path) { Ok(path) } else { Err(ResolveError::NotExecutable) };
	}
	search_path.iter()
		.filter(|dir| !dir.as_os_str().is_empty())
		.map(|dir| dir.join(token))
		.find(|candidate| sys.is_executable(candidate))
		.ok_or(ResolveError::NotFound)
}
