use std::ffi::CString;
use std::{error, fmt, io};
use std::os::unix::ffi::OsStringExt;

use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::global::{Argv0, Session};
use crate::pipe::PipeFabric;
use crate::redirect::{self, DescriptorTable, RedirectError};
use crate::search::{self, ResolveError};
use crate::spawn::{Native, System};
use crate::term::{EvalError, Evaluate, Literal};
use crate::types::{CommandNode, Pipeline};

/// Failure while preparing a pipeline. Nothing has been spawned.
#[derive(Debug, Error)]
pub enum ExecError {
	#[error("command #{0} is empty")]
	EmptyCommand(usize),
	#[error("error evaluating command #{index}: {source}")]
	TermEvaluation { index: usize, #[source] source: EvalError },
	#[error("can't resolve command #{index} ({name}): {source}")]
	Resolution { index: usize, name: String, #[source] source: ResolveError },
	#[error("failed to create pipe: {0}")]
	PipeCreation(#[source] io::Error),
	#[error("bad redirection in command #{index}: {source}")]
	Redirect { index: usize, #[source] source: RedirectError },
}

impl ExecError {
	/// Index of the offending command, when the error belongs to one.
	pub fn index(&self) -> Option<usize> {
		match *self {
			ExecError::EmptyCommand(index) => Some(index),
			ExecError::TermEvaluation { index, .. } => Some(index),
			ExecError::Resolution { index, .. } => Some(index),
			ExecError::PipeCreation(_) => None,
			ExecError::Redirect { index, .. } => Some(index),
		}
	}
}

#[derive(Debug, Error)]
#[error("can't spawn command #{index} ({name}): {source}")]
pub struct SpawnError {
	pub index: usize,
	pub name: String,
	#[source]
	pub source: io::Error,
}

/// Spawn failures of a pipeline, indexed like its commands.
#[derive(Debug)]
pub struct CommandErrors {
	pub errors: Vec<Option<SpawnError>>,
}

impl CommandErrors {
	pub fn failures(&self) -> impl Iterator<Item = &SpawnError> {
		self.errors.iter().filter_map(Option::as_ref)
	}
}

impl fmt::Display for CommandErrors {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, e) in self.failures().enumerate() {
			if i != 0 {
				f.write_str("; ")?;
			}
			write!(f, "{}", e)?;
		}
		Ok(())
	}
}

impl error::Error for CommandErrors {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		self.failures().next().map(|e| e as &(dyn error::Error + 'static))
	}
}

/// Outcome of the spawn pass.
///
/// `pids[i]` is `None` exactly when `error.errors[i]` is populated.
#[derive(Debug)]
pub struct PipelineResult {
	pub pids: Vec<Option<Pid>>,
	pub error: Option<CommandErrors>,
}

impl PipelineResult {
	pub fn is_complete(&self) -> bool {
		self.error.is_none()
	}

	pub fn into_result(self) -> Result<Vec<Pid>, (Vec<Option<Pid>>, CommandErrors)> {
		match self.error {
			None => Ok(self.pids.into_iter().flatten().collect()),
			Some(e) => Err((self.pids, e)),
		}
	}
}

/// A command that passed validation and only waits to be spawned.
#[derive(Debug)]
struct Prepared {
	name: String,
	path: CString,
	argv: Vec<CString>,
	table: DescriptorTable,
}

fn cstrings(words: Vec<String>) -> Result<Vec<CString>, EvalError> {
	words.into_iter().map(|w| CString::new(w).map_err(EvalError::from)).collect()
}

fn prepare_command<S, E>(sys: &S, eval: &E, session: &Session, index: usize, node: &CommandNode, fabric: &mut PipeFabric) -> Result<Prepared, ExecError>
	where S: System + ?Sized, E: Evaluate + ?Sized
{
	if node.terms.is_empty() {
		return Err(ExecError::EmptyCommand(index));
	}
	let term_error = |e| ExecError::TermEvaluation { index: index, source: e };

	let words = node.terms.iter().map(|t| eval.evaluate(t)).collect::<Result<Vec<_>, _>>().map_err(term_error)?;
	let name = words[0].clone();
	let mut argv = cstrings(words).map_err(term_error)?;

	let path = search::resolve(sys, &name, &session.search_path)
		.map_err(|e| ExecError::Resolution { index: index, name: name.clone(), source: e })?;
	let path = CString::new(path.into_os_string().into_vec()).map_err(|e| term_error(e.into()))?;
	if session.argv0 == Argv0::Resolved {
		argv[0] = path.clone();
	}

	let candidate = fabric.next_candidate(sys).map_err(ExecError::PipeCreation)?;
	let table = redirect::resolve(sys, eval, &node.redirects, candidate).map_err(|e| match e {
		RedirectError::Filename(e) => term_error(e),
		e => ExecError::Redirect { index: index, source: e },
	})?;

	debug!(index, name = %name, path = ?path, "prepared command");
	Ok(Prepared { name: name, path: path, argv: argv, table: table })
}

/// Validation pass: everything that can fail before a process exists.
///
/// All or nothing. On error every pipe end and file opened so far is closed
/// as the partial work is dropped.
fn prepare<S, E>(sys: &S, eval: &E, session: &Session, pipeline: &Pipeline) -> Result<Vec<Prepared>, ExecError>
	where S: System + ?Sized, E: Evaluate + ?Sized
{
	let mut fabric = PipeFabric::new(pipeline.commands.len());
	pipeline.commands.iter().enumerate()
		.map(|(i, node)| prepare_command(sys, eval, session, i, node, &mut fabric))
		.collect()
}

/// Spawn pass: every command is attempted, whatever happened to the others.
///
/// The parent's copies of each command's descriptors are closed right after
/// its spawn attempt.
fn launch<S: System + ?Sized>(sys: &S, session: &Session, cmds: Vec<Prepared>) -> PipelineResult {
	let envp = session.envp();
	let mut pids = Vec::with_capacity(cmds.len());
	let mut errors = Vec::with_capacity(cmds.len());
	let mut haserr = false;

	for (i, cmd) in cmds.into_iter().enumerate() {
		match sys.spawn(&cmd.path, &cmd.argv, &cmd.table, &envp) {
			Ok(pid) => {
				debug!(index = i, name = %cmd.name, %pid, "spawned");
				pids.push(Some(pid));
				errors.push(None);
			},
			Err(e) => {
				warn!(index = i, name = %cmd.name, error = %e, "spawn failed");
				pids.push(None);
				errors.push(Some(SpawnError { index: i, name: cmd.name, source: e }));
				haserr = true;
			},
		}
	}

	let error = if haserr { Some(CommandErrors { errors: errors }) } else { None };
	PipelineResult { pids: pids, error: error }
}

/// Executes a pipeline with the real OS and literal-only evaluation.
///
/// As much as possible is done before anything gets executed, so that a
/// broken pipeline is never half started: names are resolved, arguments
/// evaluated and files opened first, and any failure there returns an error
/// with no process spawned. Once that succeeds, every command is spawned even
/// if some fail; failed slots carry `None` and their error in
/// `PipelineResult::error`.
pub fn exec_pipeline(session: &Session, pipeline: &Pipeline) -> Result<PipelineResult, ExecError> {
	exec_pipeline_with(&Native, &Literal, session, pipeline)
}

pub fn exec_pipeline_with<S, E>(sys: &S, eval: &E, session: &Session, pipeline: &Pipeline) -> Result<PipelineResult, ExecError>
	where S: System + ?Sized, E: Evaluate + ?Sized
{
	let cmds = prepare(sys, eval, session, pipeline)?;
	Ok(launch(sys, session, cmds))
}
