//! Pipeline execution core of the `ish` shell.
//!
//! Takes an already parsed [`Pipeline`], resolves every command, connects
//! them with pipes, applies redirections and spawns one process per command
//! without waiting for any of them.

pub mod types;
pub mod term;
pub mod search;
pub mod pipe;
pub mod redirect;
pub mod spawn;
pub mod global;
pub mod eval;

pub use eval::{exec_pipeline, exec_pipeline_with, CommandErrors, ExecError, PipelineResult, SpawnError};
pub use global::{Argv0, Session};
pub use redirect::{DescriptorTable, RedirectError, Slot};
pub use search::ResolveError;
pub use spawn::{Native, System};
pub use term::{EvalError, Evaluate, Literal};
pub use types::{CommandNode, Pipeline, Redirect, Term};
