use std::ffi;

use thiserror::Error;

use crate::types::Term;

#[derive(Debug, Error)]
pub enum EvalError {
	#[error("unsupported term {0:?}")]
	Unsupported(Term),
	#[error("argument contains a nul byte: {0}")]
	Nul(#[from] ffi::NulError),
	#[error("{0}")]
	Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Turns AST terms into the strings handed to the launcher.
///
/// Expansion, globbing and substitution belong to the shell; the core only
/// needs this contract.
pub trait Evaluate {
	fn evaluate(&self, term: &Term) -> Result<String, EvalError>;
}

/// Evaluates literal words and refuses everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct Literal;

impl Evaluate for Literal {
	fn evaluate(&self, term: &Term) -> Result<String, EvalError> {
		match *term {
			Term::Literal(ref s) => Ok(s.clone()),
			ref t => Err(EvalError::Unsupported(t.clone())),
		}
	}
}

impl<'a, E: Evaluate + ?Sized> Evaluate for &'a E {
	fn evaluate(&self, term: &Term) -> Result<String, EvalError> {
		(**self).evaluate(term)
	}
}
