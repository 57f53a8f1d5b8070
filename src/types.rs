use nix::fcntl::OFlag;

/// A word of a command line, before evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
	Literal(String),
	Variable(String),
}

impl Term {
	pub fn literal<S: Into<String>>(s: S) -> Term {
		Term::Literal(s.into())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
	/// `fd>&-`
	Close(i32),
	/// `fd>&source`
	Duplicate(i32, i32),
	/// `fd<path`, `fd>path`, `fd>>path` and friends; `flags` carries the open mode.
	Open(i32, Term, OFlag),
}

impl Redirect {
	pub fn fd(&self) -> i32 {
		match *self {
			Redirect::Close(fd) => fd,
			Redirect::Duplicate(fd, _) => fd,
			Redirect::Open(fd, ..) => fd,
		}
	}

	pub fn input<S: Into<String>>(fd: i32, path: S) -> Redirect {
		Redirect::Open(fd, Term::literal(path), OFlag::O_RDONLY)
	}

	pub fn output<S: Into<String>>(fd: i32, path: S) -> Redirect {
		Redirect::Open(fd, Term::literal(path), OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC)
	}

	pub fn append<S: Into<String>>(fd: i32, path: S) -> Redirect {
		Redirect::Open(fd, Term::literal(path), OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandNode {
	pub terms: Vec<Term>,
	pub redirects: Vec<Redirect>,
}

impl CommandNode {
	pub fn new<I, S>(words: I) -> CommandNode where I: IntoIterator<Item = S>, S: Into<String> {
		CommandNode { terms: words.into_iter().map(Term::literal).collect(), redirects: vec![] }
	}

	pub fn redirect(mut self, redirect: Redirect) -> CommandNode {
		self.redirects.push(redirect);
		self
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
	pub commands: Vec<CommandNode>,
}

impl Pipeline {
	pub fn new(commands: Vec<CommandNode>) -> Pipeline {
		Pipeline { commands: commands }
	}
}
