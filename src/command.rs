//! The logical command representation the dispatcher operates on.

use bytes::Bytes;

/// One command: a verb followed by its positional arguments, e.g.
/// `["SET", "key", "value"]`.
pub type Command = Vec<Bytes>;

/// Either a single command or a pipeline of commands issued back-to-back on
/// one worker connection.
#[derive(Debug, Clone)]
pub enum Request {
    Single(Command),
    Pipeline(Vec<Command>),
}

impl Request {
    /// Normalizes to a list of commands, since a single command is just a
    /// one-element pipeline for routing/execution purposes.
    pub fn commands(&self) -> &[Command] {
        match self {
            Request::Single(cmd) => std::slice::from_ref(cmd),
            Request::Pipeline(cmds) => cmds,
        }
    }

    pub fn is_pipeline(&self) -> bool {
        matches!(self, Request::Pipeline(_))
    }
}

impl From<Command> for Request {
    fn from(cmd: Command) -> Self {
        Request::Single(cmd)
    }
}

impl From<Vec<Command>> for Request {
    fn from(cmds: Vec<Command>) -> Self {
        Request::Pipeline(cmds)
    }
}

/// Case-insensitive comparison of a command's verb (first token) against a
/// known keyword, without allocating.
pub fn verb_is(cmd: &Command, keyword: &str) -> bool {
    cmd.first()
        .is_some_and(|v| v.eq_ignore_ascii_case(keyword.as_bytes()))
}

/// Builds a single command from string-like parts, normalizing every part to
/// `Bytes` up front so the rest of the crate never juggles `&str` vs binary
/// representations of the same argument.
pub fn cmd(parts: &[&str]) -> Command {
    parts.iter().map(|p| Bytes::copy_from_slice(p.as_bytes())).collect()
}
