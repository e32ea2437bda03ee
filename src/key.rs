//! Extracts the routing key from a command or pipeline.

use crate::command::{Command, Request, verb_is};
use bytes::Bytes;

/// Commands that have no single-key routing and are not fan-out commands.
const UNROUTABLE_VERBS: [&str; 4] = ["INFO", "CONFIG", "SHUTDOWN", "SLAVEOF"];

/// Returns the key that determines a request's routing slot, or `None` if
/// the request is unroutable (a cluster-wide admin command with no key, or an
/// empty pipeline).
///
/// Rules, applied in order:
/// 1. A pipeline whose first command is `MULTI` recurses on the remainder.
/// 2. A pipeline of two or more commands is assumed cross-slot-safe by the
///    caller; the first command's key is used for all of it.
/// 3. `INFO`/`CONFIG`/`SHUTDOWN`/`SLAVEOF` are unroutable.
/// 4. `EVAL`/`EVALSHA` take their key from argument index 3 (after the script
///    body and `numkeys`).
/// 5. Everything else takes its key from argument index 1.
pub fn key_of(req: &Request) -> Option<Bytes> {
    match req {
        Request::Pipeline(cmds) => key_of_pipeline(cmds),
        Request::Single(cmd) => key_of_command(cmd),
    }
}

fn key_of_pipeline(cmds: &[Command]) -> Option<Bytes> {
    match cmds.first() {
        Some(first) if verb_is(first, "MULTI") => key_of_pipeline(&cmds[1..]),
        Some(_) if cmds.len() >= 2 => key_of_command(&cmds[0]),
        Some(single) => key_of_command(single),
        None => None,
    }
}

fn key_of_command(cmd: &Command) -> Option<Bytes> {
    let verb = cmd.first()?;

    if UNROUTABLE_VERBS
        .iter()
        .any(|kw| verb.eq_ignore_ascii_case(kw.as_bytes()))
    {
        return None;
    }

    if verb.eq_ignore_ascii_case(b"EVAL") || verb.eq_ignore_ascii_case(b"EVALSHA") {
        return cmd.get(3).cloned();
    }

    cmd.get(1).cloned()
}
