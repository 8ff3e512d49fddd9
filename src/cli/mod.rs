//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Tracing setup
//! - Parsing of rule and task arguments

pub mod exit_codes;
pub mod logging;

pub use exit_codes::{exit_code_description, exit_code_for, exit_code_table, ExitCodes};
pub use logging::{init_logging, Verbosity};

use crate::core::automation::{AutoResponseRule, MatchKind, ScheduledTask};
use crate::core::codec::{parse_input, CodecError, InputFormat};
use std::time::Duration;

/// Parse `PATTERN=RESPONSE` into a rule named `rule-<index>`.
///
/// Both sides go through `parse_input` with `format`. A pattern prefixed with
/// `^` matches at the start, `$` at the end, `~` as a regex, `=` exactly;
/// otherwise it matches anywhere in the chunk.
pub fn parse_rule_arg(arg: &str, index: usize, format: InputFormat) -> Result<AutoResponseRule, CodecError> {
    let (kind, body) = match arg.chars().next() {
        Some('^') => (MatchKind::StartsWith, &arg[1..]),
        Some('$') => (MatchKind::EndsWith, &arg[1..]),
        Some('~') => (MatchKind::Regex, &arg[1..]),
        Some('=') => (MatchKind::Exact, &arg[1..]),
        _ => (MatchKind::Contains, arg),
    };

    let (pattern, response) = body
        .split_once('=')
        .ok_or_else(|| CodecError::InvalidFormat(format!("expected PATTERN=RESPONSE, got '{arg}'")))?;

    let pattern = if kind == MatchKind::Regex {
        pattern.as_bytes().to_vec()
    } else {
        parse_input(pattern, format)?
    };

    Ok(AutoResponseRule::new(
        &format!("rule-{index}"),
        &pattern,
        kind,
        &parse_input(response, format)?,
    ))
}

/// Parse `MS:PAYLOAD[:REPEAT]` into a task named `task-<index>`
pub fn parse_task_arg(arg: &str, index: usize, format: InputFormat) -> Result<ScheduledTask, CodecError> {
    let invalid = || CodecError::InvalidFormat(format!("expected MS:PAYLOAD[:REPEAT], got '{arg}'"));

    let (interval, rest) = arg.split_once(':').ok_or_else(invalid)?;
    let interval: u64 = interval.trim().parse().map_err(|_| invalid())?;

    let (payload, repeat) = match rest.rsplit_once(':') {
        Some((payload, repeat)) if repeat.trim().parse::<i32>().is_ok() => {
            (payload, repeat.trim().parse::<i32>().map_err(|_| invalid())?)
        }
        _ => (rest, -1),
    };

    Ok(
        ScheduledTask::new(&format!("task-{index}"), &parse_input(payload, format)?, Duration::from_millis(interval))
            .repeat(repeat),
    )
}
