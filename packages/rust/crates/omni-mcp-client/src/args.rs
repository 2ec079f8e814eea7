//! Shell-style tokenization of the `args` query parameter (POSIX quoting via
//! `shlex`). No variable expansion, globbing or operators.

use thiserror::Error;

/// Malformed argument string: an unterminated quote or a trailing backslash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unbalanced quoting or trailing escape in `{0}`")]
pub struct ArgsParseError(pub String);

/// Split an argument string into words.
///
/// ```
/// use omni_mcp_client::split_args;
/// assert_eq!(
///     split_args(r#"--name "My Name" --flag"#).unwrap(),
///     vec!["--name", "My Name", "--flag"],
/// );
/// ```
///
/// # Errors
/// [`ArgsParseError`] when the string cannot be split.
pub fn split_args(input: &str) -> Result<Vec<String>, ArgsParseError> {
    shlex::split(input).ok_or_else(|| ArgsParseError(input.to_string()))
}
