use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// A subcommand of `fqsplit`.
#[enum_dispatch]
pub trait Command {
    /// Runs the subcommand to completion.
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self) -> Result<()>;
}
