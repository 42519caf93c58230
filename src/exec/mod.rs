/*!
 * Command Execution
 * Every integration with external tools goes through `CommandRunner`
 */

pub mod runner;
pub mod scripted;

pub use runner::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use scripted::ScriptedRunner;
