//! Script execution, source fetching, and SSH remoting for FlowForge.
//!
//! - `script`: the Script Executor (§4.2), subprocess-based, with
//!   streamed stdout/stderr and the builtin recipe registry.
//! - `fetcher`: the Source Fetcher (§4.3), git clone-or-pull with
//!   ephemeral credential handling.
//! - `ssh`: SSH Remoting (§4.4), keypair generation, connectivity test,
//!   remote exec, SCP push.

pub mod fetcher;
pub mod script;
pub mod ssh;

pub use fetcher::GitSourceFetcher;
pub use script::LocalScriptExecutor;
