// Sandbox-side services: everything the gateway does inside a sandbox
pub mod executor;
pub mod files;
pub mod git_diff;
pub mod lifecycle;
pub mod owner_token;
pub mod platform;

pub use executor::{CommandExecutor, CommandResult};
pub use files::{FileEntry, FileOpError, FileOperationsService};
pub use git_diff::{DiffError, DiffOutcome, GitDiffCollector};
pub use lifecycle::{LifecycleError, SandboxLifecycle};
pub use owner_token::OwnerTokenAuthority;
pub use platform::{PlatformError, SandboxHandle, SandboxPlatform};
