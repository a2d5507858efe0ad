//! Agent execution loop for MaShell.
//!
//! A model proposes actions; every proposal is validated against the
//! [`ActionRegistry`], routed through the [`PermissionPolicy`] and, when
//! needed, the [`InteractiveApprover`], then run by the [`ActionExecutor`].
//! [`Session`] drives the cycle and owns the conversation.

pub mod actions;
pub mod approval;
pub mod background;
pub mod config;
pub mod errors;
pub mod events;
pub mod execution;
pub mod executor;
pub mod permission;
pub mod prompt;
pub mod session;
pub mod truncation;
pub mod turn;

pub use actions::*;
pub use approval::*;
pub use background::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use execution::*;
pub use executor::*;
pub use permission::*;
pub use prompt::*;
pub use session::*;
pub use truncation::*;
pub use turn::*;
