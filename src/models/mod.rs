//! Data models for the Tagged photo challenge application.

mod group;
mod ledger;
mod post;
mod user;

pub use group::*;
pub use ledger::*;
pub use post::*;
pub use user::*;
