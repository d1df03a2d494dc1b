//! Clients for the external collaborators: push notifications, image-safety
//! classification, and the blob store. All are spoken to over HTTP and
//! treated as opaque; none of them is on any transactional path.

mod blobs;
mod push;
mod vision;

pub use blobs::*;
pub use push::*;
pub use vision::*;

use std::time::Duration;

/// Per-request budget for every collaborator call.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
