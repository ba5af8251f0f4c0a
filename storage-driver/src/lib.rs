//! The contract between the registry and an object storage backend.
//!
//! A [`Driver`] stores opaque byte objects addressed by bucket and path, and
//! reports failures as a [`StorageError`] categorized by [`StorageErrorKind`].

mod driver;
mod error;

pub use driver::checked_range;
pub use driver::offset_mismatch;
pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
