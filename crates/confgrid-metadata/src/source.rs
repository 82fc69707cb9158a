//! The metadata source seam.

use std::future::Future;
use std::pin::Pin;

use confgrid_core::{ConfigVersion, ProjectSet};

use crate::error::MetadataResult;

/// Boxed future returned by [`MetadataSource`] methods.
pub type MetadataFuture<'a, T> = Pin<Box<dyn Future<Output = MetadataResult<T>> + Send + 'a>>;

/// Read/increment access to the version counter and project metadata.
///
/// Injected into the coordinator and the control surface for testability.
pub trait MetadataSource: Send + Sync {
    /// Read the current configuration version.
    fn current_version(&self) -> MetadataFuture<'_, ConfigVersion>;

    /// Atomically increment the version counter and return the new value.
    fn increment_version(&self) -> MetadataFuture<'_, ConfigVersion>;

    /// Fetch and parse a fresh snapshot of all project metadata.
    fn fetch_projects(&self) -> MetadataFuture<'_, ProjectSet>;
}
