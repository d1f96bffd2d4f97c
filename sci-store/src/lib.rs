//! Read-only access to SCI game resource archives
//!
//! A game ships as a handful of container files: index ("map") files,
//! packed data volumes, audio volumes, and loose per-resource patch
//! files that override the archived copies. [`ResourceManager`] opens
//! a game directory, detects the on-disk format generation, builds a
//! unified index across every container, and serves resource bytes on
//! demand through a bounded in-memory cache.
//!
//! ```no_run
//! use sci_store::{ResourceKind, ResourceId, ResourceManager};
//!
//! # fn main() -> sci_store::Result<()> {
//! let mut store = ResourceManager::open("/games/kq6")?;
//! if let Some(pic) = store.find_resource(ResourceId::new(ResourceKind::Pic, 300), false) {
//!     println!("pic 300: {} bytes", pic.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod resource;
pub mod types;
pub mod version;

mod cache;
mod detection;
mod manager;
mod source;

pub use error::{Result, StoreError};
pub use manager::ResourceManager;
pub use resource::{Resource, Status};
pub use types::{Location, ResourceId, ResourceKind, StoreConfig};
pub use version::{MapVersion, SciVersion, VolumeVersion};
