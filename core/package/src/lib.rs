//! Add-on package acquisition for settingsync.
//!
//! Downloads packaged add-ons from the marketplace and unpacks them into
//! the editor's extensions directory.

pub mod fetch;
pub mod source;
pub mod unpack;

pub use fetch::{FetchOptions, MarketplaceFetcher, DEFAULT_CANDIDATES};
pub use source::{install_dir_name, PackageSource};
pub use unpack::unpack_artifact;
