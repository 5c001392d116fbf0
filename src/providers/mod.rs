//! Pluggable external collaborators (spec §9 "Factory / singleton
//! providers"): background removal and background synthesis. A concrete
//! variant is selected once at process startup from
//! [`crate::config::ProvidersConfig`] and wired into the processor as
//! `Arc<dyn Trait>`.

pub mod http;
pub mod mock;
pub mod traits;

pub use http::{HttpBackgroundProvider, HttpSegmentationProvider};
pub use mock::{MockBackgroundProvider, MockSegmentationProvider};
pub use traits::{BackgroundProvider, ProviderError, Result, SegmentationOutput, SegmentationProvider};
