//! Duplicate candidate grouping for image-backed catalogue records.
//!
//! Given records carrying a title and a primary image reference, the
//! scanner partitions them into duplicate groups: exact reference matches
//! first, then exact content digests or perceptual pixel similarity within
//! each title bucket. Resolution strategies turn a group into a
//! keep/delete decision; issuing the actual deletions is the caller's
//! responsibility. Fetching image bytes is the crate's only I/O.

pub mod core;
pub mod services;

pub use crate::core::group::{DuplicateGroup, GroupKind};
pub use crate::core::pixel::PixelOptions;
pub use crate::core::record::{Record, RecordStatus};
pub use crate::core::resolve::{
    resolve, Resolution, ResolveError, ResolveStrategy, StatusPriority,
};
pub use crate::services::comparator::{
    CompareMode, CompareOptions, ComparePair, ComparatorService, ComparisonResult,
};
pub use crate::services::fetch::{FetchError, ImageFetcher};
pub use crate::services::scanner::{
    DuplicateScanner, ScanError, ScanPhase, ScanProgress, ScanReport,
};
