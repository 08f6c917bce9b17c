use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::hash::HashService;
use crate::core::pixel::{self, PixelOptions};
use crate::services::fetch::ImageFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Exact content identity via SHA-256 digests; threshold is unused.
    Hash,
    /// Normalized pixel difference after resizing to a common shape.
    Pixel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareOptions {
    pub mode: CompareMode,
    /// Pixel mode: maximum allowed differing-pixel fraction for a match.
    /// 0.1 means up to 10% of sampled pixels may differ.
    pub threshold: f64,
    pub pixel: PixelOptions,
    /// In-flight comparison cap for batches. Kept small so decoded pixel
    /// buffers don't pile up.
    pub concurrency: usize,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            mode: CompareMode::Pixel,
            threshold: 0.1,
            pixel: PixelOptions::default(),
            concurrency: 2,
        }
    }
}

/// Outcome of comparing one pair of image references.
/// `is_match` is true iff the similarity passed the threshold and neither
/// image failed to fetch or decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub is_match: bool,
    /// 0.0 to 1.0; 1.0 means identical.
    pub similarity: f64,
    pub error: Option<String>,
}

impl ComparisonResult {
    fn matched(similarity: f64) -> Self {
        Self {
            is_match: true,
            similarity,
            error: None,
        }
    }

    fn unmatched(similarity: f64) -> Self {
        Self {
            is_match: false,
            similarity,
            error: None,
        }
    }

    fn errored(message: String) -> Self {
        Self {
            is_match: false,
            similarity: 0.0,
            error: Some(message),
        }
    }
}

/// A unit of work for `batch_compare`, keyed by a caller-supplied id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparePair {
    pub id: String,
    pub ref_a: String,
    pub ref_b: String,
}

/// Stateless pairwise image comparator. Failures to fetch or decode are
/// absorbed into the result as a non-match; a single broken image never
/// aborts a batch.
#[derive(Clone)]
pub struct ComparatorService {
    fetcher: Arc<ImageFetcher>,
    hash_service: HashService,
}

impl ComparatorService {
    pub fn new(fetcher: Arc<ImageFetcher>) -> Self {
        Self {
            fetcher,
            hash_service: HashService::new(),
        }
    }

    pub async fn compare(
        &self,
        ref_a: &str,
        ref_b: &str,
        options: &CompareOptions,
    ) -> ComparisonResult {
        let bytes_a = match self.fetcher.fetch(ref_a).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to fetch {}: {}", ref_a, e);
                return ComparisonResult::errored(format!("failed to fetch {}: {}", ref_a, e));
            }
        };
        let bytes_b = match self.fetcher.fetch(ref_b).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to fetch {}: {}", ref_b, e);
                return ComparisonResult::errored(format!("failed to fetch {}: {}", ref_b, e));
            }
        };

        match options.mode {
            CompareMode::Hash => {
                let digest_a = self.hash_service.digest(&bytes_a);
                let digest_b = self.hash_service.digest(&bytes_b);
                if digest_a == digest_b {
                    ComparisonResult::matched(1.0)
                } else {
                    ComparisonResult::unmatched(0.0)
                }
            }
            CompareMode::Pixel => {
                let image_a = match image::load_from_memory(&bytes_a) {
                    Ok(image) => image,
                    Err(e) => {
                        log::warn!("Failed to decode {}: {}", ref_a, e);
                        return ComparisonResult::errored(format!(
                            "failed to decode {}: {}",
                            ref_a, e
                        ));
                    }
                };
                let image_b = match image::load_from_memory(&bytes_b) {
                    Ok(image) => image,
                    Err(e) => {
                        log::warn!("Failed to decode {}: {}", ref_b, e);
                        return ComparisonResult::errored(format!(
                            "failed to decode {}: {}",
                            ref_b, e
                        ));
                    }
                };

                let diff = pixel::diff_fraction(&image_a, &image_b, &options.pixel);
                let similarity = 1.0 - diff;
                if diff <= options.threshold {
                    ComparisonResult::matched(similarity)
                } else {
                    ComparisonResult::unmatched(similarity)
                }
            }
        }
    }

    /// Compare many pairs with bounded concurrency. Results are keyed by
    /// each pair's caller-supplied id; ordering is immaterial. Returns only
    /// once every comparison has completed.
    pub async fn batch_compare(
        &self,
        pairs: Vec<ComparePair>,
        options: &CompareOptions,
    ) -> HashMap<String, ComparisonResult> {
        let total = pairs.len();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut joinset = JoinSet::new();

        for pair in pairs {
            let semaphore = semaphore.clone();
            let comparator = self.clone();
            let options = options.clone();
            joinset.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore");
                let result = comparator
                    .compare(&pair.ref_a, &pair.ref_b, &options)
                    .await;
                (pair.id, result)
            });
        }

        let mut results = HashMap::with_capacity(total);
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok((id, result)) => {
                    results.insert(id, result);
                }
                Err(e) => log::warn!("Comparison task failed: {}", e),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn save_test_image(
        dir: &Path,
        name: &str,
        width: u32,
        height: u32,
        pixel_fn: impl Fn(u32, u32) -> [u8; 3],
    ) -> PathBuf {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let [r, g, b] = pixel_fn(x, y);
                img.put_pixel(x, y, image::Rgb([r, g, b]));
            }
        }
        let path = dir.join(name);
        DynamicImage::ImageRgb8(img).save(&path).unwrap();
        path
    }

    fn comparator() -> ComparatorService {
        ComparatorService::new(Arc::new(ImageFetcher::new()))
    }

    #[tokio::test]
    async fn test_hash_mode_identical_files_match() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 16, 16, |_, _| [10, 20, 30]);
        let b = save_test_image(temp_dir.path(), "b.png", 16, 16, |_, _| [10, 20, 30]);

        let options = CompareOptions {
            mode: CompareMode::Hash,
            ..CompareOptions::default()
        };
        let result = comparator()
            .compare(&a.to_string_lossy(), &b.to_string_lossy(), &options)
            .await;

        assert!(result.is_match);
        assert_eq!(result.similarity, 1.0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_hash_mode_different_files_do_not_match() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 16, 16, |_, _| [10, 20, 30]);
        let b = save_test_image(temp_dir.path(), "b.png", 16, 16, |_, _| [200, 20, 30]);

        let options = CompareOptions {
            mode: CompareMode::Hash,
            ..CompareOptions::default()
        };
        let result = comparator()
            .compare(&a.to_string_lossy(), &b.to_string_lossy(), &options)
            .await;

        assert!(!result.is_match);
        assert_eq!(result.similarity, 0.0);
    }

    #[tokio::test]
    async fn test_pixel_mode_near_duplicate_matches() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 64, 64, |_, _| [50, 50, 50]);
        // ~3% of pixels strongly changed: two of 64 rows
        let b = save_test_image(temp_dir.path(), "b.png", 64, 64, |_, y| {
            if y < 2 {
                [250, 250, 250]
            } else {
                [50, 50, 50]
            }
        });

        let options = CompareOptions::default(); // pixel mode, threshold 0.1
        let result = comparator()
            .compare(&a.to_string_lossy(), &b.to_string_lossy(), &options)
            .await;

        assert!(result.is_match);
        assert!(result.similarity > 0.95, "got {}", result.similarity);
    }

    #[tokio::test]
    async fn test_pixel_mode_strict_threshold_rejects() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 64, 64, |_, _| [50, 50, 50]);
        let b = save_test_image(temp_dir.path(), "b.png", 64, 64, |_, y| {
            if y < 2 {
                [250, 250, 250]
            } else {
                [50, 50, 50]
            }
        });

        let options = CompareOptions {
            threshold: 0.01,
            ..CompareOptions::default()
        };
        let result = comparator()
            .compare(&a.to_string_lossy(), &b.to_string_lossy(), &options)
            .await;

        assert!(!result.is_match);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_missing_image_is_absorbed_as_non_match() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 16, 16, |_, _| [10, 20, 30]);

        let result = comparator()
            .compare(
                &a.to_string_lossy(),
                "/nonexistent/missing.png",
                &CompareOptions::default(),
            )
            .await;

        assert!(!result.is_match);
        assert_eq!(result.similarity, 0.0);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_undecodable_image_is_absorbed_as_non_match() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 16, 16, |_, _| [10, 20, 30]);
        let broken = temp_dir.path().join("broken.png");
        std::fs::write(&broken, b"this is not a png").unwrap();

        let result = comparator()
            .compare(
                &a.to_string_lossy(),
                &broken.to_string_lossy(),
                &CompareOptions::default(),
            )
            .await;

        assert!(!result.is_match);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_batch_compare_returns_every_pair() {
        let temp_dir = TempDir::new().unwrap();
        let a = save_test_image(temp_dir.path(), "a.png", 16, 16, |_, _| [10, 20, 30]);
        let b = save_test_image(temp_dir.path(), "b.png", 16, 16, |_, _| [10, 20, 30]);
        let c = save_test_image(temp_dir.path(), "c.png", 16, 16, |_, _| [200, 200, 200]);

        let pairs = vec![
            ComparePair {
                id: "ab".to_string(),
                ref_a: a.to_string_lossy().to_string(),
                ref_b: b.to_string_lossy().to_string(),
            },
            ComparePair {
                id: "ac".to_string(),
                ref_a: a.to_string_lossy().to_string(),
                ref_b: c.to_string_lossy().to_string(),
            },
            ComparePair {
                id: "broken".to_string(),
                ref_a: a.to_string_lossy().to_string(),
                ref_b: "/nonexistent/missing.png".to_string(),
            },
        ];

        let results = comparator()
            .batch_compare(pairs, &CompareOptions::default())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results["ab"].is_match);
        assert!(!results["ac"].is_match);
        assert!(results["broken"].error.is_some());
    }
}
