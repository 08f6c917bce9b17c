use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::core::group::{DisjointSet, DuplicateGroup, GroupKind};
use crate::core::hash::HashService;
use crate::core::record::{normalize_image_ref, normalize_title, Record};
use crate::services::comparator::{CompareMode, CompareOptions, ComparePair, ComparatorService};
use crate::services::fetch::ImageFetcher;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub buckets_processed: usize,
    pub total_buckets: usize,
    pub current_bucket: String,
    pub phase: ScanPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Bucketing,
    ExactMatching,
    Comparing,
    Grouping,
    Complete,
}

/// Outcome of a scan: the emitted groups plus the skip/error counters the
/// caller is expected to surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub groups: Vec<DuplicateGroup>,
    /// Records excluded up front for having no image reference.
    pub records_skipped: usize,
    /// Pairwise comparisons (pixel mode) or reference digests (hash mode)
    /// attempted.
    pub comparisons: usize,
    /// Comparisons or digests whose image failed to fetch or decode;
    /// each was scored as a non-match and the scan continued.
    pub errors: usize,
}

/// One distinct image reference within a title bucket, carrying every
/// record that points at it. Pairwise comparison runs over these, not over
/// records, so cost is O(distinct images squared) per bucket.
struct RefBucket<'a> {
    normalized: String,
    raw: String,
    records: Vec<&'a Record>,
}

/// Partitions records into duplicate groups: exact reference bucketing
/// first, then content digests (hash mode) or bounded-concurrency pairwise
/// pixel comparison (pixel mode) within each title bucket. Perceptual
/// matches are merged into connected components, so chains of matches land
/// in a single group.
pub struct DuplicateScanner {
    comparator: ComparatorService,
    hash_service: HashService,
    fetcher: Arc<ImageFetcher>,
    options: CompareOptions,
    progress_sender: Option<mpsc::UnboundedSender<ScanProgress>>,
    cancellation_token: Arc<AtomicBool>,
}

impl DuplicateScanner {
    pub fn new(options: CompareOptions) -> Self {
        Self::with_fetcher(options, Arc::new(ImageFetcher::new()))
    }

    pub fn with_fetcher(options: CompareOptions, fetcher: Arc<ImageFetcher>) -> Self {
        Self {
            comparator: ComparatorService::new(fetcher.clone()),
            hash_service: HashService::new(),
            fetcher,
            options,
            progress_sender: None,
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress_sender(mut self, sender: mpsc::UnboundedSender<ScanProgress>) -> Self {
        self.progress_sender = Some(sender);
        self
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Partition `records` into duplicate groups. Zero records is not an
    /// error; the report simply carries no groups. Per-image failures are
    /// absorbed and counted, never fatal.
    pub async fn scan(&self, records: &[Record]) -> Result<ScanReport, ScanError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }

        let mut report = ScanReport::default();

        self.send_progress(ScanProgress {
            buckets_processed: 0,
            total_buckets: 0,
            current_bucket: String::new(),
            phase: ScanPhase::Bucketing,
        });

        // Bucket by normalized title, preserving input order within and
        // across buckets. Records without an image cannot be duplicates
        // by image and are dropped here.
        let mut buckets: Vec<(String, Vec<&Record>)> = Vec::new();
        let mut index_by_title: HashMap<String, usize> = HashMap::new();
        for record in records {
            let has_image = matches!(&record.image_ref, Some(r) if !r.trim().is_empty());
            if !has_image {
                report.records_skipped += 1;
                log::debug!("Skipping record {} with no image reference", record.id);
                continue;
            }

            let title = normalize_title(&record.title);
            match index_by_title.get(&title) {
                Some(&index) => buckets[index].1.push(record),
                None => {
                    index_by_title.insert(title.clone(), buckets.len());
                    buckets.push((title, vec![record]));
                }
            }
        }

        // Singleton title buckets are skipped outright; cross-title
        // matching is out of scope.
        let multi_buckets: Vec<(String, Vec<&Record>)> = buckets
            .into_iter()
            .filter(|(_, bucket)| bucket.len() >= 2)
            .collect();

        let total_buckets = multi_buckets.len();
        for (processed, (title, bucket)) in multi_buckets.into_iter().enumerate() {
            if self.cancellation_token.load(Ordering::Relaxed) {
                return Err(ScanError::Cancelled);
            }
            self.process_bucket(&title, bucket, processed, total_buckets, &mut report)
                .await?;
        }

        self.send_progress(ScanProgress {
            buckets_processed: total_buckets,
            total_buckets,
            current_bucket: String::new(),
            phase: ScanPhase::Complete,
        });

        Ok(report)
    }

    async fn process_bucket(
        &self,
        title: &str,
        bucket: Vec<&Record>,
        processed: usize,
        total_buckets: usize,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        self.send_progress(ScanProgress {
            buckets_processed: processed,
            total_buckets,
            current_bucket: title.to_string(),
            phase: ScanPhase::ExactMatching,
        });

        // Sub-bucket by normalized image reference, in input order.
        let mut ref_buckets: Vec<RefBucket> = Vec::new();
        let mut index_by_ref: HashMap<String, usize> = HashMap::new();
        for record in bucket {
            let raw = match &record.image_ref {
                Some(reference) => reference.clone(),
                None => continue,
            };
            let normalized = normalize_image_ref(&raw);
            match index_by_ref.get(&normalized) {
                Some(&index) => ref_buckets[index].records.push(record),
                None => {
                    index_by_ref.insert(normalized.clone(), ref_buckets.len());
                    ref_buckets.push(RefBucket {
                        normalized,
                        raw,
                        records: vec![record],
                    });
                }
            }
        }

        // References shared by two or more records are grouped immediately
        // and consumed, so no record can land in a second group later.
        let mut remaining: Vec<RefBucket> = Vec::new();
        for ref_bucket in ref_buckets {
            if ref_bucket.records.len() >= 2 {
                let members: Vec<Record> =
                    ref_bucket.records.iter().map(|r| (*r).clone()).collect();
                let match_basis = format!(
                    "{} records share image reference {}",
                    members.len(),
                    ref_bucket.normalized
                );
                report
                    .groups
                    .push(DuplicateGroup::new(GroupKind::ExactUrl, match_basis, 1.0, members));
            } else {
                remaining.push(ref_bucket);
            }
        }

        if remaining.len() < 2 {
            return Ok(());
        }

        if self.cancellation_token.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }

        self.send_progress(ScanProgress {
            buckets_processed: processed,
            total_buckets,
            current_bucket: title.to_string(),
            phase: ScanPhase::Comparing,
        });

        match self.options.mode {
            CompareMode::Hash => self.group_by_digest(title, &remaining, report).await,
            CompareMode::Pixel => {
                self.group_by_pixel_similarity(title, &remaining, processed, total_buckets, report)
                    .await
            }
        }
    }

    /// Hash mode: fetch each distinct reference once, digest in parallel,
    /// and bucket by digest. Digest equality is transitive, so this yields
    /// the same partition as pairwise comparison at a fraction of the cost.
    async fn group_by_digest(
        &self,
        title: &str,
        remaining: &[RefBucket<'_>],
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut joinset = JoinSet::new();
        for (index, ref_bucket) in remaining.iter().enumerate() {
            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            let reference = ref_bucket.raw.clone();
            joinset.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore");
                (index, fetcher.fetch(&reference).await)
            });
        }

        report.comparisons += remaining.len();

        let mut fetched: Vec<Option<Vec<u8>>> = vec![None; remaining.len()];
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok((index, Ok(bytes))) => fetched[index] = Some(bytes),
                Ok((index, Err(e))) => {
                    report.errors += 1;
                    log::warn!("Failed to fetch {}: {}", remaining[index].raw, e);
                }
                Err(e) => {
                    report.errors += 1;
                    log::warn!("Fetch task failed: {}", e);
                }
            }
        }

        let items: Vec<(String, Vec<u8>)> = remaining
            .iter()
            .zip(fetched.into_iter())
            .filter_map(|(ref_bucket, bytes)| bytes.map(|b| (ref_bucket.normalized.clone(), b)))
            .collect();
        let digests: HashMap<String, String> =
            self.hash_service.digest_batch(&items).into_iter().collect();

        let mut digest_order: Vec<String> = Vec::new();
        let mut by_digest: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, ref_bucket) in remaining.iter().enumerate() {
            if let Some(digest) = digests.get(&ref_bucket.normalized) {
                if !by_digest.contains_key(digest) {
                    digest_order.push(digest.clone());
                }
                by_digest.entry(digest.clone()).or_default().push(index);
            }
        }

        for digest in digest_order {
            let indices = &by_digest[&digest];
            let members: Vec<Record> = indices
                .iter()
                .flat_map(|&index| remaining[index].records.iter().map(|r| (*r).clone()))
                .collect();
            if members.len() < 2 {
                continue;
            }
            let match_basis = format!(
                "{} records share content digest {} under title '{}'",
                members.len(),
                &digest[..12],
                title
            );
            report
                .groups
                .push(DuplicateGroup::new(GroupKind::ExactHash, match_basis, 1.0, members));
        }

        Ok(())
    }

    /// Pixel mode: pairwise comparison over the bucket's distinct
    /// references, then connected components over the matching pairs. The
    /// batch call is the bucket's barrier: grouping only starts once every
    /// comparison has finished.
    async fn group_by_pixel_similarity(
        &self,
        title: &str,
        remaining: &[RefBucket<'_>],
        processed: usize,
        total_buckets: usize,
        report: &mut ScanReport,
    ) -> Result<(), ScanError> {
        let mut pairs = Vec::new();
        for i in 0..remaining.len() {
            for j in (i + 1)..remaining.len() {
                pairs.push(ComparePair {
                    id: format!("{}-{}", i, j),
                    ref_a: remaining[i].raw.clone(),
                    ref_b: remaining[j].raw.clone(),
                });
            }
        }

        let results = self.comparator.batch_compare(pairs, &self.options).await;
        report.comparisons += results.len();

        self.send_progress(ScanProgress {
            buckets_processed: processed,
            total_buckets,
            current_bucket: title.to_string(),
            phase: ScanPhase::Grouping,
        });

        let mut disjoint = DisjointSet::new(remaining.len());
        let mut matched_edges: Vec<(usize, usize, f64)> = Vec::new();
        for (pair_id, result) in &results {
            if result.error.is_some() {
                report.errors += 1;
            }
            if !result.is_match {
                continue;
            }
            if let Some((i, j)) = parse_pair_id(pair_id) {
                matched_edges.push((i, j, result.similarity));
                disjoint.union(i, j);
            }
        }

        // Representative score for each component is its weakest matched
        // link.
        let mut component_min: HashMap<usize, f64> = HashMap::new();
        for &(i, _, similarity) in &matched_edges {
            let root = disjoint.find(i);
            let entry = component_min.entry(root).or_insert(similarity);
            if similarity < *entry {
                *entry = similarity;
            }
        }

        for component in disjoint.components() {
            let root = disjoint.find(component[0]);
            let similarity = match component_min.get(&root) {
                Some(&similarity) => similarity,
                None => continue,
            };

            let members: Vec<Record> = component
                .iter()
                .flat_map(|&index| remaining[index].records.iter().map(|r| (*r).clone()))
                .collect();
            if members.len() < 2 {
                continue;
            }

            let match_basis = format!(
                "{} visually similar images under title '{}'",
                component.len(),
                title
            );
            report.groups.push(DuplicateGroup::new(
                GroupKind::Perceptual,
                match_basis,
                similarity,
                members,
            ));
        }

        Ok(())
    }

    fn send_progress(&self, progress: ScanProgress) {
        if let Some(sender) = &self.progress_sender {
            let _ = sender.send(progress);
        }
    }
}

fn parse_pair_id(pair_id: &str) -> Option<(usize, usize)> {
    let (left, right) = pair_id.split_once('-')?;
    Some((left.parse().ok()?, right.parse().ok()?))
}
