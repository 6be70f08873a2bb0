//! Per-allele accumulation of poly stretch observations
//!
//! For every read that spans the anchored window, the window boundaries are
//! mapped to query offsets, the repeat is cut out between the anchors and the
//! read is filed under the repeat's first base.

use rayon::prelude::*;
use rust_htslib::bam;
use rustc_hash::FxHashMap;

use crate::cigar_utils::{query_pos_at_reference, record_aligned_pairs};
use crate::region::PolyRegion;
use crate::seq_decode::decode_seq_range;

/// Per-read values collected for one allele
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlleleBucket {
    /// Repeat length of each supporting read
    pub lengths: Vec<usize>,
    /// Base quality of the first repeat base
    pub quals: Vec<u8>,
    /// Count of the most frequent base among the repeat bases after the first
    pub purity: Vec<usize>,
}

impl AlleleBucket {
    pub fn push(&mut self, obs: &RepeatObservation) {
        self.lengths.push(obs.length);
        self.quals.push(obs.first_base_qual);
        self.purity.push(obs.purity);
    }

    pub fn read_count(&self) -> usize {
        self.lengths.len()
    }

    fn extend(&mut self, other: AlleleBucket) {
        self.lengths.extend(other.lengths);
        self.quals.extend(other.quals);
        self.purity.extend(other.purity);
    }
}

/// What a single anchored read contributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatObservation {
    pub allele: u8,
    pub length: usize,
    pub first_base_qual: u8,
    pub purity: usize,
}

/// Why a read did not contribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Alignment does not contain the window plus margin
    NotSpanning,
    /// A window boundary is not aligned to a read base
    NotAnchored,
    /// Nothing left between the anchors
    EmptyRepeat,
}

/// Counts of processed reads by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountStats {
    pub records_seen: usize,
    pub counted: usize,
    pub not_spanning: usize,
    pub not_anchored: usize,
    pub empty_repeat: usize,
}

impl CountStats {
    pub fn merge(self, other: Self) -> Self {
        Self {
            records_seen: self.records_seen + other.records_seen,
            counted: self.counted + other.counted,
            not_spanning: self.not_spanning + other.not_spanning,
            not_anchored: self.not_anchored + other.not_anchored,
            empty_repeat: self.empty_repeat + other.empty_repeat,
        }
    }
}

/// Repeat bases between two anchors of `anchor` bases
///
/// `None` when the segment is too short to hold both anchors and at least one
/// repeat base.
#[inline]
pub fn extract_repeat(segment: &[u8], anchor: usize) -> Option<&[u8]> {
    match anchor.checked_mul(2) {
        Some(both) if segment.len() > both => Some(&segment[anchor..segment.len() - anchor]),
        _ => None,
    }
}

/// Occurrences of the most common base, 0 for an empty slice
pub fn dominant_base_count(bases: &[u8]) -> usize {
    let mut counts = [0usize; 256];
    for &b in bases {
        counts[b as usize] += 1;
    }
    counts.iter().copied().max().unwrap_or(0)
}

/// Extract the repeat observation of one read, or the reason it is skipped
pub fn observe_read(
    read: &bam::Record,
    region: &PolyRegion,
) -> Result<RepeatObservation, SkipReason> {
    if !region.spans(read) {
        return Err(SkipReason::NotSpanning);
    }

    let pairs = record_aligned_pairs(read);
    let seq_start = query_pos_at_reference(&pairs, region.roi_start());
    let seq_end = query_pos_at_reference(&pairs, region.roi_end());
    let (seq_start, seq_end) = match (seq_start, seq_end) {
        (Some(s), Some(e)) if s <= e => (s, e),
        _ => return Err(SkipReason::NotAnchored),
    };

    // Assumes no indel inside the anchors
    let anchor = region.anchor();
    let segment = decode_seq_range(read, seq_start, seq_end);
    let repeat = extract_repeat(&segment, anchor).ok_or(SkipReason::EmptyRepeat)?;

    let first_base_qual = read
        .qual()
        .get(seq_start + anchor)
        .copied()
        .ok_or(SkipReason::EmptyRepeat)?;

    Ok(RepeatObservation {
        allele: repeat[0],
        length: repeat.len(),
        first_base_qual,
        purity: dominant_base_count(&repeat[1..]),
    })
}

/// Buckets keyed by allele, created on first observation
#[derive(Debug, Clone)]
pub struct AlleleCounter {
    region: PolyRegion,
    buckets: FxHashMap<u8, AlleleBucket>,
    stats: CountStats,
}

impl AlleleCounter {
    pub fn new(region: PolyRegion) -> Self {
        Self {
            region,
            buckets: FxHashMap::default(),
            stats: CountStats::default(),
        }
    }

    pub fn region(&self) -> &PolyRegion {
        &self.region
    }

    pub fn buckets(&self) -> &FxHashMap<u8, AlleleBucket> {
        &self.buckets
    }

    pub fn stats(&self) -> CountStats {
        self.stats
    }

    /// Total supporting reads across all alleles
    pub fn total_reads(&self) -> usize {
        self.buckets.values().map(AlleleBucket::read_count).sum()
    }

    pub fn add(&mut self, obs: &RepeatObservation) {
        self.buckets.entry(obs.allele).or_default().push(obs);
    }

    /// Process one read; returns true if it was counted
    pub fn process(&mut self, read: &bam::Record) -> bool {
        self.stats.records_seen += 1;
        match observe_read(read, &self.region) {
            Ok(obs) => {
                self.add(&obs);
                self.stats.counted += 1;
                true
            }
            Err(SkipReason::NotSpanning) => {
                self.stats.not_spanning += 1;
                false
            }
            Err(SkipReason::NotAnchored) => {
                self.stats.not_anchored += 1;
                false
            }
            Err(SkipReason::EmptyRepeat) => {
                self.stats.empty_repeat += 1;
                false
            }
        }
    }

    /// Append another counter's buckets; order of merging does not matter
    pub fn merge(mut self, other: Self) -> Self {
        for (allele, bucket) in other.buckets {
            self.buckets.entry(allele).or_default().extend(bucket);
        }
        self.stats = self.stats.merge(other.stats);
        self
    }

    /// Shard a batch of reads over the rayon pool and merge the partial counters
    pub fn count_parallel(region: &PolyRegion, reads: &[bam::Record]) -> Self {
        reads
            .par_iter()
            .fold(
                || AlleleCounter::new(region.clone()),
                |mut counter, read| {
                    counter.process(read);
                    counter
                },
            )
            .reduce(|| AlleleCounter::new(region.clone()), AlleleCounter::merge)
    }

    pub fn into_buckets(self) -> FxHashMap<u8, AlleleBucket> {
        self.buckets
    }
}

// ============================================================================
// Tests
// ============================================================================
