//! Per-allele statistics over the accumulated poly stretch observations
//!
//! Reduces each `AlleleBucket` to one `AlleleMetrics` row: read support,
//! first-base quality, read fraction, repeat length distribution and purity.
use anyhow::Result;
use rustc_hash::FxHashMap;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::allele_counter::AlleleBucket;
use crate::error::PolyEdgeError;
use crate::region::PolyRegion;

/// Report column titles, in `AlleleMetrics` field order
pub const TABLE_HEADERS: [&str; 11] = [
    "Gene",
    "Chrom",
    "Position",
    "First base of poly repeat allele",
    "Read count",
    "Mean quality of first base",
    "Fraction of reads",
    "Mean poly length",
    "Standard deviation of poly length",
    "Mode of poly length",
    "Average purity of polyN repeat",
];

// ============================================================================
// Data Structures
// ============================================================================

/// Metrics for one first-base allele
#[derive(Debug, Clone, PartialEq)]
pub struct AlleleMetrics {
    pub chrom: String,
    pub pos: i64, // variant position (start + 1)
    pub allele: char,
    pub read_count: usize,
    pub mean_quality: u32, // truncated
    pub read_fraction: f64,
    pub mean_polylen: f64,
    pub stdev_polylen: f64,
    pub mode_polylen: usize,
    pub poly_purity: u32,
    /// Unrounded `sum(purity) / (sum(lengths) - read_count)`
    pub purity_ratio: f64,
}

/// Pass thresholds used when reviewing a metrics table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub read_count: usize,
    pub mean_quality: u32,
    pub read_fraction: f64,
    pub poly_purity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            read_count: 100,
            mean_quality: 20,
            read_fraction: 0.2,
            poly_purity: 0.95,
        }
    }
}

/// Which thresholded metrics an allele passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QcFlags {
    pub read_count: bool,
    pub mean_quality: bool,
    pub read_fraction: bool,
    pub poly_purity: bool,
}

impl QcFlags {
    pub fn all(&self) -> bool {
        self.read_count && self.mean_quality && self.read_fraction && self.poly_purity
    }
}

impl AlleleMetrics {
    pub fn qc(&self, thresholds: &Thresholds) -> QcFlags {
        QcFlags {
            read_count: self.read_count >= thresholds.read_count,
            mean_quality: self.mean_quality >= thresholds.mean_quality,
            read_fraction: self.read_fraction >= thresholds.read_fraction,
            poly_purity: self.poly_purity as f64 >= thresholds.poly_purity,
        }
    }
}

// ============================================================================
// Core Statistical Functions
// ============================================================================

/// Round to `decimals` places, exact halves to even
#[inline]
fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Most frequent value; ties go to the smallest value
pub fn mode(values: &[usize]) -> Option<usize> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    // BTreeMap iterates ascending, keep the first maximum
    counts
        .into_iter()
        .fold(None, |best: Option<(usize, usize)>, (value, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(value, _)| value)
}

/// Sample standard deviation; 0 for fewer than two observations
pub fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

/// Reduce one allele bucket; `total_count` is the read count over all alleles
pub fn allele_metrics(
    region: &PolyRegion,
    allele: u8,
    bucket: &AlleleBucket,
    total_count: usize,
) -> Result<AlleleMetrics> {
    let read_count = bucket.read_count();
    let allele = allele as char;
    if total_count == 0 || read_count == 0 {
        return Err(PolyEdgeError::NoSupportingReads {
            chrom: region.chrom.clone(),
            pos: region.variant_pos(),
        }
        .into());
    }

    let total_length: usize = bucket.lengths.iter().sum();
    let purity_bases = total_length - read_count;
    if purity_bases == 0 {
        return Err(PolyEdgeError::NoPurityBases { allele, read_count }.into());
    }
    let purity_ratio = bucket.purity.iter().sum::<usize>() as f64 / purity_bases as f64;

    let lengths: Vec<f64> = bucket.lengths.iter().map(|&l| l as f64).collect();
    let quals: Vec<f64> = bucket.quals.iter().map(|&q| q as f64).collect();

    Ok(AlleleMetrics {
        chrom: region.chrom.clone(),
        pos: region.variant_pos(),
        allele,
        read_count,
        mean_quality: quals.iter().mean() as u32,
        read_fraction: round_to(read_count as f64 / total_count as f64, 2),
        mean_polylen: round_to(lengths.iter().mean(), 2),
        stdev_polylen: round_to(sample_stdev(&lengths), 2),
        mode_polylen: mode(&bucket.lengths).unwrap_or(0),
        poly_purity: purity_ratio.round_ties_even() as u32,
        purity_ratio,
    })
}

/// Metrics for every allele, sorted by allele ascending
///
/// Fails when no allele has any reads, or when an allele has no bases after
/// the first repeat base to assess purity on.
pub fn calculate_metrics(
    region: &PolyRegion,
    buckets: &FxHashMap<u8, AlleleBucket>,
) -> Result<Vec<AlleleMetrics>> {
    let total_count: usize = buckets.values().map(AlleleBucket::read_count).sum();
    if total_count == 0 {
        return Err(PolyEdgeError::NoSupportingReads {
            chrom: region.chrom.clone(),
            pos: region.variant_pos(),
        }
        .into());
    }

    let mut alleles: Vec<u8> = buckets
        .iter()
        .filter(|(_, b)| b.read_count() > 0)
        .map(|(a, _)| *a)
        .collect();
    alleles.sort_unstable();

    alleles
        .into_iter()
        .map(|allele| allele_metrics(region, allele, &buckets[&allele], total_count))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
