//! polyedge - variant evidence at the edge of variable-length poly stretches
//!
//! Two single-pass BAM pipelines built on CIGAR-aware coordinate mapping:
//! - allele metrics: partition reads anchored across a poly stretch by the
//!   repeat's first base and summarise support per allele
//! - read chopping: truncate reads crossing a boundary inside the stretch,
//!   keeping sequence, qualities and CIGAR consistent

use anyhow::{Context, Result};
use log::info;
use rust_htslib::{bam, bam::Read as BamRead};
use std::time::Instant;

// Modules
pub mod allele_counter;
pub mod analysis;
pub mod bam_trimmer; // Chop reads at a cut boundary (BAM stream in, BAM stream out)
pub mod cigar_utils; // Shared CIGAR-aware position mapping utilities
pub mod error;
pub mod region;
mod seq_decode;

pub use allele_counter::{AlleleBucket, AlleleCounter, CountStats, RepeatObservation};
pub use analysis::{calculate_metrics, AlleleMetrics, QcFlags, Thresholds, TABLE_HEADERS};
pub use bam_trimmer::{chop_bam, trim_record, ChopConfig, ChopStats, CutRegion, TrimOutcome};
pub use cigar_utils::{aligned_pairs, AlignedPair};
pub use error::PolyEdgeError;
pub use region::{PolyRegion, DEFAULT_ANCHOR_LENGTH};

// ============================================================================
// Allele Metrics Pipeline
// ============================================================================

/// Configuration for one metrics run
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub region: PolyRegion,
    /// Explicit index path; by default the index next to the BAM is used
    pub index_path: Option<String>,
    /// Rayon threads for aggregation (1 = stream record by record)
    pub threads: usize,
}

impl MetricsConfig {
    pub fn new(region: PolyRegion) -> Self {
        Self {
            region,
            index_path: None,
            threads: 1,
        }
    }
}

/// Count anchored reads over the configured poly stretch
///
/// Fetches the stretch from an indexed BAM (retrying with the `chr` alias)
/// and feeds every overlapping record through the anchor filter into an
/// `AlleleCounter`.
pub fn count_alleles(bam_path: &str, config: &MetricsConfig) -> Result<AlleleCounter> {
    let t0 = Instant::now();
    let mut bam = match &config.index_path {
        Some(index) => bam::IndexedReader::from_path_and_index(bam_path, index.as_str()),
        None => bam::IndexedReader::from_path(bam_path),
    }
    .with_context(|| format!("Failed to open indexed BAM {}", bam_path))?;

    let chrom = region::fetch_region(&mut bam, &config.region)?;
    info!(
        "Counting reads over {}:{}-{} (anchor {})",
        chrom, config.region.start, config.region.end, config.region.anchor_length
    );

    let counter = if config.threads > 1 {
        let reads: Vec<bam::Record> = bam
            .records()
            .collect::<std::result::Result<_, _>>()
            .context("Failed to read BAM record")?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()
            .context("Failed to build Rayon thread pool")?;
        pool.install(|| AlleleCounter::count_parallel(&config.region, &reads))
    } else {
        let mut counter = AlleleCounter::new(config.region.clone());
        let mut record = bam::Record::new();
        while let Some(result) = bam.read(&mut record) {
            result.context("Failed to read BAM record")?;
            counter.process(&record);
        }
        counter
    };

    let stats = counter.stats();
    info!(
        "{} records: {} counted, {} not spanning, {} not anchored, {} empty repeat ({}ms)",
        stats.records_seen,
        stats.counted,
        stats.not_spanning,
        stats.not_anchored,
        stats.empty_repeat,
        t0.elapsed().as_millis()
    );

    Ok(counter)
}

/// Allele metrics for a poly stretch, one row per first-base allele sorted by allele
pub fn calculate_allele_metrics(
    bam_path: &str,
    config: &MetricsConfig,
) -> Result<Vec<AlleleMetrics>> {
    let counter = count_alleles(bam_path, config)?;
    calculate_metrics(&config.region, counter.buckets())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;
    use rust_htslib::bam::record::{Cigar, CigarString};
    use std::path::Path;
    use tempfile::tempdir;

    /// 990..1003 matched, 1004..1009 deleted, 1010..1019 matched:
    /// the anchored window 998..1012 reads "AA" + repeat + "TT"
    fn anchored_read(name: &str, repeat: &[u8], first_qual: u8) -> bam::Record {
        let mut seq = b"GGGGGGGGAA".to_vec();
        seq.extend_from_slice(repeat);
        seq.extend_from_slice(b"TTGGGGGGGG");
        let mut qual = vec![20u8; seq.len()];
        qual[10] = first_qual;
        let del = 10 - repeat.len() as u32;
        let cigar = CigarString(vec![
            Cigar::Match(10 + repeat.len() as u32),
            Cigar::Del(del),
            Cigar::Match(10),
        ]);
        let mut rec = bam::Record::new();
        rec.set(name.as_bytes(), Some(&cigar), &seq, &qual);
        rec.set_tid(0);
        rec.set_pos(990);
        rec
    }

    fn write_indexed_bam(path: &Path, chrom: &str, records: &[bam::Record]) {
        let mut header = bam::Header::new();
        let mut sq = bam::header::HeaderRecord::new(b"SQ");
        sq.push_tag(b"SN", &chrom);
        sq.push_tag(b"LN", &100_000);
        header.push_record(&sq);
        {
            let mut writer = bam::Writer::from_path(path, &header, bam::Format::Bam).unwrap();
            for rec in records {
                writer.write(rec).unwrap();
            }
        }
        bam::index::build(path, None, bam::index::Type::Bai, 1).unwrap();
    }

    #[test]
    fn test_end_to_end_single_allele() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poly.bam");
        let records: Vec<bam::Record> = (0..3)
            .map(|i| anchored_read(&format!("r{}", i), b"CCCC", 30))
            .collect();
        write_indexed_bam(&path, "2", &records);

        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        let config = MetricsConfig::new(region);
        let metrics = calculate_allele_metrics(path.to_str().unwrap(), &config).unwrap();

        assert_eq!(metrics.len(), 1);
        let m = &metrics[0];
        assert_eq!(m.allele, 'C');
        assert_eq!(m.pos, 1001);
        assert_eq!(m.read_count, 3);
        assert_eq!(m.mean_quality, 30);
        assert!(approx_eq!(f64, m.read_fraction, 1.0));
        assert!(approx_eq!(f64, m.mean_polylen, 4.0));
        assert!(approx_eq!(f64, m.stdev_polylen, 0.0));
        assert_eq!(m.mode_polylen, 4);
        assert_eq!(m.poly_purity, 1);
    }

    #[test]
    fn test_end_to_end_chr_alias_and_threads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poly.bam");
        let mut records = Vec::new();
        for i in 0..6 {
            records.push(anchored_read(&format!("c{}", i), b"CCCCC", 32));
        }
        for i in 0..2 {
            records.push(anchored_read(&format!("a{}", i), b"ACCC", 24));
        }
        // overlaps but starts inside the window
        let mut partial = bam::Record::new();
        partial.set(
            b"partial",
            Some(&CigarString(vec![Cigar::Match(20)])),
            &[b'C'; 20],
            &[30u8; 20],
        );
        partial.set_tid(0);
        partial.set_pos(1001);
        records.push(partial);
        write_indexed_bam(&path, "chr2", &records);

        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        let mut config = MetricsConfig::new(region);
        config.threads = 2;

        let counter = count_alleles(path.to_str().unwrap(), &config).unwrap();
        assert_eq!(counter.stats().records_seen, 9);
        assert_eq!(counter.stats().not_spanning, 1);

        let metrics = calculate_metrics(&config.region, counter.buckets()).unwrap();
        assert_eq!(metrics.iter().map(|m| m.allele).collect::<Vec<_>>(), vec!['A', 'C']);
        assert_eq!(metrics.iter().map(|m| m.read_count).sum::<usize>(), 8);
        assert!(approx_eq!(f64, metrics[0].read_fraction, 0.25));
        assert!(approx_eq!(f64, metrics[1].read_fraction, 0.75));
        assert_eq!(metrics[0].mean_quality, 24);
        assert_eq!(metrics[1].mode_polylen, 5);
    }

    #[test]
    fn test_unknown_chromosome_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poly.bam");
        write_indexed_bam(&path, "chr5", &[]);

        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        let config = MetricsConfig::new(region);
        let err = calculate_allele_metrics(path.to_str().unwrap(), &config).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::UnknownChromosome {
                chrom: "2".to_string(),
                alias: "chr2".to_string()
            })
        );
    }

    #[test]
    fn test_no_anchored_reads_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("poly.bam");
        let mut rec = bam::Record::new();
        rec.set(b"short", Some(&CigarString(vec![Cigar::Match(15)])), &[b'A'; 15], &[30u8; 15]);
        rec.set_tid(0);
        rec.set_pos(995);
        write_indexed_bam(&path, "2", &[rec]);

        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        let config = MetricsConfig::new(region);
        let err = calculate_allele_metrics(path.to_str().unwrap(), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(PolyEdgeError::NoSupportingReads { pos: 1001, .. })
        ));
    }
}
