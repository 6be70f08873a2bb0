//! BAM Read Chopper - truncate reads at a boundary inside a poly stretch
//!
//! Reads that cross the cut region are shortened to end at their last aligned
//! base at or before the region end. Sequence, qualities and CIGAR are cut
//! together so the query length stays consistent; every other record is
//! written through untouched, in input order.
//!
//! # Algorithm
//! 1. Select reads on the target chromosome with `pos < start` and `end < reference_end`
//! 2. Reverse-scan the aligned pairs for the last matched base with `ref <= end`
//! 3. Keep query bases `[0, cut]`, clip quals and CIGAR to the same length

use anyhow::{Context, Result};
use log::{debug, info};
use rust_htslib::bam::ext::BamRecordExtensions;
use rust_htslib::bam::record::{Cigar, CigarString};
use rust_htslib::{bam, bam::Read as BamRead};
use std::time::Instant;

use crate::cigar_utils::{
    consumes_query, last_pair_at_or_before_reference, query_length, record_aligned_pairs,
};
use crate::error::PolyEdgeError;
use crate::region::resolve_tid;
use crate::seq_decode::prefix_seq_qual;

// ============================================================================
// Data Structures
// ============================================================================

/// Reference interval reads are chopped in (0-based, inclusive)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutRegion {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
}

impl CutRegion {
    pub fn new(chrom: impl Into<String>, start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(PolyEdgeError::InvertedRegion { start, end }.into());
        }
        Ok(Self {
            chrom: chrom.into(),
            start,
            end,
        })
    }

    /// Selection predicate, coordinates only
    #[inline]
    pub fn is_spanned_by(&self, read_start: i64, read_end: i64) -> bool {
        read_start < self.start && self.end < read_end
    }
}

/// Result of trimming a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimOutcome {
    /// Record rewritten to `new_len` query bases
    Trimmed { new_len: usize },
    /// Wrong chromosome, unmapped, or not spanning the cut region
    NotSelected,
    /// Spanning, but no aligned base at or before the boundary
    NoCutPoint,
}

/// Configuration for chopping a BAM stream
#[derive(Debug, Clone)]
pub struct ChopConfig {
    pub region: CutRegion,
    /// Number of threads for BAM reading
    pub read_threads: usize,
    /// Number of threads for BAM writing
    pub write_threads: usize,
}

impl ChopConfig {
    pub fn new(region: CutRegion) -> Self {
        Self {
            region,
            read_threads: 1,
            write_threads: 1,
        }
    }
}

/// Statistics returned from chopping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChopStats {
    pub total_reads: usize,
    pub trimmed: usize,
    pub passed_through: usize,
    /// Selected reads without a usable cut point (also passed through)
    pub no_cut_point: usize,
    pub elapsed_ms: u64,
}

// ============================================================================
// Core Algorithm
// ============================================================================

/// Number of query bases to keep, or `None` when no matched base lies at or
/// before `boundary`
pub fn find_cut_point(read: &bam::Record, boundary: i64) -> Option<usize> {
    let pairs = record_aligned_pairs(read);
    last_pair_at_or_before_reference(&pairs, boundary)
        .and_then(|p| p.query_pos)
        .map(|q| q + 1)
}

/// Same operation kind with a new length
fn with_len(op: &Cigar, len: u32) -> Cigar {
    match op {
        Cigar::Match(_) => Cigar::Match(len),
        Cigar::Ins(_) => Cigar::Ins(len),
        Cigar::Del(_) => Cigar::Del(len),
        Cigar::RefSkip(_) => Cigar::RefSkip(len),
        Cigar::SoftClip(_) => Cigar::SoftClip(len),
        Cigar::HardClip(_) => Cigar::HardClip(len),
        Cigar::Pad(_) => Cigar::Pad(len),
        Cigar::Equal(_) => Cigar::Equal(len),
        Cigar::Diff(_) => Cigar::Diff(len),
    }
}

/// Clip a CIGAR to its first `cut` query bases
///
/// Operations are kept in order while fewer than `cut` query bases have been
/// consumed; the query-consuming operation that reaches `cut` is shortened and
/// everything after it is dropped.
pub fn rewrite_cigar(ops: &[Cigar], cut: usize) -> Vec<Cigar> {
    let mut new_ops = Vec::with_capacity(ops.len());
    let mut qlen: usize = 0;

    for op in ops {
        if qlen >= cut {
            break;
        }
        if consumes_query(op) {
            let len = (op.len() as usize).min(cut - qlen);
            new_ops.push(with_len(op, len as u32));
            qlen += len;
        } else {
            new_ops.push(*op);
        }
    }

    new_ops
}

/// Truncate a record in place to its first `cut` query bases
///
/// Qualities are taken from the record before its sequence is replaced.
pub fn truncate_record(read: &mut bam::Record, cut: usize) -> Result<()> {
    let (seq, qual) = prefix_seq_qual(read, cut);
    let cigar = CigarString(rewrite_cigar(&read.cigar(), cut));
    let qname = read.qname().to_vec();

    let cigar_len = query_length(&cigar);
    if seq.len() != qual.len() || seq.len() != cigar_len {
        return Err(PolyEdgeError::TrimLengthMismatch {
            qname: String::from_utf8_lossy(&qname).into_owned(),
            seq_len: seq.len(),
            qual_len: qual.len(),
            cigar_len,
        }
        .into());
    }

    read.set(&qname, Some(&cigar), &seq, &qual);
    Ok(())
}

/// Trim one record if it crosses the cut region on chromosome `target_tid`
pub fn trim_record(
    read: &mut bam::Record,
    target_tid: i32,
    region: &CutRegion,
) -> Result<TrimOutcome> {
    if read.is_unmapped()
        || read.tid() != target_tid
        || !region.is_spanned_by(read.pos(), read.reference_end())
    {
        return Ok(TrimOutcome::NotSelected);
    }

    let cut = match find_cut_point(read, region.end) {
        Some(cut) => cut,
        None => return Ok(TrimOutcome::NoCutPoint),
    };

    truncate_record(read, cut)?;
    Ok(TrimOutcome::Trimmed { new_len: cut })
}

/// Chop every read of `input` crossing the cut region and write all reads to `output`
///
/// `-` reads from stdin / writes to stdout.
pub fn chop_bam(input: &str, output: &str, config: &ChopConfig) -> Result<ChopStats> {
    let t0 = Instant::now();

    let mut bam = if input == "-" {
        bam::Reader::from_stdin().context("Failed to open BAM from stdin")?
    } else {
        bam::Reader::from_path(input).with_context(|| format!("Failed to open BAM {}", input))?
    };
    bam.set_threads(config.read_threads.clamp(1, rayon::current_num_threads().max(1)))
        .ok();

    let (tid, chrom) = resolve_tid(bam.header(), &config.region.chrom)?;
    let header = bam::Header::from_template(bam.header());

    let mut writer = if output == "-" {
        bam::Writer::from_stdout(&header, bam::Format::Bam)
            .context("Failed to open BAM writer on stdout")?
    } else {
        bam::Writer::from_path(output, &header, bam::Format::Bam)
            .with_context(|| format!("Failed to create BAM writer {}", output))?
    };
    writer
        .set_threads(config.write_threads.clamp(1, rayon::current_num_threads().max(1)))
        .ok();

    info!(
        "Chopping reads spanning {}:{}-{}",
        chrom, config.region.start, config.region.end
    );

    let mut stats = ChopStats::default();
    let mut record = bam::Record::new();
    while let Some(result) = bam.read(&mut record) {
        result?;
        stats.total_reads += 1;

        match trim_record(&mut record, tid as i32, &config.region)? {
            TrimOutcome::Trimmed { new_len } => {
                debug!(
                    "Trimmed {} to {} bases",
                    String::from_utf8_lossy(record.qname()),
                    new_len
                );
                stats.trimmed += 1;
            }
            TrimOutcome::NoCutPoint => {
                stats.no_cut_point += 1;
                stats.passed_through += 1;
            }
            TrimOutcome::NotSelected => stats.passed_through += 1,
        }

        writer.write(&record).context("Failed to write BAM record")?;
    }

    stats.elapsed_ms = t0.elapsed().as_millis() as u64;
    info!(
        "Chop complete: {} reads, {} trimmed, {} passed through ({} without cut point) in {}ms",
        stats.total_reads, stats.trimmed, stats.passed_through, stats.no_cut_point, stats.elapsed_ms
    );

    Ok(stats)
}

// ============================================================================
// Tests
// ============================================================================
