//! Error taxonomy for configuration and aggregation faults
//!
//! Per-record skips are never errors; they are counted in `CountStats` /
//! `ChopStats`. Everything here is fatal for the invocation and is wrapped in
//! `anyhow::Error`, so callers can `downcast_ref::<PolyEdgeError>()`.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PolyEdgeError {
    /// Neither the configured name nor its alias is known to the BAM header
    UnknownChromosome { chrom: String, alias: String },
    /// Anchor length must be >= 0
    NegativeAnchorLength(i64),
    /// Poly stretch start lies after its end
    InvertedRegion { start: i64, end: i64 },
    /// Anchored window does not fit the coordinate range
    AnchorOutOfRange {
        start: i64,
        end: i64,
        anchor_length: i64,
    },
    /// No read anchored the region, so read fractions are undefined
    NoSupportingReads { chrom: String, pos: i64 },
    /// Every read of this allele has a repeat of length 1 (purity denominator is 0)
    NoPurityBases { allele: char, read_count: usize },
    /// Trimmed sequence, quality and CIGAR disagree on the query length
    TrimLengthMismatch {
        qname: String,
        seq_len: usize,
        qual_len: usize,
        cigar_len: usize,
    },
}

impl fmt::Display for PolyEdgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolyEdgeError::UnknownChromosome { chrom, alias } => write!(
                f,
                "Chromosome '{}' (alias '{}') not found in BAM header",
                chrom, alias
            ),
            PolyEdgeError::NegativeAnchorLength(len) => {
                write!(f, "Anchor length must be non-negative, got {}", len)
            }
            PolyEdgeError::InvertedRegion { start, end } => write!(
                f,
                "Poly stretch start {} is after its end {}",
                start, end
            ),
            PolyEdgeError::AnchorOutOfRange {
                start,
                end,
                anchor_length,
            } => write!(
                f,
                "Anchor length {} overflows the window around {}-{}",
                anchor_length, start, end
            ),
            PolyEdgeError::NoSupportingReads { chrom, pos } => write!(
                f,
                "No anchored reads span the poly stretch at {}:{}",
                chrom, pos
            ),
            PolyEdgeError::NoPurityBases { allele, read_count } => write!(
                f,
                "Allele '{}': all {} reads have a repeat of length 1, purity is undefined",
                allele, read_count
            ),
            PolyEdgeError::TrimLengthMismatch {
                qname,
                seq_len,
                qual_len,
                cigar_len,
            } => write!(
                f,
                "Trimmed read {} is inconsistent: seq={} qual={} cigar={}",
                qname, seq_len, qual_len, cigar_len
            ),
        }
    }
}

impl std::error::Error for PolyEdgeError {}
