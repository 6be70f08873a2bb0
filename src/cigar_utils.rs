//! CIGAR-aware query/reference coordinate mapping
//!
//! Walks the CIGAR of a read and emits one `AlignedPair` per consumed base,
//! the same correspondence pysam's `get_aligned_pairs()` and rust-htslib's
//! `aligned_pairs_full()` produce.
//!
//! ## CIGAR Operations
//! - M/=/X: consume both ref and query (1:1 mapping)
//! - I/S: consume query only (insertion, soft clip)
//! - D/N: consume ref only (deletion, intron skip)
//! - H/P: consume neither, emit nothing
//!
//! Lookups return `Option` because a missing position is the common case for
//! reads that do not cover, or only partially cover, a locus.

use rust_htslib::bam::{self, record::Cigar};

/// One query/reference correspondence
///
/// `query_pos` is `None` for deleted/skipped reference bases, `ref_pos` is
/// `None` for inserted and soft-clipped bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedPair {
    pub query_pos: Option<usize>,
    pub ref_pos: Option<i64>,
}

impl AlignedPair {
    /// Both coordinates present (M/=/X base)
    #[inline]
    pub fn is_match(&self) -> bool {
        self.query_pos.is_some() && self.ref_pos.is_some()
    }
}

/// True for operations that consume query bases (M, I, S, =, X)
#[inline]
pub fn consumes_query(op: &Cigar) -> bool {
    matches!(
        op,
        Cigar::Match(_) | Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::Equal(_) | Cigar::Diff(_)
    )
}

/// Sum of query-consuming operation lengths; equals the sequence length of a
/// well-formed record
pub fn query_length(ops: &[Cigar]) -> usize {
    ops.iter()
        .filter(|op| consumes_query(op))
        .map(|op| op.len() as usize)
        .sum()
}

/// Build the ordered aligned pairs for a CIGAR starting at `ref_start` (0-based)
pub fn aligned_pairs(ops: &[Cigar], ref_start: i64) -> Vec<AlignedPair> {
    let mut pairs = Vec::with_capacity(
        ops.iter()
            .filter(|op| !matches!(op, Cigar::HardClip(_) | Cigar::Pad(_)))
            .map(|op| op.len() as usize)
            .sum(),
    );
    let mut query_pos: usize = 0;
    let mut ref_pos = ref_start;

    for op in ops {
        let len = op.len() as usize;
        match op {
            Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                for i in 0..len {
                    pairs.push(AlignedPair {
                        query_pos: Some(query_pos + i),
                        ref_pos: Some(ref_pos + i as i64),
                    });
                }
                query_pos += len;
                ref_pos += len as i64;
            }
            Cigar::Ins(_) | Cigar::SoftClip(_) => {
                for i in 0..len {
                    pairs.push(AlignedPair {
                        query_pos: Some(query_pos + i),
                        ref_pos: None,
                    });
                }
                query_pos += len;
            }
            Cigar::Del(_) | Cigar::RefSkip(_) => {
                for i in 0..len {
                    pairs.push(AlignedPair {
                        query_pos: None,
                        ref_pos: Some(ref_pos + i as i64),
                    });
                }
                ref_pos += len as i64;
            }
            Cigar::HardClip(_) | Cigar::Pad(_) => {}
        }
    }

    pairs
}

/// Aligned pairs of a BAM record
pub fn record_aligned_pairs(read: &bam::Record) -> Vec<AlignedPair> {
    let cigar = read.cigar();
    aligned_pairs(&cigar, read.pos())
}

/// First pair (in alignment order) whose reference coordinate is `target_ref_pos`
///
/// The returned pair may still lack a query coordinate when the position sits
/// in a deletion; see `query_pos_at_reference` for the anchored lookup.
pub fn first_pair_at_reference(pairs: &[AlignedPair], target_ref_pos: i64) -> Option<AlignedPair> {
    pairs
        .iter()
        .find(|p| p.ref_pos == Some(target_ref_pos))
        .copied()
}

/// Query offset aligned to `target_ref_pos`, `None` if uncovered or deleted
#[inline]
pub fn query_pos_at_reference(pairs: &[AlignedPair], target_ref_pos: i64) -> Option<usize> {
    first_pair_at_reference(pairs, target_ref_pos).and_then(|p| p.query_pos)
}

/// Last pair with both coordinates present and `ref_pos <= boundary`
///
/// Scans from the end of the alignment; pairs without a query coordinate are
/// never returned since they cannot serve as a sequence cut point.
pub fn last_pair_at_or_before_reference(
    pairs: &[AlignedPair],
    boundary: i64,
) -> Option<AlignedPair> {
    pairs
        .iter()
        .rev()
        .find(|p| p.query_pos.is_some() && matches!(p.ref_pos, Some(r) if r <= boundary))
        .copied()
}

// ============================================================================
// Tests
// ============================================================================
