//! Poly stretch region, anchor filter and chromosome-name resolution
//!
//! Coordinates are 0-based reference positions. `start`/`end` delimit the poly
//! stretch inclusively; the metrics window extends `anchor_length` bases on
//! each side of it.

use anyhow::{Context, Result};
use log::warn;
use rust_htslib::bam::{self, ext::BamRecordExtensions, Read as BamRead};

use crate::error::PolyEdgeError;

/// Anchor length used when none is configured
pub const DEFAULT_ANCHOR_LENGTH: i64 = 2;

/// Poly stretch plus anchor requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolyRegion {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    pub anchor_length: i64,
}

impl PolyRegion {
    /// Validated constructor; negative anchors, inverted stretches and anchors
    /// pushing the window past the coordinate range are configuration faults
    pub fn new(chrom: impl Into<String>, start: i64, end: i64, anchor_length: i64) -> Result<Self> {
        if anchor_length < 0 {
            return Err(PolyEdgeError::NegativeAnchorLength(anchor_length).into());
        }
        if start > end {
            return Err(PolyEdgeError::InvertedRegion { start, end }.into());
        }
        if start.checked_sub(anchor_length).is_none()
            || end.checked_add(anchor_length).is_none()
            || anchor_length.checked_mul(2).is_none()
        {
            return Err(PolyEdgeError::AnchorOutOfRange {
                start,
                end,
                anchor_length,
            }
            .into());
        }
        Ok(Self {
            chrom: chrom.into(),
            start,
            end,
            anchor_length,
        })
    }

    /// Call site: the base immediately preceding the repeat (1-based)
    #[inline]
    pub fn variant_pos(&self) -> i64 {
        self.start + 1
    }

    /// Left edge of the anchored window
    #[inline]
    pub fn roi_start(&self) -> i64 {
        self.start - self.anchor_length
    }

    /// Right edge of the anchored window
    #[inline]
    pub fn roi_end(&self) -> i64 {
        self.end + self.anchor_length
    }

    /// Anchor length as a sequence offset
    #[inline]
    pub fn anchor(&self) -> usize {
        self.anchor_length.max(0) as usize
    }

    /// Strict containment of the anchored window within `[read_start, read_end)`
    #[inline]
    pub fn is_spanned_by(&self, read_start: i64, read_end: i64) -> bool {
        read_start < self.roi_start() && self.roi_end() < read_end
    }

    /// Region Anchor Filter: true when the read aligns across the stretch and
    /// both anchors with margin
    pub fn spans(&self, read: &bam::Record) -> bool {
        !read.is_unmapped() && self.is_spanned_by(read.pos(), read.reference_end())
    }
}

/// The configured name and its alternate convention (`2` <-> `chr2`)
pub fn chrom_aliases(chrom: &str) -> (String, String) {
    let alias = match chrom.strip_prefix("chr") {
        Some(bare) if !bare.is_empty() => bare.to_string(),
        _ => format!("chr{}", chrom),
    };
    (chrom.to_string(), alias)
}

/// Resolve a chromosome to its target id, trying the alias once
///
/// Returns the tid and the name that matched the header.
pub fn resolve_tid(header: &bam::HeaderView, chrom: &str) -> Result<(u32, String)> {
    let (name, alias) = chrom_aliases(chrom);
    if let Some(tid) = header.tid(name.as_bytes()) {
        return Ok((tid, name));
    }
    if let Some(tid) = header.tid(alias.as_bytes()) {
        warn!("Chromosome '{}' not in BAM header, using '{}'", name, alias);
        return Ok((tid, alias));
    }
    Err(PolyEdgeError::UnknownChromosome { chrom: name, alias }.into())
}

/// Position an indexed reader on the poly stretch
///
/// Looks the configured chromosome up in the header, falling back once to the
/// alias name, then fetches `[start, end)` on it. A name missing under both
/// conventions is a naming fault; a failing fetch on a known name is reported
/// as the htslib error. Returns the name that was fetched.
pub fn fetch_region(reader: &mut bam::IndexedReader, region: &PolyRegion) -> Result<String> {
    let (tid, chrom) = resolve_tid(reader.header(), &region.chrom)?;
    reader
        .fetch((tid, region.start, region.end))
        .with_context(|| format!("Failed to fetch {}:{}-{}", chrom, region.start, region.end))?;
    Ok(chrom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_htslib::bam::record::{Cigar, CigarString};
    use rust_htslib::bam::Read as BamRead;
    use tempfile::tempdir;

    fn make_record(pos: i64, len: u32) -> bam::Record {
        let seq = vec![b'A'; len as usize];
        let qual = vec![30u8; len as usize];
        let mut rec = bam::Record::new();
        rec.set(b"r", Some(&CigarString(vec![Cigar::Match(len)])), &seq, &qual);
        rec.set_pos(pos);
        rec
    }

    #[test]
    fn test_new_validates() {
        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        assert_eq!(region.variant_pos(), 1001);
        assert_eq!(region.roi_start(), 998);
        assert_eq!(region.roi_end(), 1012);

        let err = PolyRegion::new("2", 1000, 1010, -1).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::NegativeAnchorLength(-1))
        );
        let err = PolyRegion::new("2", 1010, 1000, 2).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::InvertedRegion {
                start: 1010,
                end: 1000
            })
        );
    }

    #[test]
    fn test_anchor_overflow_rejected() {
        let err = PolyRegion::new("2", 1000, 1010, i64::MAX - 5).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::AnchorOutOfRange {
                start: 1000,
                end: 1010,
                anchor_length: i64::MAX - 5
            })
        );
        // large but representable
        let region = PolyRegion::new("2", 1000, 1010, 1 << 40).unwrap();
        assert_eq!(region.roi_end(), 1010 + (1 << 40));
    }

    #[test]
    fn test_zero_anchor_allowed() {
        let region = PolyRegion::new("2", 50, 60, 0).unwrap();
        assert_eq!(region.roi_start(), 50);
        assert_eq!(region.anchor(), 0);
    }

    #[test]
    fn test_containment_is_strict() {
        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        assert!(region.is_spanned_by(997, 1013));
        // read start must be strictly before roi_start
        assert!(!region.is_spanned_by(998, 1013));
        // roi_end must be strictly before read end
        assert!(!region.is_spanned_by(997, 1012));
    }

    #[test]
    fn test_spans_record() {
        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        assert!(region.spans(&make_record(990, 30)));
        // ends at 1012 (exclusive) which is not beyond roi_end
        assert!(!region.spans(&make_record(990, 22)));
        // partial overlap on the left
        assert!(!region.spans(&make_record(1001, 30)));

        let mut unmapped = make_record(990, 30);
        unmapped.set_unmapped();
        assert!(!region.spans(&unmapped));
    }

    #[test]
    fn test_chrom_aliases() {
        assert_eq!(chrom_aliases("2"), ("2".to_string(), "chr2".to_string()));
        assert_eq!(chrom_aliases("chrX"), ("chrX".to_string(), "X".to_string()));
        assert_eq!(chrom_aliases("chr"), ("chr".to_string(), "chrchr".to_string()));
    }

    #[test]
    fn test_resolve_tid() {
        let mut header = bam::Header::new();
        for name in ["chr1", "2"] {
            let mut sq = bam::header::HeaderRecord::new(b"SQ");
            sq.push_tag(b"SN", &name);
            sq.push_tag(b"LN", &100_000);
            header.push_record(&sq);
        }
        let view = bam::HeaderView::from_header(&header);

        assert_eq!(resolve_tid(&view, "chr1").unwrap(), (0, "chr1".to_string()));
        assert_eq!(resolve_tid(&view, "1").unwrap(), (0, "chr1".to_string()));
        assert_eq!(resolve_tid(&view, "chr2").unwrap(), (1, "2".to_string()));

        let err = resolve_tid(&view, "3").unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::UnknownChromosome {
                chrom: "3".to_string(),
                alias: "chr3".to_string()
            })
        );
    }

    #[test]
    fn test_fetch_region_resolves_through_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("names.bam");
        let mut header = bam::Header::new();
        for name in ["chr2", "3"] {
            let mut sq = bam::header::HeaderRecord::new(b"SQ");
            sq.push_tag(b"SN", &name);
            sq.push_tag(b"LN", &100_000);
            header.push_record(&sq);
        }
        {
            let mut writer = bam::Writer::from_path(&path, &header, bam::Format::Bam).unwrap();
            let mut rec = make_record(990, 30);
            rec.set_tid(1);
            writer.write(&rec).unwrap();
        }
        bam::index::build(&path, None, bam::index::Type::Bai, 1).unwrap();
        let mut reader = bam::IndexedReader::from_path(&path).unwrap();

        let region = PolyRegion::new("2", 1000, 1010, 2).unwrap();
        assert_eq!(fetch_region(&mut reader, &region).unwrap(), "chr2");
        assert_eq!(reader.records().count(), 0);

        let region = PolyRegion::new("chr3", 1000, 1010, 2).unwrap();
        assert_eq!(fetch_region(&mut reader, &region).unwrap(), "3");
        assert_eq!(reader.records().count(), 1);

        let region = PolyRegion::new("7", 1000, 1010, 2).unwrap();
        let err = fetch_region(&mut reader, &region).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PolyEdgeError>(),
            Some(&PolyEdgeError::UnknownChromosome {
                chrom: "7".to_string(),
                alias: "chr7".to_string()
            })
        );
    }
}
