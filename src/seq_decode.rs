use rust_htslib::bam;

// Matches rust-htslib's internal decode table for BAM 4-bit base encoding.
const DECODE_BASE: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Decode query bases `[start, end)` of a record without decoding the whole read.
///
/// The window is clamped to the sequence length.
pub fn decode_seq_range(read: &bam::Record, start: usize, end: usize) -> Vec<u8> {
    let seq = read.seq();
    let end = end.min(seq.len());
    if start >= end {
        return Vec::new();
    }

    let encoded = seq.encoded;
    (start..end)
        .map(|pos| {
            let packed = encoded[pos / 2];
            // high nibble holds the even position
            let code = if pos % 2 == 0 { packed >> 4 } else { packed & 0x0F };
            DECODE_BASE[code as usize]
        })
        .collect()
}

/// Decode the first `len` bases and qualities of a record
///
/// Qualities are copied from the record's own buffer before any rewrite of the
/// sequence, so the pair stays consistent when the record is later `set()`.
pub fn prefix_seq_qual(read: &bam::Record, len: usize) -> (Vec<u8>, Vec<u8>) {
    let seq = decode_seq_range(read, 0, len);
    let qual = read.qual();
    let qual = qual[..len.min(qual.len())].to_vec();
    (seq, qual)
}
