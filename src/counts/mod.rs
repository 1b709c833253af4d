// hivwholeseq: Read filtering and allele counting for HIV whole-genome sequencing.
//
// Copyright 2025 The hivwholeseq developers.
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//

//! Allele, insertion and coverage counts from filtered reads.
//!
//! Reads are walked block by block along their CIGAR. Only good blocks (see
//! [crate::cigar]) contribute:
//!
//!   - match blocks add one count per base at its reference position,
//!   - deletion blocks add one `-` count per deleted reference position,
//!   - insertion blocks add one count for the inserted sequence at the
//!     reference position following the insertion.
//!
//! The first and last good match blocks are trimmed by
//! [CountParams::trim_bad_cigars] bases on their inner edge.
//!
//! Counts are kept separately for each [ReadType], which makes strand and
//! mate biases visible downstream.
//!
pub mod file;

use std::collections::BTreeMap;
use std::path::Path;

use bincode::{Encode, Decode};

use log::debug;
use log::info;
use log::trace;

use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::record::cigar::op::Kind;
use noodles_sam::alignment::record::cigar::Op;

use crate::alignment::AlignmentReader;
use crate::allele_index;
use crate::cigar::UnsupportedCigarOp;
use crate::cigar::edge_trims;
use crate::cigar::good_blocks;
use crate::cigar::read_len;
use crate::ReadType;
use crate::GAP_INDEX;
use crate::N_ALLELES;
use crate::N_READ_TYPES;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct PositionOutOfRange {
    pub name: String,
    pub pos: usize,
    pub ref_len: usize,
}

impl std::fmt::Display for PositionOutOfRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "read {}: position {} exceeds the length of the fragment ({})", self.name, self.pos, self.ref_len)
    }
}

impl std::error::Error for PositionOutOfRange {}

#[derive(Debug, Clone)]
pub struct SequenceLengthMismatch {
    pub name: String,
    pub cigar_len: usize,
    pub seq_len: usize,
}

impl std::fmt::Display for SequenceLengthMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "read {}: CIGAR covers {} bases but the sequence has {}", self.name, self.cigar_len, self.seq_len)
    }
}

impl std::error::Error for SequenceLengthMismatch {}

#[derive(Debug, Clone)]
pub struct MissingReferenceLength;

impl std::fmt::Display for MissingReferenceLength {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "alignment header has no reference sequence, supply the reference length")
    }
}

impl std::error::Error for MissingReferenceLength {}

/// Parameters for [count_alleles].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountParams {
    /// Minimum length of a match block to be considered good.
    pub match_len_min: usize,
    /// Bases trimmed from the inner edges of the good stretch.
    pub trim_bad_cigars: usize,
    /// Minimum phred quality of a counted base.
    pub qual_min: u8,
}

impl Default for CountParams {
    fn default() -> Self {
        CountParams{
            match_len_min: 30,
            trim_bad_cigars: 3,
            qual_min: 0,
        }
    }
}

/// Allele counts per read type, allele and reference position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct AlleleCounts {
    length: usize,
    counts: Vec<u32>,
}

impl AlleleCounts {
    /// Zero counts for a reference of `length` sites.
    pub fn new(length: usize) -> Self {
        AlleleCounts{ length, counts: vec![0; N_READ_TYPES * N_ALLELES * length] }
    }

    /// Wraps a flat `[read type][allele][position]` vector.
    pub fn from_vec(length: usize, counts: Vec<u32>) -> Option<Self> {
        if counts.len() != N_READ_TYPES * N_ALLELES * length {
            return None;
        }
        Some(AlleleCounts{ length, counts })
    }

    /// Number of reference sites.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.counts
    }

    fn index(&self, read_type: usize, allele: usize, pos: usize) -> usize {
        (read_type * N_ALLELES + allele) * self.length + pos
    }

    pub fn get(&self, read_type: usize, allele: usize, pos: usize) -> u32 {
        self.counts[self.index(read_type, allele, pos)]
    }

    pub fn increment(&mut self, read_type: usize, allele: usize, pos: usize) {
        let idx = self.index(read_type, allele, pos);
        self.counts[idx] += 1;
    }

    /// Counts at `pos` summed over the read types.
    pub fn site(&self, pos: usize) -> [u32; N_ALLELES] {
        let mut res = [0_u32; N_ALLELES];
        for read_type in 0..N_READ_TYPES {
            for (allele, count) in res.iter_mut().enumerate() {
                *count += self.get(read_type, allele, pos);
            }
        }
        res
    }

    /// Counts summed over the read types, one array per site.
    pub fn collapse(&self) -> Vec<[u32; N_ALLELES]> {
        (0..self.length).map(|pos| self.site(pos)).collect()
    }

    /// Coverage per read type and site: counts summed over the alphabet.
    pub fn coverage(&self) -> Coverage {
        let mut coverage = vec![[0_u32; N_READ_TYPES]; self.length];
        for (pos, cov) in coverage.iter_mut().enumerate() {
            for (read_type, value) in cov.iter_mut().enumerate() {
                *value = (0..N_ALLELES).map(|allele| self.get(read_type, allele, pos)).sum();
            }
        }
        Coverage{ per_site: coverage }
    }

    /// Adds the counts of `other` site by site.
    pub fn merge(&mut self, other: &AlleleCounts) -> Option<()> {
        if other.length != self.length {
            return None;
        }
        self.counts.iter_mut().zip(other.counts.iter()).for_each(|(x, y)| *x += *y);
        Some(())
    }
}

/// Coverage per site and read type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coverage {
    pub per_site: Vec<[u32; N_READ_TYPES]>,
}

impl Coverage {
    /// Coverage summed over the read types.
    pub fn total(&self) -> Vec<u32> {
        self.per_site.iter().map(|x| x.iter().sum()).collect()
    }
}

/// Inserted sequences per position, with counts per read type.
///
/// An insertion at position `p` sits between reference sites `p - 1` and `p`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Inserts {
    pub by_position: BTreeMap<usize, BTreeMap<String, [u32; N_READ_TYPES]>>,
}

impl Inserts {
    pub fn increment(&mut self, pos: usize, seq: &[u8], read_type: usize) {
        let seq = String::from_utf8_lossy(seq).to_string();
        self.by_position.entry(pos).or_default().entry(seq).or_insert([0; N_READ_TYPES])[read_type] += 1;
    }

    pub fn get(&self, pos: usize, seq: &str) -> Option<&[u32; N_READ_TYPES]> {
        self.by_position.get(&pos)?.get(seq)
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }
}

fn record_name(record: &RecordBuf) -> String {
    record.name().map(|x| x.to_string()).unwrap_or_default()
}

fn check_pos(record: &RecordBuf, pos: usize, ref_len: usize) -> Result<(), E> {
    if pos > ref_len {
        return Err(Box::new(PositionOutOfRange{ name: record_name(record), pos, ref_len }));
    }
    Ok(())
}

/// Adds the alleles and insertions of a single read.
pub fn count_record(
    record: &RecordBuf,
    params: &CountParams,
    counts: &mut AlleleCounts,
    inserts: &mut Inserts,
) -> Result<(), E> {
    let ref_len = counts.len();
    let read_type = ReadType::from_flags(record.flags()).index();

    let ops: &[Op] = record.cigar().as_ref();
    let seq: &[u8] = record.sequence().as_ref();
    let qual: &[u8] = record.quality_scores().as_ref();

    let cigar_len = read_len(ops)?;
    if cigar_len != seq.len() || (!qual.is_empty() && qual.len() != seq.len()) {
        return Err(Box::new(SequenceLengthMismatch{ name: record_name(record), cigar_len, seq_len: seq.len() }));
    }

    let blocks = good_blocks(ops, params.match_len_min);
    let pass_qual = |idx: usize| qual.is_empty() || qual[idx] >= params.qual_min;

    let mut pos = match record.alignment_start() {
        Some(start) => start.get() - 1,
        None => return Ok(()),
    };
    let mut read_pos = 0;

    for (idx, op) in ops.iter().enumerate() {
        let len = op.len();
        match op.kind() {
            Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch => {
                check_pos(record, pos, ref_len)?;
                if blocks.good[idx] {
                    let (left, right) = edge_trims(&blocks, idx, ops.len(), params.trim_bad_cigars, params.trim_bad_cigars);
                    for offset in left..len.saturating_sub(right) {
                        if pos + offset >= ref_len {
                            return Err(Box::new(PositionOutOfRange{ name: record_name(record), pos: pos + offset, ref_len }));
                        }
                        if pass_qual(read_pos + offset) {
                            counts.increment(read_type, allele_index(seq[read_pos + offset]), pos + offset);
                        }
                    }
                }
                read_pos += len;
                pos += len;
            },
            Kind::Deletion => {
                check_pos(record, pos, ref_len)?;
                if blocks.good[idx] {
                    if pos + len > ref_len {
                        return Err(Box::new(PositionOutOfRange{ name: record_name(record), pos: pos + len, ref_len }));
                    }
                    (pos..(pos + len)).for_each(|site| counts.increment(read_type, GAP_INDEX, site));
                }
                pos += len;
            },
            Kind::Insertion => {
                check_pos(record, pos, ref_len)?;
                if blocks.good[idx] && (read_pos..(read_pos + len)).all(pass_qual) {
                    inserts.increment(pos, &seq[read_pos..(read_pos + len)], read_type);
                }
                read_pos += len;
            },
            Kind::SoftClip => {
                read_pos += len;
            },
            Kind::HardClip => {},
            kind => return Err(Box::new(UnsupportedCigarOp{ kind })),
        }
    }

    Ok(())
}

/// Counts alleles and insertions from all mapped records in `records`.
///
/// `ref_len` is the length of the reference the reads are mapped to.
/// Unmapped records are skipped.
///
pub fn count_alleles<I>(
    records: I,
    ref_len: usize,
    params: &CountParams,
) -> Result<(AlleleCounts, Inserts), E>
where
    I: Iterator<Item = std::io::Result<RecordBuf>>,
{
    let mut counts = AlleleCounts::new(ref_len);
    let mut inserts = Inserts::default();

    for (idx, record) in records.enumerate() {
        if (idx + 1) % 10000 == 0 {
            debug!("{} reads", idx + 1);
        }
        let record = record?;
        if record.flags().is_unmapped() {
            trace!("Read {}: unmapped, skipping", record_name(&record));
            continue;
        }
        count_record(&record, params, &mut counts, &mut inserts)?;
    }

    Ok((counts, inserts))
}

/// Counts alleles and insertions in the SAM or BAM file at `input`.
///
/// If `ref_len` is not given, the length of the first reference sequence in
/// the header is used.
///
pub fn count_file<P: AsRef<Path>>(
    input: P,
    ref_len: Option<usize>,
    params: &CountParams,
) -> Result<(AlleleCounts, Inserts), E> {
    let reader = AlignmentReader::from_path(input.as_ref())?;
    let ref_len = match ref_len {
        Some(len) => len,
        None => reader.reference_len(0).ok_or(MissingReferenceLength)?,
    };
    debug!("Reference length: {}", ref_len);

    let (counts, inserts) = count_alleles(reader, ref_len, params)?;
    info!("Counted {} alleles at {} sites", counts.as_slice().iter().map(|x| *x as u64).sum::<u64>(), ref_len);

    Ok((counts, inserts))
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::AlignmentReader;
    use std::io::Cursor;

    fn reader_from(lines: &[&str]) -> AlignmentReader {
        let mut data = String::from("@HD\tVN:1.6\n@SQ\tSN:F1\tLN:100\n");
        lines.iter().for_each(|line| { data += line; data += "\n" });
        AlignmentReader::from_sam(Cursor::new(data.into_bytes())).unwrap()
    }

    #[test]
    fn count_alleles_matches() {
        use super::{count_alleles, CountParams};

        let seq = "ACGT".repeat(10);
        let qual = "I".repeat(40);
        let line = format!("r1\t99\tF1\t11\t60\t40M\t=\t11\t40\t{}\t{}", seq, qual);
        let reader = reader_from(&[&line]);

        let (counts, inserts) = count_alleles(reader, 100, &CountParams::default()).unwrap();

        // read 1 forward, sites 10..50
        assert_eq!(counts.get(0, 0, 10), 1);
        assert_eq!(counts.get(0, 1, 11), 1);
        assert_eq!(counts.get(0, 3, 49), 1);
        assert_eq!(counts.get(0, 0, 9), 0);
        assert_eq!(counts.get(0, 0, 50), 0);
        assert_eq!(counts.as_slice().iter().sum::<u32>(), 40);
        assert!(inserts.is_empty());
    }

    #[test]
    fn count_alleles_indels_and_trims() {
        use super::{count_alleles, CountParams};

        // 5S 30M 2I 30M 3D 30M 4I 10M
        let seq = "A".repeat(5) + &"C".repeat(30) + "GG" + &"T".repeat(30) + &"A".repeat(30) + "TTTT" + &"C".repeat(10);
        let qual = "I".repeat(seq.len());
        let line = format!("r1\t147\tF1\t1\t60\t5S30M2I30M3D30M4I10M\t=\t1\t0\t{}\t{}", seq, qual);
        let reader = reader_from(&[&line]);

        let (counts, inserts) = count_alleles(reader, 100, &CountParams::default()).unwrap();

        // read 2 reverse = read type 3
        // first good block (index 1) is not the first block: trimmed by 3
        assert_eq!(counts.get(3, 1, 0), 0);
        assert_eq!(counts.get(3, 1, 2), 0);
        assert_eq!(counts.get(3, 1, 3), 1);
        assert_eq!(counts.get(3, 1, 29), 1);
        // insertion between good blocks
        assert_eq!(inserts.get(30, "GG"), Some(&[0, 0, 0, 1]));
        assert_eq!(counts.get(3, 3, 30), 1);
        // deletion at 60..63
        assert_eq!(counts.get(3, 4, 60), 1);
        assert_eq!(counts.get(3, 4, 62), 1);
        assert_eq!(counts.get(3, 4, 63), 0);
        // last good block (index 5) trimmed by 3 on the right
        assert_eq!(counts.get(3, 0, 63), 1);
        assert_eq!(counts.get(3, 0, 89), 1);
        assert_eq!(counts.get(3, 0, 90), 0);
        assert_eq!(counts.get(3, 0, 92), 0);
        // bad insertion and bad match after the last good block
        assert_eq!(inserts.get(93, "TTTT"), None);
        assert_eq!(counts.get(3, 1, 93), 0);

        let coverage = counts.coverage();
        assert_eq!(coverage.per_site[3], [0, 0, 0, 1]);
        assert_eq!(coverage.total()[61], 1);
    }

    #[test]
    fn count_alleles_quality_filter() {
        use super::{count_alleles, CountParams};

        let seq = "A".repeat(40);
        let qual = "#".repeat(20) + &"I".repeat(20);
        let line = format!("r1\t99\tF1\t1\t60\t40M\t=\t1\t40\t{}\t{}", seq, qual);
        let reader = reader_from(&[&line]);
        let params = CountParams{ qual_min: 30, ..Default::default() };

        let (counts, _) = count_alleles(reader, 100, &params).unwrap();

        assert_eq!(counts.get(0, 0, 19), 0);
        assert_eq!(counts.get(0, 0, 20), 1);
        assert_eq!(counts.as_slice().iter().sum::<u32>(), 20);
    }

    #[test]
    fn count_alleles_out_of_range() {
        use super::{count_alleles, CountParams};

        let seq = "A".repeat(40);
        let line = format!("r1\t99\tF1\t81\t60\t40M\t=\t1\t40\t{}\t*", seq);
        let reader = reader_from(&[&line]);

        let got = count_alleles(reader, 100, &CountParams::default());

        assert!(got.is_err());
    }

    #[test]
    fn count_alleles_sequence_mismatch() {
        use super::{count_alleles, CountParams};

        let seq = "A".repeat(39);
        let line = format!("r1\t99\tF1\t1\t60\t40M\t=\t1\t40\t{}\t*", seq);
        let reader = reader_from(&[&line]);

        let got = count_alleles(reader, 100, &CountParams::default());

        assert!(got.is_err());
    }

    #[test]
    fn coverage_equals_allele_sums() {
        use super::{count_alleles, CountParams};
        use crate::N_ALLELES;

        let seq1 = "ACGTN".repeat(10);
        let line1 = format!("r1\t99\tF1\t1\t60\t20M2D30M\t=\t31\t80\t{}\t*", seq1);
        let seq2 = "TTGCA".repeat(10);
        let line2 = format!("r1\t147\tF1\t31\t60\t50M\t=\t1\t-80\t{}\t*", seq2);
        let reader = reader_from(&[&line1, &line2]);

        let (counts, _) = count_alleles(reader, 100, &CountParams{ match_len_min: 10, ..Default::default() }).unwrap();
        let coverage = counts.coverage().total();
        let sites = counts.collapse();

        for pos in 0..counts.len() {
            assert_eq!(coverage[pos], sites[pos].iter().sum::<u32>());
        }
        assert_eq!(sites[0].len(), N_ALLELES);
        assert_eq!(coverage[40], 2);
    }

    #[test]
    fn count_file_header_length() {
        use super::{count_file, CountParams};

        let dir = std::env::temp_dir().join("hivwholeseq_count_file_header_length");
        std::fs::create_dir_all(&dir).unwrap();
        let seq = "ACGT".repeat(10);
        let qual = "I".repeat(40);
        let data = format!("@HD\tVN:1.6\n@SQ\tSN:F1\tLN:100\nr1\t99\tF1\t1\t60\t40M\t=\t1\t40\t{}\t{}\n", seq, qual);
        std::fs::write(dir.join("filtered.sam"), data).unwrap();

        let (counts, _) = count_file(dir.join("filtered.sam"), None, &CountParams::default()).unwrap();
        assert_eq!(counts.len(), 100);
        assert_eq!(counts.get(0, 0, 0), 1);

        let (counts, _) = count_file(dir.join("filtered.sam"), Some(60), &CountParams::default()).unwrap();
        assert_eq!(counts.len(), 60);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
