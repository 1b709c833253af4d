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

//! Filtering of mapped read pairs.
//!
//! Each read pair of a mapped file is written either to the filtered output
//! or to the trash output. A pair is trashed if
//!
//!   - either mate is unmapped,
//!   - either mate is not properly paired (this includes mates on different fragments),
//!   - the mates carry too many mismatches (if [FilterParams::max_mismatches] is set),
//!   - a mate starts at the first reference base or ends at the last one with an insertion,
//!   - a mate has no good CIGAR block (if [FilterParams::trim] is set).
//!
//! With [FilterParams::trim], the surviving reads are cut down to their good
//! CIGAR blocks (see [crate::cigar]).
//!
//! Mates with different names abort the filtering with
//! [MismatchedPairNames].
//!
use std::path::Path;

use log::debug;
use log::info;
use log::trace;

use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;
use noodles_sam::alignment::record::cigar::op::Kind;
use noodles_sam::alignment::record::cigar::Op;
use noodles_sam::alignment::record::data::field::Tag;
use noodles_sam::alignment::record_buf::{Cigar, QualityScores, Sequence};

use crate::alignment::AlignmentReader;
use crate::alignment::create_writer;
use crate::alignment::pairs::ReadPairs;
use crate::cigar::good_range;
use crate::cigar::reference_len;
use crate::cigar::trim_bad_edges;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct MismatchedPairNames {
    pub pair_index: usize,
    pub name1: String,
    pub name2: String,
}

impl std::fmt::Display for MismatchedPairNames {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "read pair {}: reads have different names ({} and {})", self.pair_index, self.name1, self.name2)
    }
}

impl std::error::Error for MismatchedPairNames {}

#[derive(Debug, Clone)]
pub struct TrimError {
    pub name: String,
}

impl std::fmt::Display for TrimError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "read {}: CIGAR does not match the sequence length", self.name)
    }
}

impl std::error::Error for TrimError {}

/// Parameters for [filter_pairs].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    /// Minimum length of a match block to be considered good.
    pub match_len_min: usize,
    /// Bases trimmed from the inner edges of the good stretch.
    pub trim_bad_cigars: usize,
    /// Trash pairs whose mates have more mismatches (NM) than this, alone or summed.
    pub max_mismatches: Option<i64>,
    /// Cut the reads down to their good CIGAR blocks.
    pub trim: bool,
    /// Stop after examining this many reads.
    pub max_reads: Option<usize>,
}

impl Default for FilterParams {
    fn default() -> Self {
        FilterParams{
            match_len_min: 30,
            trim_bad_cigars: 3,
            max_mismatches: None,
            trim: false,
            max_reads: None,
        }
    }
}

/// Outcome for a single read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairClass {
    Good,
    Unmapped,
    Unpaired,
    Mutator,
    MismappedEdge,
    BadCigar,
}

/// Number of read pairs in each [PairClass].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSummary {
    pub good: usize,
    pub unmapped: usize,
    pub unpaired: usize,
    pub mutator: usize,
    pub mismapped_edge: usize,
    pub bad_cigar: usize,
}

impl FilterSummary {
    pub fn add(&mut self, class: PairClass) {
        match class {
            PairClass::Good => self.good += 1,
            PairClass::Unmapped => self.unmapped += 1,
            PairClass::Unpaired => self.unpaired += 1,
            PairClass::Mutator => self.mutator += 1,
            PairClass::MismappedEdge => self.mismapped_edge += 1,
            PairClass::BadCigar => self.bad_cigar += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.good + self.trashed()
    }

    pub fn trashed(&self) -> usize {
        self.unmapped + self.unpaired + self.mutator + self.mismapped_edge + self.bad_cigar
    }
}

impl std::fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Reads: {} good, {} unmapped, {} unpaired, {} many-mutations, {} edge, {} bad CIGARs.",
               self.good, self.unmapped, self.unpaired, self.mutator, self.mismapped_edge, self.bad_cigar)
    }
}

fn record_name(record: &RecordBuf) -> String {
    record.name().map(|x| x.to_string()).unwrap_or_default()
}

fn edit_distance(record: &RecordBuf) -> i64 {
    record.data().get(&Tag::EDIT_DISTANCE).and_then(|value| value.as_int()).unwrap_or(0)
}

/// Checks whether a read overhangs the fragment edge with an insertion.
///
/// Mismapped reads often start at the first reference base or end at the last
/// one with an insertion. The read end counts every operation except
/// insertions, so clipped bases extend it.
fn overhangs_edge(
    record: &RecordBuf,
    ref_len: usize,
) -> bool {
    let ops: &[Op] = record.cigar().as_ref();
    let (first, last) = match (ops.first(), ops.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return false,
    };
    let start = record.alignment_start().map(|x| x.get() - 1).unwrap_or(0);
    let end = start + ops.iter().filter(|op| op.kind() != Kind::Insertion).map(|op| op.len()).sum::<usize>();

    (start == 0 && first.kind() == Kind::Insertion) ||
        (end == ref_len && last.kind() == Kind::Insertion)
}

/// Classifies a read pair without trimming.
///
/// Returns [PairClass::Good] if the pair should be kept. The mates must have
/// the same name.
pub fn classify_pair(
    read1: &RecordBuf,
    read2: &RecordBuf,
    ref_len: usize,
    params: &FilterParams,
) -> Result<PairClass, E> {
    let flags1 = read1.flags();
    let flags2 = read2.flags();

    if flags1.is_unmapped() || flags2.is_unmapped() {
        return Ok(PairClass::Unmapped);
    }

    if !flags1.is_properly_segmented() || !flags2.is_properly_segmented() {
        return Ok(PairClass::Unpaired);
    }

    if let Some(max_mismatches) = params.max_mismatches {
        let mm = (edit_distance(read1), edit_distance(read2));
        if mm.0.max(mm.1) > max_mismatches || mm.0 + mm.1 > max_mismatches {
            trace!("Read pair {}: too many mismatches ({} + {})", record_name(read1), mm.0, mm.1);
            return Ok(PairClass::Mutator);
        }
    }

    for read in [read1, read2] {
        if overhangs_edge(read, ref_len) {
            return Ok(PairClass::MismappedEdge);
        }
    }

    Ok(PairClass::Good)
}

/// Cuts `record` down to its good CIGAR blocks.
///
/// Updates the sequence, quality scores, CIGAR and alignment start.
///
/// Returns false and leaves `record` unchanged if the read has no good blocks.
///
pub fn trim_record(
    record: &mut RecordBuf,
    params: &FilterParams,
) -> Result<bool, E> {
    let ops: Vec<Op> = record.cigar().as_ref().to_vec();
    let start = match record.alignment_start() {
        Some(start) => start,
        None => return Ok(false),
    };
    let pos = start.get() - 1;

    let range = match good_range(&ops, pos, params.match_len_min, params.trim_bad_cigars, params.trim_bad_cigars)? {
        Some(range) => range,
        None => return Ok(false),
    };
    let trimmed = match trim_bad_edges(&ops, params.match_len_min, params.trim_bad_cigars, params.trim_bad_cigars) {
        Some(trimmed) => trimmed,
        None => return Ok(false),
    };

    let seq: Vec<u8> = record.sequence().as_ref().get(range.read.clone())
        .ok_or_else(|| TrimError{ name: record_name(record) })?
        .to_vec();
    let qual: Vec<u8> = if record.quality_scores().as_ref().is_empty() {
        Vec::new()
    } else {
        record.quality_scores().as_ref().get(range.read.clone())
            .ok_or_else(|| TrimError{ name: record_name(record) })?
            .to_vec()
    };
    let new_start = start.checked_add(range.reference.start - pos)
        .ok_or_else(|| TrimError{ name: record_name(record) })?;

    *record.cigar_mut() = Cigar::from(trimmed);
    *record.sequence_mut() = Sequence::from(seq);
    *record.quality_scores_mut() = QualityScores::from(qual);
    *record.alignment_start_mut() = Some(new_start);

    Ok(true)
}

/// Updates the mate positions and template lengths of a trimmed pair.
///
/// The edit distance no longer describes the trimmed reads and is removed.
fn fix_mates(
    read1: &mut RecordBuf,
    read2: &mut RecordBuf,
) -> Result<(), E> {
    let mut bounds: Vec<(usize, usize)> = Vec::with_capacity(2);
    for read in [&*read1, &*read2] {
        let start = read.alignment_start().map(|x| x.get() - 1).unwrap_or(0);
        bounds.push((start, start + reference_len(read.cigar().as_ref())?));
    }
    let template_start = bounds[0].0.min(bounds[1].0);
    let template_end = bounds[0].1.max(bounds[1].1);
    let template_len = i32::try_from(template_end - template_start)?;

    *read1.mate_alignment_start_mut() = read2.alignment_start();
    *read2.mate_alignment_start_mut() = read1.alignment_start();

    for read in [read1, read2] {
        *read.template_length_mut() = if read.flags().is_reverse_complemented() { -template_len } else { template_len };
        read.data_mut().remove(&Tag::EDIT_DISTANCE);
    }
    Ok(())
}

/// Filters read pairs from `records` into `good_out` and `trash_out`.
///
/// `ref_len` is the length of the fragment reference the reads are mapped to.
/// The writers must already contain the header.
///
/// Returns a [FilterSummary] with one entry per examined pair.
///
pub fn filter_pairs<I, W1, W2>(
    records: I,
    header: &sam::Header,
    ref_len: usize,
    params: &FilterParams,
    good_out: &mut W1,
    trash_out: &mut W2,
) -> Result<FilterSummary, E>
where
    I: Iterator<Item = std::io::Result<RecordBuf>>,
    W1: sam::alignment::io::Write + ?Sized,
    W2: sam::alignment::io::Write + ?Sized,
{
    let mut summary = FilterSummary::default();

    for (pair_index, pair) in ReadPairs::new(records).enumerate() {
        if let Some(max_reads) = params.max_reads {
            if 2 * pair_index >= max_reads {
                break;
            }
        }
        if (pair_index + 1) % 10000 == 0 {
            debug!("{} read pairs", pair_index + 1);
        }

        let (read1, read2) = pair?;
        if read1.name() != read2.name() {
            return Err(Box::new(MismatchedPairNames{ pair_index, name1: record_name(&read1), name2: record_name(&read2) }));
        }

        let mut class = classify_pair(&read1, &read2, ref_len, params)?;
        let mut reads = (read1, read2);

        if class == PairClass::Good && params.trim {
            let mut trimmed = reads.clone();
            if trim_record(&mut trimmed.0, params)? && trim_record(&mut trimmed.1, params)? {
                fix_mates(&mut trimmed.0, &mut trimmed.1)?;
                reads = trimmed;
            } else {
                class = PairClass::BadCigar;
            }
        }

        trace!("Read pair {}: {:?}", record_name(&reads.0), class);
        summary.add(class);

        if class == PairClass::Good {
            good_out.write_alignment_record(header, &reads.0)?;
            good_out.write_alignment_record(header, &reads.1)?;
        } else {
            trash_out.write_alignment_record(header, &reads.0)?;
            trash_out.write_alignment_record(header, &reads.1)?;
        }
    }

    info!("{}", summary);

    Ok(summary)
}

/// Filters the mapped reads in `input` into `good_path` and `trash_path`.
///
/// `ref_len` defaults to the header length of the first reference sequence.
///
pub fn filter_file<P: AsRef<Path>>(
    input: P,
    ref_len: Option<usize>,
    good_path: P,
    trash_path: P,
    params: &FilterParams,
) -> Result<FilterSummary, E> {
    let reader = AlignmentReader::from_path(input.as_ref())?;
    let header = reader.header().clone();
    let ref_len = match ref_len {
        Some(len) => len,
        None => reader.reference_len(0).unwrap_or(0),
    };
    debug!("Reference length: {}", ref_len);

    let mut good_out = create_writer(good_path.as_ref(), &header)?;
    let mut trash_out = create_writer(trash_path.as_ref(), &header)?;

    let summary = filter_pairs(reader, &header, ref_len, params, good_out.as_mut(), trash_out.as_mut())?;

    good_out.finish(&header)?;
    trash_out.finish(&header)?;

    Ok(summary)
}

// Tests
#[cfg(test)]
mod tests {
    use crate::alignment::AlignmentReader;
    use std::io::Cursor;

    fn sam_line(name: &str, flag: u16, pos: usize, cigar: &str, len: usize, tags: &str) -> String {
        let seq = "ACGT".repeat(len / 4 + 1)[0..len].to_string();
        let qual = "I".repeat(len);
        let rname = if pos == 0 { "*" } else { "F1" };
        let mut line = format!("{}\t{}\t{}\t{}\t60\t{}\t=\t1\t0\t{}\t{}", name, flag, rname, pos, cigar, seq, qual);
        if !tags.is_empty() {
            line += "\t";
            line += tags;
        }
        line += "\n";
        line
    }

    fn reader_from(lines: &[String]) -> AlignmentReader {
        let mut data = String::from("@HD\tVN:1.6\n@SQ\tSN:F1\tLN:200\n");
        lines.iter().for_each(|line| data += line);
        AlignmentReader::from_sam(Cursor::new(data.into_bytes())).unwrap()
    }

    #[test]
    fn filter_pairs_classes() {
        use super::{filter_pairs, FilterParams, FilterSummary};
        use noodles_sam as sam;

        let lines = vec![
            // good
            sam_line("p1", 99, 1, "100M", 100, ""),
            sam_line("p1", 147, 101, "100M", 100, ""),
            // unmapped
            sam_line("p2", 77, 0, "*", 8, ""),
            sam_line("p2", 141, 0, "*", 8, ""),
            // not properly paired
            sam_line("p3", 97, 1, "100M", 100, ""),
            sam_line("p3", 145, 101, "100M", 100, ""),
            // insertion at the fragment start
            sam_line("p4", 99, 1, "2I98M", 100, ""),
            sam_line("p4", 147, 101, "100M", 100, ""),
            // insertion at the fragment end
            sam_line("p5", 99, 1, "100M", 100, ""),
            sam_line("p5", 147, 103, "98M2I", 100, ""),
        ];
        let reader = reader_from(&lines);
        let header = reader.header().clone();

        let mut good_out = sam::io::Writer::new(Vec::new());
        let mut trash_out = sam::io::Writer::new(Vec::new());
        let got = filter_pairs(reader, &header, 200, &FilterParams::default(), &mut good_out, &mut trash_out).unwrap();

        let expected = FilterSummary{ good: 1, unmapped: 1, unpaired: 1, mutator: 0, mismapped_edge: 2, bad_cigar: 0 };
        assert_eq!(got, expected);

        let good_text = String::from_utf8(good_out.get_ref().clone()).unwrap();
        let trash_text = String::from_utf8(trash_out.get_ref().clone()).unwrap();
        assert_eq!(good_text.lines().count(), 2);
        assert!(good_text.lines().all(|line| line.starts_with("p1\t")));
        assert_eq!(trash_text.lines().count(), 8);
    }

    #[test]
    fn classify_pair_clipped_edge() {
        use super::{classify_pair, FilterParams, PairClass};

        let lines = vec![
            sam_line("p1", 99, 1, "100M", 100, ""),
            // clipped bases reach the fragment end before the insertion
            sam_line("p1", 147, 101, "98M2S2I", 102, ""),
        ];
        let mut reader = reader_from(&lines);
        let read1 = reader.next().unwrap().unwrap();
        let read2 = reader.next().unwrap().unwrap();

        let got = classify_pair(&read1, &read2, 200, &FilterParams::default()).unwrap();
        assert_eq!(got, PairClass::MismappedEdge);

        let got = classify_pair(&read1, &read2, 202, &FilterParams::default()).unwrap();
        assert_eq!(got, PairClass::Good);
    }

    #[test]
    fn filter_pairs_mismatches() {
        use super::{filter_pairs, FilterParams};
        use noodles_sam as sam;

        let lines = vec![
            sam_line("p1", 99, 1, "100M", 100, "NM:i:30"),
            sam_line("p1", 147, 101, "100M", 100, "NM:i:25"),
            sam_line("p2", 99, 1, "100M", 100, "NM:i:2"),
            sam_line("p2", 147, 101, "100M", 100, "NM:i:1"),
        ];
        let reader = reader_from(&lines);
        let header = reader.header().clone();
        let params = FilterParams{ max_mismatches: Some(50), ..Default::default() };

        let mut good_out = sam::io::Writer::new(Vec::new());
        let mut trash_out = sam::io::Writer::new(Vec::new());
        let got = filter_pairs(reader, &header, 200, &params, &mut good_out, &mut trash_out).unwrap();

        assert_eq!(got.mutator, 1);
        assert_eq!(got.good, 1);
    }

    #[test]
    fn filter_pairs_different_names() {
        use super::{filter_pairs, FilterParams};
        use noodles_sam as sam;

        let lines = vec![
            sam_line("p1", 99, 1, "100M", 100, ""),
            sam_line("p2", 147, 101, "100M", 100, ""),
        ];
        let reader = reader_from(&lines);
        let header = reader.header().clone();

        let mut good_out = sam::io::Writer::new(Vec::new());
        let mut trash_out = sam::io::Writer::new(Vec::new());
        let got = filter_pairs(reader, &header, 200, &FilterParams::default(), &mut good_out, &mut trash_out);

        assert!(got.is_err());
    }

    #[test]
    fn filter_pairs_max_reads() {
        use super::{filter_pairs, FilterParams};
        use noodles_sam as sam;

        let lines = vec![
            sam_line("p1", 99, 1, "100M", 100, ""),
            sam_line("p1", 147, 101, "100M", 100, ""),
            sam_line("p2", 99, 1, "100M", 100, ""),
            sam_line("p2", 147, 101, "100M", 100, ""),
        ];
        let reader = reader_from(&lines);
        let header = reader.header().clone();
        let params = FilterParams{ max_reads: Some(2), ..Default::default() };

        let mut good_out = sam::io::Writer::new(Vec::new());
        let mut trash_out = sam::io::Writer::new(Vec::new());
        let got = filter_pairs(reader, &header, 200, &params, &mut good_out, &mut trash_out).unwrap();

        assert_eq!(got.total(), 1);
    }

    #[test]
    fn filter_pairs_trim() {
        use super::{filter_pairs, FilterParams};
        use noodles_sam as sam;

        let lines = vec![
            // first good block preceded by an insertion: trimmed
            sam_line("p1", 99, 1, "10M2I88M", 100, "NM:i:2"),
            sam_line("p1", 147, 101, "100M", 100, "NM:i:0"),
            // no good blocks in read 2
            sam_line("p2", 99, 1, "100M", 100, ""),
            sam_line("p2", 147, 101, "20M1D20M", 40, ""),
        ];
        let reader = reader_from(&lines);
        let header = reader.header().clone();
        let params = FilterParams{ trim: true, ..Default::default() };

        let mut good_out = sam::io::Writer::new(Vec::new());
        let mut trash_out = sam::io::Writer::new(Vec::new());
        let got = filter_pairs(reader, &header, 200, &params, &mut good_out, &mut trash_out).unwrap();

        assert_eq!(got.good, 1);
        assert_eq!(got.bad_cigar, 1);

        let good_text = String::from_utf8(good_out.get_ref().clone()).unwrap();
        let first: Vec<&str> = good_text.lines().next().unwrap().split('\t').collect();
        assert_eq!(first[3], "14");
        assert_eq!(first[5], "85M");
        assert_eq!(first[9].len(), 85);
        assert_eq!(first[10].len(), 85);
        // mate fields follow the trimmed starts, NM is dropped
        assert_eq!(first[7], "101");
        assert_eq!(first[8], "187");
        assert_eq!(first.len(), 11);
        let second: Vec<&str> = good_text.lines().nth(1).unwrap().split('\t').collect();
        assert_eq!(second[3], "101");
        assert_eq!(second[7], "14");
        assert_eq!(second[8], "-187");
        assert_eq!(second.len(), 11);
    }

    #[test]
    fn trim_record_untouched_without_good_blocks() {
        use super::{trim_record, FilterParams};

        let lines = vec![sam_line("p1", 99, 1, "20M", 20, "")];
        let mut reader = reader_from(&lines);
        let mut record = reader.next().unwrap().unwrap();
        let before = record.clone();

        let got = trim_record(&mut record, &FilterParams::default()).unwrap();

        assert!(!got);
        assert_eq!(record, before);
    }

    #[test]
    fn filter_file_sam() {
        use super::{filter_file, FilterParams};

        let dir = std::env::temp_dir().join("hivwholeseq_filter_file_sam");
        std::fs::create_dir_all(&dir).unwrap();
        let mut data = String::from("@HD\tVN:1.6\n@SQ\tSN:F1\tLN:200\n");
        data += &sam_line("p1", 99, 1, "100M", 100, "");
        data += &sam_line("p1", 147, 101, "100M", 100, "");
        data += &sam_line("p2", 77, 0, "*", 8, "");
        data += &sam_line("p2", 141, 0, "*", 8, "");
        std::fs::write(dir.join("mapped.sam"), data).unwrap();

        let got = filter_file(dir.join("mapped.sam"), None, dir.join("filtered.sam"), dir.join("trashed.sam"), &FilterParams::default()).unwrap();
        assert_eq!(got.good, 1);
        assert_eq!(got.unmapped, 1);

        let good = AlignmentReader::from_path(dir.join("filtered.sam")).unwrap();
        assert_eq!(good.reference_len(0), Some(200));
        assert_eq!(good.count(), 2);
        let trashed = AlignmentReader::from_path(dir.join("trashed.sam")).unwrap();
        assert_eq!(trashed.count(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
