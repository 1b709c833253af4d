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

//! Good CIGAR blocks and edge trimming.
//!
//! Mismapped read edges tend to show up as short matches flanked by indels.
//! A CIGAR block is *good* if it is a match of at least `match_len_min`
//! bases. Everything between the first and the last good block is kept too,
//! so a read is reduced to one contiguous good stretch.
//!
//! The first and last good blocks are additionally shortened by a few bases
//! unless they are at the edge of the read, because the bases right next to an
//! indel are the least reliable.
//!
use std::ops::Range;

use noodles_sam::alignment::record::cigar::op::Kind;
use noodles_sam::alignment::record::cigar::Op;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct UnsupportedCigarOp {
    pub kind: Kind,
}

impl std::fmt::Display for UnsupportedCigarOp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "CIGAR operation {:?} not supported", self.kind)
    }
}

impl std::error::Error for UnsupportedCigarOp {}

/// Good blocks of a CIGAR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoodBlocks {
    /// One flag per CIGAR operation.
    pub good: Vec<bool>,
    /// Index of the first good block.
    pub first: Option<usize>,
    /// Index of the last good block.
    pub last: Option<usize>,
}

impl GoodBlocks {
    pub fn any(&self) -> bool {
        self.first.is_some()
    }
}

/// Read and reference intervals covered by the good blocks.
///
/// Both intervals are 0-based and half-open. The reference interval is in
/// the coordinates of the alignment start passed to [good_range].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoodRange {
    pub read: Range<usize>,
    pub reference: Range<usize>,
}

pub fn is_match(kind: Kind) -> bool {
    matches!(kind, Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch)
}

/// Returns whether `kind` consumes (read, reference) bases.
pub fn consumes(kind: Kind) -> Result<(bool, bool), E> {
    match kind {
        Kind::Match | Kind::SequenceMatch | Kind::SequenceMismatch => Ok((true, true)),
        Kind::Insertion | Kind::SoftClip => Ok((true, false)),
        Kind::Deletion => Ok((false, true)),
        Kind::HardClip => Ok((false, false)),
        _ => Err(Box::new(UnsupportedCigarOp{ kind })),
    }
}

/// Number of reference bases covered by `ops`.
pub fn reference_len(ops: &[Op]) -> Result<usize, E> {
    let mut len = 0;
    for op in ops {
        if consumes(op.kind())?.1 {
            len += op.len();
        }
    }
    Ok(len)
}

/// Number of read bases covered by `ops`, soft clips included.
pub fn read_len(ops: &[Op]) -> Result<usize, E> {
    let mut len = 0;
    for op in ops {
        if consumes(op.kind())?.0 {
            len += op.len();
        }
    }
    Ok(len)
}

/// Finds the good blocks of `ops`.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::cigar::good_blocks;
/// use noodles_sam::alignment::record::cigar::op::Kind;
/// use noodles_sam::alignment::record::cigar::Op;
///
/// // 10M 2I 50M 1D 40M 3I 5M
/// let ops = vec![
///     Op::new(Kind::Match, 10), Op::new(Kind::Insertion, 2), Op::new(Kind::Match, 50),
///     Op::new(Kind::Deletion, 1), Op::new(Kind::Match, 40), Op::new(Kind::Insertion, 3),
///     Op::new(Kind::Match, 5),
/// ];
///
/// let blocks = good_blocks(&ops, 30);
///
/// assert_eq!(blocks.good, vec![false, false, true, true, true, false, false]);
/// assert_eq!(blocks.first, Some(2));
/// assert_eq!(blocks.last, Some(4));
/// ```
///
pub fn good_blocks(
    ops: &[Op],
    match_len_min: usize,
) -> GoodBlocks {
    let mut good: Vec<bool> = ops.iter().map(|op| {
        is_match(op.kind()) && op.len() >= match_len_min
    }).collect();

    let first = good.iter().position(|x| *x);
    let last = good.iter().rposition(|x| *x);

    if let (Some(first), Some(last)) = (first, last) {
        good[first..=last].iter_mut().for_each(|x| *x = true);
    }

    GoodBlocks{ good, first, last }
}

/// Left and right trims of the good block at `index`.
///
/// The first good block loses `trim_left` bases unless it starts the read,
/// and the last good block loses `trim_right` bases unless it ends the read.
pub fn edge_trims(
    blocks: &GoodBlocks,
    index: usize,
    n_ops: usize,
    trim_left: usize,
    trim_right: usize,
) -> (usize, usize) {
    let left = if blocks.first == Some(index) && index != 0 { trim_left } else { 0 };
    let right = if blocks.last == Some(index) && index + 1 != n_ops { trim_right } else { 0 };
    (left, right)
}

/// Computes the read and reference intervals of the good blocks.
///
/// `pos` is the 0-based alignment start of the read.
///
/// Returns None if there are no good blocks or if the trims consume the
/// whole good stretch.
///
pub fn good_range(
    ops: &[Op],
    pos: usize,
    match_len_min: usize,
    trim_left: usize,
    trim_right: usize,
) -> Result<Option<GoodRange>, E> {
    let blocks = good_blocks(ops, match_len_min);
    let (first, last) = match (blocks.first, blocks.last) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(None),
    };

    let mut read_pos = 0;
    let mut ref_pos = pos;
    let mut start = (0, pos);
    let mut end = (0, pos);

    for (idx, op) in ops.iter().enumerate() {
        if idx == first {
            start = (read_pos, ref_pos);
        }
        let (on_read, on_ref) = consumes(op.kind())?;
        if on_read {
            read_pos += op.len();
        }
        if on_ref {
            ref_pos += op.len();
        }
        if idx == last {
            end = (read_pos, ref_pos);
            break;
        }
    }

    let (left, _) = edge_trims(&blocks, first, ops.len(), trim_left, trim_right);
    let (_, right) = edge_trims(&blocks, last, ops.len(), trim_left, trim_right);
    if left > ops[first].len() || right > ops[last].len() {
        return Ok(None);
    }

    start = (start.0 + left, start.1 + left);
    end = (end.0.saturating_sub(right), end.1.saturating_sub(right));

    if start.0 >= end.0 {
        return Ok(None);
    }

    Ok(Some(GoodRange{ read: start.0..end.0, reference: start.1..end.1 }))
}

/// Restricts `ops` to the good blocks and applies the edge trims.
///
/// Returns None if there are no good blocks or if the trims consume the
/// whole good stretch, like [good_range].
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::cigar::trim_bad_edges;
/// use noodles_sam::alignment::record::cigar::op::Kind;
/// use noodles_sam::alignment::record::cigar::Op;
///
/// // 10M 2I 50M 1D 40M 3I 5M
/// let ops = vec![
///     Op::new(Kind::Match, 10), Op::new(Kind::Insertion, 2), Op::new(Kind::Match, 50),
///     Op::new(Kind::Deletion, 1), Op::new(Kind::Match, 40), Op::new(Kind::Insertion, 3),
///     Op::new(Kind::Match, 5),
/// ];
///
/// let got = trim_bad_edges(&ops, 30, 3, 3).unwrap();
/// let expected = vec![Op::new(Kind::Match, 47), Op::new(Kind::Deletion, 1), Op::new(Kind::Match, 37)];
///
/// assert_eq!(got, expected);
/// ```
///
pub fn trim_bad_edges(
    ops: &[Op],
    match_len_min: usize,
    trim_left: usize,
    trim_right: usize,
) -> Option<Vec<Op>> {
    let blocks = good_blocks(ops, match_len_min);
    let (first, last) = (blocks.first?, blocks.last?);

    let (left, _) = edge_trims(&blocks, first, ops.len(), trim_left, trim_right);
    let (_, right) = edge_trims(&blocks, last, ops.len(), trim_left, trim_right);

    let (head, tail) = (ops[first], ops[last]);
    if left > head.len() || right > tail.len() || (first == last && left + right >= head.len()) {
        return None;
    }

    let mut trimmed: Vec<Op> = ops[first..=last].to_vec();
    trimmed[0] = Op::new(head.kind(), head.len() - left);
    let n = trimmed.len();
    trimmed[n - 1] = Op::new(tail.kind(), trimmed[n - 1].len() - right);
    trimmed.retain(|op| op.len() > 0);

    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed)
}

// Tests
#[cfg(test)]
mod tests {
    use noodles_sam::alignment::record::cigar::op::Kind;
    use noodles_sam::alignment::record::cigar::Op;

    fn example_ops() -> Vec<Op> {
        // 10M 2I 50M 1D 40M 3I 5M
        vec![
            Op::new(Kind::Match, 10), Op::new(Kind::Insertion, 2), Op::new(Kind::Match, 50),
            Op::new(Kind::Deletion, 1), Op::new(Kind::Match, 40), Op::new(Kind::Insertion, 3),
            Op::new(Kind::Match, 5),
        ]
    }

    #[test]
    fn good_blocks_none() {
        use super::good_blocks;

        let ops = vec![Op::new(Kind::Match, 20), Op::new(Kind::Insertion, 1), Op::new(Kind::Match, 29)];
        let got = good_blocks(&ops, 30);

        assert_eq!(got.good, vec![false, false, false]);
        assert_eq!(got.first, None);
        assert!(!got.any());
    }

    #[test]
    fn good_blocks_single() {
        use super::good_blocks;

        let ops = vec![Op::new(Kind::Match, 20), Op::new(Kind::Insertion, 1), Op::new(Kind::Match, 80)];
        let got = good_blocks(&ops, 30);

        assert_eq!(got.good, vec![false, false, true]);
        assert_eq!(got.first, Some(2));
        assert_eq!(got.last, Some(2));
    }

    #[test]
    fn good_range_trimmed_both_sides() {
        use super::good_range;

        // read:      10 + 2 | 50 + 40 | 3 + 5
        // reference: 10     | 50 + 1 + 40 |  5
        let got = good_range(&example_ops(), 100, 30, 3, 3).unwrap().unwrap();

        assert_eq!(got.read, 15..99);
        assert_eq!(got.reference, 113..198);
    }

    #[test]
    fn good_range_full_read() {
        use super::good_range;

        let ops = vec![Op::new(Kind::Match, 150)];
        let got = good_range(&ops, 0, 30, 3, 3).unwrap().unwrap();

        assert_eq!(got.read, 0..150);
        assert_eq!(got.reference, 0..150);
    }

    #[test]
    fn good_range_no_good_blocks() {
        use super::good_range;

        let ops = vec![Op::new(Kind::Match, 10)];
        let got = good_range(&ops, 0, 30, 3, 3).unwrap();

        assert_eq!(got, None);
    }

    #[test]
    fn good_range_soft_clipped() {
        use super::good_range;

        let ops = vec![Op::new(Kind::SoftClip, 5), Op::new(Kind::Match, 60)];
        let got = good_range(&ops, 20, 30, 3, 3).unwrap().unwrap();

        assert_eq!(got.read, 8..65);
        assert_eq!(got.reference, 23..80);
    }

    #[test]
    fn unsupported_op() {
        use super::reference_len;

        let ops = vec![Op::new(Kind::Match, 10), Op::new(Kind::Skip, 100), Op::new(Kind::Match, 10)];
        let got = reference_len(&ops);

        assert!(got.is_err());
    }

    #[test]
    fn reference_and_read_len() {
        use super::{read_len, reference_len};

        assert_eq!(reference_len(&example_ops()).unwrap(), 106);
        assert_eq!(read_len(&example_ops()).unwrap(), 110);
    }

    #[test]
    fn trim_bad_edges_single_block() {
        use super::trim_bad_edges;

        let ops = vec![Op::new(Kind::Insertion, 2), Op::new(Kind::Match, 50), Op::new(Kind::Deletion, 4), Op::new(Kind::Match, 3)];
        let got = trim_bad_edges(&ops, 30, 3, 3).unwrap();

        assert_eq!(got, vec![Op::new(Kind::Match, 44)]);
    }

    #[test]
    fn trims_longer_than_good_stretch() {
        use super::{good_range, trim_bad_edges};

        // 5S 31M 5S with 20 bases trimmed from both inner edges
        let ops = vec![Op::new(Kind::SoftClip, 5), Op::new(Kind::Match, 31), Op::new(Kind::SoftClip, 5)];

        assert_eq!(good_range(&ops, 0, 30, 20, 20).unwrap(), None);
        assert_eq!(trim_bad_edges(&ops, 30, 20, 20), None);
        assert_eq!(trim_bad_edges(&ops, 30, 15, 15), Some(vec![Op::new(Kind::Match, 1)]));
        assert!(good_range(&ops, 0, 30, 15, 15).unwrap().is_some());

        // trim longer than the first of two good blocks
        let ops = vec![Op::new(Kind::Insertion, 1), Op::new(Kind::Match, 30), Op::new(Kind::Deletion, 1), Op::new(Kind::Match, 40)];

        assert_eq!(good_range(&ops, 0, 30, 35, 0).unwrap(), None);
        assert_eq!(trim_bad_edges(&ops, 30, 35, 0), None);
    }
}
