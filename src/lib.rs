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

//! hivwholeseq is a library and a command-line client for:
//!
//!   - Filtering read pairs mapped to an amplicon (fragment) reference.
//!   - Counting alleles, insertions and coverage per reference site.
//!   - Extracting random read pair subsamples from .fastq files.
//!   - Building allele count and frequency trajectories for patient time series.
//!   - Translating regions of interest into fragment coordinates.
//!   - Classifying mutations and finding selective sweeps.
//!
//! Alignments are read and written with
//! [noodles](https://github.com/zaeleus/noodles) (SAM and BAM), and sequences
//! with [needletail](https://github.com/onecodex/needletail).
//!
//! ## Usage
//!
//! ### Command line
//!
//! The hivwholeseq CLI supports the following subcommands:
//!   - `hivwholeseq filter` split mapped read pairs into good and trashed pairs.
//!   - `hivwholeseq count` count alleles and insertions from filtered reads.
//!   - `hivwholeseq subsample` extract a random subsample of read pairs.
//!   - `hivwholeseq trajectories` collect allele count/frequency trajectories of a patient.
//!   - `hivwholeseq roi` convert a region of interest to fragment coordinates.
//!   - `hivwholeseq sweeps` classify mutations along frequency trajectories.
//!
//! ### Rust API
//!
//! The API works on iterators over
//! [RecordBuf](noodles_sam::alignment::RecordBuf) records and structs that
//! implement [Read](std::io::Read) and/or [Write](std::io::Write), so that
//! everything can be driven from memory as well as from files.
//!
//!   - [filter::filter_pairs]: classify read pairs and write them to two writers.
//!   - [counts::count_alleles]: accumulate [AlleleCounts](counts::AlleleCounts) and [Inserts](counts::Inserts).
//!   - [subsample::subsample_pairs]: copy selected read pairs to two writers.
//!   - [trajectories::allele_frequency_trajectories]: allele frequencies with coverage masking.
//!
//! ## Alphabet and read types
//!
//! Alleles are stored in the order of [ALPHABET], `A C G T - N`. Reads are
//! split into four [read types](ReadType) by mate and strand, and all per-site
//! tensors are indexed `[read type][allele][position]`.
//!

use noodles_sam::alignment::record::Flags;

pub mod alignment;
pub mod cigar;
pub mod counts;
pub mod filenames;
pub mod filter;
pub mod patients;
pub mod reference;
pub mod roi;
pub mod sequence;
pub mod subsample;
pub mod sweeps;
pub mod trajectories;

/// Alleles in the order used by all count tensors.
pub const ALPHABET: [u8; 6] = *b"ACGT-N";

/// Number of alleles in [ALPHABET].
pub const N_ALLELES: usize = ALPHABET.len();

/// Index of the deletion allele `-` in [ALPHABET].
pub const GAP_INDEX: usize = 4;

/// Index of the ambiguous allele `N` in [ALPHABET].
pub const N_INDEX: usize = 5;

/// Number of [ReadType] variants.
pub const N_READ_TYPES: usize = 4;

/// Fragment names of the amplicon sequencing protocol.
pub const FRAGMENTS: [&str; 6] = ["F1", "F2", "F3", "F4", "F5", "F6"];

/// Index of `base` in [ALPHABET].
///
/// Lowercase bases are accepted. Anything outside the alphabet counts as `N`.
pub fn allele_index(base: u8) -> usize {
    match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        b'-' => GAP_INDEX,
        _ => N_INDEX,
    }
}

/// Read type of a paired-end read: mate and strand.
///
/// The numeric index is `2 * is_read2 + is_reverse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadType {
    Read1Forward,
    Read1Reverse,
    Read2Forward,
    Read2Reverse,
}

impl ReadType {
    pub const ALL: [ReadType; N_READ_TYPES] = [
        ReadType::Read1Forward,
        ReadType::Read1Reverse,
        ReadType::Read2Forward,
        ReadType::Read2Reverse,
    ];

    pub fn from_flags(flags: Flags) -> Self {
        match (flags.is_last_segment(), flags.is_reverse_complemented()) {
            (false, false) => ReadType::Read1Forward,
            (false, true) => ReadType::Read1Reverse,
            (true, false) => ReadType::Read2Forward,
            (true, true) => ReadType::Read2Reverse,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ReadType::Read1Forward => 0,
            ReadType::Read1Reverse => 1,
            ReadType::Read2Forward => 2,
            ReadType::Read2Reverse => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReadType::Read1Forward => "read1 f",
            ReadType::Read1Reverse => "read1 r",
            ReadType::Read2Forward => "read2 f",
            ReadType::Read2Reverse => "read2 r",
        }
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn allele_index() {
        use super::allele_index;

        let got: Vec<usize> = b"ACGT-Nacgtx".iter().map(|x| allele_index(*x)).collect();
        let expected: Vec<usize> = vec![0, 1, 2, 3, 4, 5, 0, 1, 2, 3, 5];

        assert_eq!(got, expected);
    }

    #[test]
    fn read_type_from_flags() {
        use super::ReadType;
        use noodles_sam::alignment::record::Flags;

        // 99: paired, proper, mate reverse, read1
        // 147: paired, proper, reverse, read2
        // 83: paired, proper, reverse, read1
        // 163: paired, proper, mate reverse, read2
        let got: Vec<ReadType> = [99_u16, 147, 83, 163].iter().map(|x| ReadType::from_flags(Flags::from(*x))).collect();
        let expected = vec![ReadType::Read1Forward, ReadType::Read2Reverse, ReadType::Read1Reverse, ReadType::Read2Forward];

        assert_eq!(got, expected);
        assert_eq!(got.iter().map(|x| x.index()).collect::<Vec<usize>>(), vec![0, 3, 1, 2]);
    }
}
