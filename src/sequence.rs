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

//! Nucleotide sequence utilities: translation, mutation classes, consensus
//! and diversity.
use crate::ALPHABET;
use crate::N_ALLELES;

// Standard genetic code, codons ordered TTT, TTC, TTA, TTG, TCT, ...
const GENETIC_CODE: &[u8; 64] = b"FFLLSSSSYY**CC*WLLLLPPPPHHQQRRRRIIIMTTTTNNKKSSRRVVVVAAAADDEEGGGG";

/// Transition (purine to purine, pyrimidine to pyrimidine) or transversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationClass {
    Transition,
    Transversion,
}

impl MutationClass {
    pub fn name(&self) -> &'static str {
        match self {
            MutationClass::Transition => "ts",
            MutationClass::Transversion => "tv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodonEffect {
    Synonymous,
    NonSynonymous,
}

impl CodonEffect {
    pub fn name(&self) -> &'static str {
        match self {
            CodonEffect::Synonymous => "syn",
            CodonEffect::NonSynonymous => "nonsyn",
        }
    }
}

fn base_rank(base: u8) -> Option<usize> {
    match base.to_ascii_uppercase() {
        b'T' => Some(0),
        b'C' => Some(1),
        b'A' => Some(2),
        b'G' => Some(3),
        _ => None,
    }
}

/// Amino acid of a codon, `X` if it contains anything but ACGT.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::sequence::translate_codon;
///
/// assert_eq!(translate_codon(b"ATG"), b'M');
/// assert_eq!(translate_codon(b"TAA"), b'*');
/// assert_eq!(translate_codon(b"A-G"), b'X');
/// ```
///
pub fn translate_codon(codon: &[u8]) -> u8 {
    if codon.len() != 3 {
        return b'X'
    }
    match (base_rank(codon[0]), base_rank(codon[1]), base_rank(codon[2])) {
        (Some(x), Some(y), Some(z)) => GENETIC_CODE[16 * x + 4 * y + z],
        _ => b'X',
    }
}

/// Translates all complete codons of `seq`.
pub fn translate(seq: &[u8]) -> Vec<u8> {
    seq.chunks_exact(3).map(translate_codon).collect()
}

/// Mutation class of `anc` -> `der`, `None` unless both are distinct ACGT bases.
pub fn mutation_class(anc: u8, der: u8) -> Option<MutationClass> {
    let anc = anc.to_ascii_uppercase();
    let der = der.to_ascii_uppercase();
    if anc == der || base_rank(anc).is_none() || base_rank(der).is_none() {
        return None
    }
    let purine = |x: u8| x == b'A' || x == b'G';
    if purine(anc) == purine(der) {
        Some(MutationClass::Transition)
    } else {
        Some(MutationClass::Transversion)
    }
}

/// The codon containing `pos` in `seq` (reading frame starts at 0).
pub fn codon_at(seq: &[u8], pos: usize) -> Option<&[u8]> {
    let start = pos - pos % 3;
    seq.get(start..(start + 3))
}

/// Effect of replacing the base at `pos` of `seq` with `der`.
///
/// Codons with gaps count as non-synonymous. Returns `None` if `pos` is not
/// part of a complete codon.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::sequence::{codon_effect, CodonEffect};
///
/// // CTT -> CTC is Leu -> Leu
/// assert_eq!(codon_effect(b"ATGCTT", 5, b'C'), Some(CodonEffect::Synonymous));
/// // ATG -> ACG is Met -> Thr
/// assert_eq!(codon_effect(b"ATGCTT", 1, b'C'), Some(CodonEffect::NonSynonymous));
/// ```
///
pub fn codon_effect(seq: &[u8], pos: usize, der: u8) -> Option<CodonEffect> {
    let anc = codon_at(seq, pos)?;
    let mut mutated = anc.to_vec();
    mutated[pos % 3] = der;
    if anc.contains(&b'-') || mutated.contains(&b'-') || translate_codon(anc) != translate_codon(&mutated) {
        Some(CodonEffect::NonSynonymous)
    } else {
        Some(CodonEffect::Synonymous)
    }
}

/// Index of the most common allele at each site, the first one on ties.
pub fn consensus_indices<T: PartialOrd + Copy>(sites: &[[T; N_ALLELES]]) -> Vec<usize> {
    sites.iter().map(|site| {
        let mut best = 0;
        for (idx, x) in site.iter().enumerate().skip(1) {
            if *x > site[best] {
                best = idx;
            }
        }
        best
    }).collect()
}

/// Consensus sequence of per-site allele counts or frequencies.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::sequence::consensus;
///
/// let counts: Vec<[u32; 6]> = vec![[10, 0, 0, 1, 0, 0], [0, 0, 0, 0, 5, 0], [0, 3, 3, 0, 0, 0]];
///
/// assert_eq!(consensus(&counts), b"A-C".to_vec());
/// ```
///
pub fn consensus<T: PartialOrd + Copy>(sites: &[[T; N_ALLELES]]) -> Vec<u8> {
    consensus_indices(sites).into_iter().map(|x| ALPHABET[x]).collect()
}

/// Shannon entropy (bits) of the allele frequencies at a site.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::sequence::entropy;
///
/// assert_eq!(entropy(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0]), 0.0);
/// assert!((entropy(&[0.5, 0.5, 0.0, 0.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
/// ```
///
pub fn entropy(frequencies: &[f64; N_ALLELES]) -> f64 {
    -frequencies.iter().filter(|x| **x > 0.0).map(|x| x * x.log2()).sum::<f64>()
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn translate() {
        use super::translate;

        assert_eq!(translate(b"ATGGCCTGGTAGCA"), b"MAW*".to_vec());
        assert_eq!(translate(b"atgNNN"), b"MX".to_vec());
    }

    #[test]
    fn mutation_class() {
        use super::{mutation_class, MutationClass};

        assert_eq!(mutation_class(b'A', b'G'), Some(MutationClass::Transition));
        assert_eq!(mutation_class(b'C', b'T'), Some(MutationClass::Transition));
        assert_eq!(mutation_class(b'A', b'T'), Some(MutationClass::Transversion));
        assert_eq!(mutation_class(b'G', b'C'), Some(MutationClass::Transversion));
        assert_eq!(mutation_class(b'A', b'A'), None);
        assert_eq!(mutation_class(b'A', b'-'), None);
    }

    #[test]
    fn codon_effect_gap_and_incomplete() {
        use super::{codon_effect, CodonEffect};

        assert_eq!(codon_effect(b"ATGCT", 4, b'A'), None);
        assert_eq!(codon_effect(b"ATGCTT", 3, b'-'), Some(CodonEffect::NonSynonymous));
        assert_eq!(codon_effect(b"A-GCTT", 0, b'C'), Some(CodonEffect::NonSynonymous));
    }

    #[test]
    fn consensus_indices_ties() {
        use super::consensus_indices;

        let freqs: Vec<[f64; 6]> = vec![[0.0, 0.5, 0.5, 0.0, 0.0, 0.0], [0.0; 6]];

        assert_eq!(consensus_indices(&freqs), vec![1, 0]);
    }

    #[test]
    fn entropy_uniform() {
        use super::entropy;

        let got = entropy(&[0.25, 0.25, 0.25, 0.25, 0.0, 0.0]);

        assert!((got - 2.0).abs() < 1e-12);
    }
}
