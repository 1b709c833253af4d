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

//! Selective sweeps and the mutations around them.
//!
//! A sweep is an allele that is rare (below 5%) at the first and nearly
//! fixed (above 95%) at the last time point of a site. Only time points
//! where the site is not masked count.
//!
//! [mutation_table] lists every single nucleotide change away from the
//! initial consensus at sites that start out fixed, with its codon effect,
//! its mutation class and whether it swept.
//!
use std::collections::HashSet;
use std::io::Write;

use crate::sequence::codon_at;
use crate::sequence::codon_effect;
use crate::sequence::consensus_indices;
use crate::sequence::entropy;
use crate::sequence::mutation_class;
use crate::sequence::CodonEffect;
use crate::sequence::MutationClass;
use crate::ALPHABET;
use crate::GAP_INDEX;
use crate::N_ALLELES;
use crate::N_INDEX;

type E = Box<dyn std::error::Error>;

/// Allele frequencies indexed `[time point][position]`, `None` where masked.
pub type FrequencyTrajectories = [Vec<Option<[f64; N_ALLELES]>>];

/// Unmasked time points of site `pos` as (time index, frequencies).
fn site_trajectory(
    freqs: &FrequencyTrajectories,
    pos: usize,
) -> Vec<(usize, [f64; N_ALLELES])> {
    freqs.iter().enumerate()
        .filter_map(|(idx, sample)| sample.get(pos).copied().flatten().map(|nu| (idx, nu)))
        .collect()
}

fn n_sites(freqs: &FrequencyTrajectories) -> usize {
    freqs.iter().map(|x| x.len()).max().unwrap_or(0)
}

/// Site and allele index of every sweep.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::sweeps::find_sweeps;
///
/// let freqs = vec![
///     vec![Some([1.0, 0.0, 0.0, 0.0, 0.0, 0.0]), Some([0.0, 0.0, 1.0, 0.0, 0.0, 0.0])],
///     vec![Some([0.02, 0.98, 0.0, 0.0, 0.0, 0.0]), Some([0.0, 0.0, 1.0, 0.0, 0.0, 0.0])],
/// ];
///
/// assert_eq!(find_sweeps(&freqs), vec![(0, 1)]);
/// ```
///
pub fn find_sweeps(
    freqs: &FrequencyTrajectories,
) -> Vec<(usize, usize)> {
    let mut res: Vec<(usize, usize)> = Vec::new();
    for pos in 0..n_sites(freqs) {
        let traj = site_trajectory(freqs, pos);
        let (Some(first), Some(last)) = (traj.first(), traj.last()) else {
            continue
        };
        for allele in 0..N_ALLELES {
            if first.1[allele] < 0.05 && last.1[allele] > 0.95 {
                res.push((pos, allele));
            }
        }
    }
    res
}

/// Consensus at the first unmasked time point of each site, `N` if never covered.
pub fn initial_consensus(
    freqs: &FrequencyTrajectories,
) -> Vec<u8> {
    (0..n_sites(freqs)).map(|pos| {
        match site_trajectory(freqs, pos).first() {
            Some((_, nu)) => ALPHABET[consensus_indices(&[*nu])[0]],
            None => ALPHABET[N_INDEX],
        }
    }).collect()
}

/// One mutation at one time point.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRow {
    pub pos: usize,
    pub anc: u8,
    pub der: u8,
    pub codon_anc: String,
    pub codon_der: String,
    pub effect: CodonEffect,
    pub class: MutationClass,
    pub sweep: bool,
    /// Entropy (bits) of the time averaged allele frequencies at the site.
    pub entropy: f64,
    pub time: f64,
    pub frequency: f64,
}

/// Mutations away from the initial consensus at initially fixed sites.
///
/// Sites whose consensus is not an ACGT base, sites below 95% consensus
/// frequency at the first unmasked time point and codons with gaps are
/// skipped. `times` holds one time per time point of `freqs`.
///
pub fn mutation_table(
    freqs: &FrequencyTrajectories,
    times: &[f64],
) -> Vec<MutationRow> {
    let sweeps: HashSet<(usize, usize)> = find_sweeps(freqs).into_iter().collect();
    let consensus = initial_consensus(freqs);

    let mut rows: Vec<MutationRow> = Vec::new();
    for (pos, anc) in consensus.iter().enumerate() {
        let ianc = crate::allele_index(*anc);
        if ianc >= GAP_INDEX {
            continue;
        }
        let traj = site_trajectory(freqs, pos);
        if traj.is_empty() || traj[0].1[ianc] < 0.95 {
            continue;
        }
        let Some(codon_anc) = codon_at(&consensus, pos) else {
            continue
        };
        if codon_anc.contains(&b'-') {
            continue;
        }

        let mut mean = [0.0; N_ALLELES];
        traj.iter().for_each(|(_, nu)| mean.iter_mut().zip(nu.iter()).for_each(|(x, y)| *x += y / traj.len() as f64));
        let site_entropy = entropy(&mean);

        for (ider, der) in ALPHABET.iter().take(GAP_INDEX).enumerate() {
            if ider == ianc {
                continue;
            }
            let (Some(effect), Some(class)) = (codon_effect(&consensus, pos, *der), mutation_class(*anc, *der)) else {
                continue
            };
            let mut codon_der = codon_anc.to_vec();
            codon_der[pos % 3] = *der;

            for (idx, nu) in traj.iter() {
                rows.push(MutationRow{
                    pos,
                    anc: *anc,
                    der: *der,
                    codon_anc: String::from_utf8_lossy(codon_anc).to_string(),
                    codon_der: String::from_utf8_lossy(&codon_der).to_string(),
                    effect,
                    class,
                    sweep: sweeps.contains(&(pos, ider)),
                    entropy: site_entropy,
                    time: times.get(*idx).copied().unwrap_or(f64::NAN),
                    frequency: nu[ider],
                });
            }
        }
    }
    rows
}

/// Mean site entropy of sites with and without a sweep.
pub fn entropy_of_sweeps(
    rows: &[MutationRow],
) -> (Option<f64>, Option<f64>) {
    let mut sites: Vec<(usize, bool, f64)> = Vec::new();
    for row in rows.iter() {
        match sites.iter_mut().find(|x| x.0 == row.pos) {
            Some(site) => site.1 |= row.sweep,
            None => sites.push((row.pos, row.sweep, row.entropy)),
        }
    }
    let mean = |sweep: bool| {
        let values: Vec<f64> = sites.iter().filter(|x| x.1 == sweep).map(|x| x.2).collect();
        (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
    };
    (mean(true), mean(false))
}

pub fn write_mutation_table_tsv<W: Write>(
    rows: &[MutationRow],
    conn: &mut W,
) -> Result<(), E> {
    conn.write_all(b"pos\tanc\tder\tmut\tcodanc\tcodder\tclass\ttr\tsweep\tentropy\ttime\taf\n")?;
    for row in rows.iter() {
        let line = format!(
            "{}\t{}\t{}\t{}->{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            row.pos, row.anc as char, row.der as char, row.anc as char, row.der as char,
            row.codon_anc, row.codon_der, row.effect.name(), row.class.name(),
            row.sweep, row.entropy, row.time, row.frequency,
        );
        conn.write_all(line.as_bytes())?;
    }
    Ok(())
}

// Tests
#[cfg(test)]
mod tests {

    fn site(a: f64, c: f64, g: f64, t: f64) -> Option<[f64; 6]> {
        Some([a, c, g, t, 0.0, 0.0])
    }

    // Codon CTT (Leu) then ATG (Met), three time points.
    fn freqs() -> Vec<Vec<Option<[f64; 6]>>> {
        vec![
            vec![site(0.0, 1.0, 0.0, 0.0), site(0.0, 0.0, 0.0, 1.0), site(0.0, 0.0, 0.0, 1.0), site(1.0, 0.0, 0.0, 0.0), site(0.0, 0.0, 0.0, 1.0), site(0.0, 0.0, 1.0, 0.0)],
            vec![site(0.0, 1.0, 0.0, 0.0), None, site(0.0, 0.5, 0.0, 0.5), site(1.0, 0.0, 0.0, 0.0), site(0.0, 0.0, 0.0, 1.0), site(0.0, 0.0, 0.5, 0.5)],
            vec![site(0.0, 1.0, 0.0, 0.0), site(0.0, 0.0, 0.0, 1.0), site(0.0, 0.97, 0.0, 0.03), site(1.0, 0.0, 0.0, 0.0), site(0.0, 0.0, 0.0, 1.0), site(0.0, 0.0, 0.9, 0.1)],
        ]
    }

    #[test]
    fn find_sweeps() {
        use super::find_sweeps;

        let got = find_sweeps(&freqs());

        assert_eq!(got, vec![(2, 1)]);
    }

    #[test]
    fn find_sweeps_masked_endpoints() {
        use super::find_sweeps;

        let freqs = vec![
            vec![None],
            vec![site(0.01, 0.99, 0.0, 0.0)],
            vec![site(0.99, 0.01, 0.0, 0.0)],
            vec![None],
        ];

        assert_eq!(find_sweeps(&freqs), vec![(0, 0)]);
    }

    #[test]
    fn initial_consensus() {
        use super::initial_consensus;

        let mut freqs = freqs();
        freqs[0][1] = None;

        assert_eq!(initial_consensus(&freqs), b"CTTATG".to_vec());
        assert_eq!(initial_consensus(&[vec![None]]), b"N".to_vec());
    }

    #[test]
    fn mutation_table() {
        use super::mutation_table;
        use crate::sequence::{CodonEffect, MutationClass};

        let times = vec![0.0, 50.0, 100.0];
        let rows = mutation_table(&freqs(), &times);

        // 6 sites x 3 derived alleles, site 1 has two unmasked time points.
        assert_eq!(rows.len(), 3 * 3 * 5 + 3 * 2);

        let sweep: Vec<_> = rows.iter().filter(|x| x.sweep).collect();
        assert_eq!(sweep.len(), 3);
        assert!(sweep.iter().all(|x| x.pos == 2 && x.der == b'C'));
        // CTT -> CTC is Leu -> Leu
        assert_eq!(sweep[0].effect, CodonEffect::Synonymous);
        assert_eq!(sweep[0].class, MutationClass::Transition);
        assert_eq!(sweep[0].codon_anc, "CTT");
        assert_eq!(sweep[0].codon_der, "CTC");
        assert_eq!(sweep[2].time, 100.0);
        assert_eq!(sweep[2].frequency, 0.97);

        let met: Vec<_> = rows.iter().filter(|x| x.pos == 5 && x.der == b'T').collect();
        assert_eq!(met[1].frequency, 0.5);
        assert_eq!(met[0].effect, CodonEffect::NonSynonymous);
        assert_eq!(met[0].class, MutationClass::Transversion);
    }

    #[test]
    fn mutation_table_skips_gaps_and_polymorphic() {
        use super::mutation_table;

        let freqs = vec![vec![
            site(1.0, 0.0, 0.0, 0.0),
            Some([0.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            site(0.0, 0.0, 1.0, 0.0),
            site(0.5, 0.5, 0.0, 0.0),
            site(0.0, 0.0, 0.0, 1.0),
            site(0.0, 0.0, 1.0, 0.0),
        ]];

        let rows = mutation_table(&freqs, &[0.0]);

        assert!(rows.iter().all(|x| x.pos >= 4));
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn entropy_of_sweeps() {
        use super::{entropy_of_sweeps, mutation_table};

        let rows = mutation_table(&freqs(), &[0.0, 50.0, 100.0]);

        let (sweep, other) = entropy_of_sweeps(&rows);

        assert!(sweep.unwrap() > 0.0);
        assert!(other.unwrap() >= 0.0);
        assert!(sweep.unwrap() > other.unwrap());
    }
}
