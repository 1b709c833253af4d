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

//! Single site statistics along a patient time series.
//!
//! A patient sample is usually amplified in two independent PCR reactions
//! (PCR1 and PCR2). [get_allele_count_trajectories] picks the count files of
//! each sample according to a [PcrPolicy] and sums them over read types into
//! per-site allele counts, one row per sample and PCR.
//!
//! Frequencies derived from these counts are masked (`None`) at sites with
//! too little coverage.
//!
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use log::debug;
use log::info;

use crate::counts::AlleleCounts;
use crate::counts::file::read_allele_counts_file;
use crate::filenames::patient_allele_counts_filename;
use crate::patients::SamplePat;
use crate::sequence::codon_effect;
use crate::sequence::consensus;
use crate::sequence::CodonEffect;
use crate::ALPHABET;
use crate::N_ALLELES;
use crate::N_READ_TYPES;

type E = Box<dyn std::error::Error>;

/// Frequencies below this are set to 0.
pub const FREQUENCY_FLOOR: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct InvalidPcrPolicy {
    pub value: u8,
}

impl std::fmt::Display for InvalidPcrPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "invalid PCR policy {} (expected 0, 1 or 2)", self.value)
    }
}

impl std::error::Error for InvalidPcrPolicy {}

#[derive(Debug, Clone)]
pub struct TrajectoryLengthMismatch {
    pub sample: String,
    pub expected: usize,
    pub got: usize,
}

impl std::fmt::Display for TrajectoryLengthMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "sample {} has counts for {} sites, expected {}", self.sample, self.got, self.expected)
    }
}

impl std::error::Error for TrajectoryLengthMismatch {}

/// Which PCR reactions of a sample enter the trajectories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PcrPolicy {
    /// Both PCR1 and PCR2, as separate time points.
    Both,
    /// PCR1 if available, PCR2 otherwise.
    #[default]
    Pcr1ElsePcr2,
    /// PCR1 only.
    Pcr1Only,
}

impl TryFrom<u8> for PcrPolicy {
    type Error = InvalidPcrPolicy;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PcrPolicy::Both),
            1 => Ok(PcrPolicy::Pcr1ElsePcr2),
            2 => Ok(PcrPolicy::Pcr1Only),
            _ => Err(InvalidPcrPolicy{ value }),
        }
    }
}

/// Count files of both PCR reactions of a sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCountFiles {
    pub sample: String,
    pub pcr1: PathBuf,
    pub pcr2: PathBuf,
}

impl SampleCountFiles {
    /// Existing files picked by `policy`, with their PCR number.
    pub fn select(&self, policy: PcrPolicy) -> Vec<(u8, &Path)> {
        let pcr1 = self.pcr1.is_file().then_some((1, self.pcr1.as_path()));
        let pcr2 = self.pcr2.is_file().then_some((2, self.pcr2.as_path()));
        match policy {
            PcrPolicy::Both => pcr1.into_iter().chain(pcr2).collect(),
            PcrPolicy::Pcr1ElsePcr2 => pcr1.or(pcr2).into_iter().collect(),
            PcrPolicy::Pcr1Only => pcr1.into_iter().collect(),
        }
    }
}

/// Count files of `samples` in the patient folder layout.
pub fn patient_count_files<P: AsRef<Path>>(
    root: P,
    patient: &str,
    samples: &[&SamplePat],
    fragment: &str,
    qual_min: u8,
) -> Vec<SampleCountFiles> {
    samples.iter().map(|sample| SampleCountFiles{
        sample: sample.name.clone(),
        pcr1: patient_allele_counts_filename(root.as_ref(), patient, &sample.name, 1, fragment, qual_min),
        pcr2: patient_allele_counts_filename(root.as_ref(), patient, &sample.name, 2, fragment, qual_min),
    }).collect()
}

/// Allele counts summed over read types, one entry per time point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountTrajectories {
    /// Sample name and PCR of each time point.
    pub samples: Vec<(String, u8)>,
    /// Counts indexed `[time point][position][allele]`.
    pub counts: Vec<Vec<[u32; N_ALLELES]>>,
}

impl CountTrajectories {
    pub fn n_times(&self) -> usize {
        self.counts.len()
    }

    /// Number of sites, 0 without time points.
    pub fn len(&self) -> usize {
        self.counts.first().map(|x| x.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coverage indexed `[time point][position]`.
    pub fn coverage(&self) -> Vec<Vec<u32>> {
        self.counts.iter().map(|sample| {
            sample.iter().map(|site| site.iter().sum()).collect()
        }).collect()
    }

    /// Adds one time point.
    pub fn push(
        &mut self,
        sample: &str,
        pcr: u8,
        counts: &AlleleCounts,
    ) -> Result<(), E> {
        if !self.counts.is_empty() && counts.len() != self.len() {
            return Err(Box::new(TrajectoryLengthMismatch{ sample: sample.to_string(), expected: self.len(), got: counts.len() }));
        }
        self.samples.push((sample.to_string(), pcr));
        self.counts.push(counts.collapse());
        Ok(())
    }
}

/// Loads the count files of each sample picked by `policy`.
pub fn get_allele_count_trajectories(
    files: &[SampleCountFiles],
    policy: PcrPolicy,
) -> Result<CountTrajectories, E> {
    let mut res = CountTrajectories::default();
    for sample in files.iter() {
        let selected = sample.select(policy);
        if selected.is_empty() {
            debug!("Sample {}: no count files", sample.sample);
        }
        for (pcr, path) in selected {
            debug!("Sample {} PCR{}: {}", sample.sample, pcr, path.display());
            let counts = read_allele_counts_file(path)?;
            res.push(&sample.sample, pcr, &counts)?;
        }
    }
    info!("Loaded {} time points", res.n_times());
    Ok(res)
}

/// Allele frequencies of each time point.
///
/// Sites with coverage below `cov_min` are masked as a whole; frequencies
/// below [FREQUENCY_FLOOR] are set to 0.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::trajectories::{allele_frequency_trajectories, CountTrajectories};
///
/// let act = CountTrajectories{
///     samples: vec![("s1".to_string(), 1)],
///     counts: vec![vec![[90, 10, 0, 0, 0, 0], [1, 0, 0, 0, 0, 0]]],
/// };
///
/// let got = allele_frequency_trajectories(&act, 10);
///
/// assert_eq!(got[0][0], Some([0.9, 0.1, 0.0, 0.0, 0.0, 0.0]));
/// assert_eq!(got[0][1], None);
/// ```
///
pub fn allele_frequency_trajectories(
    act: &CountTrajectories,
    cov_min: u32,
) -> Vec<Vec<Option<[f64; N_ALLELES]>>> {
    act.counts.iter().map(|sample| {
        sample.iter().map(|site| {
            let cov: u32 = site.iter().sum();
            if cov < cov_min || cov == 0 {
                return None
            }
            let mut nu = [0.0; N_ALLELES];
            nu.iter_mut().zip(site.iter()).for_each(|(x, count)| {
                *x = *count as f64 / cov as f64;
                if *x < FREQUENCY_FLOOR {
                    *x = 0.0;
                }
            });
            Some(nu)
        }).collect()
    }).collect()
}

/// Frequencies supported by all well covered read types.
///
/// Read types with coverage above 10 are compared at each site. Each allele
/// gets the mean of their frequencies, or the minimum if they differ by more
/// than 0.1, and the site is renormalized. Sites without such a read type
/// use the frequencies pooled over all read types.
///
pub fn filter_frequencies(
    counts: &AlleleCounts,
) -> Vec<[f64; N_ALLELES]> {
    (0..counts.len()).map(|pos| {
        let mut per_type: Vec<[f64; N_ALLELES]> = Vec::with_capacity(N_READ_TYPES);
        for read_type in 0..N_READ_TYPES {
            let site: Vec<u32> = (0..N_ALLELES).map(|allele| counts.get(read_type, allele, pos)).collect();
            let cov: u32 = site.iter().sum();
            if cov > 10 {
                let mut nu = [0.0; N_ALLELES];
                nu.iter_mut().zip(site.iter()).for_each(|(x, count)| *x = *count as f64 / cov as f64);
                per_type.push(nu);
            }
        }

        let mut nu = [0.0; N_ALLELES];
        if per_type.is_empty() {
            let site = counts.site(pos);
            let cov: u32 = site.iter().sum();
            if cov > 0 {
                nu.iter_mut().zip(site.iter()).for_each(|(x, count)| *x = *count as f64 / cov as f64);
            }
            return nu
        }

        for (allele, x) in nu.iter_mut().enumerate() {
            let values = per_type.iter().map(|freqs| freqs[allele]);
            let min = values.clone().fold(f64::INFINITY, f64::min);
            let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
            *x = if max - min > 0.1 {
                min
            } else {
                values.sum::<f64>() / per_type.len() as f64
            };
        }

        let total: f64 = nu.iter().sum();
        if total > 0.0 {
            nu.iter_mut().for_each(|x| *x /= total);
        }
        nu
    }).collect()
}

/// A site and allele whose frequency rises over time.
#[derive(Debug, Clone, PartialEq)]
pub struct InterestingTrajectory {
    pub pos: usize,
    pub allele: u8,
    /// Effect against the consensus of the first time point, if the site is in a complete codon.
    pub effect: Option<CodonEffect>,
    pub times: Vec<f64>,
    pub frequencies: Vec<f64>,
}

/// Trajectories that start below 0.5 and exceed `threshold` at some point.
///
/// Only time points with coverage above 100 at a site are considered.
pub fn interesting_trajectories(
    times: &[f64],
    act: &CountTrajectories,
    threshold: f64,
) -> Vec<InterestingTrajectory> {
    let mut res: Vec<InterestingTrajectory> = Vec::new();
    let Some(initial) = act.counts.first() else {
        return res
    };
    let initial_consensus = consensus(initial);

    for pos in 0..act.len() {
        let covered: Vec<(f64, &[u32; N_ALLELES], u32)> = act.counts.iter().zip(times.iter())
            .map(|(sample, time)| (*time, &sample[pos], sample[pos].iter().sum::<u32>()))
            .filter(|(_, _, cov)| *cov > 100)
            .collect();
        if covered.is_empty() {
            continue;
        }

        for allele in 0..N_ALLELES {
            let nu: Vec<f64> = covered.iter().map(|(_, site, cov)| site[allele] as f64 / *cov as f64).collect();
            if nu[0] < 0.5 && nu.iter().any(|x| *x > threshold) {
                res.push(InterestingTrajectory{
                    pos,
                    allele: ALPHABET[allele],
                    effect: codon_effect(&initial_consensus, pos, ALPHABET[allele]),
                    times: covered.iter().map(|x| x.0).collect(),
                    frequencies: nu,
                });
            }
        }
    }
    res
}

/// Writes frequency trajectories as tab separated values, one line per
/// time point and site. Masked sites are written as `NA`.
pub fn write_frequency_trajectories_tsv<W: Write>(
    act: &CountTrajectories,
    times: &[f64],
    frequencies: &[Vec<Option<[f64; N_ALLELES]>>],
    conn: &mut W,
) -> Result<(), E> {
    let mut header = "sample\tPCR\ttime\tpos".to_string();
    ALPHABET.iter().for_each(|x| { header.push('\t'); header.push(*x as char) });
    header.push('\n');
    conn.write_all(header.as_bytes())?;

    for (((sample, pcr), time), sites) in act.samples.iter().zip(times.iter()).zip(frequencies.iter()) {
        for (pos, site) in sites.iter().enumerate() {
            let mut line = format!("{}\t{}\t{}\t{}", sample, pcr, time, pos);
            match site {
                Some(nu) => nu.iter().for_each(|x| line += &format!("\t{}", x)),
                None => (0..N_ALLELES).for_each(|_| line += "\tNA"),
            }
            line.push('\n');
            conn.write_all(line.as_bytes())?;
        }
    }
    Ok(())
}

/// Writes interesting trajectories in long format: one line per time point.
pub fn write_interesting_tsv<W: Write>(
    trajectories: &[InterestingTrajectory],
    conn: &mut W,
) -> Result<(), E> {
    conn.write_all(b"pos\tallele\teffect\ttime\tfrequency\n")?;
    for traj in trajectories.iter() {
        let effect = traj.effect.map(|x| x.name()).unwrap_or("NA");
        for (time, nu) in traj.times.iter().zip(traj.frequencies.iter()) {
            let line = format!("{}\t{}\t{}\t{}\t{}\n", traj.pos, traj.allele as char, effect, time, nu);
            conn.write_all(line.as_bytes())?;
        }
    }
    Ok(())
}
