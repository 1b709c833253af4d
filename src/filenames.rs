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

//! File layout of the data folder.
//!
//! Sequencing runs keep one folder per adapter:
//! ```text
//! <root>/adapterID_<NN>/consensus_<F>.fasta
//!                      /mapped_to_consensus_<F>.bam
//!                      /mapped_to_consensus_<F>_filtered.bam
//!                      /mapped_to_consensus_<F>_filtered_trashed.bam
//!                      /allele_counts_<F>.dat
//!                      /insert_counts_<F>.dat
//!                      /coverage_<F>.tsv
//!                      /read1.fastq.gz, read2.fastq.gz
//! ```
//!
//! Patients keep their reference and per-sample counts:
//! ```text
//! <root>/patients/patients.tsv
//! <root>/patients/samples.tsv
//! <root>/patients/<patient>/reference_<F>.fasta
//! <root>/patients/<patient>/features.tsv
//! <root>/patients/<patient>/samples/<sample>/PCR<n>/allele_counts_<F>_qual<q>+.dat
//! ```
//!
use std::path::Path;
use std::path::PathBuf;

/// Mapped read files of one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapped {
    Raw,
    Filtered,
    Trashed,
}

/// Read files of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reads {
    Raw,
    FilteredTrimmed,
}

pub fn adapter_folder<P: AsRef<Path>>(root: P, adapter: u32) -> PathBuf {
    root.as_ref().join(format!("adapterID_{:02}", adapter))
}

pub fn consensus_filename<P: AsRef<Path>>(root: P, adapter: u32, fragment: &str) -> PathBuf {
    adapter_folder(root, adapter).join(format!("consensus_{}.fasta", fragment))
}

/// ## Usage
///
/// ```rust
/// use hivwholeseq::filenames::{mapped_filename, Mapped};
/// use std::path::PathBuf;
///
/// let got = mapped_filename("/data", 2, "F3", Mapped::Trashed);
///
/// assert_eq!(got, PathBuf::from("/data/adapterID_02/mapped_to_consensus_F3_filtered_trashed.bam"));
/// ```
///
pub fn mapped_filename<P: AsRef<Path>>(root: P, adapter: u32, fragment: &str, kind: Mapped) -> PathBuf {
    let suffix = match kind {
        Mapped::Raw => "",
        Mapped::Filtered => "_filtered",
        Mapped::Trashed => "_filtered_trashed",
    };
    adapter_folder(root, adapter).join(format!("mapped_to_consensus_{}{}.bam", fragment, suffix))
}

pub fn allele_counts_filename<P: AsRef<Path>>(root: P, adapter: u32, fragment: &str) -> PathBuf {
    adapter_folder(root, adapter).join(format!("allele_counts_{}.dat", fragment))
}

pub fn insert_counts_filename<P: AsRef<Path>>(root: P, adapter: u32, fragment: &str) -> PathBuf {
    adapter_folder(root, adapter).join(format!("insert_counts_{}.dat", fragment))
}

pub fn coverage_filename<P: AsRef<Path>>(root: P, adapter: u32, fragment: &str) -> PathBuf {
    adapter_folder(root, adapter).join(format!("coverage_{}.tsv", fragment))
}

/// Paths to the read 1 and read 2 files.
pub fn read_filenames<P: AsRef<Path>>(root: P, adapter: u32, kind: Reads, subsample: bool) -> (PathBuf, PathBuf) {
    let folder = adapter_folder(root, adapter);
    let mut suffix = match kind {
        Reads::Raw => String::new(),
        Reads::FilteredTrimmed => "_filtered_trimmed".to_string(),
    };
    if subsample {
        suffix += "_subsample";
    }
    (
        folder.join(format!("read1{}.fastq.gz", suffix)),
        folder.join(format!("read2{}.fastq.gz", suffix)),
    )
}

pub fn patients_folder<P: AsRef<Path>>(root: P) -> PathBuf {
    root.as_ref().join("patients")
}

pub fn patient_table_filename<P: AsRef<Path>>(root: P) -> PathBuf {
    patients_folder(root).join("patients.tsv")
}

pub fn sample_table_filename<P: AsRef<Path>>(root: P) -> PathBuf {
    patients_folder(root).join("samples.tsv")
}

pub fn patient_folder<P: AsRef<Path>>(root: P, patient: &str) -> PathBuf {
    patients_folder(root).join(patient)
}

pub fn patient_reference_filename<P: AsRef<Path>>(root: P, patient: &str, fragment: &str) -> PathBuf {
    patient_folder(root, patient).join(format!("reference_{}.fasta", fragment))
}

pub fn feature_table_filename<P: AsRef<Path>>(root: P, patient: &str) -> PathBuf {
    patient_folder(root, patient).join("features.tsv")
}

pub fn sample_folder<P: AsRef<Path>>(root: P, patient: &str, sample: &str, pcr: u8) -> PathBuf {
    patient_folder(root, patient).join("samples").join(sample).join(format!("PCR{}", pcr))
}

/// ## Usage
///
/// ```rust
/// use hivwholeseq::filenames::patient_allele_counts_filename;
/// use std::path::PathBuf;
///
/// let got = patient_allele_counts_filename("/data", "p1", "VL98-1253", 2, "F1", 30);
///
/// assert_eq!(got, PathBuf::from("/data/patients/p1/samples/VL98-1253/PCR2/allele_counts_F1_qual30+.dat"));
/// ```
///
pub fn patient_allele_counts_filename<P: AsRef<Path>>(
    root: P,
    patient: &str,
    sample: &str,
    pcr: u8,
    fragment: &str,
    qual_min: u8,
) -> PathBuf {
    sample_folder(root, patient, sample, pcr).join(format!("allele_counts_{}_qual{}+.dat", fragment, qual_min))
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn mapped_filename() {
        use super::{mapped_filename, Mapped};
        use std::path::PathBuf;

        assert_eq!(mapped_filename("root", 1, "F1", Mapped::Raw), PathBuf::from("root/adapterID_01/mapped_to_consensus_F1.bam"));
        assert_eq!(mapped_filename("root", 12, "F6", Mapped::Filtered), PathBuf::from("root/adapterID_12/mapped_to_consensus_F6_filtered.bam"));
    }

    #[test]
    fn read_filenames() {
        use super::{read_filenames, Reads};
        use std::path::PathBuf;

        let got = read_filenames("root", 5, Reads::FilteredTrimmed, true);

        assert_eq!(got.0, PathBuf::from("root/adapterID_05/read1_filtered_trimmed_subsample.fastq.gz"));
        assert_eq!(got.1, PathBuf::from("root/adapterID_05/read2_filtered_trimmed_subsample.fastq.gz"));
        assert_eq!(read_filenames("root", 5, Reads::Raw, false).0, PathBuf::from("root/adapterID_05/read1.fastq.gz"));
    }

    #[test]
    fn patient_reference_filename() {
        use super::patient_reference_filename;
        use std::path::PathBuf;

        assert_eq!(patient_reference_filename("root", "p3", "genomewide"), PathBuf::from("root/patients/p3/reference_genomewide.fasta"));
    }
}
