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
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    // Split mapped read pairs into filtered and trashed pairs
    Filter {
        // Input .bam or .sam file
        #[arg(group = "input", required = false, help = "Mapped reads")]
        input_file: Option<PathBuf>,

        // Filtered output, defaults to <input>_filtered.bam
        #[arg(short = 'o', long = "output", required = false)]
        out_file: Option<PathBuf>,

        // Trashed output, defaults to <output>_trashed.bam
        #[arg(long = "trashed", required = false)]
        trash_file: Option<PathBuf>,

        // Reference the reads were mapped to, defaults to the header length
        #[arg(short = 'r', long = "reference", required = false)]
        reference: Option<PathBuf>,

        // Data folder with one subfolder per adapter
        #[arg(long = "data-folder", group = "input", required = false)]
        data_folder: Option<PathBuf>,

        // Adapter IDs to process in the data folder
        #[arg(long = "adaIDs", num_args = 1.., required = false)]
        adapters: Vec<u32>,

        // Fragments to process in the data folder
        #[arg(long = "fragments", num_args = 1.., default_values_t = crate_fragments())]
        fragments: Vec<String>,

        // Minimum length of a good CIGAR match block
        #[arg(long = "match-len-min", default_value_t = 30)]
        match_len_min: usize,

        // Bases trimmed from the inner edge of the outermost good blocks
        #[arg(long = "trim-bad-cigars", default_value_t = 3)]
        trim_bad_cigars: usize,

        // Trash pairs with more mismatches (NM) than this
        #[arg(long = "max-mismatches", required = false)]
        max_mismatches: Option<i64>,

        // Cut reads down to their good CIGAR blocks
        #[arg(long = "trim", default_value_t = false)]
        trim: bool,

        // Stop after this many reads
        #[arg(long = "max-reads", required = false)]
        max_reads: Option<usize>,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },

    // Count alleles, insertions and coverage
    Count {
        // Input .bam or .sam file
        #[arg(group = "input", required = false, help = "Filtered reads")]
        input_file: Option<PathBuf>,

        // Allele counts output, defaults to <input>.allele_counts.dat
        #[arg(short = 'o', long = "output", required = false)]
        out_file: Option<PathBuf>,

        // Insert counts output, defaults to <input>.insert_counts.dat
        #[arg(long = "inserts", required = false)]
        inserts_file: Option<PathBuf>,

        // Coverage output, defaults to <input>.coverage.tsv
        #[arg(long = "coverage", required = false)]
        coverage_file: Option<PathBuf>,

        // Also write the counts as tab separated values
        #[arg(long = "tsv", required = false)]
        tsv_file: Option<PathBuf>,

        // Reference the reads were mapped to, defaults to the header length
        #[arg(short = 'r', long = "reference", required = false)]
        reference: Option<PathBuf>,

        // Data folder with one subfolder per adapter
        #[arg(long = "data-folder", group = "input", required = false)]
        data_folder: Option<PathBuf>,

        // Adapter IDs to process in the data folder
        #[arg(long = "adaIDs", num_args = 1.., required = false)]
        adapters: Vec<u32>,

        // Fragments to process in the data folder
        #[arg(long = "fragments", num_args = 1.., default_values_t = crate_fragments())]
        fragments: Vec<String>,

        // Minimum base quality
        #[arg(long = "qual-min", default_value_t = 0)]
        qual_min: u8,

        // Minimum length of a good CIGAR match block
        #[arg(long = "match-len-min", default_value_t = 30)]
        match_len_min: usize,

        // Bases trimmed from the inner edge of the outermost good blocks
        #[arg(long = "trim-bad-cigars", default_value_t = 3)]
        trim_bad_cigars: usize,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },

    // Extract a random subsample of read pairs
    Subsample {
        // Read 1 and read 2 input
        #[arg(group = "input", num_args = 2, required = false, help = "Read 1 and read 2 .fastq(.gz) files")]
        input_files: Vec<PathBuf>,

        // Read 1 and read 2 output
        #[arg(short = 'o', long = "output", num_args = 2, required = false)]
        out_files: Vec<PathBuf>,

        // Data folder with one subfolder per adapter
        #[arg(long = "data-folder", group = "input", required = false)]
        data_folder: Option<PathBuf>,

        // Adapter IDs to process in the data folder
        #[arg(long = "adaIDs", num_args = 1.., required = false)]
        adapters: Vec<u32>,

        // Use the raw reads instead of the filtered ones
        #[arg(long = "raw", default_value_t = false)]
        raw: bool,

        // Subsample size
        #[arg(short = 'n', default_value_t = 10000)]
        n_reads: usize,

        // Seed for the random number generator
        #[arg(long = "seed", required = false)]
        seed: Option<u64>,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },

    // Allele count and frequency trajectories of a patient
    Trajectories {
        // Data folder
        #[arg(long = "data-folder", required = true)]
        data_folder: PathBuf,

        // Patient to analyze
        #[arg(long = "patient", required = true)]
        patient: String,

        // Fragments to analyze
        #[arg(long = "fragments", num_args = 1.., default_values_t = crate_fragments())]
        fragments: Vec<String>,

        // Output folder
        #[arg(short = 'o', long = "output", default_value = ".")]
        out_dir: PathBuf,

        // PCR reactions to use (0: both, 1: PCR1 or else PCR2, 2: PCR1 only)
        #[arg(long = "PCR1", default_value_t = 1)]
        pcr_policy: u8,

        // Quality threshold of the count files
        #[arg(long = "qual-min", default_value_t = 30)]
        qual_min: u8,

        // Sites with lower coverage are masked
        #[arg(long = "cov-min", default_value_t = 1)]
        cov_min: u32,

        // Minimal number of sequenced time points
        #[arg(long = "min-times", default_value_t = 1)]
        min_times: usize,

        // Frequency threshold of interesting trajectories
        #[arg(long = "threshold", default_value_t = 0.1)]
        threshold: f64,

        // Time unit (day, month, year)
        #[arg(long = "unit", default_value = "day")]
        unit: String,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },

    // Convert a region of interest to fragment coordinates
    Roi {
        // Region of interest, eg. F1 300 350 or RT 0 +oo
        #[arg(long = "roi", num_args = 3, required = true)]
        roi: Vec<String>,

        // Feature table
        #[arg(long = "features", required = false)]
        features: Option<PathBuf>,

        // Genome reference
        #[arg(short = 'r', long = "reference", required = false)]
        reference: Option<PathBuf>,

        // Data folder
        #[arg(long = "data-folder", required = false)]
        data_folder: Option<PathBuf>,

        // Patient whose reference and features are used
        #[arg(long = "patient", required = false)]
        patient: Option<String>,

        // Accept genomewide as a fragment
        #[arg(long = "include-genomewide", default_value_t = false)]
        include_genomewide: bool,

        // List all fragments overlapping the region
        #[arg(long = "covered", default_value_t = false)]
        covered: bool,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },

    // Classify mutations along frequency trajectories and find sweeps
    Sweeps {
        // Data folder
        #[arg(long = "data-folder", required = true)]
        data_folder: PathBuf,

        // Patients to analyze
        #[arg(long = "patients", num_args = 1.., required = true)]
        patients: Vec<String>,

        // Fragments to analyze
        #[arg(long = "fragments", num_args = 1.., default_values_t = crate_fragments())]
        fragments: Vec<String>,

        // Output file, defaults to stdout
        #[arg(short = 'o', long = "output", required = false)]
        out_file: Option<PathBuf>,

        // PCR reactions to use (0: both, 1: PCR1 or else PCR2, 2: PCR1 only)
        #[arg(long = "PCR1", default_value_t = 1)]
        pcr_policy: u8,

        // Quality threshold of the count files
        #[arg(long = "qual-min", default_value_t = 30)]
        qual_min: u8,

        // Sites with lower coverage are masked
        #[arg(long = "cov-min", default_value_t = 1000)]
        cov_min: u32,

        // Time unit (day, month, year)
        #[arg(long = "unit", default_value = "day")]
        unit: String,

        // Verbosity
        #[arg(long = "verbose", default_value_t = 0)]
        verbose: u8,
    },
}

fn crate_fragments() -> Vec<String> {
    hivwholeseq::FRAGMENTS.iter().map(|x| x.to_string()).collect()
}
