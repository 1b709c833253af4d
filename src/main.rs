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
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use clap::CommandFactory;
use clap::Parser;

use log::info;
use log::warn;

use hivwholeseq::counts::CountParams;
use hivwholeseq::filenames;
use hivwholeseq::filter::FilterParams;
use hivwholeseq::patients::TimeUnit;
use hivwholeseq::roi::Roi;
use hivwholeseq::subsample::SubsampleParams;
use hivwholeseq::trajectories::PcrPolicy;

mod cli;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
struct MissingInput {
    what: &'static str,
}

impl std::fmt::Display for MissingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "no {} given", self.what)
    }
}

impl std::error::Error for MissingInput {}

/// Initializes the logger with verbosity given in `log_max_level`.
fn init_log(log_max_level: usize) -> Result<(), E> {
    stderrlog::new()
    .module(module_path!())
    .quiet(false)
    .verbosity(log_max_level)
    .timestamp(stderrlog::Timestamp::Off)
    .init()?;
    Ok(())
}

/// Appends `suffix` to the file stem of `path`, keeping the extension.
fn with_suffix(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path.file_stem().map(|x| x.to_string_lossy().to_string()).unwrap_or_default();
    path.with_file_name(format!("{}{}.{}", stem, suffix, extension))
}

fn reference_len(reference: &Option<PathBuf>) -> Result<Option<usize>, E> {
    match reference {
        Some(path) => Ok(Some(hivwholeseq::reference::read_reference(path)?.len())),
        None => Ok(None),
    }
}

/// Adapter IDs to process in a data folder; at least one is required.
fn adapter_ids(adapters: Vec<u32>) -> Result<Vec<u32>, E> {
    if adapters.is_empty() {
        return Err(Box::new(MissingInput{ what: "adapter IDs (--adaIDs)" }));
    }
    Ok(adapters)
}

fn create_file(path: &Path) -> Result<BufWriter<File>, E> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path)?))
}

fn filter(
    jobs: Vec<(PathBuf, Option<usize>, PathBuf, PathBuf)>,
    params: &FilterParams,
) -> Result<(), E> {
    for (input, ref_len, good_path, trash_path) in jobs {
        info!("Filtering {}", input.display());
        let summary = hivwholeseq::filter::filter_file(&input, ref_len, &good_path, &trash_path, params)?;
        info!("{}: {} of {} pairs trashed", input.display(), summary.trashed(), summary.total());
    }
    Ok(())
}

struct CountJob {
    input: PathBuf,
    ref_len: Option<usize>,
    counts: PathBuf,
    inserts: PathBuf,
    coverage: PathBuf,
    tsv: Option<PathBuf>,
}

fn count(
    jobs: Vec<CountJob>,
    params: &CountParams,
) -> Result<(), E> {
    use hivwholeseq::counts::file::{write_allele_counts_file, write_counts_tsv, write_coverage_tsv, write_inserts_file};

    for job in jobs {
        info!("Counting alleles in {}", job.input.display());
        let (counts, inserts) = hivwholeseq::counts::count_file(&job.input, job.ref_len, params)?;

        write_allele_counts_file(&counts, &job.counts)?;
        write_inserts_file(&inserts, counts.len(), &job.inserts)?;

        let mut conn = create_file(&job.coverage)?;
        write_coverage_tsv(&counts.coverage(), &mut conn)?;
        conn.flush()?;

        if let Some(path) = &job.tsv {
            let mut conn = create_file(path)?;
            write_counts_tsv(&counts, &mut conn)?;
            conn.flush()?;
        }
    }
    Ok(())
}

fn subsample(
    jobs: Vec<((PathBuf, PathBuf), (PathBuf, PathBuf))>,
    params: &SubsampleParams,
) -> Result<(), E> {
    for (inputs, outputs) in jobs {
        info!("Subsampling {} and {}", inputs.0.display(), inputs.1.display());
        hivwholeseq::subsample::subsample_files(inputs, outputs, params)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn trajectories(
    data_folder: &Path,
    patient_name: &str,
    fragments: &[String],
    out_dir: &Path,
    policy: PcrPolicy,
    qual_min: u8,
    cov_min: u32,
    min_times: usize,
    threshold: f64,
    unit: TimeUnit,
) -> Result<(), E> {
    use hivwholeseq::patients::{filter_patients_n_times, find_patient, load_patients, load_samples};
    use hivwholeseq::trajectories::{allele_frequency_trajectories, get_allele_count_trajectories, interesting_trajectories, patient_count_files, write_frequency_trajectories_tsv, write_interesting_tsv};

    let patients = load_patients(filenames::patient_table_filename(data_folder))?;
    let samples = load_samples(filenames::sample_table_filename(data_folder))?;
    let patient = find_patient(&patients, patient_name)?;
    if filter_patients_n_times(std::slice::from_ref(patient), &samples, min_times).is_empty() {
        warn!("Patient {} has fewer than {} samples, skipping", patient.name, min_times);
        return Ok(())
    }
    let patient_samples = patient.samples(&samples);

    for fragment in fragments.iter() {
        let files = patient_count_files(data_folder, &patient.name, &patient_samples, fragment, qual_min);
        let act = get_allele_count_trajectories(&files, policy)?;
        if act.n_times() == 0 {
            warn!("Patient {} {}: no count files", patient.name, fragment);
            continue;
        }

        let times: Vec<f64> = act.samples.iter().map(|(name, _)| {
            patient_samples.iter().find(|x| x.name == *name)
                .map(|x| patient.time_since_transmission(x.date, unit))
                .unwrap_or(f64::NAN)
        }).collect();

        let freqs = allele_frequency_trajectories(&act, cov_min);
        let mut conn = create_file(&out_dir.join(format!("{}_{}_frequencies.tsv", patient.name, fragment)))?;
        write_frequency_trajectories_tsv(&act, &times, &freqs, &mut conn)?;
        conn.flush()?;

        let interesting = interesting_trajectories(&times, &act, threshold);
        info!("Patient {} {}: {} trajectories above {}", patient.name, fragment, interesting.len(), threshold);
        let mut conn = create_file(&out_dir.join(format!("{}_{}_interesting.tsv", patient.name, fragment)))?;
        write_interesting_tsv(&interesting, &mut conn)?;
        conn.flush()?;
    }
    Ok(())
}

fn roi(
    roi: &Roi,
    features_path: &Path,
    reference_path: &Path,
    include_genomewide: bool,
    covered: bool,
) -> Result<(), E> {
    use hivwholeseq::roi::{fragmented_roi, fragments_covered, load_features};

    let genome_len = hivwholeseq::reference::read_reference(reference_path)?.len();
    let features = load_features(features_path, genome_len)?;

    let stdout = std::io::stdout();
    let mut conn = stdout.lock();
    if covered {
        for fragment in fragments_covered(&features, roi)? {
            writeln!(conn, "{}\t{}\t{}\t{}\t{}", fragment.name, fragment.roi.0, fragment.roi.1, fragment.fragment.0, fragment.fragment.1)?;
        }
    } else {
        let (fragment, start, end) = fragmented_roi(&features, roi, include_genomewide)?;
        writeln!(conn, "{}\t{}\t{}", fragment, start, end)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn sweeps(
    data_folder: &Path,
    patient_names: &[String],
    fragments: &[String],
    out_file: &Option<PathBuf>,
    policy: PcrPolicy,
    qual_min: u8,
    cov_min: u32,
    unit: TimeUnit,
) -> Result<(), E> {
    use hivwholeseq::patients::{find_patient, load_patients, load_samples};
    use hivwholeseq::sweeps::{entropy_of_sweeps, mutation_table, write_mutation_table_tsv};
    use hivwholeseq::trajectories::{allele_frequency_trajectories, get_allele_count_trajectories, patient_count_files};

    let patients = load_patients(filenames::patient_table_filename(data_folder))?;
    let samples = load_samples(filenames::sample_table_filename(data_folder))?;

    let mut conn: Box<dyn Write> = match out_file {
        Some(path) => Box::new(create_file(path)?),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    conn.write_all(b"patient\tfragment\t")?;
    let mut header_written = false;

    for name in patient_names.iter() {
        let patient = find_patient(&patients, name)?;
        let patient_samples = patient.samples(&samples);
        for fragment in fragments.iter() {
            let files = patient_count_files(data_folder, &patient.name, &patient_samples, fragment, qual_min);
            let act = get_allele_count_trajectories(&files, policy)?;
            if act.n_times() == 0 {
                warn!("Patient {} {}: no count files", patient.name, fragment);
                continue;
            }
            let times: Vec<f64> = act.samples.iter().map(|(sample, _)| {
                patient_samples.iter().find(|x| x.name == *sample)
                    .map(|x| patient.time_since_transmission(x.date, unit))
                    .unwrap_or(f64::NAN)
            }).collect();

            let freqs = allele_frequency_trajectories(&act, cov_min);
            let rows = mutation_table(&freqs, &times);
            let (sweep, other) = entropy_of_sweeps(&rows);
            info!("Patient {} {}: mean entropy {:?} at sweeps, {:?} elsewhere", patient.name, fragment, sweep, other);

            let mut bytes: Vec<u8> = Vec::new();
            write_mutation_table_tsv(&rows, &mut bytes)?;
            let text = String::from_utf8_lossy(&bytes);
            let mut lines = text.lines();
            if let Some(header) = lines.next() {
                if !header_written {
                    writeln!(conn, "{}", header)?;
                    header_written = true;
                }
            }
            for line in lines {
                writeln!(conn, "{}\t{}\t{}", patient.name, fragment, line)?;
            }
        }
    }
    if !header_written {
        writeln!(conn)?;
    }
    conn.flush()?;
    Ok(())
}

fn run(cli: cli::Cli) -> Result<(), E> {
    match cli.command {
        Some(cli::Commands::Filter {
            input_file,
            out_file,
            trash_file,
            reference,
            data_folder,
            adapters,
            fragments,
            match_len_min,
            trim_bad_cigars,
            max_mismatches,
            trim,
            max_reads,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let params = FilterParams{ match_len_min, trim_bad_cigars, max_mismatches, trim, max_reads };

            let jobs = match (input_file, data_folder) {
                (Some(input), _) => {
                    let good = out_file.unwrap_or_else(|| with_suffix(&input, "_filtered", "bam"));
                    let trash = trash_file.unwrap_or_else(|| with_suffix(&good, "_trashed", "bam"));
                    vec![(input, reference_len(&reference)?, good, trash)]
                },
                (None, Some(root)) => {
                    let mut jobs = Vec::new();
                    for adapter in adapter_ids(adapters)?.iter() {
                        for fragment in fragments.iter() {
                            let ref_len = reference_len(&Some(filenames::consensus_filename(&root, *adapter, fragment)))?;
                            jobs.push((
                                filenames::mapped_filename(&root, *adapter, fragment, filenames::Mapped::Raw),
                                ref_len,
                                filenames::mapped_filename(&root, *adapter, fragment, filenames::Mapped::Filtered),
                                filenames::mapped_filename(&root, *adapter, fragment, filenames::Mapped::Trashed),
                            ));
                        }
                    }
                    jobs
                },
                (None, None) => return Err(Box::new(MissingInput{ what: "mapped reads (input file or --data-folder)" })),
            };
            filter(jobs, &params)
        },

        Some(cli::Commands::Count {
            input_file,
            out_file,
            inserts_file,
            coverage_file,
            tsv_file,
            reference,
            data_folder,
            adapters,
            fragments,
            qual_min,
            match_len_min,
            trim_bad_cigars,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let params = CountParams{ match_len_min, trim_bad_cigars, qual_min };

            let jobs = match (input_file, data_folder) {
                (Some(input), _) => vec![CountJob{
                    ref_len: reference_len(&reference)?,
                    counts: out_file.unwrap_or_else(|| with_suffix(&input, ".allele_counts", "dat")),
                    inserts: inserts_file.unwrap_or_else(|| with_suffix(&input, ".insert_counts", "dat")),
                    coverage: coverage_file.unwrap_or_else(|| with_suffix(&input, ".coverage", "tsv")),
                    tsv: tsv_file,
                    input,
                }],
                (None, Some(root)) => {
                    let mut jobs = Vec::new();
                    for adapter in adapter_ids(adapters)?.iter() {
                        for fragment in fragments.iter() {
                            jobs.push(CountJob{
                                input: filenames::mapped_filename(&root, *adapter, fragment, filenames::Mapped::Filtered),
                                ref_len: reference_len(&Some(filenames::consensus_filename(&root, *adapter, fragment)))?,
                                counts: filenames::allele_counts_filename(&root, *adapter, fragment),
                                inserts: filenames::insert_counts_filename(&root, *adapter, fragment),
                                coverage: filenames::coverage_filename(&root, *adapter, fragment),
                                tsv: None,
                            });
                        }
                    }
                    jobs
                },
                (None, None) => return Err(Box::new(MissingInput{ what: "filtered reads (input file or --data-folder)" })),
            };
            count(jobs, &params)
        },

        Some(cli::Commands::Subsample {
            input_files,
            out_files,
            data_folder,
            adapters,
            raw,
            n_reads,
            seed,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let params = SubsampleParams{ n_reads, seed };

            let jobs = match (input_files.len(), data_folder) {
                (2, _) => {
                    let outputs = if out_files.len() == 2 {
                        (out_files[0].clone(), out_files[1].clone())
                    } else {
                        (with_suffix(&input_files[0], "_subsample", "fastq"), with_suffix(&input_files[1], "_subsample", "fastq"))
                    };
                    vec![((input_files[0].clone(), input_files[1].clone()), outputs)]
                },
                (_, Some(root)) => {
                    let kind = if raw { filenames::Reads::Raw } else { filenames::Reads::FilteredTrimmed };
                    adapter_ids(adapters)?.iter().map(|adapter| (
                        filenames::read_filenames(&root, *adapter, kind, false),
                        filenames::read_filenames(&root, *adapter, kind, true),
                    )).collect()
                },
                _ => return Err(Box::new(MissingInput{ what: "reads (two input files or --data-folder)" })),
            };
            subsample(jobs, &params)
        },

        Some(cli::Commands::Trajectories {
            data_folder,
            patient,
            fragments,
            out_dir,
            pcr_policy,
            qual_min,
            cov_min,
            min_times,
            threshold,
            unit,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let policy = PcrPolicy::try_from(pcr_policy)?;
            let unit = TimeUnit::from_str(&unit)?;
            std::fs::create_dir_all(&out_dir)?;
            trajectories(&data_folder, &patient, &fragments, &out_dir, policy, qual_min, cov_min, min_times, threshold, unit)
        },

        Some(cli::Commands::Roi {
            roi: roi_fields,
            features,
            reference,
            data_folder,
            patient,
            include_genomewide,
            covered,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let region = Roi::from_str(&roi_fields.join(" "))?;
            let (features, reference) = match (features, reference, data_folder, patient) {
                (Some(features), Some(reference), _, _) => (features, reference),
                (features, reference, Some(root), Some(patient)) => (
                    features.unwrap_or_else(|| filenames::feature_table_filename(&root, &patient)),
                    reference.unwrap_or_else(|| filenames::patient_reference_filename(&root, &patient, "genomewide")),
                ),
                _ => return Err(Box::new(MissingInput{ what: "feature table and reference" })),
            };
            roi(&region, &features, &reference, include_genomewide, covered)
        },

        Some(cli::Commands::Sweeps {
            data_folder,
            patients,
            fragments,
            out_file,
            pcr_policy,
            qual_min,
            cov_min,
            unit,
            verbose,
        }) => {
            init_log(1 + verbose as usize)?;
            let policy = PcrPolicy::try_from(pcr_policy)?;
            let unit = TimeUnit::from_str(&unit)?;
            sweeps(&data_folder, &patients, &fragments, &out_file, policy, qual_min, cov_min, unit)
        },

        None => {
            cli::Cli::command().print_help()?;
            Ok(())
        },
    }
}

fn main() {
    let cli = cli::Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn adapter_ids_required() {
        use super::adapter_ids;

        assert!(adapter_ids(Vec::new()).is_err());
        assert_eq!(adapter_ids(vec![2, 4]).unwrap(), vec![2, 4]);
    }

    #[test]
    fn with_suffix_keeps_folder() {
        use super::with_suffix;
        use std::path::{Path, PathBuf};

        assert_eq!(with_suffix(Path::new("data/mapped.bam"), "_filtered", "bam"), PathBuf::from("data/mapped_filtered.bam"));
    }
}
