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

//! Random subsamples of paired reads.
//!
//! Reads are drawn only from the middle of the input (between 20% and 80% of
//! the records), where the sequencing quality is the most stable. The same
//! record indices are taken from both mates.
//!
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use log::debug;
use log::info;

use needletail::FastxReader;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct MateCountMismatch {
    pub index: usize,
}

impl std::fmt::Display for MateCountMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "mate files have a different number of reads (one ends before read {})", self.index)
    }
}

impl std::error::Error for MateCountMismatch {}

/// Parameters for [subsample_files].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsampleParams {
    /// Number of read pairs to keep.
    pub n_reads: usize,
    /// Seed for the random number generator, random if not set.
    pub seed: Option<u64>,
}

impl Default for SubsampleParams {
    fn default() -> Self {
        SubsampleParams{ n_reads: 10000, seed: None }
    }
}

/// Plain or gzipped FASTQ output.
pub enum FastqWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FastqWriter {
    /// Creates `path`, gzipped if the name ends in `.gz`.
    pub fn create<P: AsRef<Path>>(
        path: P,
    ) -> Result<Self, E> {
        let gzip = path.as_ref().extension().is_some_and(|x| x == "gz");
        let conn = BufWriter::new(File::create(path)?);
        Ok(if gzip {
            FastqWriter::Gzip(GzEncoder::new(conn, Compression::default()))
        } else {
            FastqWriter::Plain(conn)
        })
    }

    pub fn finish(self) -> Result<(), E> {
        match self {
            FastqWriter::Plain(mut conn) => conn.flush()?,
            FastqWriter::Gzip(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for FastqWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            FastqWriter::Plain(conn) => conn.write(buf),
            FastqWriter::Gzip(conn) => conn.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            FastqWriter::Plain(conn) => conn.flush(),
            FastqWriter::Gzip(conn) => conn.flush(),
        }
    }
}

/// Number of records in a FASTX input.
pub fn count_records(
    mut reader: Box<dyn FastxReader>,
) -> Result<usize, E> {
    let mut n_records = 0;
    while let Some(record) = reader.next() {
        record?;
        n_records += 1;
    }
    Ok(n_records)
}

/// Draws up to `n_reads` distinct sorted indices from the middle 60% of
/// `n_total` records.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::subsample::choose_indices;
///
/// let got = choose_indices(100, 10, 42);
///
/// assert_eq!(got.len(), 10);
/// assert!(got.windows(2).all(|x| x[0] < x[1]));
/// assert!(got.iter().all(|x| *x >= 20 && *x < 80));
/// ```
///
pub fn choose_indices(
    n_total: usize,
    n_reads: usize,
    seed: u64,
) -> Vec<usize> {
    let start = (0.2 * n_total as f64) as usize;
    let end = (0.8 * n_total as f64) as usize;

    let mut rng: Xoshiro256PlusPlus = SeedableRng::seed_from_u64(seed);
    let mut indices: Vec<usize> = (start..end).collect();
    indices.shuffle(&mut rng);
    indices.truncate(n_reads);
    indices.sort_unstable();
    indices
}

/// Writes the records at `indices` (sorted) of both mates to the outputs.
///
/// Both inputs are read to the end; a mate file with more or fewer records
/// than the other is a [MateCountMismatch].
///
/// Returns the number of pairs written.
pub fn subsample_pairs<W1: Write + ?Sized, W2: Write + ?Sized>(
    mut reader1: Box<dyn FastxReader>,
    mut reader2: Box<dyn FastxReader>,
    indices: &[usize],
    out1: &mut W1,
    out2: &mut W2,
) -> Result<usize, E> {
    let mut n_written = 0;
    let mut idx = 0;
    loop {
        let (record1, record2) = match (reader1.next(), reader2.next()) {
            (Some(record1), Some(record2)) => (record1?, record2?),
            (None, None) => break,
            _ => return Err(Box::new(MateCountMismatch{ index: idx })),
        };

        if (idx + 1) % 10000 == 0 {
            debug!("{} reads, {} written", idx + 1, n_written);
        }

        if indices.get(n_written) == Some(&idx) {
            let mut bytes: Vec<u8> = Vec::new();
            record1.write(&mut bytes, None)?;
            out1.write_all(&bytes)?;
            bytes.clear();
            record2.write(&mut bytes, None)?;
            out2.write_all(&bytes)?;
            n_written += 1;
        }
        idx += 1;
    }
    Ok(n_written)
}

/// Subsamples the read pair in `inputs` into `outputs`.
pub fn subsample_files<P: AsRef<Path>>(
    inputs: (P, P),
    outputs: (P, P),
    params: &SubsampleParams,
) -> Result<usize, E> {
    let seed = params.seed.unwrap_or_else(rand::random);
    info!("Subsampling {} read pairs with seed {}", params.n_reads, seed);

    let n_total = count_records(needletail::parse_fastx_file(inputs.0.as_ref())?)?;
    debug!("Input has {} reads", n_total);

    let indices = choose_indices(n_total, params.n_reads, seed);
    if let (Some(first), Some(last)) = (indices.first(), indices.last()) {
        debug!("Random indices between {} and {}", first, last);
    }

    let mut out1 = FastqWriter::create(outputs.0)?;
    let mut out2 = FastqWriter::create(outputs.1)?;

    let n_written = subsample_pairs(
        needletail::parse_fastx_file(inputs.0.as_ref())?,
        needletail::parse_fastx_file(inputs.1.as_ref())?,
        &indices,
        &mut out1,
        &mut out2,
    )?;

    out1.finish()?;
    out2.finish()?;

    info!("Wrote {} read pairs out of {}", n_written, n_total);
    Ok(n_written)
}
