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

//! Binary and plain text storage of counts.
//!
//! ## Binary format
//!
//! Count files start with a 32 byte [CountsHeader] encoded with bincode using
//! fixed size integers:
//!
//! - Magic number identifying the payload (allele counts or inserts).
//! - Format version.
//! - Number of read types.
//! - Number of alleles.
//! - Number of reference sites.
//! - Length of the payload (bytes).
//!
//! The header is followed by the payload: the bincode encoded counts,
//! compressed with deflate.
//!
//! ## Plain text
//!
//! [write_counts_tsv] and [write_coverage_tsv] write one line per site with a
//! column for each read type and allele.
//!
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;

use bincode::{Encode, Decode};
use bincode::decode_from_slice;
use bincode::encode_into_std_write;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::counts::AlleleCounts;
use crate::counts::Coverage;
use crate::counts::Inserts;
use crate::ReadType;
use crate::ALPHABET;
use crate::N_ALLELES;
use crate::N_READ_TYPES;

type E = Box<dyn std::error::Error>;

/// Magic number of allele count files.
pub const ALLELE_COUNTS_MAGIC: u32 = 0x4143_4e54;
/// Magic number of insert count files.
pub const INSERTS_MAGIC: u32 = 0x494e_5354;
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct InvalidCountsFile {
    pub reason: String,
}

impl std::fmt::Display for InvalidCountsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "invalid counts file: {}", self.reason)
    }
}

impl std::error::Error for InvalidCountsFile {}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct CountsHeader {
    pub magic: u32,
    pub version: u32,
    pub n_read_types: u32,
    pub n_alleles: u32,
    pub length: u64,
    pub payload_len: u64,
}

pub fn encode_counts_header(
    header: &CountsHeader,
) -> Result<Vec<u8>, E> {
    let mut bytes: Vec<u8> = Vec::new();
    let nbytes = encode_into_std_write(
        header,
        &mut bytes,
        bincode::config::standard().with_fixed_int_encoding(),
    )?;
    assert_eq!(nbytes, 32);
    Ok(bytes)
}

pub fn decode_counts_header(
    header_bytes: &[u8],
) -> Result<CountsHeader, E> {
    Ok(decode_from_slice(header_bytes, bincode::config::standard().with_fixed_int_encoding())?.0)
}

pub fn read_counts_header<R: Read>(
    conn: &mut R,
) -> Result<CountsHeader, E> {
    let mut header_bytes: [u8; 32] = [0_u8; 32];
    conn.read_exact(&mut header_bytes)?;
    let res = decode_counts_header(&header_bytes)?;
    Ok(res)
}

fn deflate_bytes(
    bytes: &[u8],
) -> Result<Vec<u8>, E> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn inflate_bytes(
    bytes: &[u8],
) -> Result<Vec<u8>, E> {
    let mut decoder = DeflateDecoder::new(bytes);
    let mut res: Vec<u8> = Vec::new();
    decoder.read_to_end(&mut res)?;
    Ok(res)
}

fn write_payload<T: Encode, W: Write>(
    magic: u32,
    length: usize,
    data: &T,
    conn: &mut W,
) -> Result<(), E> {
    let mut bytes: Vec<u8> = Vec::new();
    encode_into_std_write(data, &mut bytes, bincode::config::standard())?;
    let payload = deflate_bytes(&bytes)?;

    let header = CountsHeader{
        magic, version: FORMAT_VERSION,
        n_read_types: N_READ_TYPES as u32, n_alleles: N_ALLELES as u32,
        length: length as u64, payload_len: payload.len() as u64,
    };
    conn.write_all(&encode_counts_header(&header)?)?;
    conn.write_all(&payload)?;
    conn.flush()?;
    Ok(())
}

fn read_payload<T: Decode<()>, R: Read>(
    magic: u32,
    conn: &mut R,
) -> Result<(CountsHeader, T), E> {
    let header = read_counts_header(conn)?;
    if header.magic != magic {
        return Err(Box::new(InvalidCountsFile{ reason: format!("unexpected magic number {:#x}", header.magic) }));
    }
    if header.version != FORMAT_VERSION {
        return Err(Box::new(InvalidCountsFile{ reason: format!("unsupported version {}", header.version) }));
    }
    if header.n_read_types as usize != N_READ_TYPES || header.n_alleles as usize != N_ALLELES {
        return Err(Box::new(InvalidCountsFile{ reason: format!("{} read types and {} alleles", header.n_read_types, header.n_alleles) }));
    }

    let mut payload: Vec<u8> = Vec::new();
    conn.by_ref().take(header.payload_len).read_to_end(&mut payload)?;
    if (payload.len() as u64) < header.payload_len {
        return Err(Box::new(InvalidCountsFile{ reason: format!("payload has {} of {} bytes", payload.len(), header.payload_len) }));
    }
    let bytes = inflate_bytes(&payload)?;
    let data: T = decode_from_slice(&bytes, bincode::config::standard())?.0;

    Ok((header, data))
}

/// Writes allele counts in the binary format.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::counts::AlleleCounts;
/// use hivwholeseq::counts::file::{read_allele_counts, write_allele_counts};
/// use std::io::{Cursor, Seek};
///
/// let mut counts = AlleleCounts::new(10);
/// counts.increment(0, 2, 5);
/// counts.increment(3, 4, 9);
///
/// let mut bytes: Cursor<Vec<u8>> = Cursor::new(Vec::new());
/// write_allele_counts(&counts, &mut bytes).unwrap();
///
/// bytes.rewind().unwrap();
/// let got = read_allele_counts(&mut bytes).unwrap();
///
/// assert_eq!(got, counts);
/// ```
///
pub fn write_allele_counts<W: Write>(
    counts: &AlleleCounts,
    conn: &mut W,
) -> Result<(), E> {
    write_payload(ALLELE_COUNTS_MAGIC, counts.len(), &counts.as_slice().to_vec(), conn)
}

/// Reads allele counts written by [write_allele_counts].
pub fn read_allele_counts<R: Read>(
    conn: &mut R,
) -> Result<AlleleCounts, E> {
    let (header, data): (CountsHeader, Vec<u32>) = read_payload(ALLELE_COUNTS_MAGIC, conn)?;
    AlleleCounts::from_vec(header.length as usize, data).ok_or_else(|| {
        Box::new(InvalidCountsFile{ reason: "payload does not match the header length".to_string() }) as E
    })
}

/// Writes insertion counts in the binary format.
pub fn write_inserts<W: Write>(
    inserts: &Inserts,
    length: usize,
    conn: &mut W,
) -> Result<(), E> {
    write_payload(INSERTS_MAGIC, length, inserts, conn)
}

/// Reads insertion counts written by [write_inserts].
pub fn read_inserts<R: Read>(
    conn: &mut R,
) -> Result<Inserts, E> {
    let (_, data): (CountsHeader, Inserts) = read_payload(INSERTS_MAGIC, conn)?;
    Ok(data)
}

pub fn write_allele_counts_file<P: AsRef<Path>>(
    counts: &AlleleCounts,
    path: P,
) -> Result<(), E> {
    let mut conn = BufWriter::new(File::create(path)?);
    write_allele_counts(counts, &mut conn)
}

pub fn read_allele_counts_file<P: AsRef<Path>>(
    path: P,
) -> Result<AlleleCounts, E> {
    let mut conn = BufReader::new(File::open(path)?);
    read_allele_counts(&mut conn)
}

pub fn write_inserts_file<P: AsRef<Path>>(
    inserts: &Inserts,
    length: usize,
    path: P,
) -> Result<(), E> {
    let mut conn = BufWriter::new(File::create(path)?);
    write_inserts(inserts, length, &mut conn)
}

pub fn read_inserts_file<P: AsRef<Path>>(
    path: P,
) -> Result<Inserts, E> {
    let mut conn = BufReader::new(File::open(path)?);
    read_inserts(&mut conn)
}

/// Writes allele counts as tab separated values.
///
/// Columns are the position followed by one column per read type and allele,
/// eg. `read1 f:A`.
pub fn write_counts_tsv<W: Write>(
    counts: &AlleleCounts,
    conn: &mut W,
) -> Result<(), E> {
    let mut line = "pos".to_string();
    for read_type in ReadType::ALL.iter() {
        for allele in ALPHABET.iter() {
            line += &format!("\t{}:{}", read_type.name(), *allele as char);
        }
    }
    line += "\n";
    conn.write_all(line.as_bytes())?;

    for pos in 0..counts.len() {
        let mut line = pos.to_string();
        for read_type in 0..N_READ_TYPES {
            for allele in 0..N_ALLELES {
                line += "\t";
                line += &counts.get(read_type, allele, pos).to_string();
            }
        }
        line += "\n";
        conn.write_all(line.as_bytes())?;
    }
    Ok(())
}

/// Writes coverage as tab separated values, one column per read type.
pub fn write_coverage_tsv<W: Write>(
    coverage: &Coverage,
    conn: &mut W,
) -> Result<(), E> {
    let mut header = "pos".to_string();
    ReadType::ALL.iter().for_each(|read_type| {
        header += "\t";
        header += read_type.name();
    });
    header += "\n";
    conn.write_all(header.as_bytes())?;

    for (pos, cov) in coverage.per_site.iter().enumerate() {
        let line = pos.to_string() + &cov.iter().map(|x| format!("\t{}", x)).collect::<String>() + "\n";
        conn.write_all(line.as_bytes())?;
    }
    Ok(())
}

/// Writes insertions as tab separated values: position, sequence, counts per read type.
pub fn write_inserts_tsv<W: Write>(
    inserts: &Inserts,
    conn: &mut W,
) -> Result<(), E> {
    conn.write_all(b"pos\tinsert\tread1 f\tread1 r\tread2 f\tread2 r\n")?;
    for (pos, seqs) in inserts.by_position.iter() {
        for (seq, counts) in seqs.iter() {
            let line = format!("{}\t{}", pos, seq) + &counts.iter().map(|x| format!("\t{}", x)).collect::<String>() + "\n";
            conn.write_all(line.as_bytes())?;
        }
    }
    Ok(())
}
