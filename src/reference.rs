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
use std::io::Read;
use std::path::Path;

use needletail::FastxReader;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct EmptyReference;

impl std::fmt::Display for EmptyReference {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "reference file contains no sequences")
    }
}

impl std::error::Error for EmptyReference {}

/// A reference sequence, eg. the consensus of a sample for one fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reference {
    /// Sequence identifier up to the first whitespace.
    pub name: String,
    pub seq: Vec<u8>,
}

impl Reference {
    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

fn first_record(
    mut reader: Box<dyn FastxReader>,
) -> Result<Reference, E> {
    let record = reader.next().ok_or(EmptyReference)??;
    let id = String::from_utf8_lossy(record.id()).to_string();
    let name = id.split_whitespace().next().unwrap_or_default().to_string();
    let seq = record.seq().to_ascii_uppercase();
    Ok(Reference{ name, seq })
}

/// Reads the first sequence of a fasta file.
pub fn read_reference<P: AsRef<Path>>(
    path: P,
) -> Result<Reference, E> {
    let reader = needletail::parse_fastx_file(path)?;
    first_record(reader)
}

/// Reads the first sequence of fasta data in `conn`.
pub fn read_reference_from<R: Read + Send + 'static>(
    conn: R,
) -> Result<Reference, E> {
    let reader = needletail::parse_fastx_reader(conn)?;
    first_record(reader)
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn read_reference_from() {
        use super::read_reference_from;
        use std::io::Cursor;

        let data: Vec<u8> = b">consensus_F1 sample 01\nACGTacgt\nNNAC\n>second\nTTTT\n".to_vec();
        let got = read_reference_from(Cursor::new(data)).unwrap();

        assert_eq!(got.name, "consensus_F1");
        assert_eq!(got.seq, b"ACGTACGTNNAC".to_vec());
        assert_eq!(got.len(), 12);
    }

    #[test]
    fn read_reference_from_empty() {
        use super::read_reference_from;
        use std::io::Cursor;

        let got = read_reference_from(Cursor::new(Vec::<u8>::new()));

        assert!(got.is_err());
    }
}
