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

//! Opening alignment files.
//!
//! The format is chosen from the file extension: `.sam` files are read and
//! written as [SAM](https://samtools.github.io/hts-specs/SAMv1.pdf), anything
//! else as BAM.
//!
//! [AlignmentReader] iterates over [RecordBuf] records regardless of the
//! underlying format, and [ReadPairs](pairs::ReadPairs) groups them into
//! mate pairs.
//!
pub mod pairs;

use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::path::Path;

use noodles_bam as bam;
use noodles_sam as sam;
use noodles_sam::alignment::RecordBuf;

type E = Box<dyn std::error::Error>;

/// Supported alignment formats.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AlignmentFormat {
    #[default]
    Bam,
    Sam,
}

impl AlignmentFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|x| x.to_str()) {
            Some("sam") => AlignmentFormat::Sam,
            _ => AlignmentFormat::Bam,
        }
    }
}

/// Reads one record at a time into a [RecordBuf].
trait RecordSource {
    fn next_record(
        &mut self,
        header: &sam::Header,
        record: &mut RecordBuf,
    ) -> std::io::Result<usize>;
}

impl<R: BufRead> RecordSource for sam::io::Reader<R> {
    fn next_record(
        &mut self,
        header: &sam::Header,
        record: &mut RecordBuf,
    ) -> std::io::Result<usize> {
        self.read_record_buf(header, record)
    }
}

impl<R: Read> RecordSource for bam::io::Reader<R> {
    fn next_record(
        &mut self,
        header: &sam::Header,
        record: &mut RecordBuf,
    ) -> std::io::Result<usize> {
        self.read_record_buf(header, record)
    }
}

/// Iterator over the records of a SAM or BAM input.
pub struct AlignmentReader {
    header: sam::Header,
    source: Box<dyn RecordSource>,
}

impl AlignmentReader {
    /// Opens `path` and reads its header.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
    ) -> Result<Self, E> {
        let f = File::open(path.as_ref())?;
        match AlignmentFormat::from_path(path.as_ref()) {
            AlignmentFormat::Sam => Self::from_sam(BufReader::new(f)),
            AlignmentFormat::Bam => {
                let mut reader = bam::io::Reader::new(f);
                let header = reader.read_header()?;
                Ok(Self{ header, source: Box::new(reader) })
            },
        }
    }

    /// Reads SAM formatted data from `conn`.
    pub fn from_sam<R: BufRead + 'static>(
        conn: R,
    ) -> Result<Self, E> {
        let mut reader = sam::io::Reader::new(conn);
        let header = reader.read_header()?;
        Ok(Self{ header, source: Box::new(reader) })
    }

    pub fn header(&self) -> &sam::Header {
        &self.header
    }

    /// Length of reference sequence `id` according to the header.
    pub fn reference_len(&self, id: usize) -> Option<usize> {
        self.header.reference_sequences().get_index(id).map(|(_, map)| map.length().get())
    }
}

impl Iterator for AlignmentReader {
    type Item = std::io::Result<RecordBuf>;

    fn next(
        &mut self,
    ) -> Option<std::io::Result<RecordBuf>> {
        let mut record = RecordBuf::default();
        match self.source.next_record(&self.header, &mut record) {
            Ok(0) => None,
            Ok(_) => Some(Ok(record)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Creates a writer for `path` and writes `header` to it.
pub fn create_writer<P: AsRef<Path>>(
    path: P,
    header: &sam::Header,
) -> Result<Box<dyn sam::alignment::io::Write>, E> {
    let f = File::create(path.as_ref())?;
    let mut writer: Box<dyn sam::alignment::io::Write> = match AlignmentFormat::from_path(path.as_ref()) {
        AlignmentFormat::Sam => Box::new(sam::io::Writer::new(BufWriter::new(f))),
        AlignmentFormat::Bam => Box::new(bam::io::Writer::new(f)),
    };
    writer.write_alignment_header(header)?;
    Ok(writer)
}
