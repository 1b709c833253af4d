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
use noodles_sam::alignment::RecordBuf;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct UnpairedRecord {
    pub name: String,
}

impl std::fmt::Display for UnpairedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "record {} has no mate at the end of the input", self.name)
    }
}

impl std::error::Error for UnpairedRecord {}

/// Groups consecutive records into mate pairs.
///
/// The input must hold the mates of each pair next to each other, as mappers
/// write them. Whether the names match is left to the caller.
pub struct ReadPairs<I> {
    records: I,
}

impl<I> ReadPairs<I>
where
    I: Iterator<Item = std::io::Result<RecordBuf>>,
{
    pub fn new(records: I) -> Self {
        ReadPairs{ records }
    }
}

impl<I> Iterator for ReadPairs<I>
where
    I: Iterator<Item = std::io::Result<RecordBuf>>,
{
    type Item = Result<(RecordBuf, RecordBuf), E>;

    fn next(
        &mut self,
    ) -> Option<Result<(RecordBuf, RecordBuf), E>> {
        let read1 = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(Box::new(e))),
        };
        let read2 = match self.records.next() {
            Some(Ok(record)) => record,
            Some(Err(e)) => return Some(Err(Box::new(e))),
            None => {
                let name = read1.name().map(|x| x.to_string()).unwrap_or_default();
                return Some(Err(Box::new(UnpairedRecord{ name })))
            },
        };
        Some(Ok((read1, read2)))
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn read_pairs_trailing_record() {
        use super::ReadPairs;
        use crate::alignment::AlignmentReader;
        use std::io::Cursor;

        let data: Vec<u8> = b"@SQ\tSN:F1\tLN:200\nr1\t99\tF1\t1\t60\t4M\t=\t5\t8\tACGT\tIIII\nr1\t147\tF1\t5\t60\t4M\t=\t1\t-8\tTTTT\tIIII\nr2\t99\tF1\t1\t60\t4M\t=\t5\t8\tACGT\tIIII\n".to_vec();
        let reader = AlignmentReader::from_sam(Cursor::new(data)).unwrap();

        let got: Vec<bool> = ReadPairs::new(reader).map(|pair| pair.is_ok()).collect();

        assert_eq!(got, vec![true, false]);
    }
}
