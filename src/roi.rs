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

//! Regions of interest.
//!
//! A region of interest (ROI) is a name plus start and end coordinates
//! relative to it. The name is either
//!
//!   - a fragment (`F1` .. `F6`),
//!   - `genomewide`,
//!   - or any feature of the genome annotation (eg. `RT` or `V3`).
//!
//! [fragmented_roi] moves a ROI into the coordinates of a fragment that
//! covers it, which is where the counts live.
//!
//! Annotations are read from a tab separated feature table with the columns
//! name, type, start, end (0-based, end exclusive) and a header line.
//! Fragments have the type `fragment`.
//!
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use csv::ReaderBuilder;

use log::debug;

use crate::FRAGMENTS;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct RoiError {
    pub reason: String,
}

impl std::fmt::Display for RoiError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for RoiError {}

fn roi_error(reason: String) -> E {
    Box::new(RoiError{ reason })
}

/// A region of interest; `end: None` extends to the end of the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roi {
    pub name: String,
    pub start: usize,
    pub end: Option<usize>,
}

impl FromStr for Roi {
    type Err = RoiError;

    /// Parses `name start end`, where end may be `+oo` or `end`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(RoiError{ reason: format!("ROI {} is not of the form NAME START END", s) });
        }
        let start = fields[1].parse::<usize>().map_err(|e| RoiError{ reason: format!("ROI start {}: {}", fields[1], e) })?;
        let end = match fields[2] {
            "+oo" | "end" => None,
            x => Some(x.parse::<usize>().map_err(|e| RoiError{ reason: format!("ROI end {}: {}", x, e) })?),
        };
        if end.is_some_and(|end| end < start) {
            return Err(RoiError{ reason: format!("ROI {} ends before it starts", s) });
        }
        Ok(Roi{ name: fields[0].to_string(), start, end })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub kind: String,
    pub start: usize,
    pub end: usize,
}

impl Feature {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Genome annotation with its length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureTable {
    pub genome_len: usize,
    pub features: Vec<Feature>,
}

impl FeatureTable {
    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|x| x.name == name)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter().filter(|x| x.kind == "fragment")
    }
}

/// Reads a feature table from `conn`.
pub fn read_features<R: Read>(
    conn: R,
    genome_len: usize,
) -> Result<FeatureTable, E> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_reader(conn);

    let mut features: Vec<Feature> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let (name, kind, start, end) = match (record.get(0), record.get(1), record.get(2), record.get(3)) {
            (Some(name), Some(kind), Some(start), Some(end)) => (name.trim(), kind.trim(), start.trim().parse::<usize>()?, end.trim().parse::<usize>()?),
            _ => return Err(roi_error(format!("feature table line {} has fewer than 4 columns", idx + 2))),
        };
        if end < start || end > genome_len {
            return Err(roi_error(format!("feature {} has invalid coordinates {}-{}", name, start, end)));
        }
        features.push(Feature{ name: name.to_string(), kind: kind.to_string(), start, end });
    }
    Ok(FeatureTable{ genome_len, features })
}

pub fn load_features<P: AsRef<Path>>(
    path: P,
    genome_len: usize,
) -> Result<FeatureTable, E> {
    read_features(std::fs::File::open(path)?, genome_len)
}

fn check_range(
    roi: &Roi,
    start: usize,
    end: usize,
) -> Result<(), E> {
    if end < start {
        return Err(roi_error(format!("ROI {} {} {:?} ends before it starts", roi.name, roi.start, roi.end)));
    }
    Ok(())
}

fn find_fragment(
    features: &FeatureTable,
    start: usize,
    end: usize,
    include_genomewide: bool,
) -> Result<(String, usize, usize), E> {
    if let Some(fragment) = features.fragments().find(|x| x.start <= start && x.end >= end) {
        return Ok((fragment.name.clone(), start - fragment.start, end - fragment.start))
    }
    if include_genomewide {
        Ok(("genomewide".to_string(), start, end))
    } else {
        Err(roi_error(format!("no fragment fully covers {}-{}", start, end)))
    }
}

/// Fragment and coordinates within it of `roi`.
///
/// Fragment ROIs are returned unchanged. Other ROIs are moved into genome
/// coordinates and then into the first fragment that fully covers them; if
/// none does, `genomewide` is returned when `include_genomewide` is set.
///
/// ## Usage
///
/// ```rust
/// use hivwholeseq::roi::{fragmented_roi, read_features};
///
/// let table = b"name\ttype\tstart\tend\nF1\tfragment\t0\t1000\nF2\tfragment\t800\t2000\nRT\tgene\t900\t1500\n";
/// let features = read_features(&table[..], 2000).unwrap();
///
/// let got = fragmented_roi(&features, &"RT 0 +oo".parse().unwrap(), false).unwrap();
///
/// assert_eq!(got, ("F2".to_string(), 100, 700));
/// ```
///
pub fn fragmented_roi(
    features: &FeatureTable,
    roi: &Roi,
    include_genomewide: bool,
) -> Result<(String, usize, usize), E> {
    if FRAGMENTS.contains(&roi.name.as_str()) {
        let end = match roi.end {
            Some(end) => end,
            None => features.get(&roi.name).map(|x| x.len()).ok_or_else(|| {
                roi_error(format!("fragment {} is not annotated", roi.name))
            })?,
        };
        check_range(roi, roi.start, end)?;
        debug!("Fragment selected: {} {} {}", roi.name, roi.start, end);
        return Ok((roi.name.clone(), roi.start, end))
    }

    let (start, end) = if roi.name == "genomewide" {
        (roi.start, roi.end.unwrap_or(features.genome_len))
    } else {
        let feature = features.get(&roi.name).ok_or_else(|| {
            roi_error(format!("ROI {} not understood", roi.name))
        })?;
        (roi.start + feature.start, roi.end.map(|x| x + feature.start).unwrap_or(feature.end))
    };

    check_range(roi, start, end)?;

    let res = find_fragment(features, start, end, include_genomewide)?;
    debug!("{} selected: {} {} {}", roi.name, res.0, res.1, res.2);
    Ok(res)
}

/// A fragment overlapping a ROI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveredFragment {
    pub name: String,
    /// Overlap in ROI coordinates.
    pub roi: (usize, usize),
    /// Overlap in fragment coordinates.
    pub fragment: (usize, usize),
}

/// Fragments overlapping `roi`.
pub fn fragments_covered(
    features: &FeatureTable,
    roi: &Roi,
) -> Result<Vec<CoveredFragment>, E> {
    let (name, start, end) = fragmented_roi(features, roi, true)?;
    if name != "genomewide" {
        return Ok(vec![CoveredFragment{ name, roi: (0, end - start), fragment: (start, end) }])
    }

    Ok(features.fragments()
        .filter(|x| x.start < end && x.end > start)
        .map(|x| CoveredFragment{
            name: x.name.clone(),
            roi: (start.max(x.start) - start, end.min(x.end) - start),
            fragment: (start.max(x.start) - x.start, end.min(x.end) - x.start),
        })
        .collect())
}

// Tests
#[cfg(test)]
mod tests {
    use super::FeatureTable;

    fn features() -> FeatureTable {
        let data = b"name\ttype\tstart\tend\nF1\tfragment\t0\t1000\nF2\tfragment\t800\t2000\nF3\tfragment\t1900\t3000\ngag\tgene\t100\t1600\nV3\tregion\t2950\t2990\n";
        super::read_features(&data[..], 3000).unwrap()
    }

    #[test]
    fn roi_from_str() {
        use super::Roi;
        use std::str::FromStr;

        assert_eq!(Roi::from_str("F1 300 350").unwrap(), Roi{ name: "F1".to_string(), start: 300, end: Some(350) });
        assert_eq!(Roi::from_str("genomewide 0 +oo").unwrap().end, None);
        assert!(Roi::from_str("F1 300").is_err());
        assert!(Roi::from_str("F1 a 300").is_err());
    }

    #[test]
    fn roi_ends_before_start() {
        use super::{fragmented_roi, fragments_covered, Roi};
        use std::str::FromStr;

        let features = features();

        assert!(Roi::from_str("F1 300 100").is_err());
        assert!(Roi::from_str("F1 300 300").is_ok());

        let roi = Roi{ name: "F1".to_string(), start: 300, end: Some(100) };
        assert!(fragmented_roi(&features, &roi, true).is_err());
        assert!(fragments_covered(&features, &roi).is_err());

        // open end past the region
        assert!(fragments_covered(&features, &"F2 5000 +oo".parse().unwrap()).is_err());
        assert!(fragments_covered(&features, &"V3 100 +oo".parse().unwrap()).is_err());
    }

    #[test]
    fn read_features_out_of_range() {
        let data = b"name\ttype\tstart\tend\nF1\tfragment\t0\t4000\n";

        assert!(super::read_features(&data[..], 3000).is_err());
    }

    #[test]
    fn fragmented_roi_fragment() {
        use super::fragmented_roi;

        let features = features();

        assert_eq!(fragmented_roi(&features, &"F2 10 20".parse().unwrap(), false).unwrap(), ("F2".to_string(), 10, 20));
        assert_eq!(fragmented_roi(&features, &"F2 10 +oo".parse().unwrap(), false).unwrap(), ("F2".to_string(), 10, 1200));
    }

    #[test]
    fn fragmented_roi_genomewide() {
        use super::fragmented_roi;

        let features = features();

        assert_eq!(fragmented_roi(&features, &"genomewide 850 950".parse().unwrap(), false).unwrap(), ("F1".to_string(), 850, 950));
        assert_eq!(fragmented_roi(&features, &"genomewide 950 1100".parse().unwrap(), false).unwrap(), ("F2".to_string(), 150, 300));
        assert!(fragmented_roi(&features, &"genomewide 0 +oo".parse().unwrap(), false).is_err());
        assert_eq!(fragmented_roi(&features, &"genomewide 0 +oo".parse().unwrap(), true).unwrap(), ("genomewide".to_string(), 0, 3000));
    }

    #[test]
    fn fragmented_roi_feature() {
        use super::fragmented_roi;

        let features = features();

        assert_eq!(fragmented_roi(&features, &"V3 0 +oo".parse().unwrap(), false).unwrap(), ("F3".to_string(), 1050, 1090));
        assert_eq!(fragmented_roi(&features, &"V3 10 20".parse().unwrap(), false).unwrap(), ("F3".to_string(), 1060, 1070));
        assert!(fragmented_roi(&features, &"gag 0 +oo".parse().unwrap(), false).is_err());
        assert!(fragmented_roi(&features, &"env 0 +oo".parse().unwrap(), true).is_err());
    }

    #[test]
    fn fragments_covered() {
        use super::{fragments_covered, CoveredFragment};

        let features = features();

        let got = fragments_covered(&features, &"gag 0 +oo".parse().unwrap()).unwrap();
        let expected = vec![
            CoveredFragment{ name: "F1".to_string(), roi: (0, 900), fragment: (100, 1000) },
            CoveredFragment{ name: "F2".to_string(), roi: (700, 1500), fragment: (0, 800) },
        ];
        assert_eq!(got, expected);

        let got = fragments_covered(&features, &"F3 5 10".parse().unwrap()).unwrap();
        assert_eq!(got, vec![CoveredFragment{ name: "F3".to_string(), roi: (0, 5), fragment: (5, 10) }]);
    }
}
