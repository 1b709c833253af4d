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

//! Patients and their sequenced samples.
//!
//! Both tables are tab separated with a header line. The patient table has
//! the columns
//!
//!   - patient name,
//!   - last negative HIV test date,
//!   - first positive HIV test date,
//!
//! and the sample table has
//!
//!   - sample name,
//!   - patient name,
//!   - sampling date,
//!   - viral load (copies/ml, may be empty).
//!
//! Dates are written as `YYYY-MM-DD`.
//!
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use chrono::Duration;

use csv::ReaderBuilder;
use csv::StringRecord;

type E = Box<dyn std::error::Error>;

#[derive(Debug, Clone)]
pub struct TableParseError {
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for TableParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "table line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for TableParseError {}

#[derive(Debug, Clone)]
pub struct UnknownTimeUnit {
    pub unit: String,
}

impl std::fmt::Display for UnknownTimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "unknown time unit {} (expected day, month or year)", self.unit)
    }
}

impl std::error::Error for UnknownTimeUnit {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeUnit {
    #[default]
    Day,
    Month,
    Year,
}

impl TimeUnit {
    pub fn days(&self) -> f64 {
        match self {
            TimeUnit::Day => 1.0,
            TimeUnit::Month => 365.25 / 12.0,
            TimeUnit::Year => 365.25,
        }
    }
}

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" | "days" => Ok(TimeUnit::Day),
            "month" | "months" => Ok(TimeUnit::Month),
            "year" | "years" => Ok(TimeUnit::Year),
            _ => Err(UnknownTimeUnit{ unit: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patient {
    pub name: String,
    pub last_negative: NaiveDate,
    pub first_positive: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplePat {
    pub name: String,
    pub patient: String,
    pub date: NaiveDate,
    pub viral_load: Option<f64>,
}

impl Patient {
    /// Midpoint between the last negative and first positive test, rounded down to a day.
    ///
    /// ## Usage
    ///
    /// ```rust
    /// use hivwholeseq::patients::Patient;
    /// use chrono::NaiveDate;
    ///
    /// let patient = Patient{
    ///     name: "p1".to_string(),
    ///     last_negative: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap(),
    ///     first_positive: NaiveDate::from_ymd_opt(2010, 1, 21).unwrap(),
    /// };
    ///
    /// assert_eq!(patient.transmission_date(), NaiveDate::from_ymd_opt(2010, 1, 11).unwrap());
    /// ```
    ///
    pub fn transmission_date(&self) -> NaiveDate {
        let window = self.first_positive - self.last_negative;
        self.last_negative + Duration::days(window.num_days() / 2)
    }

    /// Samples of this patient from `samples`, sorted by date.
    pub fn samples<'a>(&self, samples: &'a [SamplePat]) -> Vec<&'a SamplePat> {
        let mut res: Vec<&SamplePat> = samples.iter().filter(|x| x.patient == self.name).collect();
        res.sort_by_key(|x| x.date);
        res
    }

    /// Time of `date` since transmission in `unit`.
    pub fn time_since_transmission(&self, date: NaiveDate, unit: TimeUnit) -> f64 {
        let since_negative = (date - self.last_negative).num_days() as f64;
        let window = (self.first_positive - self.last_negative).num_days() as f64;
        (since_negative - window / 2.0) / unit.days()
    }

    /// Sampling times of this patient since transmission in `unit`, sorted.
    pub fn times(&self, samples: &[SamplePat], unit: TimeUnit) -> Vec<f64> {
        self.samples(samples).iter().map(|x| self.time_since_transmission(x.date, unit)).collect()
    }
}

impl SamplePat {
    /// Number of HIV genomes that entered the two RT-PCR reactions.
    pub fn n_templates(&self) -> Option<f64> {
        self.viral_load.map(|x| x * 0.4 / 12.0 * 2.0)
    }
}

/// Patients with at least `n_times` sequenced samples.
pub fn filter_patients_n_times<'a>(
    patients: &'a [Patient],
    samples: &[SamplePat],
    n_times: usize,
) -> Vec<&'a Patient> {
    patients.iter().filter(|x| x.samples(samples).len() >= n_times).collect()
}

fn field<'a>(record: &'a StringRecord, col: usize, line: usize) -> Result<&'a str, E> {
    record.get(col).map(|x| x.trim()).ok_or_else(|| {
        Box::new(TableParseError{ line, reason: format!("missing column {}", col + 1) }) as E
    })
}

fn parse_date(value: &str, line: usize) -> Result<NaiveDate, E> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        Box::new(TableParseError{ line, reason: format!("date {}: {}", value, e) }) as E
    })
}

fn parse_viral_load(value: &str, line: usize) -> Result<Option<f64>, E> {
    if value.is_empty() || value.eq_ignore_ascii_case("nan") {
        return Ok(None)
    }
    value.parse::<f64>().map(Some).map_err(|e| {
        Box::new(TableParseError{ line, reason: format!("viral load {}: {}", value, e) }) as E
    })
}

/// Reads a patient table from `conn`.
pub fn read_patients<R: Read>(
    conn: R,
) -> Result<Vec<Patient>, E> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_reader(conn);

    let mut patients: Vec<Patient> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx + 2;
        patients.push(Patient{
            name: field(&record, 0, line)?.to_string(),
            last_negative: parse_date(field(&record, 1, line)?, line)?,
            first_positive: parse_date(field(&record, 2, line)?, line)?,
        });
    }
    Ok(patients)
}

/// Reads a sample table from `conn`.
pub fn read_samples<R: Read>(
    conn: R,
) -> Result<Vec<SamplePat>, E> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(conn);

    let mut samples: Vec<SamplePat> = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let line = idx + 2;
        samples.push(SamplePat{
            name: field(&record, 0, line)?.to_string(),
            patient: field(&record, 1, line)?.to_string(),
            date: parse_date(field(&record, 2, line)?, line)?,
            viral_load: parse_viral_load(record.get(3).unwrap_or_default().trim(), line)?,
        });
    }
    Ok(samples)
}

pub fn load_patients<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<Patient>, E> {
    read_patients(std::fs::File::open(path)?)
}

pub fn load_samples<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<SamplePat>, E> {
    read_samples(std::fs::File::open(path)?)
}

/// Finds patient `name` in the patient table.
pub fn find_patient<'a>(
    patients: &'a [Patient],
    name: &str,
) -> Result<&'a Patient, E> {
    patients.iter().find(|x| x.name == name).ok_or_else(|| {
        Box::new(TableParseError{ line: 0, reason: format!("patient {} not found", name) }) as E
    })
}

// Tests
#[cfg(test)]
mod tests {
    use super::{Patient, SamplePat};

    fn patients() -> Vec<Patient> {
        let data = b"name\tlast negative date\tfirst positive date\np1\t2010-01-01\t2010-03-02\np2\t2011-05-10\t2011-05-20\n";
        super::read_patients(&data[..]).unwrap()
    }

    fn samples() -> Vec<SamplePat> {
        let data = b"name\tpatient\tdate\tviral load\ns3\tp1\t2010-09-01\t30000\ns1\tp1\t2010-03-01\t120000\ns2\tp1\t2010-05-31\t\ns4\tp2\t2011-06-01\tNaN\n";
        super::read_samples(&data[..]).unwrap()
    }

    #[test]
    fn read_patients() {
        use chrono::NaiveDate;

        let got = patients();

        assert_eq!(got.len(), 2);
        assert_eq!(got[1].name, "p2");
        assert_eq!(got[0].first_positive, NaiveDate::from_ymd_opt(2010, 3, 2).unwrap());
    }

    #[test]
    fn read_patients_bad_date() {
        let data = b"name\tlast negative date\tfirst positive date\np1\t2010-01-01\tmarch\n";
        let got = super::read_patients(&data[..]);

        assert!(got.is_err());
    }

    #[test]
    fn read_samples() {
        let got = samples();

        assert_eq!(got.len(), 4);
        assert_eq!(got[0].viral_load, Some(30000.0));
        assert_eq!(got[2].viral_load, None);
        assert_eq!(got[3].viral_load, None);
    }

    #[test]
    fn times() {
        use super::TimeUnit;

        let patients = patients();
        let samples = samples();

        // 2010-01-01 to 2010-03-02 is 60 days, transmission on day 30.
        let got = patients[0].times(&samples, TimeUnit::Day);
        assert_eq!(got, vec![29.0, 120.0, 213.0]);

        let got = patients[0].times(&samples, TimeUnit::Year);
        assert!((got[1] - 120.0 / 365.25).abs() < 1e-12);
    }

    #[test]
    fn n_templates() {
        let samples = samples();

        assert_eq!(samples[1].n_templates(), Some(120000.0 * 0.4 / 12.0 * 2.0));
        assert_eq!(samples[2].n_templates(), None);
    }

    #[test]
    fn filter_patients_n_times() {
        use super::filter_patients_n_times;

        let patients = patients();
        let samples = samples();

        let got: Vec<&str> = filter_patients_n_times(&patients, &samples, 3).iter().map(|x| x.name.as_str()).collect();
        assert_eq!(got, vec!["p1"]);

        let got = filter_patients_n_times(&patients, &samples, 1);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn time_unit_from_str() {
        use super::TimeUnit;
        use std::str::FromStr;

        assert_eq!(TimeUnit::from_str("month").unwrap(), TimeUnit::Month);
        assert!(TimeUnit::from_str("week").is_err());
    }
}
