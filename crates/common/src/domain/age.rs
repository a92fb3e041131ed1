//! Age bucketing
//!
//! Ages are `current_year - birth_year`; month and day are ignored.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Fixed closed-interval age buckets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "0-18")]
    Minor,
    #[serde(rename = "19-35")]
    YoungAdult,
    #[serde(rename = "36-50")]
    Adult,
    #[serde(rename = "51-65")]
    MiddleAged,
    #[serde(rename = "65+")]
    Senior,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 5] = [
        AgeBucket::Minor,
        AgeBucket::YoungAdult,
        AgeBucket::Adult,
        AgeBucket::MiddleAged,
        AgeBucket::Senior,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AgeBucket::Minor => "0-18",
            AgeBucket::YoungAdult => "19-35",
            AgeBucket::Adult => "36-50",
            AgeBucket::MiddleAged => "51-65",
            AgeBucket::Senior => "65+",
        }
    }
}

/// Approximate age in whole years
pub fn age_in_years(birth_date: NaiveDate, current_year: i32) -> i32 {
    current_year - birth_date.year()
}

/// Bucket for an age; negative ages (future birth dates) land in 0-18 and 65
/// belongs to 51-65.
pub fn age_bucket(age: i32) -> AgeBucket {
    match age {
        i32::MIN..=18 => AgeBucket::Minor,
        19..=35 => AgeBucket::YoungAdult,
        36..=50 => AgeBucket::Adult,
        51..=65 => AgeBucket::MiddleAged,
        _ => AgeBucket::Senior,
    }
}

/// Patient counts per age bucket
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeDistribution {
    #[serde(rename = "0-18")]
    pub minor: u64,
    #[serde(rename = "19-35")]
    pub young_adult: u64,
    #[serde(rename = "36-50")]
    pub adult: u64,
    #[serde(rename = "51-65")]
    pub middle_aged: u64,
    #[serde(rename = "65+")]
    pub senior: u64,
}

impl AgeDistribution {
    pub fn from_birth_dates<'a, I>(dates: I, current_year: i32) -> Self
    where
        I: IntoIterator<Item = &'a NaiveDate>,
    {
        let mut dist = Self::default();
        for date in dates {
            dist.add(age_bucket(age_in_years(*date, current_year)));
        }
        dist
    }

    pub fn add(&mut self, bucket: AgeBucket) {
        *self.slot(bucket) += 1;
    }

    pub fn get(&self, bucket: AgeBucket) -> u64 {
        match bucket {
            AgeBucket::Minor => self.minor,
            AgeBucket::YoungAdult => self.young_adult,
            AgeBucket::Adult => self.adult,
            AgeBucket::MiddleAged => self.middle_aged,
            AgeBucket::Senior => self.senior,
        }
    }

    pub fn total(&self) -> u64 {
        AgeBucket::ALL.iter().map(|b| self.get(*b)).sum()
    }

    /// (label, count) pairs in bucket order
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        AgeBucket::ALL.iter().map(|b| (b.label(), self.get(*b))).collect()
    }

    fn slot(&mut self, bucket: AgeBucket) -> &mut u64 {
        match bucket {
            AgeBucket::Minor => &mut self.minor,
            AgeBucket::YoungAdult => &mut self.young_adult,
            AgeBucket::Adult => &mut self.adult,
            AgeBucket::MiddleAged => &mut self.middle_aged,
            AgeBucket::Senior => &mut self.senior,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(age_bucket(0), AgeBucket::Minor);
        assert_eq!(age_bucket(18), AgeBucket::Minor);
        assert_eq!(age_bucket(19), AgeBucket::YoungAdult);
        assert_eq!(age_bucket(35), AgeBucket::YoungAdult);
        assert_eq!(age_bucket(36), AgeBucket::Adult);
        assert_eq!(age_bucket(50), AgeBucket::Adult);
        assert_eq!(age_bucket(51), AgeBucket::MiddleAged);
        assert_eq!(age_bucket(65), AgeBucket::MiddleAged);
        assert_eq!(age_bucket(66), AgeBucket::Senior);
        assert_eq!(age_bucket(104), AgeBucket::Senior);
    }

    #[test]
    fn test_future_birth_date_is_minor() {
        assert_eq!(age_bucket(age_in_years(date(2030, 1, 1), 2026)), AgeBucket::Minor);
    }

    #[test]
    fn test_month_and_day_ignored() {
        // Born late December, counted as a full year older on Jan 1st
        assert_eq!(age_in_years(date(2007, 12, 31), 2026), 19);
        assert_eq!(age_bucket(age_in_years(date(2007, 12, 31), 2026)), AgeBucket::YoungAdult);
    }

    #[test]
    fn test_distribution_partitions_every_date() {
        let dates: Vec<NaiveDate> = (1920..=2026)
            .map(|y| date(y, 6, 15))
            .collect();

        let dist = AgeDistribution::from_birth_dates(&dates, 2026);
        assert_eq!(dist.total(), dates.len() as u64);
        assert_eq!(dist.minor, 19);       // ages 0..=18
        assert_eq!(dist.young_adult, 17); // 19..=35
        assert_eq!(dist.adult, 15);       // 36..=50
        assert_eq!(dist.middle_aged, 15); // 51..=65
        assert_eq!(dist.senior, 41);      // 66..=106
    }

    #[test]
    fn test_serialized_labels() {
        let mut dist = AgeDistribution::default();
        dist.add(AgeBucket::Senior);
        let json = serde_json::to_value(&dist).unwrap();
        assert_eq!(json["65+"], 1);
        assert_eq!(json["0-18"], 0);
    }
}
