//! Pure domain rules shared by the API and the reporting tools
//!
//! Nothing in here touches the database; every function is deterministic
//! given its inputs.

mod age;
mod cpf;
mod trend;

pub use age::{age_bucket, age_in_years, AgeBucket, AgeDistribution};
pub use cpf::{is_valid_cpf, normalize_cpf};
pub use trend::{percent_change, Trend};

/// Percentage of `part` in `whole`, rounded to two decimals (0 when `whole` is 0)
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(4, 5), 80.0);
    }
}
