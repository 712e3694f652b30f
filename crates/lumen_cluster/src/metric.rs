use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Distance function between two vectors of equal length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
}

impl Metric {
    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        let pairs = a.iter().zip(b).map(|(x, y)| f64::from(*x) - f64::from(*y));
        match self {
            Metric::Euclidean => pairs.map(|d| d * d).sum::<f64>().sqrt(),
            Metric::Manhattan => pairs.map(f64::abs).sum(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "l1" => Ok(Metric::Manhattan),
            other => Err(ClusterError::InvalidParameter(format!(
                "unknown metric '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distances() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((Metric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-9);
        assert!((Metric::Manhattan.distance(&a, &b) - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Manhattan".parse::<Metric>().unwrap(), Metric::Manhattan);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert!("cosine".parse::<Metric>().is_err());
    }
}
