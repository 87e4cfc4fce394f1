//! Content fingerprints of run requests.

use std::fmt;
use std::str::FromStr;

use af_case::SimulationParameters;
use af_core::quantize;
use af_geometry::PointSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ResultsResult;

/// Bumped whenever the canonical document below changes shape.
pub const FINGERPRINT_SCHEMA: &str = "af-fingerprint/1";

/// Coordinates are compared on a 1e-6 grid.
const POINT_QUANTUM: f64 = 1e-6;

/// Hex SHA-256 of a canonical run request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for display.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = crate::ResultsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Fingerprint(s))
        } else {
            Err(crate::ResultsError::InvalidFingerprint(s))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = crate::ResultsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Points keep their order after the same normalization the curve builder
/// applies: repeated consecutive points and a closing copy of the first point
/// are dropped. Parameters become a key-sorted JSON object, so only values
/// matter, never field order.
pub fn compute_fingerprint(
    points: &PointSet,
    params: &SimulationParameters,
) -> ResultsResult<Fingerprint> {
    let mut quantized: Vec<[i64; 2]> = points
        .points()
        .iter()
        .map(|p| [quantize(p.x, POINT_QUANTUM), quantize(p.y, POINT_QUANTUM)])
        .collect();
    quantized.dedup();
    while quantized.len() > 1 && quantized.first() == quantized.last() {
        quantized.pop();
    }
    let parameters = serde_json::to_value(params)?;
    let document = serde_json::json!({
        "schema": FINGERPRINT_SCHEMA,
        "points": quantized,
        "parameters": parameters,
    });

    let mut hasher = Sha256::new();
    hasher.update(document.to_string().as_bytes());
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use af_case::Resolution;

    fn square() -> PointSet {
        PointSet::from_xy(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])
    }

    #[test]
    fn hash_stability() {
        let params = SimulationParameters::default();
        let a = compute_fingerprint(&square(), &params).unwrap();
        let b = compute_fingerprint(&square(), &params.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn hash_differs_for_different_inputs() {
        let params = SimulationParameters::default();
        let base = compute_fingerprint(&square(), &params).unwrap();
        let faster = SimulationParameters {
            velocity_mps: 2.0,
            ..params.clone()
        };
        let finer = SimulationParameters {
            resolution: Resolution::Fine,
            ..params.clone()
        };
        assert_ne!(base, compute_fingerprint(&square(), &faster).unwrap());
        assert_ne!(base, compute_fingerprint(&square(), &finer).unwrap());
    }

    #[test]
    fn sub_quantum_noise_is_ignored() {
        let params = SimulationParameters::default();
        let noisy = PointSet::from_xy(&[(1e-9, 0.0), (1.0, -1e-10), (1.0, 1.0), (0.0, 1.0)]);
        assert_eq!(
            compute_fingerprint(&square(), &params).unwrap(),
            compute_fingerprint(&noisy, &params).unwrap()
        );
    }

    #[test]
    fn repeated_clicks_hash_like_the_normalized_sketch() {
        let params = SimulationParameters::default();
        let doubled = PointSet::from_xy(&[
            (0.0, 0.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 0.0),
        ]);
        assert_eq!(
            compute_fingerprint(&square(), &params).unwrap(),
            compute_fingerprint(&doubled, &params).unwrap()
        );
    }

    #[test]
    fn non_finite_parameters_still_hash() {
        // serde_json maps NaN to null; validation rejects it before a run.
        let params = SimulationParameters {
            velocity_mps: f64::NAN,
            ..Default::default()
        };
        assert!(compute_fingerprint(&square(), &params).is_ok());
    }

    #[test]
    fn fingerprint_parsing() {
        let fp = compute_fingerprint(&square(), &SimulationParameters::default()).unwrap();
        let parsed: Fingerprint = fp.as_str().to_uppercase().parse().unwrap();
        assert_eq!(parsed, fp);
        assert!("abc".parse::<Fingerprint>().is_err());
        assert!("../../etc".parse::<Fingerprint>().is_err());
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), fp);
    }
}
