//! Vector normalization and the fixed-precision text encodings.
//!
//! Every component is rendered with exactly six digits after the decimal
//! point. The comma-joined form travels inside query envelopes; the
//! space-joined form is the vector column of an index line.

use lemsearch_core::error::{LemError, Result};
use lemsearch_core::types::IndexRecord;

/// Digits after the decimal point in every encoded component.
pub const PRECISION: usize = 6;

/// Compute the L2 (Euclidean) norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Return `v` scaled to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn encode_joined(v: &[f32], sep: &str) -> String {
    v.iter()
        .map(|x| format!("{:.*}", PRECISION, x))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Render as comma-separated 6-decimal floats.
pub fn encode_csv(v: &[f32]) -> String {
    encode_joined(v, ",")
}

/// Render as space-separated 6-decimal floats.
pub fn encode_ssv(v: &[f32]) -> String {
    encode_joined(v, " ")
}

/// Render one index line (without the line terminator).
pub fn encode_index_record(id: &str, lemma: &str, v: &[f32]) -> String {
    format!("{}\t{}\t{}", id, lemma, encode_ssv(v))
}

fn parse_token(token: &str, position: usize) -> Result<f32> {
    token.parse::<f32>().map_err(|_| {
        LemError::Format(format!(
            "invalid float token {:?} at position {}",
            token, position
        ))
    })
}

fn check_dim(v: Vec<f32>, expected: Option<usize>) -> Result<Vec<f32>> {
    match expected {
        Some(expected) if v.len() != expected => Err(LemError::Dimension {
            expected,
            actual: v.len(),
        }),
        _ => Ok(v),
    }
}

/// Parse a comma-separated vector. An empty string decodes to an empty vector.
pub fn decode_csv(s: &str) -> Result<Vec<f32>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .enumerate()
        .map(|(i, token)| parse_token(token.trim(), i))
        .collect()
}

/// Parse a whitespace-separated vector.
pub fn decode_ssv(s: &str) -> Result<Vec<f32>> {
    s.split_ascii_whitespace()
        .enumerate()
        .map(|(i, token)| parse_token(token, i))
        .collect()
}

/// [`decode_csv`] with an arity check.
pub fn decode_csv_dim(s: &str, expected: usize) -> Result<Vec<f32>> {
    check_dim(decode_csv(s)?, Some(expected))
}

/// [`decode_ssv`] with an arity check.
pub fn decode_ssv_dim(s: &str, expected: usize) -> Result<Vec<f32>> {
    check_dim(decode_ssv(s)?, Some(expected))
}

/// Parse one index line back into an [`IndexRecord`].
///
/// The lemma may not contain tabs; the vector column is everything after
/// the second tab. A trailing `\r\n` or `\n` is tolerated.
pub fn decode_index_record(line: &str, expected_dim: Option<usize>) -> Result<IndexRecord> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(3, '\t');
    let (Some(id), Some(lemma), Some(vector)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(LemError::Format(format!(
            "expected 3 tab-separated fields in index line {:?}",
            line
        )));
    };

    let embedding = decode_ssv(vector)
        .and_then(|v| check_dim(v, expected_dim))
        .map_err(|e| match e {
            LemError::Format(msg) => LemError::Format(format!("record {}: {}", id, msg)),
            other => other,
        })?;

    Ok(IndexRecord {
        id: id.to_string(),
        lemma: lemma.to_string(),
        embedding,
    })
}

/// Round every component to the encoded precision.
pub fn quantize(v: &[f32]) -> Vec<f32> {
    let scale = 10f64.powi(PRECISION as i32);
    v.iter()
        .map(|&x| ((x as f64 * scale).round() / scale) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-6;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    #[test]
    fn test_normalize_known_vector() {
        let v = normalize(&[3.0, 4.0]);
        assert!(approx_eq(v[0], 0.6));
        assert!(approx_eq(v[1], 0.8));
        assert!(approx_eq(l2_norm(&v), 1.0));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs: Vec<Vec<f32>> = vec![
            vec![3.0, 4.0],
            vec![-0.25, 0.5, 10.0, 1e-3],
            (1..=384).map(|i| (i as f32).sin()).collect(),
        ];
        for v in inputs {
            let once = normalize(&v);
            let twice = normalize(&once);
            for (a, b) in once.iter().zip(twice.iter()) {
                assert!(approx_eq(*a, *b), "{} != {}", a, b);
            }
        }
    }

    #[test]
    fn test_normalize_zero_vector_passes_through() {
        let v = vec![0.0, 0.0, 0.0];
        let out = normalize(&v);
        assert_eq!(out, v);
        assert!(!out.iter().any(|x| x.is_nan()), "no NaN");
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_encode_fixed_precision() {
        assert_eq!(encode_csv(&[0.5, -0.25, 1.0]), "0.500000,-0.250000,1.000000");
        assert_eq!(encode_ssv(&[0.5, -0.25, 1.0]), "0.500000 -0.250000 1.000000");
        assert_eq!(encode_csv(&[0.1234567]), "0.123457");
        assert_eq!(encode_csv(&[]), "");
    }

    #[test]
    fn test_encode_index_line() {
        assert_eq!(
            encode_index_record("L7", "cat", &[0.6, 0.8]),
            "L7\tcat\t0.600000 0.800000"
        );
    }

    #[test]
    fn test_round_trip_is_exact_for_quantized_vectors() {
        let raw: Vec<f32> = (0..384).map(|i| ((i as f32) * 0.37).cos() * 0.9).collect();
        let v = quantize(&raw);
        assert_eq!(decode_ssv(&encode_ssv(&v)).unwrap(), v);
        assert_eq!(decode_csv(&encode_csv(&v)).unwrap(), v);
    }

    #[test]
    fn test_decode_rejects_malformed_token() {
        let err = decode_csv("0.1,abc,0.3").unwrap_err();
        assert!(matches!(err, LemError::Format(_)));
        assert!(err.to_string().contains("\"abc\""));

        assert!(matches!(decode_csv("0.1,,0.3"), Err(LemError::Format(_))));
        assert!(matches!(decode_ssv("0.1 nope"), Err(LemError::Format(_))));
    }

    #[test]
    fn test_decode_checks_dimension() {
        assert_eq!(decode_csv_dim("1,2", 2).unwrap(), vec![1.0, 2.0]);
        assert!(matches!(
            decode_csv_dim("1,2,3", 2),
            Err(LemError::Dimension {
                expected: 2,
                actual: 3
            })
        ));
        assert!(matches!(
            decode_ssv_dim("1", 2),
            Err(LemError::Dimension { .. })
        ));
    }

    #[test]
    fn test_decode_empty_inputs() {
        assert!(decode_csv("").unwrap().is_empty());
        assert!(decode_ssv("").unwrap().is_empty());
    }

    #[test]
    fn test_decode_index_line() {
        let record = decode_index_record("L7\tcat\t0.600000 0.800000\n", Some(2)).unwrap();
        assert_eq!(record.id, "L7");
        assert_eq!(record.lemma, "cat");
        assert_eq!(record.embedding, vec![0.6, 0.8]);
    }

    #[test]
    fn test_decode_index_line_dimension_mismatch() {
        let err = decode_index_record("L7\tcat\t0.1 0.2 0.3", Some(384)).unwrap_err();
        assert!(matches!(
            err,
            LemError::Dimension {
                expected: 384,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_decode_index_line_missing_fields() {
        let err = decode_index_record("L7 cat 0.1", None).unwrap_err();
        assert!(matches!(err, LemError::Format(_)));
    }

    #[test]
    fn test_decode_index_line_names_record_on_bad_token() {
        let err = decode_index_record("L9\tdog\t0.1 x", None).unwrap_err();
        assert!(err.to_string().contains("record L9"));
    }

    #[test]
    fn test_quantize_rounds_to_six_decimals() {
        let v = quantize(&[0.1234564, -0.9999996]);
        assert_eq!(encode_csv(&v), "0.123456,-1.000000");
    }
}
