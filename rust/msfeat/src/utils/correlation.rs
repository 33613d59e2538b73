use crate::errors::{
    DataProcessingError,
    Result,
};

fn check_same_nonempty(a: &[f32], b: &[f32], context: &str) -> Result<()> {
    if a.len() != b.len() || a.is_empty() {
        return Err(DataProcessingError::ExpectedSlicesSameLength {
            expected: a.len(),
            other: b.len(),
            context: context.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Cosine similarity between two vectors of the same size.
///
/// Zero-magnitude inputs return 0.0; an all-zero profile matching nothing
/// is a normal no-match outcome, not an error.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_same_nonempty(a, b, "cosine_similarity")?;

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += (x as f64) * (y as f64);
        norm_a += (x as f64) * (x as f64);
        norm_b += (y as f64) * (y as f64);
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / denom).clamp(0.0, 1.0) as f32)
}

/// Pearson correlation coefficient.
///
/// Flat (zero-variance) profiles return 0.0: a constant trace carries no
/// shape information to correlate on.
pub fn pearson_correlation(a: &[f32], b: &[f32]) -> Result<f32> {
    check_same_nonempty(a, b, "pearson_correlation")?;

    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| x as f64).sum::<f64>() / n;

    let mut cov = 0.0f64;
    let mut var_a = 0.0f64;
    let mut var_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let dx = x as f64 - mean_a;
        let dy = y as f64 - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = var_a.sqrt() * var_b.sqrt();
    if denom == 0.0 {
        return Ok(0.0);
    }
    Ok((cov / denom).clamp(-1.0, 1.0) as f32)
}
