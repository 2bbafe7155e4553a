//! Pre-render buffer sizing, grounded in `optimizer/buffer_estimator.py`:
//! `max(256, static_bytes * 1.5)`, with extra headroom once a template has
//! enough `{{ }}` output sites that per-op overhead starts to dominate.

const MIN_BUFFER: usize = 256;
const STATIC_MULTIPLIER: f64 = 1.5;
const HEADROOM_FACTOR: f64 = 1.2;
const HIGH_OUTPUT_OP_THRESHOLD: usize = 100;

pub fn estimate(static_bytes: usize, output_op_count: usize) -> usize {
    let mut estimate = (static_bytes as f64 * STATIC_MULTIPLIER) as usize;
    if output_op_count > HIGH_OUTPUT_OP_THRESHOLD {
        estimate = (estimate as f64 * HEADROOM_FACTOR) as usize;
    }
    estimate.max(MIN_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_at_minimum() {
        assert_eq!(estimate(10, 2), MIN_BUFFER);
    }

    #[test]
    fn scales_with_static_bytes() {
        assert_eq!(estimate(1000, 2), 1500);
    }

    #[test]
    fn adds_headroom_past_threshold() {
        let base = (1000.0 * STATIC_MULTIPLIER) as usize;
        assert_eq!(estimate(1000, 150), (base as f64 * HEADROOM_FACTOR) as usize);
    }
}
