//! Backward-difference coefficients for the multistep formulas
//!
//! All four families follow from the series
//! `c(t) = -t / ln(1 - t) = 1 / (1 + t/2 + t²/3 + ...)`:
//!
//! | family                     | generating function |
//! |----------------------------|---------------------|
//! | Adams-Moulton (implicit)   | `c(t)`              |
//! | Adams-Bashforth (explicit) | `c(t) / (1 - t)`    |
//! | Cowell (implicit)          | `c(t)²`             |
//! | Störmer (explicit)         | `c(t)² / (1 - t)`   |
//!
//! The Gauss-Jackson summed form is algebraically the Störmer-Cowell pair;
//! here the history is kept as backward differences of the accelerations.

/// Coefficient tables up to a maximum order
#[derive(Debug, Clone)]
pub struct MultistepCoefficients {
    pub adams_bashforth: Vec<f64>,
    pub adams_moulton: Vec<f64>,
    pub stormer: Vec<f64>,
    pub cowell: Vec<f64>,
}

impl MultistepCoefficients {
    /// Build tables holding `max_order` coefficients each
    pub fn new(max_order: usize) -> Self {
        let n = max_order.max(1);

        let mut moulton = vec![0.0; n];
        moulton[0] = 1.0;
        for m in 1..n {
            moulton[m] = -(1..=m)
                .map(|i| moulton[m - i] / (i as f64 + 1.0))
                .sum::<f64>();
        }

        let cowell: Vec<f64> = (0..n)
            .map(|m| (0..=m).map(|i| moulton[i] * moulton[m - i]).sum())
            .collect();

        Self {
            adams_bashforth: cumulative(&moulton),
            stormer: cumulative(&cowell),
            adams_moulton: moulton,
            cowell,
        }
    }

    pub fn max_order(&self) -> usize {
        self.adams_moulton.len()
    }
}

fn cumulative(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |sum, v| {
            *sum += v;
            Some(*sum)
        })
        .collect()
}

/// `Σ coeffs[j] ∇^j f` over `order` differences
///
/// `newest_first[0]` is the most recent sample.
pub fn difference_sum(newest_first: &[&[f64]], coeffs: &[f64], order: usize) -> Vec<f64> {
    let len = newest_first[0].len();
    let mut diffs: Vec<Vec<f64>> = newest_first[..order].iter().map(|v| v.to_vec()).collect();
    let mut sum: Vec<f64> = diffs[0].iter().map(|v| coeffs[0] * v).collect();

    for j in 1..order {
        for i in 0..(order - j) {
            for k in 0..len {
                diffs[i][k] -= diffs[i + 1][k];
            }
        }
        for k in 0..len {
            sum[k] += coeffs[j] * diffs[0][k];
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_known_coefficients() {
        let c = MultistepCoefficients::new(6);

        let ab = [1.0, 1.0 / 2.0, 5.0 / 12.0, 3.0 / 8.0, 251.0 / 720.0, 95.0 / 288.0];
        let am = [1.0, -1.0 / 2.0, -1.0 / 12.0, -1.0 / 24.0, -19.0 / 720.0, -3.0 / 160.0];
        let st = [1.0, 0.0, 1.0 / 12.0, 1.0 / 12.0, 19.0 / 240.0, 3.0 / 40.0];
        let co = [1.0, -1.0, 1.0 / 12.0, 0.0, -1.0 / 240.0, -1.0 / 240.0];

        for i in 0..6 {
            assert_relative_eq!(c.adams_bashforth[i], ab[i], epsilon = 1e-14);
            assert_relative_eq!(c.adams_moulton[i], am[i], epsilon = 1e-14);
            assert_relative_eq!(c.stormer[i], st[i], epsilon = 1e-14);
            assert_relative_eq!(c.cowell[i], co[i], epsilon = 1e-14);
        }
    }

    #[test]
    fn test_difference_sum_of_quadratic() {
        // f(n) = n², samples at n = 3, 2, 1: ∇f = 5, ∇²f = 2
        let samples = [[9.0], [4.0], [1.0]];
        let refs: Vec<&[f64]> = samples.iter().map(|s| s.as_slice()).collect();

        assert_relative_eq!(difference_sum(&refs, &[0.0, 1.0, 0.0], 3)[0], 5.0);
        assert_relative_eq!(difference_sum(&refs, &[0.0, 0.0, 1.0], 3)[0], 2.0);
        assert_relative_eq!(difference_sum(&refs, &[1.0, 1.0, 1.0], 3)[0], 16.0);
    }
}
