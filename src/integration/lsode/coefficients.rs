//! BDF method coefficients in Nordsieck form

/// Highest supported BDF order
pub const MAX_BDF_ORDER: usize = 5;

/// Corrector and error-test coefficients for orders `1..=MAX_BDF_ORDER`
///
/// Row `q` of `el` holds the `q + 1` Nordsieck corrector coefficients for
/// order `q` (`el[q][1]` is always 1). Row `q` of `tesco` holds the error
/// constants used to estimate the local error at orders `q - 1`, `q` and
/// `q + 1`. Row 0 of both tables is unused.
#[derive(Debug, Clone)]
pub struct BdfCoefficients {
    pub el: [[f64; MAX_BDF_ORDER + 1]; MAX_BDF_ORDER + 1],
    pub tesco: [[f64; 3]; MAX_BDF_ORDER + 1],
}

impl Default for BdfCoefficients {
    fn default() -> Self {
        Self::new()
    }
}

impl BdfCoefficients {
    pub fn new() -> Self {
        let mut el = [[0.0; MAX_BDF_ORDER + 1]; MAX_BDF_ORDER + 1];
        let mut tesco = [[0.0; 3]; MAX_BDF_ORDER + 1];

        // pc holds the coefficients of (x + 1)(x + 2)...(x + q - 1) times q!
        let mut pc = [0.0; MAX_BDF_ORDER + 2];
        pc[0] = 1.0;
        let mut rq1fac = 1.0;

        for q in 1..=MAX_BDF_ORDER {
            let fq = q as f64;
            pc[q] = 0.0;
            for i in (1..=q).rev() {
                pc[i] = pc[i - 1] + fq * pc[i];
            }
            pc[0] *= fq;

            for i in 0..=q {
                el[q][i] = pc[i] / pc[1];
            }
            el[q][1] = 1.0;

            tesco[q] = [rq1fac, (q + 1) as f64 / el[q][0], (q + 2) as f64 / el[q][0]];
            rq1fac /= fq;
        }

        Self { el, tesco }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_leading_coefficients() {
        let c = BdfCoefficients::new();
        let expected = [1.0, 2.0 / 3.0, 6.0 / 11.0, 12.0 / 25.0, 60.0 / 137.0];
        for (q, l0) in expected.iter().enumerate() {
            assert_relative_eq!(c.el[q + 1][0], *l0, epsilon = 1e-15);
            assert_eq!(c.el[q + 1][1], 1.0);
        }
    }

    #[test]
    fn test_known_rows() {
        let c = BdfCoefficients::new();
        assert_relative_eq!(c.el[2][2], 1.0 / 3.0, epsilon = 1e-15);
        assert_relative_eq!(c.el[4][2], 0.7, epsilon = 1e-15);
        assert_relative_eq!(c.el[4][4], 0.02, epsilon = 1e-15);

        assert_eq!(c.tesco[1], [1.0, 2.0, 3.0]);
        assert_relative_eq!(c.tesco[2][1], 4.5, epsilon = 1e-14);
        assert_relative_eq!(c.tesco[5][1], 13.7, epsilon = 1e-13);
        assert_relative_eq!(c.tesco[5][0], 1.0 / 24.0, epsilon = 1e-15);
    }
}
