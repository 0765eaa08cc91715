//! Local regression (loess) used to draw a trend through the mean-variance
//! diagnostic table.
//!
//! For every point, the `n_pts` points nearest to it (by `x`) are weighted
//! with a tricube kernel of their scaled distance and a weighted least squares
//! line is fit through them; the fitted value at the point is its smoothed
//! value. This is only ever used for inspection and never feeds back into
//! testing.

/// Tricube kernel: w(u) = (1 - |u|^3)^3 for |u| < 1, else 0.
fn tricube(u: f64) -> f64 {
    let abs_u = u.abs();
    if abs_u >= 1.0 {
        0.0
    } else {
        let t = 1.0 - abs_u.powi(3);
        t.powi(3)
    }
}

/// Smooths `y` as a function of `x`. `x` must be sorted in ascending order and
/// be the same length as `y`. Returns one fitted value per input point.
pub fn smooth(x: &[f64], y: &[f64], n_pts: usize) -> Vec<f64> {
    let n = x.len().min(y.len());
    if n == 0 {
        return Vec::new();
    }
    let n_pts = n_pts.max(2);

    (0..n)
        .map(|point| {
            let x_now = x[point];
            let distance = |i: usize| (x[i] - x_now).abs();

            // Narrow the window [lo, hi] from whichever end is farther until
            // it holds at most n_pts points.
            let (mut lo, mut hi) = (0usize, n - 1);
            while hi + 1 - lo > n_pts {
                let (d_lo, d_hi) = (distance(lo), distance(hi));
                if d_lo > d_hi {
                    lo += 1;
                } else if d_lo < d_hi {
                    hi -= 1;
                } else {
                    lo += 1;
                    hi -= 1;
                }
            }

            let max_dist = (lo..=hi).map(distance).fold(0.0, f64::max);
            if max_dist == 0.0 {
                return y[point];
            }

            let mut sum_w = 0.0;
            let mut sum_wx = 0.0;
            let mut sum_wx2 = 0.0;
            let mut sum_wy = 0.0;
            let mut sum_wxy = 0.0;

            for i in lo..=hi {
                let w = tricube(distance(i) / max_dist);
                sum_w += w;
                sum_wx += w * x[i];
                sum_wx2 += w * x[i] * x[i];
                sum_wy += w * y[i];
                sum_wxy += w * x[i] * y[i];
            }

            let denom = sum_w * sum_wx2 - sum_wx * sum_wx;
            if denom.abs() < f64::EPSILON {
                // All weight on one x value; fall back to the weighted mean.
                return match sum_w > 0.0 {
                    true => sum_wy / sum_w,
                    false => y[point],
                };
            }

            let slope = (sum_w * sum_wxy - sum_wx * sum_wy) / denom;
            let intercept = (sum_wx2 * sum_wy - sum_wx * sum_wxy) / denom;
            slope * x_now + intercept
        })
        .collect()
}
