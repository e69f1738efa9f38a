//! Derived meteorological quantities.
//!
//! The scoring inputs are not always raw archive variables: wind speed
//! comes from its u/v components and relative humidity from temperature
//! and dewpoint (Magnus formula). NaN in any operand propagates.

/// Wind speed magnitude from u/v components, element-wise.
pub fn wind_speed(u: &[f32], v: &[f32]) -> Vec<f32> {
    debug_assert_eq!(u.len(), v.len());
    u.iter()
        .zip(v.iter())
        .map(|(a, b)| (a * a + b * b).sqrt())
        .collect()
}

/// Relative humidity (%) from 2m temperature and dewpoint, both in Kelvin.
///
/// Magnus approximation over water, clipped to [0, 100].
pub fn relative_humidity(t2m_k: &[f32], d2m_k: &[f32]) -> Vec<f32> {
    debug_assert_eq!(t2m_k.len(), d2m_k.len());
    t2m_k
        .iter()
        .zip(d2m_k.iter())
        .map(|(t, d)| {
            if t.is_nan() || d.is_nan() {
                return f32::NAN;
            }
            let t_c = t - 273.15;
            let d_c = d - 273.15;
            let rh = 100.0
                * (magnus(d_c) / magnus(t_c));
            rh.clamp(0.0, 100.0)
        })
        .collect()
}

fn magnus(celsius: f32) -> f32 {
    ((17.625 * celsius) / (243.04 + celsius)).exp()
}

/// Kelvin to Celsius, element-wise.
pub fn kelvin_to_celsius(kelvin: &[f32]) -> Vec<f32> {
    kelvin.iter().map(|k| k - 273.15).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wind_speed() {
        let ws = wind_speed(&[3.0, 0.0, f32::NAN], &[4.0, 0.0, 1.0]);
        assert_eq!(ws[0], 5.0);
        assert_eq!(ws[1], 0.0);
        assert!(ws[2].is_nan());
    }

    #[test]
    fn test_relative_humidity_saturated() {
        // Dewpoint equal to temperature means saturation.
        let rh = relative_humidity(&[293.15], &[293.15]);
        assert!((rh[0] - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_relative_humidity_dry() {
        // 30C air with 5C dewpoint is dry, roughly 20% RH.
        let rh = relative_humidity(&[303.15], &[278.15]);
        assert!(rh[0] > 15.0 && rh[0] < 25.0);
    }

    #[test]
    fn test_relative_humidity_nan_propagates() {
        let rh = relative_humidity(&[f32::NAN], &[278.15]);
        assert!(rh[0].is_nan());
    }

    #[test]
    fn test_kelvin_to_celsius() {
        let c = kelvin_to_celsius(&[273.15, 313.15]);
        assert!((c[0] - 0.0).abs() < 1e-4);
        assert!((c[1] - 40.0).abs() < 1e-4);
    }
}
