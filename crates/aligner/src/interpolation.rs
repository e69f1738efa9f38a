//! Interpolation methods for grid resampling.

use risk_common::GridSpec;

use crate::dataset::SpatialMethod;

/// Nearest neighbor interpolation.
///
/// Returns the value of the nearest grid point, NaN outside the grid.
pub fn nearest_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let col = x.round() as usize;
    let row = y.round() as usize;

    if col >= width || row >= height {
        return f32::NAN;
    }

    data[row * width + col]
}

/// Bilinear interpolation.
///
/// Smoothly interpolates between the four nearest grid points. If any
/// corner is NaN the result is NaN; a missing sample never contributes a
/// fabricated value.
pub fn bilinear_interpolate(data: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);

    if x0 >= width || y0 >= height {
        return f32::NAN;
    }

    let xf = (x - x0 as f64) as f32;
    let yf = (y - y0 as f64) as f32;

    let v00 = data[y0 * width + x0];
    let v10 = data[y0 * width + x1];
    let v01 = data[y1 * width + x0];
    let v11 = data[y1 * width + x1];

    if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
        return f32::NAN;
    }

    let top = v00 * (1.0 - xf) + v10 * xf;
    let bottom = v01 * (1.0 - xf) + v11 * xf;
    top * (1.0 - yf) + bottom * yf
}

/// Resample one grid of values from a source grid onto a destination grid.
///
/// Destination cells outside the source's coverage come back as NaN.
pub fn resample_to_grid(
    src: &GridSpec,
    data: &[f32],
    dst: &GridSpec,
    method: SpatialMethod,
) -> Vec<f32> {
    debug_assert_eq!(data.len(), src.len());
    let mut out = vec![f32::NAN; dst.len()];

    for row in 0..dst.ny {
        let lat = dst.lat(row);
        for col in 0..dst.nx {
            let lon = dst.lon(col);
            let Some((sx, sy)) = src.frac_index(lon, lat) else {
                continue; // outside native coverage, stays NaN
            };
            out[row * dst.nx + col] = match method {
                SpatialMethod::Nearest => nearest_interpolate(data, src.nx, src.ny, sx, sy),
                SpatialMethod::Bilinear => bilinear_interpolate(data, src.nx, src.ny, sx, sy),
            };
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use risk_common::BoundingBox;

    #[test]
    fn test_nearest_interpolate() {
        let data: Vec<f32> = vec![
            1.0, 2.0, 3.0, //
            4.0, 5.0, 6.0, //
            7.0, 8.0, 9.0,
        ];

        assert_eq!(nearest_interpolate(&data, 3, 3, 0.0, 0.0), 1.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 1.0, 1.0), 5.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 0.4, 0.4), 1.0);
        assert_eq!(nearest_interpolate(&data, 3, 3, 0.6, 0.6), 5.0);
    }

    #[test]
    fn test_bilinear_interpolate() {
        let data: Vec<f32> = vec![
            1.0, 2.0, //
            3.0, 4.0,
        ];

        assert_eq!(bilinear_interpolate(&data, 2, 2, 0.0, 0.0), 1.0);
        assert_eq!(bilinear_interpolate(&data, 2, 2, 1.0, 1.0), 4.0);

        let center = bilinear_interpolate(&data, 2, 2, 0.5, 0.5);
        assert!((center - 2.5).abs() < 0.001);
    }

    #[test]
    fn test_bilinear_with_nan() {
        let data: Vec<f32> = vec![
            1.0,
            f32::NAN, //
            3.0,
            4.0,
        ];

        let result = bilinear_interpolate(&data, 2, 2, 0.5, 0.5);
        assert!(result.is_nan());
    }

    #[test]
    fn test_resample_identity() {
        let grid = GridSpec::from_region(BoundingBox::new(0.0, 0.0, 2.0, 2.0), 1.0);
        let data: Vec<f32> = (0..9).map(|v| v as f32).collect();

        let out = resample_to_grid(&grid, &data, &grid, SpatialMethod::Bilinear);
        for (a, b) in out.iter().zip(data.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_resample_outside_coverage_is_nan() {
        // Source covers the eastern half of the destination only.
        let src = GridSpec::from_region(BoundingBox::new(1.0, 0.0, 2.0, 2.0), 1.0);
        let dst = GridSpec::from_region(BoundingBox::new(0.0, 0.0, 2.0, 2.0), 1.0);
        let data = vec![5.0; src.len()];

        let out = resample_to_grid(&src, &data, &dst, SpatialMethod::Nearest);
        for row in 0..dst.ny {
            // Column 0 (lon 0.0) is outside the source bbox.
            assert!(out[row * dst.nx].is_nan());
            // Easternmost column is covered.
            assert_eq!(out[row * dst.nx + dst.nx - 1], 5.0);
        }
    }

    #[test]
    fn test_resample_refines_resolution() {
        let src = GridSpec::from_region(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 1.0);
        let dst = GridSpec::from_region(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.5);
        // north row: 1.0 2.0 / south row: 3.0 4.0
        let data = vec![1.0, 2.0, 3.0, 4.0];

        let out = resample_to_grid(&src, &data, &dst, SpatialMethod::Bilinear);
        assert_eq!(out.len(), 9);
        // Center of the 3x3 refined grid sits between all four corners.
        assert!((out[4] - 2.5).abs() < 1e-6);
    }
}
