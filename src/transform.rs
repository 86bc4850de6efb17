// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Pure 2D point operations used by the toolpath-generating commands.
//!
//! Angles are in degrees, clockwise positive, matching the part-program
//! convention.  Operations leave absent coordinates untouched.

use std::f64::consts::PI;

/// A point with optional coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Point {
    pub fn xy(x: f64, y: f64) -> Point {
        Point { x: Some(x), y: Some(y), z: None }
    }
}

/// Rotate about `(cx, cy)` by `angle` degrees, clockwise positive.
pub fn rotate(p: Point, angle: f64, cx: f64, cy: f64) -> Point {
    let theta = -(angle % 360.0) * PI / 180.0;
    match (p.x, p.y) {
        (Some(x), Some(y)) => Point {
            x: Some(cx + (x - cx) * theta.cos() - (y - cy) * theta.sin()),
            y: Some(cy + (x - cx) * theta.sin() + (y - cy) * theta.cos()),
            z: p.z,
        },
        _ => p,
    }
}

/// Shear parallel to the X axis: X picks up a term proportional to Y.
///
/// Small angles only; the tangent is approximated by the angle itself.
pub fn shear_x(p: Point, angle: f64) -> Point {
    let t = -angle * PI / 180.0;
    match (p.x, p.y) {
        (Some(x), Some(y)) => Point { x: Some(x + t * y), ..p },
        _ => p,
    }
}

/// Shear parallel to the Y axis: Y picks up a term proportional to X.
pub fn shear_y(p: Point, angle: f64) -> Point {
    let t = -angle * PI / 180.0;
    match (p.x, p.y) {
        (Some(x), Some(y)) => Point { y: Some(y + t * x), ..p },
        _ => p,
    }
}

/// Scale about `(cx, cy)`.  Components with scale 1 are untouched.
pub fn scale(p: Point, sx: f64, sy: f64, cx: f64, cy: f64) -> Point {
    let mut q = p;
    if sx != 1.0 {
        if let Some(x) = p.x {
            q.x = Some(cx + (x - cx) * sx);
        }
    }
    if sy != 1.0 {
        if let Some(y) = p.y {
            q.y = Some(cy + (y - cy) * sy);
        }
    }
    q
}

/// Translate by the given offsets.  Zero offsets are untouched.
pub fn translate(p: Point, dx: f64, dy: f64, dz: f64) -> Point {
    let mut q = p;
    if dx != 0.0 {
        if let Some(x) = p.x {
            q.x = Some(x + dx);
        }
    }
    if dy != 0.0 {
        if let Some(y) = p.y {
            q.y = Some(y + dy);
        }
    }
    if dz != 0.0 {
        if let Some(z) = p.z {
            q.z = Some(z + dz);
        }
    }
    q
}


#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Point, b: Point) -> bool {
        fn c(a: Option<f64>, b: Option<f64>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                (None, None) => true,
                _ => false,
            }
        }
        c(a.x, b.x) && c(a.y, b.y) && c(a.z, b.z)
    }

    #[test]
    fn rotate_inverse_is_identity() {
        let p = Point::xy(3.0, 4.0);
        for &angle in &[15.0, 90.0, 123.456, -77.0, 400.0] {
            let q = rotate(rotate(p, angle, 1.0, 1.0), -angle, 1.0, 1.0);
            assert!(close(p, q), "angle {}", angle);
        }
    }

    #[test]
    fn rotate_quarter_turn_is_clockwise() {
        let q = rotate(Point::xy(1.0, 0.0), 90.0, 0.0, 0.0);
        assert!(close(q, Point::xy(0.0, -1.0)));
    }

    #[test]
    fn rotate_without_both_coordinates_is_untouched() {
        let p = Point { x: Some(2.0), y: None, z: Some(1.0) };
        assert_eq!(rotate(p, 45.0, 0.0, 0.0), p);
    }

    #[test]
    fn translate_inverse_is_identity() {
        let p = Point { x: Some(1.0), y: Some(-2.0), z: Some(0.5) };
        let q = translate(translate(p, 3.0, -4.0, 5.0), -3.0, 4.0, -5.0);
        assert!(close(p, q));
    }

    #[test]
    fn translate_skips_absent_coordinates() {
        let p = Point { x: None, y: Some(1.0), z: None };
        let q = translate(p, 9.0, 1.0, 9.0);
        assert_eq!(q, Point { x: None, y: Some(2.0), z: None });
    }

    #[test]
    fn scale_about_center() {
        let q = scale(Point::xy(3.0, 5.0), 2.0, 1.0, 1.0, 1.0);
        assert!(close(q, Point::xy(5.0, 5.0)));
    }

    #[test]
    fn shear_adds_proportional_term() {
        let q = shear_x(Point::xy(1.0, 2.0), -90.0);
        assert!(close(q, Point::xy(1.0 + PI, 2.0)));
    }
}
