use std::ops::{Add, Mul, Neg, Sub};

///Represents a vector in 2D space.
///
/// Screen coordinates: x grows to the right, y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector2D {
    ///Value along the x-axis.
    pub x: f64,
    ///Value along the y-axis.
    /// Positive direction is down.
    pub y: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2D) -> Vector2D {
        Vector2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    /// Componentwise sign where zero (of either sign) maps to zero.
    pub fn signum(&self) -> Vector2D {
        Vector2D {
            x: sign(self.x),
            y: sign(self.y),
        }
    }
}

/// Sign of `value` as -1, 0 or 1.
///
/// Unlike [`f64::signum`], both `0.0` and `-0.0` yield `0.0`.
pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, rhs: Vector2D) -> Vector2D {
        Vector2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, rhs: f64) -> Vector2D {
        self.scale(rhs)
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_vector_arithmetic() {
        let a = Vector2D::new(1.5, -2.0);
        let b = Vector2D::new(0.5, 4.0);

        assert_eq!(a + b, Vector2D::new(2.0, 2.0));
        assert_eq!(a - b, Vector2D::new(1.0, -6.0));
        assert_eq!(a * 2.0, Vector2D::new(3.0, -4.0));
        assert_eq!(-a, Vector2D::new(-1.5, 2.0));
    }

    #[test]
    fn test_operations_do_not_alias() {
        let a = Vector2D::new(3.0, 4.0);
        let scaled = a.scale(10.0);
        assert_eq!(a, Vector2D::new(3.0, 4.0));
        assert_eq!(scaled, Vector2D::new(30.0, 40.0));
        assert_approx_eq!(a.magnitude(), 5.0, 1e-12);
    }

    #[test]
    fn test_sign_treats_negative_zero_as_zero() {
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-3.0), -1.0);
        assert_eq!(sign(1e-300), 1.0);
        assert_eq!(Vector2D::new(-0.0, -7.0).signum(), Vector2D::new(0.0, -1.0));
    }
}
