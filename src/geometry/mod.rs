//! Geometric primitives in PDF user space.
//!
//! PDF user space has its origin at the bottom-left of the page and y grows
//! upward, so a [`Rect`] is anchored at its lower-left corner.

/// A 2D point in user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate
    pub x: f32,
    /// Y coordinate
    pub y: f32,
}

impl Point {
    /// Create a new point.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle anchored at its lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// X coordinate of the lower-left corner
    pub x: f32,
    /// Y coordinate of the lower-left corner
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl Rect {
    /// Create a rectangle from its lower-left corner and dimensions.
    ///
    /// ```
    /// use pdf_seal::geometry::Rect;
    ///
    /// let rect = Rect::new(435.0, 72.0, 105.0, 33.0);
    /// assert_eq!(rect.right(), 540.0);
    /// assert_eq!(rect.top(), 105.0);
    /// ```
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a rectangle from two opposite corners, in any order.
    ///
    /// ```
    /// use pdf_seal::geometry::Rect;
    ///
    /// let rect = Rect::from_points(612.0, 792.0, 0.0, 0.0);
    /// assert_eq!(rect, Rect::new(0.0, 0.0, 612.0, 792.0));
    /// ```
    pub fn from_points(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    /// Left edge.
    pub fn left(&self) -> f32 {
        self.x
    }

    /// Right edge.
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f32 {
        self.y
    }

    /// Top edge.
    pub fn top(&self) -> f32 {
        self.y + self.height
    }

    /// Center point.
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// True when both dimensions are strictly positive and every value is finite.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Check if `other` lies entirely within this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left() >= self.left()
            && other.right() <= self.right()
            && other.bottom() >= self.bottom()
            && other.top() <= self.top()
    }

    /// Check if this rectangle overlaps another.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left() < other.right()
            && other.left() < self.right()
            && self.bottom() < other.top()
            && other.bottom() < self.top()
    }

    /// Largest rectangle with the given aspect ratio (width / height) that fits
    /// inside this one, centred.
    pub fn fit_aspect(&self, aspect: f32) -> Rect {
        if !(aspect.is_finite() && aspect > 0.0) {
            return *self;
        }
        let (width, height) = if self.width / self.height > aspect {
            (self.height * aspect, self.height)
        } else {
            (self.width, self.width / aspect)
        };
        Rect::new(
            self.x + (self.width - width) / 2.0,
            self.y + (self.height - height) / 2.0,
            width,
            height,
        )
    }

    /// `[x0 y0 x1 y1]` as used by `/Rect` and `/MediaBox`.
    pub fn to_array(&self) -> [f32; 4] {
        [self.left(), self.bottom(), self.right(), self.top()]
    }
}

/// A 2D affine transformation `[a b c d e f]`, as used by `cm` and `Tm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    /// Horizontal scaling component
    pub a: f32,
    /// Rotation/skew component
    pub b: f32,
    /// Rotation/skew component
    pub c: f32,
    /// Vertical scaling component
    pub d: f32,
    /// Horizontal translation
    pub e: f32,
    /// Vertical translation
    pub f: f32,
}

impl Matrix {
    /// Identity transform.
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    /// Build from the six operands of `cm` / `Tm`.
    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Translation by (tx, ty).
    pub fn translation(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// `self × other`: apply `self` first, then `other`.
    ///
    /// ```
    /// use pdf_seal::geometry::Matrix;
    ///
    /// let m = Matrix::translation(10.0, 0.0).multiply(&Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0));
    /// assert_eq!(m.transform_point(0.0, 0.0).x, 20.0);
    /// ```
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Map a point through this transform.
    pub fn transform_point(&self, x: f32, y: f32) -> Point {
        Point::new(self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// Length of a unit vertical vector after transformation; used to turn a
    /// font size into a user-space height.
    pub fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_edges() {
        let r = Rect::from_points(10.0, 20.0, 110.0, 70.0);
        assert_eq!((r.left(), r.bottom(), r.right(), r.top()), (10.0, 20.0, 110.0, 70.0));
        assert_eq!(r.center(), Point::new(60.0, 45.0));
        assert_eq!(r.to_array(), [10.0, 20.0, 110.0, 70.0]);
    }

    #[test]
    fn test_rect_validity() {
        assert!(Rect::new(0.0, 0.0, 1.0, 1.0).is_valid());
        assert!(!Rect::new(0.0, 0.0, 0.0, 1.0).is_valid());
        assert!(!Rect::new(f32::NAN, 0.0, 1.0, 1.0).is_valid());
    }

    #[test]
    fn test_contains_and_intersects() {
        let page = Rect::new(0.0, 0.0, 612.0, 792.0);
        let stamp = Rect::new(435.0, 72.0, 105.0, 33.0);
        assert!(page.contains_rect(&stamp));
        assert!(page.intersects(&stamp));
        assert!(!stamp.intersects(&Rect::new(0.0, 0.0, 10.0, 10.0)));
    }

    #[test]
    fn test_fit_aspect_wide_region() {
        let region = Rect::new(0.0, 0.0, 200.0, 50.0);
        let fitted = region.fit_aspect(2.0);
        assert_eq!(fitted, Rect::new(50.0, 0.0, 100.0, 50.0));
    }

    #[test]
    fn test_fit_aspect_tall_region() {
        let region = Rect::new(0.0, 0.0, 100.0, 300.0);
        let fitted = region.fit_aspect(1.0);
        assert_eq!(fitted, Rect::new(0.0, 100.0, 100.0, 100.0));
    }

    #[test]
    fn test_matrix_translation_then_scale() {
        let scale = Matrix::new(2.0, 0.0, 0.0, 2.0, 0.0, 0.0);
        let m = Matrix::translation(5.0, 5.0).multiply(&scale);
        assert_eq!(m.transform_point(1.0, 1.0), Point::new(12.0, 12.0));
        assert_eq!(m.vertical_scale(), 2.0);
        assert_eq!(Matrix::default(), Matrix::identity());
    }
}
