//! Polygon rings: cleanup, self-intersection repair, orientation and area.

pub type Point = (f64, f64);

/// Upper bound on ring splits, for pathological inputs.
const MAX_SPLITS: usize = 4096;

/// A closed ring with at least three distinct vertices. The closing vertex is
/// implicit.
#[derive(Debug, Clone, PartialEq)]
pub struct Ring(Vec<Point>);

impl Ring {
    /// Drops repeated consecutive vertices and an explicit closing vertex.
    /// Returns `None` when fewer than three vertices remain.
    pub fn new(points: &[Point]) -> Option<Self> {
        let mut pts: Vec<Point> = Vec::with_capacity(points.len());
        for &p in points {
            if pts.last() != Some(&p) {
                pts.push(p);
            }
        }
        while pts.len() > 1 && pts.first() == pts.last() {
            pts.pop();
        }
        (pts.len() >= 3).then_some(Self(pts))
    }

    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Shoelace area, positive for counter-clockwise rings.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.0)
    }

    pub fn is_ccw(&self) -> bool {
        self.signed_area() >= 0.0
    }

    /// Same ring, vertices ordered counter-clockwise.
    pub fn oriented(mut self) -> Self {
        if !self.is_ccw() {
            self.0.reverse();
        }
        self
    }

    /// Splits the ring at proper edge crossings until every piece is simple.
    /// Pieces that collapse below three vertices are dropped.
    pub fn split_simple(self) -> Vec<Ring> {
        let mut pending = vec![self.0];
        let mut done = Vec::new();
        let mut splits = 0;
        while let Some(ring) = pending.pop() {
            if ring.len() < 3 {
                continue;
            }
            let crossing = if splits < MAX_SPLITS {
                first_crossing(&ring)
            } else {
                None
            };
            match crossing {
                Some((i, j, p)) => {
                    splits += 1;
                    let inner: Vec<Point> = std::iter::once(p)
                        .chain(ring[i + 1..=j].iter().copied())
                        .collect();
                    let outer: Vec<Point> = ring[..=i]
                        .iter()
                        .copied()
                        .chain(std::iter::once(p))
                        .chain(ring[j + 1..].iter().copied())
                        .collect();
                    pending.push(inner);
                    pending.push(outer);
                }
                None => done.extend(Ring::new(&ring)),
            }
        }
        done
    }

    /// Area enclosed by the repaired ring: the sum of its simple,
    /// counter-clockwise pieces.
    pub fn area(&self) -> f64 {
        self.clone()
            .split_simple()
            .into_iter()
            .map(|r| r.oriented().signed_area())
            .sum()
    }
}

fn signed_area(pts: &[Point]) -> f64 {
    let n = pts.len();
    let mut twice = 0.0;
    for i in 0..n {
        let (x0, y0) = pts[i];
        let (x1, y1) = pts[(i + 1) % n];
        twice += x0 * y1 - x1 * y0;
    }
    twice / 2.0
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Intersection point of segments `ab` and `cd` when they cross in their
/// interiors. Touching or collinear segments do not count.
fn proper_intersection(a: Point, b: Point, c: Point, d: Point) -> Option<Point> {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);
    let straddles = |u: f64, v: f64| (u > 0.0 && v < 0.0) || (u < 0.0 && v > 0.0);
    if !(straddles(d1, d2) && straddles(d3, d4)) {
        return None;
    }
    let t = d1 / (d1 - d2);
    Some((a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1)))
}

/// First pair of non-adjacent edges `(i, j)`, `i < j`, that cross, with the
/// crossing point. Edge `k` runs from vertex `k` to vertex `k + 1`.
fn first_crossing(ring: &[Point]) -> Option<(usize, usize, Point)> {
    let n = ring.len();
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if let Some(p) = proper_intersection(ring[i], ring[i + 1], ring[j], ring[(j + 1) % n]) {
                return Some((i, j, p));
            }
        }
    }
    None
}
