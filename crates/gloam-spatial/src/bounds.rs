//! Axis-aligned bounding boxes and the narrow-phase collision resolver.
//!
//! All coordinates are world units with `y` pointing up: `(x, y)` is the
//! bottom-left corner of a box, `x + width` its right edge and `y + height`
//! its top edge.
//!
//! # Resolution model
//!
//! A mover has already applied this frame's displacement (`delta`) to its
//! position when [`BoundingBox::resolve`] runs. The resolver compares the
//! mover's current box against the box it occupied before the move to find
//! the axis along which it entered the obstacle, then pushes it back to the
//! contact boundary through [`Resolvable::push`] and reports the blocked side
//! through [`Resolvable::restrict`]. The obstacle is never modified.

use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Overlaps thinner than this are treated as touching, not penetrating.
///
/// Pushing a mover back to a contact boundary leaves rounding residue on the
/// order of `1e-16`; without a tolerance that residue would be re-resolved
/// every frame.
pub const CONTACT_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Direction / MovementRestrictions
// ---------------------------------------------------------------------------

/// A side of a mover that can be blocked by contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Contact on the mover's left side (it cannot move further left).
    Left,
    /// Contact on the mover's right side.
    Right,
    /// Contact above the mover.
    Up,
    /// Contact beneath the mover (it is resting on something).
    Down,
}

/// Which directions a mover was blocked in during the current frame.
///
/// Reset at the start of every collision pass and set by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MovementRestrictions {
    /// Blocked on the left.
    pub left: bool,
    /// Blocked on the right.
    pub right: bool,
    /// Blocked above.
    pub up: bool,
    /// Blocked beneath (resting).
    pub down: bool,
}

impl MovementRestrictions {
    /// Clear all four flags.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Set the flag for `direction`.
    pub fn set(&mut self, direction: Direction) {
        match direction {
            Direction::Left => self.left = true,
            Direction::Right => self.right = true,
            Direction::Up => self.up = true,
            Direction::Down => self.down = true,
        }
    }

    /// Whether `direction` is blocked.
    pub fn is_restricted(&self, direction: Direction) -> bool {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Whether any flag is set.
    pub fn any(&self) -> bool {
        self.left || self.right || self.up || self.down
    }
}

// ---------------------------------------------------------------------------
// Resolvable
// ---------------------------------------------------------------------------

/// The mutable side of a collision: something the resolver can push.
///
/// Implementors apply `correction` to both their position and their
/// per-frame displacement accumulator so that later collision checks in the
/// same frame see the corrected movement.
pub trait Resolvable {
    /// Shift the mover by `correction` (position and displacement accumulator).
    fn push(&mut self, correction: DVec2);

    /// Record that the mover is blocked in `direction` this frame.
    fn restrict(&mut self, direction: Direction);
}

// ---------------------------------------------------------------------------
// BoundingBox
// ---------------------------------------------------------------------------

/// An axis-aligned rectangle in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Bottom edge.
    pub y: f64,
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

impl BoundingBox {
    /// Create a box from its bottom-left corner and size.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Left edge (`x`).
    pub fn left(&self) -> f64 {
        self.x
    }

    /// Right edge (`x + width`).
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge (`y`).
    pub fn bottom(&self) -> f64 {
        self.y
    }

    /// Top edge (`y + height`).
    pub fn top(&self) -> f64 {
        self.y + self.height
    }

    /// Center point.
    pub fn center(&self) -> DVec2 {
        DVec2::new(self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    /// Area of the box.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Whether every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// This box moved by `(dx, dy)`.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// This box grown by `margin_x` on the left and right and `margin_y` on
    /// the bottom and top. Negative margins shrink it.
    pub fn expanded(&self, margin_x: f64, margin_y: f64) -> Self {
        Self::new(
            self.x - margin_x,
            self.y - margin_y,
            self.width + margin_x * 2.0,
            self.height + margin_y * 2.0,
        )
    }

    /// Length of the intersection of the two horizontal spans (negative when
    /// they are apart).
    pub fn overlap_x(&self, other: &BoundingBox) -> f64 {
        self.right().min(other.right()) - self.left().max(other.left())
    }

    /// Length of the intersection of the two vertical spans (negative when
    /// they are apart).
    pub fn overlap_y(&self, other: &BoundingBox) -> f64 {
        self.top().min(other.top()) - self.bottom().max(other.bottom())
    }

    /// Area of the intersection, or `0.0` when the boxes are apart.
    pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
        self.overlap_x(other).max(0.0) * self.overlap_y(other).max(0.0)
    }

    /// Whether the two boxes penetrate each other by more than
    /// [`CONTACT_EPSILON`] on both axes. Boxes that merely touch do not
    /// overlap.
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.overlap_x(other) > CONTACT_EPSILON && self.overlap_y(other) > CONTACT_EPSILON
    }

    /// Whether the closed regions of the two boxes intersect (touching edges
    /// count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.overlap_x(other) >= 0.0 && self.overlap_y(other) >= 0.0
    }

    /// Whether `other` lies entirely inside this box (edges inclusive).
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.left() >= self.left()
            && other.right() <= self.right()
            && other.bottom() >= self.bottom()
            && other.top() <= self.top()
    }

    /// Whether the point lies inside this box (edges inclusive).
    pub fn contains_point(&self, point: DVec2) -> bool {
        point.x >= self.left() && point.x <= self.right() && point.y >= self.bottom() && point.y <= self.top()
    }

    /// Resolve a penetration of this box (the mover) into `other`.
    ///
    /// `delta` is the displacement the mover applied this frame. When the
    /// boxes overlap, the mover is pushed back to the contact boundary along
    /// a single axis and `body` is told which side is blocked:
    ///
    /// - An axis is *entered* when the box before the move (`self - delta`)
    ///   did not overlap `other` on that axis. If exactly one axis was
    ///   entered it is resolved.
    /// - Otherwise (both entered, or the mover started inside) the axis with
    ///   the smaller overlap is resolved, the minimum translation.
    /// - The push direction opposes `delta` on that axis; with no motion on
    ///   the axis the box centers decide.
    ///
    /// Velocity is left untouched; cancelling it is the caller's policy.
    /// Returns the blocked direction, or `None` when nothing overlapped.
    pub fn resolve<R: Resolvable + ?Sized>(
        &self,
        other: &BoundingBox,
        delta: DVec2,
        body: &mut R,
    ) -> Option<Direction> {
        if !self.overlaps(other) {
            return None;
        }

        let overlap_x = self.overlap_x(other);
        let overlap_y = self.overlap_y(other);

        let previous = self.translated(-delta.x, -delta.y);
        let entered_x = previous.overlap_x(other) <= CONTACT_EPSILON;
        let entered_y = previous.overlap_y(other) <= CONTACT_EPSILON;

        let axis = match (entered_x, entered_y) {
            (true, false) => Axis::X,
            (false, true) => Axis::Y,
            _ if overlap_x <= overlap_y => Axis::X,
            _ => Axis::Y,
        };

        let (correction, direction) = match axis {
            Axis::X => {
                let moving_right = if delta.x != 0.0 {
                    delta.x > 0.0
                } else {
                    self.center().x < other.center().x
                };
                if moving_right {
                    (DVec2::new(-overlap_x, 0.0), Direction::Right)
                } else {
                    (DVec2::new(overlap_x, 0.0), Direction::Left)
                }
            }
            Axis::Y => {
                let moving_down = if delta.y != 0.0 {
                    delta.y < 0.0
                } else {
                    self.center().y > other.center().y
                };
                if moving_down {
                    (DVec2::new(0.0, overlap_y), Direction::Down)
                } else {
                    (DVec2::new(0.0, -overlap_y), Direction::Up)
                }
            }
        };

        body.push(correction);
        body.restrict(direction);
        Some(direction)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal mover used to observe resolver side effects.
    #[derive(Debug, Default)]
    struct Mover {
        bounds: BoundingBox,
        delta: DVec2,
        restrictions: MovementRestrictions,
    }

    impl Mover {
        fn moved(start: BoundingBox, delta: DVec2) -> Self {
            Self {
                bounds: start.translated(delta.x, delta.y),
                delta,
                restrictions: MovementRestrictions::default(),
            }
        }

        fn resolve_against(&mut self, obstacle: &BoundingBox) -> Option<Direction> {
            let bounds = self.bounds;
            let delta = self.delta;
            bounds.resolve(obstacle, delta, self)
        }
    }

    impl Resolvable for Mover {
        fn push(&mut self, correction: DVec2) {
            self.bounds = self.bounds.translated(correction.x, correction.y);
            self.delta += correction;
        }

        fn restrict(&mut self, direction: Direction) {
            self.restrictions.set(direction);
        }
    }

    // -- 1. Geometry helpers --------------------------------------------------

    #[test]
    fn edges_and_center() {
        let b = BoundingBox::new(1.0, 2.0, 4.0, 6.0);
        assert_eq!(b.left(), 1.0);
        assert_eq!(b.right(), 5.0);
        assert_eq!(b.bottom(), 2.0);
        assert_eq!(b.top(), 8.0);
        assert_eq!(b.center(), DVec2::new(3.0, 5.0));
        assert_eq!(b.area(), 24.0);
    }

    #[test]
    fn touching_boxes_do_not_overlap_but_intersect() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(1.0, 0.0, 1.0, 1.0);
        assert!(!a.overlaps(&b));
        assert!(a.intersects(&b));
    }

    #[test]
    fn containment_is_edge_inclusive() {
        let outer = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        assert!(outer.contains(&BoundingBox::new(0.0, 0.0, 1.0, 2.0)));
        assert!(!outer.contains(&BoundingBox::new(1.5, 0.0, 1.0, 1.0)));
        assert!(outer.contains_point(DVec2::new(2.0, 2.0)));
    }

    #[test]
    fn expanded_grows_symmetrically() {
        let b = BoundingBox::new(1.0, 1.0, 1.0, 1.0).expanded(0.5, 0.25);
        assert_eq!(b, BoundingBox::new(0.5, 0.75, 2.0, 1.5));
    }

    // -- 2. Single-axis resolution ------------------------------------------

    #[test]
    fn falling_onto_floor_restricts_down() {
        let floor = BoundingBox::new(0.0, 0.0, 1.0, 0.2);
        let mut mover = Mover::moved(BoundingBox::new(0.4, 0.21, 0.1, 0.1), DVec2::new(0.0, -0.05));

        assert_eq!(mover.resolve_against(&floor), Some(Direction::Down));
        assert!((mover.bounds.bottom() - floor.top()).abs() < 1e-12);
        assert!(mover.restrictions.down);
        assert!(!mover.restrictions.left && !mover.restrictions.right && !mover.restrictions.up);
        // The accumulator was corrected by the same amount as the position.
        assert!((mover.delta.y - (-0.01)).abs() < 1e-12);
    }

    #[test]
    fn walking_into_wall_restricts_right() {
        let wall = BoundingBox::new(1.0, 0.0, 0.2, 1.0);
        let mut mover = Mover::moved(BoundingBox::new(0.85, 0.2, 0.1, 0.1), DVec2::new(0.07, 0.0));

        assert_eq!(mover.resolve_against(&wall), Some(Direction::Right));
        assert!((mover.bounds.right() - wall.left()).abs() < 1e-12);
        assert_eq!(mover.restrictions, MovementRestrictions { right: true, ..Default::default() });
    }

    #[test]
    fn walking_left_into_wall_restricts_left() {
        let wall = BoundingBox::new(0.0, 0.0, 0.2, 1.0);
        let mut mover = Mover::moved(BoundingBox::new(0.22, 0.3, 0.1, 0.1), DVec2::new(-0.05, 0.0));

        assert_eq!(mover.resolve_against(&wall), Some(Direction::Left));
        assert!((mover.bounds.left() - wall.right()).abs() < 1e-12);
    }

    #[test]
    fn jumping_into_ceiling_restricts_up() {
        let ceiling = BoundingBox::new(0.0, 1.0, 1.0, 0.2);
        let mut mover = Mover::moved(BoundingBox::new(0.3, 0.85, 0.1, 0.1), DVec2::new(0.0, 0.07));

        assert_eq!(mover.resolve_against(&ceiling), Some(Direction::Up));
        assert!((mover.bounds.top() - ceiling.bottom()).abs() < 1e-12);
    }

    // -- 3. Tie-breaks ----------------------------------------------------------

    #[test]
    fn diagonal_entry_resolves_smaller_overlap() {
        // Moving down-right into a corner: the box ends up 0.01 into the top
        // of the obstacle but 0.04 into its side, so the vertical push wins.
        let block = BoundingBox::new(1.0, 0.0, 1.0, 1.0);
        let start = BoundingBox::new(0.9, 1.01, 0.1, 0.1);
        let mut mover = Mover::moved(start, DVec2::new(0.04, -0.02));

        assert_eq!(mover.resolve_against(&block), Some(Direction::Down));
        assert!(!mover.bounds.overlaps(&block));
    }

    #[test]
    fn started_inside_uses_centers() {
        let block = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        // Already inside the right half with no motion: pushed out to the
        // right, so the obstacle is reported on the left.
        let mut mover = Mover::moved(BoundingBox::new(0.95, 0.3, 0.1, 0.4), DVec2::ZERO);

        assert_eq!(mover.resolve_against(&block), Some(Direction::Left));
        assert!(!mover.bounds.overlaps(&block));
    }

    #[test]
    fn no_overlap_is_a_noop() {
        let block = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let mut mover = Mover::moved(BoundingBox::new(2.0, 2.0, 0.1, 0.1), DVec2::new(0.05, 0.0));
        let before = mover.bounds;

        assert_eq!(mover.resolve_against(&block), None);
        assert_eq!(mover.bounds, before);
        assert!(!mover.restrictions.any());
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let floor = BoundingBox::new(0.0, 0.0, 1.0, 0.2);
        let mut mover = Mover::moved(BoundingBox::new(0.4, 0.21, 0.1, 0.1), DVec2::new(0.0, -0.05));
        mover.resolve_against(&floor);
        let settled = mover.bounds;

        assert_eq!(mover.resolve_against(&floor), None);
        assert_eq!(mover.bounds, settled);
    }

    #[test]
    fn restrictions_reset_clears_all_flags() {
        let mut r = MovementRestrictions::default();
        r.set(Direction::Down);
        r.set(Direction::Left);
        assert!(r.is_restricted(Direction::Down));
        r.reset();
        assert!(!r.any());
    }
}
