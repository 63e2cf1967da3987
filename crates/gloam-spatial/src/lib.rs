//! Gloam Spatial -- axis-aligned collision geometry and broad-phase indexing.
//!
//! This crate holds the two leaf components of the Gloam runtime:
//!
//! - [`BoundingBox`] with the narrow-phase [`BoundingBox::resolve`] routine,
//!   which pushes a moving body out of an obstacle and reports the blocked
//!   [`Direction`] through the [`Resolvable`] seam.
//! - [`QuadTree`], a loose quad-tree over [`Bounded`] objects used to produce
//!   candidate collision pairs without an O(n^2) scan.
//!
//! # Quick Start
//!
//! ```
//! use gloam_spatial::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! struct Crate { id: u32, bounds: BoundingBox }
//!
//! impl Bounded for Crate {
//!     fn bounds(&self) -> BoundingBox { self.bounds }
//! }
//!
//! let mut tree = QuadTree::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
//! tree.place(Crate { id: 1, bounds: BoundingBox::new(1.0, 1.0, 0.5, 0.5) }).unwrap();
//! tree.place(Crate { id: 2, bounds: BoundingBox::new(1.2, 1.2, 0.5, 0.5) }).unwrap();
//! tree.reevaluate();
//!
//! let mut pairs = Vec::new();
//! tree.iterate_pairs(|a, b| pairs.push((a.id.min(b.id), a.id.max(b.id))));
//! assert_eq!(pairs, vec![(1, 2)]);
//! ```

#![deny(unsafe_code)]

pub mod bounds;
pub mod quadtree;

pub use bounds::{BoundingBox, Direction, MovementRestrictions, Resolvable, CONTACT_EPSILON};
pub use quadtree::{Bounded, Placement, QuadTree};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by spatial index operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SpatialError {
    /// The root extent of a quad-tree must have a positive, finite size.
    #[error("invalid quad-tree extent {width}x{height}: both sides must be positive and finite")]
    InvalidExtent {
        /// Requested extent width.
        width: f64,
        /// Requested extent height.
        height: f64,
    },

    /// An object reported a bounding box containing NaN or infinite values,
    /// so it cannot be filed anywhere in the tree.
    #[error("object bounds {bounds:?} are not finite")]
    NonFiniteBounds {
        /// The offending bounding box.
        bounds: BoundingBox,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::bounds::{BoundingBox, Direction, MovementRestrictions, Resolvable};
    pub use crate::quadtree::{Bounded, Placement, QuadTree};
    pub use crate::SpatialError;
}
