//! Agent bounding shapes.

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};

/// How an agent's bounding volume is interpreted by the mesh builder.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentKind {
    /// Axis-aligned box.
    Aabb,
    /// Box that rotates with the agent.
    RotatingBox,
    /// Vertical cylinder.
    Cylinder,
}

/// Bounding shape a navigation mesh is built for.
///
/// Distinct agent shapes have entirely separate navmeshes, so this type is
/// used as a key throughout the pipeline; the half extents are stored as
/// [`NotNan`] to make it hashable.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct AgentShape {
    kind: AgentKind,
    half_extents: [NotNan<f32>; 3],
}

/// Error constructing an [`AgentShape`] from non-finite half extents.
#[derive(Clone, Copy, Debug, Eq, PartialEq, displaydoc::Display)]
#[displaydoc("agent half extents must be finite and positive")]
#[expect(clippy::exhaustive_structs)]
pub struct InvalidAgentShape;

impl std::error::Error for InvalidAgentShape {}

impl AgentShape {
    /// Constructs a shape, validating that every half extent is a finite
    /// positive number.
    pub fn new(kind: AgentKind, half_extents: [f32; 3]) -> Result<Self, InvalidAgentShape> {
        if half_extents.iter().any(|&v| !v.is_finite() || v <= 0.0) {
            return Err(InvalidAgentShape);
        }
        Ok(Self {
            kind,
            half_extents: half_extents.map(|v| NotNan::new(v).unwrap()),
        })
    }

    /// The interpretation of the bounding volume.
    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    /// Half extents along x, y, z.
    pub fn half_extents(&self) -> [f32; 3] {
        self.half_extents.map(NotNan::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_nan_and_nonpositive_extents() {
        assert_eq!(
            AgentShape::new(AgentKind::Cylinder, [1.0, f32::NAN, 1.0]),
            Err(InvalidAgentShape)
        );
        assert_eq!(
            AgentShape::new(AgentKind::Cylinder, [1.0, 0.0, 1.0]),
            Err(InvalidAgentShape)
        );
    }

    #[test]
    fn equal_shapes_hash_equal() {
        use std::hash::{BuildHasher, RandomState};
        let a = AgentShape::new(AgentKind::Aabb, [0.5, 0.5, 1.0]).unwrap();
        let b = AgentShape::new(AgentKind::Aabb, [0.5, 0.5, 1.0]).unwrap();
        assert_eq!(a, b);
        let hasher = RandomState::new();
        assert_eq!(hasher.hash_one(a), hasher.hash_one(b));
    }
}
