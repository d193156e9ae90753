//! Generational handles for entities owned by a solver.
//!
//! A handle is a slot index paired with the generation the slot had when
//! the entity was inserted. Removing an entity bumps the slot's generation,
//! so old handles stop resolving instead of silently aliasing whatever is
//! inserted next.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Common interface of all generational handles.
pub trait Handle: Copy + Eq + std::hash::Hash + std::fmt::Debug + std::fmt::Display {
    /// Human-readable entity kind, used in error messages.
    const KIND: &'static str;

    /// Build a handle from a slot index and generation.
    fn from_parts(index: u32, generation: u32) -> Self;

    /// Slot index.
    fn index(self) -> u32;

    /// Generation of the slot when this handle was issued.
    fn generation(self) -> u32;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            /// Create a handle from raw parts.
            #[must_use]
            pub const fn new(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }
        }

        impl Handle for $name {
            const KIND: &'static str = $kind;

            fn from_parts(index: u32, generation: u32) -> Self {
                Self::new(index, generation)
            }

            fn index(self) -> u32 {
                self.index
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}v{}", self.index, self.generation)
            }
        }
    };
}

define_handle!(
    /// Handle to a rigid body registered with a solver.
    BodyHandle,
    "body"
);

define_handle!(
    /// Handle to a particle chain (rope) registered with a solver.
    ActorHandle,
    "actor"
);

define_handle!(
    /// Handle to a joint registered with a solver.
    JointHandle,
    "joint"
);
