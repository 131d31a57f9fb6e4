//! Module supporting type-level programming
//!
//! This module only carries the [`Sealed`] super trait used to close the
//! crate's device traits to outside implementations.

mod private {
    /// Super trait used to mark traits with an exhaustive set of
    /// implementations
    pub trait Sealed {}
}

pub(crate) use private::Sealed;
