//! Memory format descriptor attached to tensor views

use super::layout::Layout;
use crate::error::{Error, Result};
use std::fmt;

/// Physical representation of a tensor buffer
///
/// `Dense` is the standard strided layout understood by every backend.
/// `Padded` is the row-padded layout the accelerated backend reads natively:
/// the last dimension is unit-stride and every row starts on a multiple of
/// `lanes` elements. The slots between the end of a row and the next row are
/// padding and never read.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    /// Arbitrary strided layout
    #[default]
    Dense,
    /// Row-padded layout with rows aligned to `lanes` elements
    Padded {
        /// Row alignment in elements
        lanes: usize,
    },
}

impl MemoryFormat {
    /// Whether this is the dense format
    #[inline]
    pub fn is_dense(&self) -> bool {
        matches!(self, Self::Dense)
    }

    /// Check that `layout` can be described by this format
    pub fn validate(&self, layout: &Layout) -> Result<()> {
        let lanes = match *self {
            Self::Dense => return Ok(()),
            Self::Padded { lanes } => lanes,
        };
        let Some(pitch) = isize::try_from(lanes).ok().filter(|&p| p > 0) else {
            return Err(Error::invalid_argument("lanes", format!("{lanes} is not a valid lane count")));
        };
        let Some((&last_stride, outer)) = layout.strides().split_last() else {
            return Err(Error::layout("Padded", "scalar tensors have no rows"));
        };
        if last_stride != 1 {
            return Err(Error::layout(
                "Padded",
                format!("last dimension stride is {last_stride}, expected 1"),
            ));
        }
        if layout.offset() % lanes != 0 {
            return Err(Error::layout(
                "Padded",
                format!("offset {} is not a multiple of {lanes}", layout.offset()),
            ));
        }
        if let Some(s) = outer.iter().find(|&&s| s % pitch != 0) {
            return Err(Error::layout(
                "Padded",
                format!("row stride {s} is not a multiple of {lanes}"),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for MemoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::Padded { lanes } => write!(f, "padded({lanes})"),
        }
    }
}
