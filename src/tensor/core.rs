//! Owned tensor type

use super::format::MemoryFormat;
use super::layout::Layout;
use super::shape::{Shape, numel};
use super::view::{TensorView, TensorViewMut};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use std::fmt;

/// Owned n-dimensional array
///
/// `Tensor` owns its buffer and describes it with a [`Layout`] and a
/// [`MemoryFormat`]. Kernels never take tensors directly; they operate on the
/// borrowed [`TensorView`] / [`TensorViewMut`] handles returned by
/// [`Tensor::view`] and [`Tensor::view_mut`].
///
/// # Example
///
/// ```
/// use stablemax::tensor::Tensor;
///
/// let t = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.transpose(0, 1)?.to_vec(), vec![1.0, 3.0, 2.0, 4.0]);
/// # Ok::<(), stablemax::error::Error>(())
/// ```
#[derive(Clone)]
pub struct Tensor<T: Element> {
    data: Vec<T>,
    layout: Layout,
    format: MemoryFormat,
}

impl<T: Element> Tensor<T> {
    /// Build from parts already known to be consistent
    pub(crate) fn from_raw(data: Vec<T>, layout: Layout, format: MemoryFormat) -> Self {
        debug_assert!(layout.fits_in(data.len()));
        Self {
            data,
            layout,
            format,
        }
    }

    /// Create a contiguous tensor by copying a slice
    ///
    /// Fails if `data.len()` does not match the shape's element count.
    pub fn from_slice(data: &[T], shape: &[usize]) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a contiguous tensor taking ownership of a `Vec`
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let expected = numel(shape)?;
        if data.len() != expected {
            return Err(Error::shape_mismatch(&[expected], &[data.len()]));
        }
        Ok(Self::from_raw(data, Layout::contiguous(shape), MemoryFormat::Dense))
    }

    /// Create a tensor with an explicit layout and format over an owned buffer
    pub fn from_parts(data: Vec<T>, layout: Layout, format: MemoryFormat) -> Result<Self> {
        // reuse the view checks
        TensorView::with_format(&data, layout.clone(), format)?;
        Ok(Self::from_raw(data, layout, format))
    }

    /// Create a contiguous tensor filled with a value
    ///
    /// # Panics
    ///
    /// Panics with a capacity overflow, before any layout is built, if the
    /// element count does not fit in memory.
    pub fn full(shape: &[usize], value: T) -> Self {
        let count = Shape::from(shape).elem_count();
        let data = vec![value; count];
        Self::from_raw(data, Layout::contiguous(shape), MemoryFormat::Dense)
    }

    /// Create a contiguous tensor filled with zeros
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Copy `view` into the row-padded format with rows aligned to `lanes`
    ///
    /// Padding slots are zero.
    pub fn padded_from(view: &TensorView<'_, T>, lanes: usize) -> Result<Self> {
        if lanes == 0 {
            return Err(Error::invalid_argument("lanes", "must be positive"));
        }
        let layout = Layout::padded(view.shape(), lanes).ok_or_else(|| {
            Error::invalid_argument(
                "shape",
                format!("cannot pad {:?} to {lanes} lanes", view.shape()),
            )
        })?;
        let len = layout.span().map_or(0, |(_, hi)| hi as usize + 1);
        let mut data = vec![T::zero(); len];
        for (dst, src) in layout.offsets().zip(view.layout().offsets()) {
            data[dst] = view.data()[src];
        }
        Ok(Self::from_raw(data, layout, MemoryFormat::Padded { lanes }))
    }

    /// Borrow as a read-only view
    pub fn view(&self) -> TensorView<'_, T> {
        TensorView::from_raw(&self.data, self.layout.clone(), self.format)
    }

    /// Borrow as a mutable view
    pub fn view_mut(&mut self) -> TensorViewMut<'_, T> {
        TensorViewMut::from_raw(&mut self.data, self.layout.clone(), self.format)
    }

    /// Get the layout
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Number of logical elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    /// Memory format
    #[inline]
    pub fn format(&self) -> MemoryFormat {
        self.format
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Underlying buffer, including padding
    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Swap two dimensions (no data movement)
    pub fn transpose(self, dim0: isize, dim1: isize) -> Result<Self> {
        let ndim = self.ndim();
        let layout = self
            .layout
            .transpose(dim0, dim1)
            .ok_or(Error::InvalidDimension { dim: dim0, ndim })?;
        Ok(Self {
            data: self.data,
            layout,
            format: MemoryFormat::Dense,
        })
    }

    /// Copy the logical elements into a row-major `Vec`
    pub fn to_vec(&self) -> Vec<T> {
        self.layout.offsets().map(|i| self.data[i]).collect()
    }

    /// Copy into a contiguous dense tensor
    pub fn to_dense(&self) -> Self {
        self.view().to_dense()
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &T::DTYPE)
            .field("shape", &self.shape())
            .field("format", &self.format)
            .field("data", &self.to_vec())
            .finish()
    }
}
