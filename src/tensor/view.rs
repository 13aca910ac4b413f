//! Borrowed tensor views

use super::core::Tensor;
use super::format::MemoryFormat;
use super::layout::Layout;
use super::shape::numel;
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use std::fmt;

fn check_bounds(len: usize, layout: &Layout, format: MemoryFormat) -> Result<()> {
    format.validate(layout)?;
    if !layout.fits_in(len) {
        return Err(Error::invalid_argument(
            "layout",
            format!("{layout:?} addresses elements outside a buffer of {len}"),
        ));
    }
    Ok(())
}

/// Read-only strided view over a borrowed buffer
///
/// Construction guarantees every element addressed by the layout lies inside
/// the buffer, so kernels may index without further checks.
#[derive(Clone)]
pub struct TensorView<'a, T: Element> {
    data: &'a [T],
    layout: Layout,
    format: MemoryFormat,
}

impl<'a, T: Element> TensorView<'a, T> {
    /// Create a dense view with an explicit layout
    pub fn new(data: &'a [T], layout: Layout) -> Result<Self> {
        Self::with_format(data, layout, MemoryFormat::Dense)
    }

    /// Create a view with an explicit layout and memory format
    pub fn with_format(data: &'a [T], layout: Layout, format: MemoryFormat) -> Result<Self> {
        check_bounds(data.len(), &layout, format)?;
        Ok(Self {
            data,
            layout,
            format,
        })
    }

    /// Create a contiguous dense view; `data.len()` must equal the element count
    pub fn from_slice(data: &'a [T], shape: &[usize]) -> Result<Self> {
        let expected = numel(shape)?;
        if data.len() != expected {
            return Err(Error::shape_mismatch(&[expected], &[data.len()]));
        }
        Self::new(data, Layout::contiguous(shape))
    }

    /// Create a view over a raw byte buffer
    ///
    /// The buffer must be aligned for `T` and a whole number of elements long.
    pub fn from_bytes(bytes: &'a [u8], layout: Layout, format: MemoryFormat) -> Result<Self> {
        let data = bytemuck::try_cast_slice(bytes)
            .map_err(|e| Error::invalid_argument("bytes", format!("{e:?} for {:?}", T::DTYPE)))?;
        Self::with_format(data, layout, format)
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

    /// Get the strides (in elements)
    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
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

    /// Memory format of the underlying buffer
    #[inline]
    pub fn format(&self) -> MemoryFormat {
        self.format
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// The whole underlying buffer, including elements outside the view
    #[inline]
    pub fn data(&self) -> &'a [T] {
        self.data
    }

    /// Element at `indices`, or `None` if out of range
    pub fn get(&self, indices: &[usize]) -> Option<T> {
        self.layout.index(indices).map(|i| self.data[i])
    }

    /// Swap two dimensions (zero-copy)
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Result<Self> {
        let layout = self
            .layout
            .transpose(dim0, dim1)
            .ok_or(Error::InvalidDimension {
                dim: if self.layout.normalize_dim(dim0).is_none() {
                    dim0
                } else {
                    dim1
                },
                ndim: self.ndim(),
            })?;
        Self::with_format(self.data, layout, MemoryFormat::Dense)
    }

    /// Reverse one dimension (zero-copy, negative stride)
    pub fn flip(&self, dim: isize) -> Result<Self> {
        let layout = self.layout.flip(dim).ok_or(Error::InvalidDimension {
            dim,
            ndim: self.ndim(),
        })?;
        Self::with_format(self.data, layout, MemoryFormat::Dense)
    }

    /// Copy the logical elements into a row-major `Vec`
    pub fn to_vec(&self) -> Vec<T> {
        self.layout.offsets().map(|i| self.data[i]).collect()
    }

    /// Copy into an owned contiguous dense tensor
    pub fn to_dense(&self) -> Tensor<T> {
        Tensor::from_raw(self.to_vec(), Layout::contiguous(self.shape()), MemoryFormat::Dense)
    }

    /// Build a view whose bounds the caller has already checked
    pub(crate) fn from_raw(data: &'a [T], layout: Layout, format: MemoryFormat) -> Self {
        debug_assert!(layout.fits_in(data.len()));
        Self {
            data,
            layout,
            format,
        }
    }

    pub(crate) fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }
}

impl<T: Element> fmt::Debug for TensorView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorView")
            .field("dtype", &T::DTYPE)
            .field("layout", &self.layout)
            .field("format", &self.format)
            .finish()
    }
}

/// Mutable strided view over a borrowed buffer
pub struct TensorViewMut<'a, T: Element> {
    data: &'a mut [T],
    layout: Layout,
    format: MemoryFormat,
}

impl<'a, T: Element> TensorViewMut<'a, T> {
    /// Create a dense mutable view with an explicit layout
    pub fn new(data: &'a mut [T], layout: Layout) -> Result<Self> {
        Self::with_format(data, layout, MemoryFormat::Dense)
    }

    /// Create a mutable view with an explicit layout and memory format
    pub fn with_format(data: &'a mut [T], layout: Layout, format: MemoryFormat) -> Result<Self> {
        check_bounds(data.len(), &layout, format)?;
        Ok(Self {
            data,
            layout,
            format,
        })
    }

    /// Create a contiguous dense mutable view
    pub fn from_slice(data: &'a mut [T], shape: &[usize]) -> Result<Self> {
        let expected = numel(shape)?;
        if data.len() != expected {
            return Err(Error::shape_mismatch(&[expected], &[data.len()]));
        }
        Self::new(data, Layout::contiguous(shape))
    }

    /// Create a mutable view over a raw byte buffer
    pub fn from_bytes(bytes: &'a mut [u8], layout: Layout, format: MemoryFormat) -> Result<Self> {
        let data = bytemuck::try_cast_slice_mut(bytes)
            .map_err(|e| Error::invalid_argument("bytes", format!("{e:?} for {:?}", T::DTYPE)))?;
        Self::with_format(data, layout, format)
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

    /// Memory format of the underlying buffer
    #[inline]
    pub fn format(&self) -> MemoryFormat {
        self.format
    }

    /// Reborrow as a read-only view
    pub fn as_view(&self) -> TensorView<'_, T> {
        TensorView {
            data: &*self.data,
            layout: self.layout.clone(),
            format: self.format,
        }
    }

    /// Element at `indices`, or `None` if out of range
    pub fn get(&self, indices: &[usize]) -> Option<T> {
        self.layout.index(indices).map(|i| self.data[i])
    }

    /// Copy the logical elements into a row-major `Vec`
    pub fn to_vec(&self) -> Vec<T> {
        self.as_view().to_vec()
    }

    pub(crate) fn from_raw(data: &'a mut [T], layout: Layout, format: MemoryFormat) -> Self {
        debug_assert!(layout.fits_in(data.len()));
        Self {
            data,
            layout,
            format,
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [T] {
        &mut *self.data
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T: Element> fmt::Debug for TensorViewMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TensorViewMut")
            .field("dtype", &T::DTYPE)
            .field("layout", &self.layout)
            .field("format", &self.format)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_bounds() {
        let data = [0.0f32; 6];
        assert!(TensorView::from_slice(&data, &[2, 3]).is_ok());
        assert!(TensorView::from_slice(&data, &[2, 4]).is_err());
        // offset pushes the last row past the end
        let layout = Layout::from_parts(&[2, 3], &[3, 1], 1);
        assert!(TensorView::new(&data, layout).is_err());
        // negative stride below zero
        let layout = Layout::from_parts(&[3], &[-1], 1);
        assert!(TensorView::new(&data, layout).is_err());
        let layout = Layout::from_parts(&[3], &[-1], 2);
        assert!(TensorView::new(&data, layout).is_ok());
    }

    #[test]
    fn test_overflowing_shapes_rejected() {
        // element count wraps to zero in unchecked arithmetic
        let err = TensorView::from_slice(&[] as &[f32], &[1 << 32, 1 << 32]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "shape", .. }));
        let mut empty: [f32; 0] = [];
        assert!(TensorViewMut::from_slice(&mut empty, &[1 << 32, 1 << 32]).is_err());

        // reach of the two outer strides overflows isize
        let data = [1.0f64; 6];
        let layout = Layout::from_parts(&[2, 2, 2], &[isize::MAX, isize::MAX, 7], 0);
        let err = TensorView::new(&data, layout.clone()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "layout", .. }));
        let mut out = [0.0f64; 6];
        assert!(TensorViewMut::new(&mut out, layout).is_err());

        // the same shape through a contiguous layout saturates and is rejected
        let layout = Layout::contiguous(&[1 << 32, 1 << 32]);
        assert!(TensorView::new(&data, layout).is_err());
    }

    #[test]
    fn test_from_bytes() {
        let values = [1.5f32, -2.0, 0.25];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let view = TensorView::<f32>::from_bytes(bytes, Layout::contiguous(&[3]), MemoryFormat::Dense)
            .unwrap();
        assert_eq!(view.to_vec(), values.to_vec());

        // 5 bytes is not a whole number of f32s
        let err = TensorView::<f32>::from_bytes(&bytes[..5], Layout::contiguous(&[1]), MemoryFormat::Dense)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { arg: "bytes", .. }));
    }

    #[test]
    fn test_transpose_to_vec() {
        let data = [1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = TensorView::from_slice(&data, &[2, 3]).unwrap();
        let t = view.transpose(0, 1).unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.get(&[2, 1]), Some(6.0));
        assert!(view.transpose(0, 2).is_err());

        let dense = t.to_dense();
        assert!(dense.layout().is_contiguous());
        assert_eq!(dense.to_vec(), t.to_vec());
    }

    #[test]
    fn test_flip() {
        let data = [1.0f32, 2.0, 3.0];
        let view = TensorView::from_slice(&data, &[3]).unwrap();
        assert_eq!(view.flip(0).unwrap().to_vec(), vec![3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_view_mut() {
        let mut data = [0.0f32; 4];
        let view = TensorViewMut::from_slice(&mut data, &[2, 2]).unwrap();
        assert_eq!(view.as_view().dtype(), DType::F32);
        assert_eq!(view.numel(), 4);
        assert!(view.format().is_dense());
    }
}
