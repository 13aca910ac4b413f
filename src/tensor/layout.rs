//! Layout: shape, strides, and offset for tensor memory layout

use super::shape::{STACK_DIMS, Shape};
use super::strides::Strides;
use smallvec::SmallVec;
use std::fmt;

/// Layout describes the memory layout of a tensor
///
/// A tensor's elements are stored in a contiguous buffer, but not necessarily
/// in row-major order. The layout specifies how to compute the memory address
/// of any element given its indices.
///
/// Address of element at indices [i0, i1, ..., in]:
///   offset + i0 * strides[0] + i1 * strides[1] + ... + in * strides[n]
#[derive(Clone, PartialEq, Eq)]
pub struct Layout {
    /// Shape: size along each dimension
    shape: Shape,
    /// Strides: offset (in elements) between consecutive elements along each dimension
    strides: Strides,
    /// Offset: starting element index in the underlying buffer
    offset: usize,
}

impl Layout {
    /// Create a new contiguous (row-major/C-order) layout from a shape
    ///
    /// # Example
    /// ```
    /// use stablemax::tensor::Layout;
    /// let layout = Layout::contiguous(&[2, 3, 4]);
    /// assert_eq!(layout.shape(), &[2, 3, 4]);
    /// assert_eq!(layout.strides(), &[12, 4, 1]);
    /// ```
    pub fn contiguous(shape: &[usize]) -> Self {
        let shape = Shape::from(shape);
        let strides = Self::compute_contiguous_strides(&shape);
        Self {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Create a row-padded layout: unit stride along the last dimension and
    /// every row rounded up to a multiple of `lanes` elements
    ///
    /// Returns `None` for scalars, `lanes == 0`, or a padded size that
    /// overflows `isize`.
    ///
    /// ```
    /// use stablemax::tensor::Layout;
    /// let layout = Layout::padded(&[2, 5], 8).unwrap();
    /// assert_eq!(layout.strides(), &[8, 1]);
    /// ```
    pub fn padded(shape: &[usize], lanes: usize) -> Option<Self> {
        let last = *shape.last()?;
        if lanes == 0 {
            return None;
        }
        let pitch = last.div_ceil(lanes).checked_mul(lanes)?;

        let mut strides = Strides::with_capacity(shape.len());
        let mut stride = 1isize;
        for (i, &dim) in shape.iter().enumerate().rev() {
            strides.push(stride);
            let extent = if i + 1 == shape.len() { pitch } else { dim };
            stride = stride.checked_mul(isize::try_from(extent).ok()?)?;
        }
        strides.reverse();

        Some(Self {
            shape: Shape::from(shape),
            strides,
            offset: 0,
        })
    }

    /// Create a layout with explicit shape, strides, and offset
    pub fn new(shape: Shape, strides: Strides, offset: usize) -> Self {
        debug_assert_eq!(shape.len(), strides.len());
        Self {
            shape,
            strides,
            offset,
        }
    }

    /// Create a layout from slices
    pub fn from_parts(shape: &[usize], strides: &[isize], offset: usize) -> Self {
        Self::new(Shape::from(shape), Strides::from(strides), offset)
    }

    fn compute_contiguous_strides(shape: &[usize]) -> Strides {
        let mut strides = Strides::with_capacity(shape.len());
        let mut stride = 1isize;

        // Compute strides from last dimension to first. Oversized shapes
        // saturate here and are rejected by `fits_in`.
        for &dim in shape.iter().rev() {
            strides.push(stride);
            stride = stride.saturating_mul(isize::try_from(dim).unwrap_or(isize::MAX));
        }

        strides.reverse();
        strides
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the strides
    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Get the offset
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of dimensions (rank)
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    #[inline]
    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Check if the tensor is a scalar (0 dimensions)
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Check if memory is contiguous (row-major order)
    pub fn is_contiguous(&self) -> bool {
        if self.is_scalar() {
            return true;
        }

        let expected = Self::compute_contiguous_strides(&self.shape);
        self.strides == expected && self.offset == 0
    }

    /// Get size along a specific dimension
    ///
    /// Supports negative indexing: -1 is the last dimension
    pub fn dim(&self, d: isize) -> Option<usize> {
        let idx = self.normalize_dim(d)?;
        Some(self.shape[idx])
    }

    /// Get stride along a specific dimension
    pub fn stride(&self, d: isize) -> Option<isize> {
        let idx = self.normalize_dim(d)?;
        Some(self.strides[idx])
    }

    /// Normalize a dimension index (handle negative indices)
    pub fn normalize_dim(&self, d: isize) -> Option<usize> {
        normalize_axis(d, self.ndim())
    }

    /// Compute the linear index (element offset) for given indices
    pub fn index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.ndim() {
            return None;
        }

        for (idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if *idx >= dim {
                return None;
            }
        }

        let mut linear = isize::try_from(self.offset).ok()?;
        for (&idx, &stride) in indices.iter().zip(self.strides.iter()) {
            linear = linear.checked_add(isize::try_from(idx).ok()?.checked_mul(stride)?)?;
        }

        usize::try_from(linear).ok()
    }

    /// Create a transposed layout (swap two dimensions)
    pub fn transpose(&self, dim0: isize, dim1: isize) -> Option<Self> {
        let d0 = self.normalize_dim(dim0)?;
        let d1 = self.normalize_dim(dim1)?;

        let mut new_shape = self.shape.clone();
        let mut new_strides = self.strides.clone();

        new_shape.swap(d0, d1);
        new_strides.swap(d0, d1);

        Some(Self {
            shape: new_shape,
            strides: new_strides,
            offset: self.offset,
        })
    }

    /// Reverse the element order along one dimension (negates its stride)
    pub fn flip(&self, dim: isize) -> Option<Self> {
        let d = self.normalize_dim(dim)?;
        let stride = self.strides[d];
        let extent = isize::try_from(self.shape[d].saturating_sub(1))
            .ok()?
            .checked_mul(stride)?;
        let offset = isize::try_from(self.offset).ok()?.checked_add(extent)?;
        let offset = usize::try_from(offset).ok()?;

        let new_strides: Strides = self
            .strides
            .iter()
            .enumerate()
            .map(|(i, &s)| if i == d { -s } else { s })
            .collect();

        Some(Self {
            shape: self.shape.clone(),
            strides: new_strides,
            offset,
        })
    }

    /// Smallest and largest element offsets reachable through this layout
    ///
    /// `None` when the layout addresses no elements or an offset does not
    /// fit in `isize`.
    pub fn span(&self) -> Option<(isize, isize)> {
        if self.elem_count() == 0 {
            return None;
        }
        let mut lo = isize::try_from(self.offset).ok()?;
        let mut hi = lo;
        for (&dim, &stride) in self.shape.iter().zip(self.strides.iter()) {
            let reach = isize::try_from(dim - 1).ok()?.checked_mul(stride)?;
            if reach < 0 {
                lo = lo.checked_add(reach)?;
            } else {
                hi = hi.checked_add(reach)?;
            }
        }
        Some((lo, hi))
    }

    /// Check that every addressable element lies in a buffer of `len` elements
    ///
    /// A layout whose element count or offsets overflow never fits.
    pub fn fits_in(&self, len: usize) -> bool {
        match self.shape.checked_elem_count() {
            None => false,
            Some(0) => true,
            Some(_) => self
                .span()
                .is_some_and(|(lo, hi)| lo >= 0 && (hi as usize) < len),
        }
    }

    /// Whether two distinct logical indices may address the same element
    ///
    /// Conservative: dimensions of size > 1 are sorted by absolute stride and
    /// each stride must exceed the extent covered by the smaller ones. Layouts
    /// that interleave dimensions without aliasing are reported as overlapping.
    pub fn has_internal_overlap(&self) -> bool {
        let mut dims: Vec<(usize, usize)> = self
            .shape
            .iter()
            .zip(self.strides.iter())
            .filter(|(d, _)| **d > 1)
            .map(|(&d, &s)| (d, s.unsigned_abs()))
            .collect();
        if self.elem_count() <= 1 {
            return false;
        }
        dims.sort_by_key(|&(_, s)| s);

        let mut covered = 0usize;
        for (dim, stride) in dims {
            if stride <= covered {
                return true;
            }
            covered = covered.saturating_add(stride.saturating_mul(dim - 1));
        }
        false
    }

    /// Iterate over element offsets in logical row-major order
    pub fn offsets(&self) -> OffsetIter<'_> {
        OffsetIter::new(self)
    }

    /// Lane geometry for a reduction along `axis` (already normalized)
    pub fn lanes(&self, axis: usize) -> AxisLanes {
        AxisLanes::new(self, axis)
    }
}

/// Normalize a possibly negative axis against a rank
///
/// ```
/// use stablemax::tensor::normalize_axis;
/// assert_eq!(normalize_axis(-1, 3), Some(2));
/// assert_eq!(normalize_axis(3, 3), None);
/// ```
pub fn normalize_axis(axis: isize, ndim: usize) -> Option<usize> {
    let ndim = ndim as isize;
    let idx = if axis < 0 { ndim + axis } else { axis };
    if idx >= 0 && idx < ndim {
        Some(idx as usize)
    } else {
        None
    }
}

/// Row-major iterator over the element offsets of a [`Layout`]
pub struct OffsetIter<'a> {
    layout: &'a Layout,
    index: SmallVec<[usize; STACK_DIMS]>,
    current: isize,
    remaining: usize,
}

impl<'a> OffsetIter<'a> {
    fn new(layout: &'a Layout) -> Self {
        Self {
            layout,
            index: SmallVec::from_elem(0, layout.ndim()),
            current: layout.offset as isize,
            remaining: layout.elem_count(),
        }
    }
}

impl Iterator for OffsetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let out = self.current as usize;
        self.remaining -= 1;

        // Odometer increment from the last dimension
        let shape = self.layout.shape();
        let strides = self.layout.strides();
        for d in (0..shape.len()).rev() {
            let i = self.index[d] + 1;
            if i < shape[d] {
                self.index[d] = i;
                self.current += strides[d];
                break;
            }
            self.current -= (shape[d] as isize - 1) * strides[d];
            self.index[d] = 0;
        }
        Some(out)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for OffsetIter<'_> {}

/// Decomposition of a layout into independent lanes along one axis
///
/// A lane is the 1-D slice of elements that share all non-axis indices.
/// Lane `i` starts at [`AxisLanes::base`]`(i)` and its `k`-th element sits at
/// `base + k * axis_stride`.
#[derive(Clone, Debug)]
pub struct AxisLanes {
    outer_shape: Shape,
    outer_strides: Strides,
    offset: isize,
    axis_len: usize,
    axis_stride: isize,
}

impl AxisLanes {
    fn new(layout: &Layout, axis: usize) -> Self {
        let mut outer_shape = Shape::with_capacity(layout.ndim());
        let mut outer_strides = Strides::with_capacity(layout.ndim());
        for (d, (&dim, &stride)) in layout.shape().iter().zip(layout.strides()).enumerate() {
            if d != axis {
                outer_shape.push(dim);
                outer_strides.push(stride);
            }
        }
        Self {
            outer_shape,
            outer_strides,
            offset: layout.offset() as isize,
            axis_len: layout.shape()[axis],
            axis_stride: layout.strides()[axis],
        }
    }

    /// Number of lanes
    #[inline]
    pub fn count(&self) -> usize {
        self.outer_shape.elem_count()
    }

    /// Elements per lane
    #[inline]
    pub fn axis_len(&self) -> usize {
        self.axis_len
    }

    /// Stride between consecutive lane elements
    #[inline]
    pub fn axis_stride(&self) -> isize {
        self.axis_stride
    }

    /// Element offset of the first element of lane `lane`
    ///
    /// Lanes are numbered row-major over the non-axis dimensions, so two
    /// layouts with the same shape number their lanes identically.
    pub fn base(&self, lane: usize) -> isize {
        let mut rem = lane;
        let mut base = self.offset;
        for (&dim, &stride) in self.outer_shape.iter().zip(self.outer_strides.iter()).rev() {
            base += (rem % dim) as isize * stride;
            rem /= dim;
        }
        base
    }
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Layout {{ shape: {:?}, strides: {:?}, offset: {} }}",
            self.shape.as_slice(),
            self.strides.as_slice(),
            self.offset
        )
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.shape.as_slice())
    }
}
