//! Type-erased, aligned column storage.
//!
//! A [`Column`] stores the values of one component for every row of an
//! archetype, packed with a stride equal to the component size. The backing
//! buffer is a vector of 16-byte aligned blocks, so any registered layout
//! (align ≤ 16, size a multiple of align) can be viewed as a typed slice
//! through `bytemuck` without unsafe code.

use bytemuck::{Pod, Zeroable};

use crate::error::ComponentError;
use crate::id::Id;

#[derive(Clone, Copy, Pod, Zeroable)]
#[repr(C, align(16))]
struct Block([u8; 16]);

const BLOCK: usize = std::mem::size_of::<Block>();

/// Values of one component id for all rows of an archetype.
#[derive(Clone)]
pub struct Column {
    id: Id,
    size: usize,
    len: usize,
    blocks: Vec<Block>,
}

impl Column {
    /// Creates an empty column for `id` holding `size`-byte values.
    #[must_use]
    pub fn new(id: Id, size: usize) -> Self {
        Self {
            id,
            size,
            len: 0,
            blocks: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Size of one value in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a zero-filled row and returns its index.
    pub fn push_zeroed(&mut self) -> usize {
        let row = self.len;
        self.len += 1;
        self.blocks
            .resize((self.len * self.size).div_ceil(BLOCK), Block::zeroed());
        self.row_mut(row).fill(0);
        row
    }

    /// Removes `row` by moving the last row into its place.
    ///
    /// # Panics
    ///
    /// Panics if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) {
        assert!(row < self.len, "column row {row} out of bounds ({})", self.len);
        let last = self.len - 1;
        if row != last {
            let size = self.size;
            self.all_bytes_mut()
                .copy_within(last * size..(last + 1) * size, row * size);
        }
        self.len = last;
        self.blocks.truncate((self.len * self.size).div_ceil(BLOCK));
    }

    /// Bytes of a single row.
    #[must_use]
    pub fn row(&self, row: usize) -> &[u8] {
        &self.bytes()[row * self.size..(row + 1) * self.size]
    }

    /// Mutable bytes of a single row.
    pub fn row_mut(&mut self, row: usize) -> &mut [u8] {
        let size = self.size;
        &mut self.bytes_mut()[row * size..(row + 1) * size]
    }

    /// All live rows as bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<Block, u8>(&self.blocks)[..self.len * self.size]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        let end = self.len * self.size;
        &mut self.all_bytes_mut()[..end]
    }

    fn all_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut::<Block, u8>(&mut self.blocks)
    }

    /// Typed view of all rows.
    pub fn as_slice<T: Pod>(&self) -> Result<&[T], ComponentError> {
        self.check::<T>()?;
        bytemuck::try_cast_slice(self.bytes()).map_err(|_| self.mismatch::<T>())
    }

    /// Typed mutable view of all rows.
    pub fn as_slice_mut<T: Pod>(&mut self) -> Result<&mut [T], ComponentError> {
        self.check::<T>()?;
        let err = self.mismatch::<T>();
        bytemuck::try_cast_slice_mut(self.bytes_mut()).map_err(|_| err)
    }

    fn check<T>(&self) -> Result<(), ComponentError> {
        if std::mem::size_of::<T>() == self.size && self.size != 0 {
            Ok(())
        } else {
            Err(self.mismatch::<T>())
        }
    }

    fn mismatch<T>(&self) -> ComponentError {
        ComponentError::TypeMismatch {
            name: self.id.to_string(),
            expected: self.size,
            found: std::mem::size_of::<T>(),
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Vec3 {
        x: f32,
        y: f32,
        z: f32,
    }

    fn column() -> Column {
        Column::new(Id::from_raw(7), std::mem::size_of::<Vec3>())
    }

    #[test]
    fn test_push_and_typed_view() {
        let mut col = column();
        for i in 0..5 {
            let row = col.push_zeroed();
            col.as_slice_mut::<Vec3>().unwrap()[row].x = i as f32;
        }
        let values = col.as_slice::<Vec3>().unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[3].x, 3.0);
        assert_eq!(values[3].y, 0.0);
    }

    #[test]
    fn test_swap_remove_relocates_last_row() {
        let mut col = column();
        for i in 0..3 {
            let row = col.push_zeroed();
            col.as_slice_mut::<Vec3>().unwrap()[row] = Vec3 { x: i as f32, y: 0.0, z: 0.0 };
        }
        col.swap_remove(0);
        let values = col.as_slice::<Vec3>().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].x, 2.0);
        assert_eq!(values[1].x, 1.0);
    }

    #[test]
    fn test_reused_row_is_zeroed() {
        let mut col = column();
        let row = col.push_zeroed();
        col.row_mut(row).fill(0xAB);
        col.swap_remove(row);
        let row = col.push_zeroed();
        assert!(col.row(row).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut col = column();
        col.push_zeroed();
        assert!(matches!(
            col.as_slice::<u64>(),
            Err(ComponentError::TypeMismatch { expected: 12, found: 8, .. })
        ));
    }

    #[test]
    fn test_over_aligned_values() {
        #[derive(Clone, Copy, Pod, Zeroable)]
        #[repr(C, align(16))]
        struct Wide([u32; 4]);

        let mut col = Column::new(Id::from_raw(9), 16);
        col.push_zeroed();
        col.push_zeroed();
        assert_eq!(col.as_slice::<Wide>().unwrap().len(), 2);
    }
}
