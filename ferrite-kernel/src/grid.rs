//! Dispatch dimensions and grid validation.

use crate::{Error, Result};

/// A three-dimensional dispatch size. Unused trailing dimensions default to 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub fn linear(n: u32) -> Self {
        Self::new(n, 1, 1)
    }

    pub fn volume(&self) -> u32 {
        self.x * self.y * self.z
    }
}

impl From<u32> for Dim3 {
    fn from(n: u32) -> Self {
        Dim3::linear(n)
    }
}

/// Validates a grid/threadgroup pair before dispatch: the threadgroup must not exceed the
/// device's per-group invocation limit, and the grid must be at least as large as one
/// threadgroup.
pub fn validate(grid: Dim3, group: Dim3, max_threads_per_group: u32) -> Result<()> {
    if group.volume() > max_threads_per_group || grid.volume() < group.volume() {
        return Err(Error::InvalidGrid {
            grid: (grid.x, grid.y, grid.z),
            group: (group.x, group.y, group.z),
            max_threads_per_group,
        });
    }
    Ok(())
}

/// Number of threadgroups needed to cover `elements` with groups of `group_size`, rounding up.
pub fn workgroup_count(elements: u32, group_size: u32) -> u32 {
    elements.div_ceil(group_size).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn validate_rejects_oversized_group() {
        let err = validate(Dim3::linear(64), Dim3::linear(128), 64);
        assert!(err.is_err());
    }

    #[test]
    fn validate_rejects_grid_smaller_than_group() {
        let err = validate(Dim3::linear(32), Dim3::linear(64), 256);
        assert!(err.is_err());
    }

    #[test]
    fn validate_accepts_exact_fit() {
        assert!(validate(Dim3::linear(256), Dim3::linear(64), 64).is_ok());
    }

    #[test]
    fn workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(65, 64), 2);
        assert_eq!(workgroup_count(64, 64), 1);
    }
}
