//! Element types recognized by the archive format and kernel library.

use std::fmt::Debug;

/// Dtype names as they appear in an archive's JSON header.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    F16,
    BF16,
    I32,
    I8,
    Bool,
}

impl Dtype {
    pub fn byte_size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F16 => 2,
            Dtype::BF16 => 2,
            Dtype::I32 => 4,
            Dtype::I8 => 1,
            Dtype::Bool => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::F32 => "F32",
            Dtype::F16 => "F16",
            Dtype::BF16 => "BF16",
            Dtype::I32 => "I32",
            Dtype::I8 => "I8",
            Dtype::Bool => "BOOL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "F32" => Some(Dtype::F32),
            "F16" => Some(Dtype::F16),
            "BF16" => Some(Dtype::BF16),
            "I32" => Some(Dtype::I32),
            "I8" => Some(Dtype::I8),
            "BOOL" => Some(Dtype::Bool),
            _ => None,
        }
    }
}

/// A type a tensor may store: plain-old-data so it can be cast to and from the bytes behind
/// a `Storage`, and tagged with the `Dtype` it corresponds to in an archive header.
pub trait ElementType: bytemuck::Pod + Copy + Debug + Send + Sync + 'static {
    const DTYPE: Dtype;
}

impl ElementType for f32 {
    const DTYPE: Dtype = Dtype::F32;
}

impl ElementType for half::f16 {
    const DTYPE: Dtype = Dtype::F16;
}

impl ElementType for half::bf16 {
    const DTYPE: Dtype = Dtype::BF16;
}

impl ElementType for i32 {
    const DTYPE: Dtype = Dtype::I32;
}

impl ElementType for i8 {
    const DTYPE: Dtype = Dtype::I8;
}

/// `bool` is not POD-safe in `bytemuck` (only 0/1 are valid bit patterns); the `BOOL` dtype
/// is represented by this transparent wrapper instead.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Bool(pub u8);

impl ElementType for Bool {
    const DTYPE: Dtype = Dtype::Bool;
}

impl From<bool> for Bool {
    fn from(b: bool) -> Self {
        Bool(b as u8)
    }
}

impl From<Bool> for bool {
    fn from(b: Bool) -> Self {
        b.0 != 0
    }
}
