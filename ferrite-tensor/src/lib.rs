//! Tensor storage and views: the shape-agnostic byte containers (`Storage`), the
//! sizes/strides/offsets descriptor over them (`TensorView`), and the allocator stack that
//! produces containers on the process heap or a GPU device. Kernel dispatch and future
//! tensors live one layer up, in `ferrite-kernel`.

mod alloc;
mod error;
mod layout;
mod storage;
mod types;
mod view;

pub use alloc::{
    pin, Allocator, GpuHeapAllocator, GpuMemoryAllocator, GpuNocopyAllocator, GpuResidentAllocator, PolymorphicAllocator, RandomMemoryAllocator,
    Rebind,
};
pub use error::{Error, Result};
pub use layout::{Layout, MAX_RANK};
pub use storage::{Pin, Storage};
pub use types::{Bool, Dtype, ElementType};
pub use view::TensorView;
