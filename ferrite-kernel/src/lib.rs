//! The kernel dispatch runtime: naming and caching compiled kernels, encoding their
//! arguments, batching dispatches into command-buffer partitions, and the future tensor
//! abstraction that lets a caller keep issuing GPU work without blocking until it actually
//! needs a result.

mod argument;
mod cache;
mod error;
mod future_tensor;
mod grid;
mod name;
mod readback;
mod task;
mod thread;

pub use argument::{Argument, ArgumentList};
pub use cache::{KernelCache, KernelSource};
pub use error::{Error, Result};
pub use future_tensor::FutureTensor;
pub use grid::{validate as validate_grid, workgroup_count, Dim3};
pub use name::KernelName;
pub use readback::{Probe, Stage};
pub use task::KernelTask;
pub use thread::{KernelThread, ThreadPool, ThreadSignal};
