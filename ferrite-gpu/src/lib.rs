//! Thin, ergonomic layer over `wgpu` for the inference runtime's compute-only needs: no
//! surfaces, no render pipelines, just instance → adapter → device → buffers/encoders/compute
//! pipelines. Everything above this crate (`ferrite-tensor`, `ferrite-kernel`, `ferrite-ops`)
//! treats `Device` as the hardware-accelerator handle described by the runtime's host
//! contract.

mod adapter;
mod buffer;
mod device;
mod encoder;
mod error;
mod instance;
mod pipeline;
mod size;

pub use adapter::Adapter;
pub use buffer::{Buffer, BufferUsage};
pub use device::Device;
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use instance::Accelerator;
pub use pipeline::Pipeline;
pub use size::ByteSize;
