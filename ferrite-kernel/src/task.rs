//! A kernel task: a named kernel, its dispatch dimensions, and its bound arguments. Tasks are
//! built incrementally (`bind_front`/`bind_back`) so a caller can partially apply the
//! arguments shared across many invocations — e.g. the decoder binds `rmsnorm`'s `eps` once
//! and reuses the task shape across every transformer block — then supply the remaining
//! per-call tensors right before dispatch.

use ferrite_gpu::Device;
use ferrite_tensor::ElementType;

use crate::argument::ArgumentList;
use crate::grid::Dim3;
use crate::name::KernelName;
use crate::{Error, Result};

pub struct KernelTask {
    name: KernelName,
    grid: Dim3,
    group: Dim3,
    args: ArgumentList,
    invoked: bool,
}

impl KernelTask {
    pub fn new(name: &str, grid: Dim3, group: Dim3) -> Result<Self> {
        Ok(Self {
            name: KernelName::parse(name)?,
            grid,
            group,
            args: ArgumentList::new(),
            invoked: false,
        })
    }

    pub fn name(&self) -> &KernelName {
        &self.name
    }

    pub fn grid(&self) -> Dim3 {
        self.grid
    }

    pub fn group(&self) -> Dim3 {
        self.group
    }

    pub fn args(&self) -> &ArgumentList {
        &self.args
    }

    /// Appends a tensor argument after every argument bound so far.
    pub fn bind_back<T: ElementType>(mut self, device: &Device, view: &ferrite_tensor::TensorView<T>) -> Result<Self> {
        self.args.bind_tensor(device, view)?;
        Ok(self)
    }

    /// Inserts a tensor argument before every argument bound so far. Used for kernels whose
    /// output tensor is conventionally the first bound argument but is only known once the
    /// rest of the call is assembled.
    pub fn bind_front<T: ElementType>(mut self, device: &Device, view: &ferrite_tensor::TensorView<T>) -> Result<Self> {
        self.args.bind_front_tensor(device, view)?;
        Ok(self)
    }

    pub fn bind_scalar<T: bytemuck::Pod>(mut self, device: &Device, value: T) -> Self {
        self.args.bind_scalar(device, value);
        self
    }

    /// Marks this task as invoked. A task may only be submitted to a kernel thread once,
    /// matching `kernel_task`'s `already_invoked` guard.
    pub fn mark_invoked(&mut self) -> Result<()> {
        if self.invoked {
            return Err(Error::AlreadyInvoked);
        }
        self.invoked = true;
        Ok(())
    }

    pub fn is_invoked(&self) -> bool {
        self.invoked
    }
}
