//! Compute pipeline and bind-group construction. A kernel task (see `ferrite-kernel`) turns
//! into exactly one pipeline dispatch: one bind group binding every tensor argument's buffer
//! in argument order, one `dispatch_workgroups` call sized from the task's grid.

use std::ops::Deref;

use crate::{Buffer, BufferUsage, Device, Error, Result};

const ENTRY: &str = "main";

/// A compiled compute pipeline paired with the bind group that satisfies it.
pub struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

impl Pipeline {
    pub fn new(pipeline: wgpu::ComputePipeline, bind_group: wgpu::BindGroup) -> Self {
        Self { pipeline, bind_group }
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

impl Deref for Pipeline {
    type Target = wgpu::ComputePipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

/// Builder that accumulates buffer bindings, then finalizes a bind group layout and group in
/// one shot. Binding index follows insertion order, matching the kernel argument table's
/// convention that buffer offsets in the argument list start at zero.
pub struct LayoutBuilder<'a, 'device> {
    device: &'device Device,
    layout_entries: Vec<wgpu::BindGroupLayoutEntry>,
    bind_entries: Vec<wgpu::BindGroupEntry<'a>>,
    counter: u32,
}

impl<'a, 'device> LayoutBuilder<'a, 'device> {
    pub fn new(device: &'device Device) -> Self {
        Self {
            device,
            layout_entries: Vec::new(),
            bind_entries: Vec::new(),
            counter: 0,
        }
    }

    pub fn add_entry(mut self, buffer: &'a Buffer) -> Self {
        self.layout_entries.push(layout_entry(buffer, self.counter));
        self.bind_entries.push(bind_entry(buffer, self.counter));
        self.counter += 1;
        self
    }

    pub fn add_entries(mut self, buffers: impl IntoIterator<Item = &'a Buffer>) -> Self {
        for buffer in buffers {
            self.layout_entries.push(layout_entry(buffer, self.counter));
            self.bind_entries.push(bind_entry(buffer, self.counter));
            self.counter += 1;
        }
        self
    }

    /// Finalizes the bind group. Rejects a task whose argument count overruns the device's
    /// per-stage storage binding limit instead of handing wgpu a descriptor it will reject
    /// with a less specific validation error deep in submission.
    pub fn pipeline(self, label: &str) -> Result<PipelineBuilder<'device>> {
        check_binding_count(self.counter, self.device.limits().max_storage_buffers_per_shader_stage, label)?;
        let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &self.layout_entries,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &bind_group_layout,
            entries: &self.bind_entries,
        });
        Ok(PipelineBuilder::new(self.device, bind_group, bind_group_layout))
    }
}

fn layout_entry(buffer: &Buffer, idx: u32) -> wgpu::BindGroupLayoutEntry {
    let read_only = match buffer.usage() {
        BufferUsage::Read => true,
        BufferUsage::Write | BufferUsage::ReadWrite => false,
        BufferUsage::Staging => panic!("staging buffers should not belong to a bind group"),
    };
    wgpu::BindGroupLayoutEntry {
        binding: idx,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn check_binding_count(requested: u32, max: u32, label: &str) -> Result<()> {
    if requested > max {
        return Err(Error::TooManyBindings {
            label: label.to_string(),
            requested: requested as usize,
            max: max as usize,
        });
    }
    Ok(())
}

fn bind_entry(buffer: &Buffer, idx: u32) -> wgpu::BindGroupEntry {
    wgpu::BindGroupEntry {
        binding: idx,
        resource: buffer.as_entire_binding(),
    }
}

/// Final stage: attach a shader module and produce the compiled `Pipeline`.
pub struct PipelineBuilder<'device> {
    device: &'device Device,
    label: Option<String>,
    layout: wgpu::PipelineLayout,
    bind_group: wgpu::BindGroup,
}

impl<'device> PipelineBuilder<'device> {
    pub fn new(device: &'device Device, bind_group: wgpu::BindGroup, bind_group_layout: wgpu::BindGroupLayout) -> Self {
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        Self {
            device,
            label: None,
            layout: pipeline_layout,
            bind_group,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn build(self, shader: &wgpu::ShaderModule) -> Pipeline {
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: self.label.as_deref(),
            layout: Some(&self.layout),
            module: shader,
            entry_point: ENTRY,
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });
        Pipeline::new(pipeline, self.bind_group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_binding_count_rejects_a_task_over_the_stage_limit() {
        let err = check_binding_count(9, 8, "softmax_f32");
        assert!(matches!(err, Err(Error::TooManyBindings { requested: 9, max: 8, .. })));
    }

    #[test]
    fn check_binding_count_accepts_an_exact_fit() {
        assert!(check_binding_count(8, 8, "softmax_f32").is_ok());
    }
}
