//! SwiGLU feed-forward block: `w2(silu(w1(x)) ⊙ w3(x))`.

use std::sync::Arc;

use ferrite_gpu::Device;
use ferrite_kernel::FutureTensor;
use ferrite_ops::{self as ops, Runtime};
use ferrite_tensor::TensorView;
use indexmap::IndexMap;

use crate::linear::Linear;
use crate::Result;

pub struct FeedForward {
    w1: Linear,
    w2: Linear,
    w3: Linear,
    empty_parameters: IndexMap<String, ferrite_graph::Parameter>,
}

impl FeedForward {
    pub fn new(device: Arc<Device>, dim: usize, hidden_dim: usize) -> Self {
        Self {
            w1: Linear::new(Arc::clone(&device), dim, hidden_dim),
            w2: Linear::new(Arc::clone(&device), hidden_dim, dim),
            w3: Linear::new(device, dim, hidden_dim),
            empty_parameters: IndexMap::new(),
        }
    }

    pub fn forward(&self, rt: &Runtime, x: &TensorView<f32>) -> Result<FutureTensor<f32>> {
        let gate = self.w1.forward(rt, x)?;
        let up = self.w3.forward(rt, x)?;
        rt.flush();
        let activated = ops::silu(rt, gate.get(rt.device()))?;
        let gated = ops::hadamard(rt, activated.get(rt.device()), up.get(rt.device()))?;
        rt.flush();
        Ok(self.w2.forward(rt, gated.get(rt.device()))?)
    }
}

impl ferrite_graph::Layer for FeedForward {
    fn parameters(&self) -> &IndexMap<String, ferrite_graph::Parameter> {
        &self.empty_parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, ferrite_graph::Parameter> {
        &mut self.empty_parameters
    }

    fn children(&self) -> Vec<(&str, &dyn ferrite_graph::Layer)> {
        vec![("w1", &self.w1 as &dyn ferrite_graph::Layer), ("w2", &self.w2 as &dyn ferrite_graph::Layer), ("w3", &self.w3 as &dyn ferrite_graph::Layer)]
    }

    fn child(&self, name: &str) -> Option<&dyn ferrite_graph::Layer> {
        match name {
            "w1" => Some(&self.w1),
            "w2" => Some(&self.w2),
            "w3" => Some(&self.w3),
            _ => None,
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn ferrite_graph::Layer + '_)> {
        match name {
            "w1" => Some(&mut self.w1),
            "w2" => Some(&mut self.w2),
            "w3" => Some(&mut self.w3),
            _ => None,
        }
    }
}
