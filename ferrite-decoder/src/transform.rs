//! Abstracts "run one decode step" behind a trait, the way upstream's `basic_transformer` /
//! `transformer_wrapper` let an agent hold any estimator without naming its concrete type.
//! The decoder loop only ever needs one operation — advance by some ids, get back a sampled
//! token — so that's all the trait exposes.

use std::sync::Arc;

use async_trait::async_trait;

use ferrite_model::Model;
use ferrite_ops::Runtime;

use crate::Result;

#[async_trait]
pub trait Transform: Send {
    /// Forwards `ids` through the model and returns one sampled token id.
    async fn step(&mut self, ids: &[i32], temperature: f32, top_p: f32) -> Result<i32>;
}

/// The production `Transform`: a loaded model plus the runtime it was built against.
pub struct ModelTransform<'a> {
    model: &'a mut Model,
    rt: &'a Runtime,
}

impl<'a> ModelTransform<'a> {
    pub fn new(model: &'a mut Model, rt: &'a Runtime) -> Self {
        Self { model, rt }
    }
}

#[async_trait]
impl<'a> Transform for ModelTransform<'a> {
    async fn step(&mut self, ids: &[i32], temperature: f32, top_p: f32) -> Result<i32> {
        let logits = self.model.forward(self.rt, ids)?;
        self.rt.flush();
        let device = Arc::clone(self.rt.device());
        let sampled = ferrite_ops::nucleus_sample(self.rt, logits.get(&device), temperature, top_p)?;
        self.rt.flush();
        let token = sampled.retrieve(&device).await?;
        tracing::trace!(ids = ids.len(), sampled = token[0], "decode step");
        Ok(token[0])
    }
}
