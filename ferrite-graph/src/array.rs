//! `layer_array<L>`: a homogeneous run of layers addressed by integer position but exposed to
//! the tree as string-keyed children (`"0"`, `"1"`, …) so `apply`'s delimiter-joined paths
//! read the same as any other nested layer (`layers.3.attention.wq.weight`).

use indexmap::IndexMap;

use crate::layer::Layer;
use crate::parameter::Parameter;

pub struct LayerArray<L> {
    items: IndexMap<String, L>,
    empty_parameters: IndexMap<String, Parameter>,
}

impl<L> Default for LayerArray<L> {
    fn default() -> Self {
        Self {
            items: IndexMap::new(),
            empty_parameters: IndexMap::new(),
        }
    }
}

impl<L> LayerArray<L> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_back(&mut self, layer: L) -> &mut L {
        let index = self.items.len().to_string();
        self.items.insert(index.clone(), layer);
        self.items.get_mut(&index).expect("just inserted")
    }

    pub fn emplace_back(&mut self, build: impl FnOnce(usize) -> L) -> &mut L {
        let index = self.items.len();
        let layer = build(index);
        self.push_back(layer)
    }

    pub fn at(&self, index: usize) -> Option<&L> {
        self.items.get(&index.to_string())
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut L> {
        self.items.get_mut(&index.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.items.values()
    }
}

impl<L: Layer + 'static> Layer for LayerArray<L> {
    fn parameters(&self) -> &IndexMap<String, Parameter> {
        &self.empty_parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, Parameter> {
        &mut self.empty_parameters
    }

    fn children(&self) -> Vec<(&str, &dyn Layer)> {
        self.items.iter().map(|(name, layer)| (name.as_str(), layer as &dyn Layer)).collect()
    }

    fn child(&self, name: &str) -> Option<&dyn Layer> {
        self.items.get(name).map(|l| l as &dyn Layer)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn Layer + '_)> {
        self.items.get_mut(name).map(|l| l as &mut dyn Layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_gpu::{Accelerator, Device};
    use ferrite_tensor::Dtype;
    use std::sync::Arc;

    use crate::layer::BasicLayer;

    async fn device() -> Arc<Device> {
        Arc::new(Accelerator::default_device().await.expect("no compatible GPU adapter for test"))
    }

    #[tokio::test]
    async fn push_back_assigns_sequential_string_keys() {
        let dev = device().await;
        let mut array: LayerArray<BasicLayer> = LayerArray::new();
        for _ in 0..3 {
            array.emplace_back(|_| BasicLayer::new(Arc::clone(&dev)));
        }
        assert_eq!(array.size(), 3);
        assert!(array.child("2").is_some());
        assert!(array.child("3").is_none());
    }

    #[tokio::test]
    async fn at_returns_typed_reference() {
        let dev = device().await;
        let mut array: LayerArray<BasicLayer> = LayerArray::new();
        array.push_back(BasicLayer::new(Arc::clone(&dev)));
        array.at_mut(0).unwrap().declare_parameter("weight", Dtype::F32, vec![2]);
        assert!(array.at(0).unwrap().parameters().contains_key("weight"));
    }
}
