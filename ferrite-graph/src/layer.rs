//! The layer tree: every node owns a table of declared parameters and a table of named
//! children, both in insertion order. `apply` walks the tree breadth-first, joining each
//! node's delimiter between path segments; `set_parameter`/`get_parameter` resolve a single
//! dot-path down to the leaf parameter it names.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;

use ferrite_gpu::Device;
use ferrite_tensor::{Dtype, Storage};

use crate::parameter::Parameter;
use crate::{Error, Result};

/// A node in the layer tree. Object-safe so heterogeneous children can be stored as
/// `Box<dyn Layer>` under a single parent.
pub trait Layer: Send {
    fn delimiter(&self) -> &str {
        "."
    }

    fn parameters(&self) -> &IndexMap<String, Parameter>;
    fn parameters_mut(&mut self) -> &mut IndexMap<String, Parameter>;

    fn children(&self) -> Vec<(&str, &dyn Layer)>;
    fn child(&self, name: &str) -> Option<&dyn Layer>;
    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn Layer + '_)>;
}

fn join(prefix: &str, name: &str, delimiter: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{delimiter}{name}")
    }
}

/// Walks the tree breadth-first from `layer`, calling `f(path, parameter)` for every
/// declared parameter. When `recurse` is false, only `layer`'s own parameters are visited.
pub fn apply(layer: &dyn Layer, recurse: bool, f: &mut dyn FnMut(&str, &Parameter)) {
    let mut queue: VecDeque<(String, &dyn Layer)> = VecDeque::new();
    queue.push_back((String::new(), layer));
    while let Some((prefix, node)) = queue.pop_front() {
        for (name, param) in node.parameters() {
            f(&join(&prefix, name, node.delimiter()), param);
        }
        if recurse {
            for (name, child) in node.children() {
                queue.push_back((join(&prefix, name, node.delimiter()), child));
            }
        }
    }
}

/// Resolves `path` (e.g. `"layers.0.attention.wq.weight"`) down to its leaf parameter and
/// binds it to `container`. Fails with `ChildNotFound`/`ParameterNotRegistered` if any
/// segment doesn't resolve, or `ParameterTypeMismatch` if the bound tensor's dtype/rank
/// disagrees with the declared parameter.
pub fn set_parameter(layer: &mut dyn Layer, path: &str, dtype: Dtype, shape: Vec<usize>, container: Arc<Storage>) -> Result<()> {
    let delimiter = layer.delimiter().to_string();
    match path.split_once(delimiter.as_str()) {
        Some((head, rest)) => {
            let child = layer.child_mut(head).ok_or_else(|| Error::ChildNotFound(head.to_string()))?;
            set_parameter(child, rest, dtype, shape, container)
        }
        None => {
            let param = layer.parameters_mut().get_mut(path).ok_or_else(|| Error::ParameterNotRegistered(path.to_string()))?;
            param.bind(path, dtype, shape, container)
        }
    }
}

/// Resolves `path` down to its leaf parameter and returns a clone of its (possibly unbound)
/// declaration.
pub fn get_parameter(layer: &dyn Layer, path: &str) -> Result<Parameter> {
    let delimiter = layer.delimiter().to_string();
    match path.split_once(delimiter.as_str()) {
        Some((head, rest)) => {
            let child = layer.child(head).ok_or_else(|| Error::ChildNotFound(head.to_string()))?;
            get_parameter(child, rest)
        }
        None => layer.parameters().get(path).cloned().ok_or_else(|| Error::ParameterNotRegistered(path.to_string())),
    }
}

/// A plain layer node: a parameter table, a child table, and the accelerator handle shared
/// by every wrapper built on top of it (kernels dispatched from within a layer's forward
/// pass need a device to allocate scratch tensors against).
pub struct BasicLayer {
    device: Arc<Device>,
    delimiter: String,
    parameters: IndexMap<String, Parameter>,
    children: IndexMap<String, Box<dyn Layer>>,
}

impl BasicLayer {
    pub fn new(device: Arc<Device>) -> Self {
        Self::with_delimiter(device, ".")
    }

    pub fn with_delimiter(device: Arc<Device>, delimiter: impl Into<String>) -> Self {
        Self {
            device,
            delimiter: delimiter.into(),
            parameters: IndexMap::new(),
            children: IndexMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn declare_parameter(&mut self, name: impl Into<String>, dtype: Dtype, shape: Vec<usize>) -> &mut Self {
        self.parameters.insert(name.into(), Parameter::declare(dtype, shape));
        self
    }

    pub fn insert_child(&mut self, name: impl Into<String>, child: impl Layer + 'static) -> &mut Self {
        self.children.insert(name.into(), Box::new(child));
        self
    }
}

impl Layer for BasicLayer {
    fn delimiter(&self) -> &str {
        &self.delimiter
    }

    fn parameters(&self) -> &IndexMap<String, Parameter> {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut IndexMap<String, Parameter> {
        &mut self.parameters
    }

    fn children(&self) -> Vec<(&str, &dyn Layer)> {
        self.children.iter().map(|(name, child)| (name.as_str(), child.as_ref())).collect()
    }

    fn child(&self, name: &str) -> Option<&dyn Layer> {
        self.children.get(name).map(|c| c.as_ref())
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut (dyn Layer + '_)> {
        self.children.get_mut(name).map(|c| c.as_mut() as &mut dyn Layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_gpu::Accelerator;

    async fn device() -> Arc<Device> {
        Arc::new(Accelerator::default_device().await.expect("no compatible GPU adapter for test"))
    }

    #[tokio::test]
    async fn apply_visits_nested_parameters_in_breadth_first_order() {
        let dev = device().await;
        let mut root = BasicLayer::new(Arc::clone(&dev));
        root.declare_parameter("bias", Dtype::F32, vec![4]);
        let mut child = BasicLayer::new(Arc::clone(&dev));
        child.declare_parameter("weight", Dtype::F32, vec![4, 4]);
        root.insert_child("block0", child);

        let mut visited = Vec::new();
        apply(&root, true, &mut |path, _param| visited.push(path.to_string()));
        assert_eq!(visited, vec!["bias".to_string(), "block0.weight".to_string()]);
    }

    #[tokio::test]
    async fn set_parameter_rejects_unknown_path() {
        let dev = device().await;
        let mut root = BasicLayer::new(Arc::clone(&dev));
        let storage = Arc::new(Storage::random(16));
        let err = set_parameter(&mut root, "missing.weight", Dtype::F32, vec![4], storage).unwrap_err();
        assert!(matches!(err, Error::ChildNotFound(_)));
    }
}
