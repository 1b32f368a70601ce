//! Every module in this crate wraps a `BasicLayer` for its parameter/child bookkeeping and
//! forwards `ferrite_graph::Layer` straight through to it, so the generic tree walk
//! (`apply`, `set_parameter`, `get_parameter`) works uniformly across embedding, attention,
//! feed-forward, block, and model nodes without each one re-implementing the trait by hand.
macro_rules! delegate_layer {
    ($ty:ty) => {
        impl ferrite_graph::Layer for $ty {
            fn delimiter(&self) -> &str {
                ferrite_graph::Layer::delimiter(&self.base)
            }

            fn parameters(&self) -> &indexmap::IndexMap<String, ferrite_graph::Parameter> {
                ferrite_graph::Layer::parameters(&self.base)
            }

            fn parameters_mut(&mut self) -> &mut indexmap::IndexMap<String, ferrite_graph::Parameter> {
                ferrite_graph::Layer::parameters_mut(&mut self.base)
            }

            fn children(&self) -> Vec<(&str, &dyn ferrite_graph::Layer)> {
                ferrite_graph::Layer::children(&self.base)
            }

            fn child(&self, name: &str) -> Option<&dyn ferrite_graph::Layer> {
                ferrite_graph::Layer::child(&self.base, name)
            }

            fn child_mut(&mut self, name: &str) -> Option<&mut (dyn ferrite_graph::Layer + '_)> {
                ferrite_graph::Layer::child_mut(&mut self.base, name)
            }
        }
    };
}

pub(crate) use delegate_layer;
