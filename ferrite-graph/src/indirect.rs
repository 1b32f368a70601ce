//! `indirect_layer<L>`: a cheaply-cloneable handle around a shared layer instance, for the
//! rare case where two places in the tree need to mutate the same concrete layer (tied
//! embedding/output weights being the one the transformer actually needs). Cloning an
//! `IndirectLayer` shares the underlying layer rather than copying it.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

pub struct IndirectLayer<L> {
    inner: Rc<RefCell<L>>,
}

impl<L> IndirectLayer<L> {
    pub fn new(layer: L) -> Self {
        Self {
            inner: Rc::new(RefCell::new(layer)),
        }
    }

    pub fn borrow(&self) -> Ref<'_, L> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, L> {
        self.inner.borrow_mut()
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }
}

impl<L> Clone for IndirectLayer<L> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_shares_the_same_underlying_layer() {
        let handle = IndirectLayer::new(42u32);
        let alias = handle.clone();
        *handle.borrow_mut() += 1;
        assert_eq!(*alias.borrow(), 43);
        assert_eq!(handle.strong_count(), 2);
    }
}
