use crate::tensor::numeric::*;
use crate::tensor::{RcTensor, TensorLike, TensorList};

use std::collections::HashSet;
use std::rc::Rc;

/// Signature: vjp(inputs, output_grad) -> one gradient per input, each shaped
/// like its input. `output_grad` is shaped like the output of the node.
pub(in crate::tensor) type VectorJacobianProduct<T> = fn(&TensorList<T>, &RcTensor<T>) -> TensorList<T>;

#[derive(Debug, Clone)]
pub(in crate::tensor) struct Derivative<T: Numeric> {
    inputs: TensorList<T>,
    vector_jacobian_product: VectorJacobianProduct<T>,
    debug_info: &'static str,
}

impl<T: Numeric> Derivative<T> {
    pub fn new(
        inputs: TensorList<T>,
        vector_jacobian_product: VectorJacobianProduct<T>,
        debug_info: &'static str,
    ) -> Derivative<T> {
        Derivative {
            inputs,
            vector_jacobian_product,
            debug_info,
        }
    }

    pub fn inputs(&self) -> &TensorList<T> {
        &self.inputs
    }

    /// Pushes `output_grad` one step back through this node, accumulating
    /// into the gradient of every input.
    pub fn propagate(&self, output_grad: &RcTensor<T>) {
        let input_grads = (self.vector_jacobian_product)(&self.inputs, output_grad);
        debug_assert_eq!(input_grads.len(), self.inputs.len(), "{}", self.debug_info);
        for (grad, input) in input_grads.into_iter().zip(self.inputs.iter()) {
            debug_assert_eq!(
                grad.shape(),
                input.shape(),
                "{}: grad and input must have the same shape",
                self.debug_info
            );
            input.update_grad(grad);
        }
    }
}

/// Every tensor reachable from `root` through `grad_fn` edges, ordered so that
/// a tensor always comes before the inputs it was computed from.
pub(in crate::tensor) fn topological_order<T: Numeric>(root: &RcTensor<T>) -> TensorList<T> {
    let mut visited = HashSet::new();
    let mut post_order = Vec::new();
    let mut stack = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            post_order.push(node);
            continue;
        }
        if !visited.insert(Rc::as_ptr(&node.0)) {
            continue;
        }
        stack.push((node.clone(), true));
        if let Some(grad_fn) = node.grad_fn.as_ref() {
            for input in grad_fn.inputs() {
                if !visited.contains(&Rc::as_ptr(&input.0)) {
                    stack.push((input.clone(), false));
                }
            }
        }
    }
    post_order.reverse();
    post_order
}

/// Reverse-mode differentiation from a single-element `root`.
pub(in crate::tensor) fn backward<T: Numeric>(root: &RcTensor<T>) {
    assert_eq!(
        root.count(),
        1,
        "backward needs a single-element output, got shape {:?}",
        root.shape()
    );
    root.update_grad(RcTensor::new_with_filler(root.shape().to_vec(), T::one()));
    for node in topological_order(root) {
        let Some(grad_fn) = node.grad_fn.as_ref() else {
            continue;
        };
        let grad = node.grad.borrow().clone();
        if let Some(grad) = grad {
            grad_fn.propagate(&grad);
        }
    }
}

#[test]
fn test_topological_order_visits_shared_nodes_once() {
    let x = RcTensor::from([1.0, 2.0]);
    let y = &x + &x;
    let z = &y * &x;
    let order = topological_order(&z);
    assert_eq!(order.len(), 3);
    assert!(Rc::ptr_eq(&order[0].0, &z.0));
    assert!(Rc::ptr_eq(&order[1].0, &y.0));
    assert!(Rc::ptr_eq(&order[2].0, &x.0));
}
