use crate::tensor::{Numeric, TensorList};

pub(crate) mod private {
    pub trait Private {}
}

pub trait Module<T: Numeric>: private::Private {
    type InputType;
    type OutputType;

    fn forward(&self, inputs: Self::InputType) -> Self::OutputType;

    /// Trainable tensors, in a fixed order that `update_params` expects back.
    fn params(&self) -> TensorList<T>;

    fn update_params(&mut self, new_params: TensorList<T>);
}
