use crate::tensor::RcTensor;

// Aliases kept for readability. `Scalar` is a zero-dimensional `RcTensor`.
pub type TensorList<T> = Vec<RcTensor<T>>;

pub type Scalar<T> = RcTensor<T>;
