mod autograd;
pub mod functional;
mod numeric;
mod raw_tensor;
mod rc_tensor;
mod tensor_like;
mod types;
mod utils;

pub use numeric::*;
pub use raw_tensor::*;
pub use rc_tensor::*;
pub use tensor_like::*;
pub use types::*;
pub use utils::{broadcast_shape, global_index, increment_index, IndexIterator};
