mod activation;
mod feed_forward;
mod linear;
pub(crate) mod module;

pub use activation::Activation;
pub use feed_forward::{Mlp, SerializedLayer, SerializedMlp, MODEL_FORMAT_VERSION};
pub use linear::Linear;
pub use module::Module;
