pub mod candle_aux_layers;
pub mod candle_encoder_gaussian;
pub mod candle_encoder_logits;
pub mod candle_lazy_adam;
pub mod candle_loss_functions;
pub mod candle_minibatch;
pub mod candle_model_traits;
pub mod common_io;

pub use candle_core;
pub use candle_nn;
