//! `lk-numeric` - Host-side training utilities for linear-kernels.
//!
//! Pure functions over [`lk_tensor::Matrix`]: activations and their
//! derivatives, cross-entropy loss, softmax/cross-entropy gradients, weight
//! updates and Xavier initialisation.

pub mod activation;
pub mod gradient;
pub mod init;
pub mod loss;

pub use activation::{sigmoid, sigmoid_derivative};
pub use gradient::{compute_gradient, compute_weight_delta};
pub use init::xavier_uniform;
pub use loss::{cross_entropy, cross_entropy_batch, one_hot};
