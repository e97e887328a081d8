//! Backend abstraction - Multi-backend support
//!
//! NdArray (CPU) is the default so the adaptation loop runs anywhere; CUDA can be
//! selected at build time for faster source pretraining.

use burn::backend::Autodiff;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (opt-in) or NdArray (default)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray")))]
compile_error!("Enable a backend feature: ndarray or cuda");

/// The autodiff backend used for pretraining and adaptation
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    <DefaultBackend as burn::tensor::backend::Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), feature = "ndarray"))]
    {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_matches_feature() {
        #[cfg(feature = "cuda")]
        assert_eq!(backend_name(), "CUDA (GPU)");
        #[cfg(not(feature = "cuda"))]
        assert_eq!(backend_name(), "NdArray (CPU)");
    }
}
