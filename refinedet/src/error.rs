use thiserror::Error;

/// The error type for `RefineDet-Burn` loss operations.
///
/// Every variant is reported synchronously at the point of detection. Numeric degenerate
/// cases (no positive anchors, empty IoU union, near-zero log arguments) are guarded in the
/// math and never surface here.
#[derive(Error, Debug)]
pub enum RefineDetError {
    /// Error for when the host framework passes layer properties. The loss takes none.
    #[error("Unknown layer properties: got {count}, expected none")]
    UnknownProperties {
        /// The number of properties that were supplied.
        count: usize,
    },

    /// Error for when an invalid loss configuration is provided.
    #[error("Invalid loss configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid {tensor} tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// Which input was rejected.
        tensor: &'static str,
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when predictions and labels disagree on the batch size.
    #[error("Batch size mismatch: predictions have {predictions} items, labels have {labels}")]
    BatchSizeMismatch {
        /// Batch size of the prediction tensor.
        predictions: usize,
        /// Batch size of the label tensor.
        labels: usize,
    },

    /// Error for when tensor data cannot be read back to the host.
    #[error("Tensor conversion failed: {reason}")]
    TensorConversion {
        /// A description of the failed conversion.
        reason: String,
    },

    /// Error for when a backward pass is requested without a cached forward pass.
    #[error("Backward called without a preceding forward pass")]
    MissingForwardState,
}

/// A specialized `Result` type for `RefineDet-Burn` operations.
pub type RefineDetResult<T> = Result<T, RefineDetError>;
