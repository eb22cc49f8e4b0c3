use ndarray::Array4;
use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to bind input tensor: {0}")]
    Bind(String),
    #[error("model execution failed: {0}")]
    Execution(String),
    #[error("failed to extract output `{name}`: {reason}")]
    Extract { name: String, reason: String },
    #[error("model declared no outputs")]
    NoOutputs,
}

/// One output tensor as reported by the model, flattened in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
        }
    }

    pub fn last_dim(&self) -> Option<usize> {
        self.shape.last().copied()
    }
}

/// A loaded model. Implementations hold mutable execution state and are never
/// invoked concurrently; see [`InterpreterPool`].
pub trait Interpreter: Send + 'static {
    /// Runs the model once and returns every output it declares, in declaration order.
    fn invoke(&mut self, input: &Array4<f32>) -> Result<Vec<RawTensor>, InferenceError>;
}

/// Single-slot pool owning the interpreter. Holding the guard is holding exclusive
/// access; dropping it on any path returns the slot.
pub struct InterpreterPool {
    slot: Mutex<Box<dyn Interpreter>>,
}

pub type InterpreterGuard<'a> = MutexGuard<'a, Box<dyn Interpreter>>;

impl InterpreterPool {
    pub fn new(interpreter: impl Interpreter) -> Self {
        Self {
            slot: Mutex::new(Box::new(interpreter)),
        }
    }

    /// Blocks until the slot is free.
    pub fn acquire(&self) -> InterpreterGuard<'_> {
        self.slot.lock()
    }

    pub fn is_idle(&self) -> bool {
        !self.slot.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Interpreter for Echo {
        fn invoke(&mut self, input: &Array4<f32>) -> Result<Vec<RawTensor>, InferenceError> {
            Ok(vec![RawTensor::new(
                "echo",
                input.shape().to_vec(),
                input.iter().copied().collect(),
            )])
        }
    }

    #[test]
    fn test_guard_releases_slot() {
        let pool = InterpreterPool::new(Echo);
        assert!(pool.is_idle());
        {
            let mut guard = pool.acquire();
            assert!(!pool.is_idle());
            let outputs = guard.invoke(&Array4::zeros((1, 2, 2, 3))).unwrap();
            assert_eq!(outputs[0].shape, vec![1, 2, 2, 3]);
            assert_eq!(outputs[0].last_dim(), Some(3));
        }
        assert!(pool.is_idle());
    }
}
