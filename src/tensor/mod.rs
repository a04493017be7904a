//! Tensor nodes and the operator set
//!
//! The compute backend sees tensors as nodes: an opcode, a shape, input
//! edges and an output storage buffer. All data is f32 in row-major order.

use std::fmt;
use std::mem;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use crate::device::ComputeDevice;
use crate::storage::StorageBuffer;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
    #[error("Invalid operator: {0}")]
    InvalidOperator(String),
}

pub type TensorResult<T> = Result<T, TensorError>;

/// Supported forward operators.
///
/// The enumeration is closed: the kernel registry is a table indexed by
/// `op as usize`, so `MatMul` must stay the last variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Abs,
    Sqrt,
    Exp,
    Relu,
    Silu,
    Sum,
    Softmax,
    MatMul,
}

impl Op {
    /// Number of opcodes, equal to the kernel registry table length.
    pub const COUNT: usize = Op::MatMul as usize + 1;

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Op::Neg | Op::Abs | Op::Sqrt | Op::Exp | Op::Relu | Op::Silu
        )
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul | Op::Div)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One tensor in the compute graph: an operator, its inputs and the
/// device-owned storage holding its (computed or leaf) data.
#[derive(Debug)]
pub struct TensorNode {
    op: Op,
    shape: Vec<usize>,
    numel: usize,
    inputs: Vec<Arc<TensorNode>>,
    storage: StorageBuffer,
}

fn checked_numel(shape: &[usize]) -> TensorResult<usize> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(TensorError::InvalidShape(format!(
            "tensor shape must have at least one non-zero dimension, got {shape:?}"
        )));
    }
    Ok(shape.iter().product())
}

fn alloc_output(dvc: &dyn ComputeDevice, shape: &[usize]) -> TensorResult<StorageBuffer> {
    let numel = checked_numel(shape)?;
    let mut storage = dvc.alloc_storage(numel * mem::size_of::<f32>());
    storage.set(0, 0);
    Ok(storage)
}

impl TensorNode {
    /// Create a leaf tensor holding a copy of `data`.
    pub fn leaf(
        dvc: &dyn ComputeDevice,
        shape: &[usize],
        data: &[f32],
    ) -> TensorResult<Arc<Self>> {
        let numel = checked_numel(shape)?;
        if data.len() != numel {
            return Err(TensorError::ShapeMismatch(format!(
                "shape {shape:?} holds {numel} elements, got {} values",
                data.len()
            )));
        }
        let mut storage = dvc.alloc_storage(numel * mem::size_of::<f32>());
        storage.copy_in(0, bytemuck::cast_slice(data));
        Ok(Arc::new(TensorNode {
            op: Op::Nop,
            shape: shape.to_vec(),
            numel,
            inputs: Vec::new(),
            storage,
        }))
    }

    /// Create a zero-filled leaf tensor.
    pub fn zeros(dvc: &dyn ComputeDevice, shape: &[usize]) -> TensorResult<Arc<Self>> {
        let numel = checked_numel(shape)?;
        let storage = alloc_output(dvc, shape)?;
        Ok(Arc::new(TensorNode {
            op: Op::Nop,
            shape: shape.to_vec(),
            numel,
            inputs: Vec::new(),
            storage,
        }))
    }

    /// Create a leaf tensor with random values in `[0, 1)` from a fixed seed.
    pub fn random_seeded(
        dvc: &dyn ComputeDevice,
        shape: &[usize],
        seed: u64,
    ) -> TensorResult<Arc<Self>> {
        let numel = checked_numel(shape)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data: Vec<f32> = (0..numel).map(|_| rng.gen()).collect();
        Self::leaf(dvc, shape, &data)
    }

    /// Create an elementwise unary op node over `x`.
    pub fn unary(dvc: &dyn ComputeDevice, op: Op, x: Arc<TensorNode>) -> TensorResult<Arc<Self>> {
        if !op.is_unary() {
            return Err(TensorError::InvalidOperator(format!(
                "{op} is not a unary operator"
            )));
        }
        let storage = alloc_output(dvc, x.shape())?;
        Ok(Arc::new(TensorNode {
            op,
            shape: x.shape.clone(),
            numel: x.numel,
            inputs: vec![x],
            storage,
        }))
    }

    /// Create an elementwise binary op node over `a` and `b`.
    pub fn binary(
        dvc: &dyn ComputeDevice,
        op: Op,
        a: Arc<TensorNode>,
        b: Arc<TensorNode>,
    ) -> TensorResult<Arc<Self>> {
        if !op.is_binary() {
            return Err(TensorError::InvalidOperator(format!(
                "{op} is not a binary operator"
            )));
        }
        if a.shape != b.shape {
            return Err(TensorError::ShapeMismatch(format!(
                "elementwise operands must agree, got {:?} and {:?}",
                a.shape, b.shape
            )));
        }
        let storage = alloc_output(dvc, a.shape())?;
        Ok(Arc::new(TensorNode {
            op,
            shape: a.shape.clone(),
            numel: a.numel,
            inputs: vec![a, b],
            storage,
        }))
    }

    /// Create a matrix-multiply node: `a` is `[m, k]`, `b` is `[k, n]`.
    pub fn matmul(
        dvc: &dyn ComputeDevice,
        a: Arc<TensorNode>,
        b: Arc<TensorNode>,
    ) -> TensorResult<Arc<Self>> {
        if a.shape.len() != 2 || b.shape.len() != 2 {
            return Err(TensorError::ShapeMismatch(format!(
                "matmul expects 2-D operands, got {:?} and {:?}",
                a.shape, b.shape
            )));
        }
        let (m, k) = (a.shape[0], a.shape[1]);
        let (k2, n) = (b.shape[0], b.shape[1]);
        if k != k2 {
            return Err(TensorError::ShapeMismatch(format!(
                "matmul inner dimensions must agree, got {:?} and {:?}",
                a.shape, b.shape
            )));
        }
        let shape = vec![m, n];
        let storage = alloc_output(dvc, &shape)?;
        Ok(Arc::new(TensorNode {
            op: Op::MatMul,
            shape,
            numel: m * n,
            inputs: vec![a, b],
            storage,
        }))
    }

    /// Create a row-wise softmax node; rows are the last dimension of `x`.
    pub fn softmax(dvc: &dyn ComputeDevice, x: Arc<TensorNode>) -> TensorResult<Arc<Self>> {
        let storage = alloc_output(dvc, x.shape())?;
        Ok(Arc::new(TensorNode {
            op: Op::Softmax,
            shape: x.shape.clone(),
            numel: x.numel,
            inputs: vec![x],
            storage,
        }))
    }

    /// Create a full-reduction sum node with a single output element.
    pub fn sum(dvc: &dyn ComputeDevice, x: Arc<TensorNode>) -> TensorResult<Arc<Self>> {
        let shape = vec![1];
        let storage = alloc_output(dvc, &shape)?;
        Ok(Arc::new(TensorNode {
            op: Op::Sum,
            shape,
            numel: 1,
            inputs: vec![x],
            storage,
        }))
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total element count of this tensor; the sole input to the device's
    /// work-width heuristic.
    pub fn numel(&self) -> usize {
        self.numel
    }

    pub fn input(&self, idx: usize) -> &TensorNode {
        &self.inputs[idx]
    }

    pub fn storage(&self) -> &StorageBuffer {
        &self.storage
    }

    /// Read this tensor's data as a contiguous f32 slice.
    pub fn data(&self) -> &[f32] {
        self.storage.as_f32()
    }

    /// Copy this tensor's data out into an owned vector.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data().to_vec()
    }
}
