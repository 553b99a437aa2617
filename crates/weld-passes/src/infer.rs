use anyhow::{bail, ensure, Context};
use weld::{rvec, same_as_input, InferenceRegistry, Node, RVec, Shape, TensorDesc, UNKNOWN_DIM};

fn transposed(node: &Node, attr: &str) -> bool {
    node.attrs().get_bool(attr).unwrap_or(false)
}

/// `[.., m, k] x [.., k, n] -> [.., m, n]`, honouring `transpose_a`/`transpose_b`.
/// Batch dims come from the left operand.
fn matmul(node: &Node) -> anyhow::Result<RVec<TensorDesc>> {
    let a = node.input(0).context("matmul needs two inputs")?;
    let b = node.input(1).context("matmul needs two inputs")?;
    let mut out = TensorDesc::new(Shape::unknown_rank(), a.format, a.dtype);

    let (Some(rank_a), Some(rank_b)) = (a.shape.rank(), b.shape.rank()) else {
        return Ok(rvec![out]);
    };
    ensure!(
        rank_a >= 2 && rank_b >= 2,
        "matmul operands must be at least 2-D, got {} and {}",
        a.shape,
        b.shape
    );

    let (m_axis, k_axis) = if transposed(node, "transpose_a") {
        (rank_a - 1, rank_a - 2)
    } else {
        (rank_a - 2, rank_a - 1)
    };
    let (kb_axis, n_axis) = if transposed(node, "transpose_b") {
        (rank_b - 1, rank_b - 2)
    } else {
        (rank_b - 2, rank_b - 1)
    };

    if let (Some(k), Some(kb)) = (a.shape.known_dim(k_axis), b.shape.known_dim(kb_axis)) {
        ensure!(k == kb, "'{}': contraction dims differ ({} vs {})", node.name(), k, kb);
    }

    let mut shape = Shape::scalar();
    for axis in 0..rank_a - 2 {
        shape.push(a.shape.get(axis).unwrap_or(UNKNOWN_DIM));
    }
    shape.push(a.shape.known_dim(m_axis).unwrap_or(UNKNOWN_DIM));
    shape.push(b.shape.known_dim(n_axis).unwrap_or(UNKNOWN_DIM));
    out.shape = shape;
    Ok(rvec![out])
}

/// Sum of the inputs along `concat_dim`; every other axis comes from input 0.
fn concat(node: &Node) -> anyhow::Result<RVec<TensorDesc>> {
    let first = node
        .input(0)
        .with_context(|| format!("'{}' has no inputs", node.name()))?;
    let dim = node
        .attrs()
        .get_int("concat_dim")
        .with_context(|| format!("'{}' has no concat_dim", node.name()))?;

    let mut out = first.clone();
    if node.inputs().iter().any(|d| d.shape.is_unknown_rank()) {
        out.shape = Shape::unknown_rank();
        return Ok(rvec![out]);
    }
    let Some(axis) = first.shape.resolve_axis(dim) else {
        bail!("concat_dim {} out of range for {}", dim, first.shape);
    };

    let mut total = Some(0i64);
    for desc in node.inputs() {
        ensure!(
            desc.shape.rank() == first.shape.rank(),
            "'{}': cannot concatenate {} with {}",
            node.name(),
            first.shape,
            desc.shape
        );
        total = total.zip(desc.shape.known_dim(axis)).map(|(t, d)| t + d);
    }
    out.shape.set(axis, total.unwrap_or(UNKNOWN_DIM));
    Ok(rvec![out])
}

/// Rules for the op types the built-in passes rewrite.
pub fn builtin_inference() -> InferenceRegistry {
    let mut registry = InferenceRegistry::new();
    for op in ["MatMul", "MatMulV2", "BatchMatMul"] {
        registry.register(op, matmul);
    }
    for op in ["BiasAdd", "Relu", "LeakyRelu", "Add", "Mul"] {
        registry.register(op, same_as_input);
    }
    for op in ["ConcatV2D", "ConcatD"] {
        registry.register(op, concat);
    }
    registry
}
