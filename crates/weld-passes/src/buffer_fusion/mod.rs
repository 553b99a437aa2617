mod matmul_eltwise;

pub use matmul_eltwise::*;
