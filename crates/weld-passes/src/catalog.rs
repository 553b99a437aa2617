use anyhow::{bail, Context};
use weld::{Attrs, CatalogError, ImplKind, OpCatalog, OpRegistration};

fn concat_params(attrs: &Attrs) -> anyhow::Result<Attrs> {
    let axis = attrs
        .get_int("axis")
        .or_else(|| attrs.get_int("concat_dim"))
        .context("concat needs 'axis'")?;
    let mut mapped = Attrs::new().with("concat_dim", axis);
    if let Some(n) = attrs.get_int("N") {
        mapped.set("N", n);
    }
    Ok(mapped)
}

fn conv2d_params(attrs: &Attrs) -> anyhow::Result<Attrs> {
    let format = attrs.get_str("data_format").unwrap_or("NHWC");
    if format != "NHWC" && format != "NCHW" {
        bail!("unsupported Conv2D data_format '{}'", format);
    }
    let strides = attrs
        .get("strides")
        .and_then(|v| v.as_list_int())
        .context("Conv2D needs 'strides'")?;
    if strides.len() != 4 {
        bail!("Conv2D strides must have 4 entries, got {}", strides.len());
    }
    let mut mapped = attrs.clone();
    mapped.set("data_format", format);
    Ok(mapped)
}

fn leaky_relu_params(attrs: &Attrs) -> anyhow::Result<Attrs> {
    let alpha = attrs
        .get("alpha")
        .and_then(|v| v.as_float())
        .unwrap_or(0.2);
    Ok(Attrs::new().with("negative_slope", alpha))
}

/// Framework operators known to the built-in passes.
pub fn builtin_catalog() -> Result<OpCatalog, CatalogError> {
    OpCatalog::new([
        OpRegistration::new("MatMul", "MatMul").op_type("MatMulV2").alias("MatMulV2"),
        OpRegistration::new("BatchMatMul", "BatchMatMul").alias("BatchMatMulV2"),
        OpRegistration::new("BiasAdd", "BiasAdd"),
        OpRegistration::new("Conv2D", "Conv2D").param_map(conv2d_params),
        OpRegistration::new("ConcatV2", "ConcatV2D")
            .alias("Concat")
            .op_type("ConcatD")
            .param_map(concat_params),
        OpRegistration::new("Add", "Add").alias("AddV2"),
        OpRegistration::new("Mul", "Mul"),
        OpRegistration::new("Relu", "Relu"),
        OpRegistration::new("LeakyRelu", "LeakyRelu").param_map(leaky_relu_params),
        OpRegistration::new("NonMaxSuppressionV3", "NonMaxSuppression")
            .impl_kind(ImplKind::CpuFallback),
        OpRegistration::new("Where", "Where").impl_kind(ImplKind::CpuFallback),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_consistent() {
        let catalog = builtin_catalog().unwrap();
        for op in ["MatMul", "MatMulV2", "BiasAdd", "Conv2D", "ConcatV2D", "ConcatD", "Add"] {
            assert!(catalog.supports_op_type(op), "{op} should have a kernel");
        }
        assert!(!catalog.supports_op_type("Where"));
        assert_eq!(catalog.lookup("AddV2").unwrap().op_types, ["Add"]);
    }

    #[test]
    fn parameter_mappings() {
        let catalog = builtin_catalog().unwrap();

        let concat = catalog
            .map_params("Concat", &Attrs::new().with("axis", 1i64).with("N", 3i64))
            .unwrap();
        assert_eq!(concat.get_int("concat_dim"), Some(1));
        assert_eq!(concat.get_int("N"), Some(3));

        let conv = Attrs::new()
            .with("strides", vec![1i64, 1, 1, 1])
            .with("data_format", "NCHW");
        assert_eq!(
            catalog.map_params("Conv2D", &conv).unwrap().get_str("data_format"),
            Some("NCHW")
        );
        assert!(catalog
            .map_params("Conv2D", &conv.clone().with("data_format", "NDHWC"))
            .is_err());
        assert!(catalog.map_params("Conv2D", &Attrs::new()).is_err());

        let leaky = catalog.map_params("LeakyRelu", &Attrs::new()).unwrap();
        assert_eq!(leaky.get("negative_slope").and_then(|v| v.as_float()), Some(0.2));
    }
}
