//! Weight export for microcontroller deployment
//!
//! The deployed network is the backbone plus a single head. Weights are
//! written either as float JSON or as a C header of Q7 fixed-point arrays with a
//! power-of-two scale per tensor (`value ~= q7 / 2^shift`).
//!
//! Tensors keep Burn's layouts: convolution weights `[out, in, kh, kw]`, linear
//! weights `[in, out]`.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use burn::{
    module::Param,
    nn::{conv::Conv2d, Linear},
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use super::{HeadId, TriHeadNet};
use crate::utils::error::{AdaptationError, Result};

/// Largest allowed Q7 shift
pub const MAX_SHIFT: i32 = 15;

/// One named float tensor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ExportedTensor {
    /// Upper-case C identifier, e.g. `head3.fc1.weight` -> `HEAD3_FC1_WEIGHT`
    pub fn c_name(&self) -> String {
        self.name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect()
    }
}

/// Backbone plus one head, ready to serialise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedModel {
    pub head: HeadId,
    pub num_classes: usize,
    pub tensors: Vec<ExportedTensor>,
}

fn to_exported<B: Backend, const D: usize>(name: &str, tensor: Tensor<B, D>) -> Result<ExportedTensor> {
    let shape = tensor.dims().to_vec();
    let values: Vec<f32> = tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| AdaptationError::Model(format!("{}: {:?}", name, e)))?;
    Ok(ExportedTensor {
        name: name.to_string(),
        shape,
        values,
    })
}

fn bias<B: Backend>(name: &str, bias: &Option<Param<Tensor<B, 1>>>) -> Result<ExportedTensor> {
    let param = bias
        .as_ref()
        .ok_or_else(|| AdaptationError::Model(format!("{} has no bias", name)))?;
    to_exported(&format!("{}.bias", name), param.val())
}

fn conv<B: Backend>(name: &str, layer: &Conv2d<B>, out: &mut Vec<ExportedTensor>) -> Result<()> {
    out.push(to_exported(&format!("{}.weight", name), layer.weight.val())?);
    out.push(bias(name, &layer.bias)?);
    Ok(())
}

fn linear<B: Backend>(name: &str, layer: &Linear<B>, out: &mut Vec<ExportedTensor>) -> Result<()> {
    out.push(to_exported(&format!("{}.weight", name), layer.weight.val())?);
    out.push(bias(name, &layer.bias)?);
    Ok(())
}

/// Collect the backbone and `head` tensors in forward order
pub fn extract<B: Backend>(net: &TriHeadNet<B>, head: HeadId) -> Result<ExportedModel> {
    let mut tensors = Vec::new();
    conv("backbone.conv1", &net.backbone.conv1, &mut tensors)?;
    conv("backbone.conv2", &net.backbone.conv2, &mut tensors)?;

    match head {
        HeadId::Head1 => {
            linear("head1.fc1", &net.head1.fc1, &mut tensors)?;
            linear("head1.fc2", &net.head1.fc2, &mut tensors)?;
            linear("head1.fc3", &net.head1.fc3, &mut tensors)?;
            linear("head1.out", &net.head1.out, &mut tensors)?;
        }
        HeadId::Head2 => {
            linear("head2.fc1", &net.head2.fc1, &mut tensors)?;
            linear("head2.fc2", &net.head2.fc2, &mut tensors)?;
            linear("head2.out", &net.head2.out, &mut tensors)?;
        }
        HeadId::Head3 => {
            linear("head3.fc1", &net.head3.fc1, &mut tensors)?;
            linear("head3.fc2", &net.head3.fc2, &mut tensors)?;
            linear("head3.out", &net.head3.out, &mut tensors)?;
        }
    }

    Ok(ExportedModel {
        head,
        num_classes: net.num_classes(),
        tensors,
    })
}

/// Fractional bits for a tensor: `7 - ceil(log2(max|x|))`, clamped to `[0, 15]`
pub fn q7_shift(values: &[f32]) -> u32 {
    let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    if max_abs == 0.0 || !max_abs.is_finite() {
        return 7;
    }
    let int_bits = max_abs.log2().ceil() as i32;
    (7 - int_bits).clamp(0, MAX_SHIFT) as u32
}

/// Round to Q7 with `shift` fractional bits, saturating to `[-128, 127]`
pub fn quantize_q7(values: &[f32], shift: u32) -> Vec<i8> {
    let scale = (1u32 << shift) as f32;
    values
        .iter()
        .map(|&v| (v * scale).round().clamp(-128.0, 127.0) as i8)
        .collect()
}

/// Float weights as JSON
pub fn write_json(model: &ExportedModel, path: &Path) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(model)?)?;
    Ok(())
}

/// C header with one `int8_t` array and one `_SHIFT` define per tensor
pub fn render_c_header(model: &ExportedModel) -> String {
    let guard = format!("TRI_HEAD_{}_WEIGHTS_H", model.head.to_string().to_uppercase());
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "/* Backbone + {} weights, Q7 fixed point */", model.head);
    let _ = writeln!(out, "#ifndef {}", guard);
    let _ = writeln!(out, "#define {}", guard);
    let _ = writeln!(out);
    let _ = writeln!(out, "#include <stdint.h>");
    let _ = writeln!(out);
    let _ = writeln!(out, "#define NUM_CLASSES {}", model.num_classes);

    for tensor in &model.tensors {
        let shift = q7_shift(&tensor.values);
        let q = quantize_q7(&tensor.values, shift);
        let name = tensor.c_name();

        let _ = writeln!(out);
        let _ = writeln!(out, "/* {} shape {:?} */", tensor.name, tensor.shape);
        let _ = writeln!(out, "#define {}_SHIFT {}", name, shift);
        let _ = writeln!(out, "#define {}_LEN {}", name, q.len());
        let _ = write!(out, "static const int8_t {}[{}] = {{", name, q.len());
        for (i, v) in q.iter().enumerate() {
            if i % 16 == 0 {
                let _ = write!(out, "\n    ");
            }
            let _ = write!(out, "{}, ", v);
        }
        let _ = writeln!(out, "\n}};");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "#endif /* {} */", guard);
    out
}

pub fn write_c_header(model: &ExportedModel, path: &Path) -> Result<()> {
    fs::write(path, render_c_header(model))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use crate::model::TriHeadConfig;

    #[test]
    fn test_q7_shift() {
        assert_eq!(q7_shift(&[0.5, -0.25]), 8);
        assert_eq!(q7_shift(&[1.0]), 7);
        assert_eq!(q7_shift(&[-3.0, 1.0]), 5);
        assert_eq!(q7_shift(&[0.0]), 7);
        // Tiny weights clamp at 15 fractional bits
        assert_eq!(q7_shift(&[1e-9]), 15);
    }

    #[test]
    fn test_quantize_saturates() {
        let q = quantize_q7(&[0.5, -0.25, -0.6], 8);
        assert_eq!(q, vec![127, -64, -128]);
    }

    #[test]
    fn test_c_name() {
        let t = ExportedTensor {
            name: "head3.fc1.weight".to_string(),
            shape: vec![1],
            values: vec![0.0],
        };
        assert_eq!(t.c_name(), "HEAD3_FC1_WEIGHT");
    }

    #[test]
    fn test_extract_backbone_and_head() {
        let device = Default::default();
        let config = TriHeadConfig::new().with_filters(2).with_num_classes(4);
        let net = config.init::<DefaultBackend>(&device);

        let model = extract(&net, HeadId::Head3).unwrap();
        let names: Vec<&str> = model.tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names[0], "backbone.conv1.weight");
        assert!(names.contains(&"head3.out.bias"));
        assert!(!names.iter().any(|n| n.starts_with("head1")));
        assert_eq!(model.tensors.len(), 4 + 6);

        let out = model.tensors.iter().find(|t| t.name == "head3.out.weight").unwrap();
        assert_eq!(out.shape, vec![32, 4]);

        let header = render_c_header(&model);
        assert!(header.contains("#define NUM_CLASSES 4"));
        assert!(header.contains("HEAD3_OUT_WEIGHT_SHIFT"));
        assert!(header.trim_end().ends_with("#endif /* TRI_HEAD_HEAD3_WEIGHTS_H */"));
    }
}
