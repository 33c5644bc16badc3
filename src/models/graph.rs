//! Runnable layer graph built from a Keras-style Sequential topology.
//!
//! Only the layer types the notation classifiers use are supported. All
//! tensors are channels-last (`[batch, height, width, channels]`).

use crate::error::{NoteScanError, Result};
use ndarray::{ArrayD, Axis, Ix2, Ix4, IxDyn};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Dense float tensor passed between preprocessor, models and engine
pub type Tensor = ArrayD<f32>;

/// Failure inside a forward pass
#[derive(Error, Debug)]
#[error("layer '{layer}': {message}")]
pub struct ForwardError {
    pub layer: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "linear" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "softmax" => Ok(Activation::Softmax),
            other => Err(NoteScanError::topology(format!("unsupported activation '{}'", other))),
        }
    }

    fn apply(self, x: &mut Tensor) {
        match self {
            Activation::Linear => {}
            Activation::Relu => x.mapv_inplace(|v| v.max(0.0)),
            Activation::Sigmoid => x.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => x.mapv_inplace(f32::tanh),
            Activation::Softmax => {
                let last = Axis(x.ndim() - 1);
                for mut lane in x.lanes_mut(last) {
                    let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    if sum > 0.0 {
                        lane.mapv_inplace(|v| v / sum);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Valid,
    Same,
}

impl Padding {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "valid" => Ok(Padding::Valid),
            "same" => Ok(Padding::Same),
            other => Err(NoteScanError::topology(format!("unsupported padding '{}'", other))),
        }
    }

    /// Output length and leading pad for one spatial dimension
    fn output_len(self, input: usize, window: usize, stride: usize) -> Option<(usize, usize)> {
        match self {
            Padding::Valid => {
                if input < window {
                    None
                } else {
                    Some(((input - window) / stride + 1, 0))
                }
            }
            Padding::Same => {
                let out = input.div_ceil(stride);
                let needed = (out.saturating_sub(1) * stride + window).saturating_sub(input);
                Some((out, needed / 2))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Input,
    Conv2D {
        window: Window,
        activation: Activation,
    },
    Pool2D {
        mode: PoolMode,
        window: Window,
    },
    Flatten,
    Dense {
        activation: Activation,
    },
    Dropout,
    Activation(Activation),
    BatchNorm {
        epsilon: f32,
        scale: bool,
        center: bool,
    },
}

/// One named layer with its learnable tensors in declaration order
/// (`[kernel, bias]` for Conv2D/Dense).
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    kind: LayerKind,
    weights: Vec<Tensor>,
    output_shape: Vec<usize>,
}

impl Layer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn weights(&self) -> &[Tensor] {
        &self.weights
    }

    pub fn weight_shapes(&self) -> Vec<Vec<usize>> {
        self.weights.iter().map(|w| w.shape().to_vec()).collect()
    }

    /// Per-sample output shape (batch dimension excluded)
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Replace all learnable tensors at once. Count and every shape must
    /// match the current tensors, otherwise nothing changes.
    pub fn set_weights(&mut self, weights: Vec<Tensor>) -> Result<()> {
        if weights.len() != self.weights.len() {
            return Err(NoteScanError::topology(format!(
                "layer '{}' expects {} weight tensors, got {}",
                self.name,
                self.weights.len(),
                weights.len()
            )));
        }
        for (current, new) in self.weights.iter().zip(&weights) {
            if current.shape() != new.shape() {
                return Err(NoteScanError::ShapeMismatch {
                    target: self.name.clone(),
                    shape: current.shape().to_vec(),
                    expected: current.len(),
                    actual: new.len(),
                });
            }
        }
        self.weights = weights;
        Ok(())
    }

    fn forward(&self, x: &Tensor) -> std::result::Result<Tensor, String> {
        match &self.kind {
            LayerKind::Input | LayerKind::Dropout => Ok(x.clone()),
            LayerKind::Activation(activation) => {
                let mut out = x.clone();
                activation.apply(&mut out);
                Ok(out)
            }
            LayerKind::Flatten => {
                let batch = x.shape()[0];
                let features = x.shape()[1..].iter().product::<usize>();
                x.as_standard_layout()
                    .to_owned()
                    .into_shape(IxDyn(&[batch, features]))
                    .map_err(|e| e.to_string())
            }
            LayerKind::Dense { activation } => {
                let input = x.view().into_dimensionality::<Ix2>().map_err(|e| e.to_string())?;
                let kernel = self.weights[0]
                    .view()
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| e.to_string())?;
                let mut out = input.dot(&kernel).into_dyn();
                if let Some(bias) = self.weights.get(1) {
                    out += bias;
                }
                activation.apply(&mut out);
                Ok(out)
            }
            LayerKind::Conv2D { window, activation } => {
                let mut out = self.conv2d(x, window)?;
                if let Some(bias) = self.weights.get(1) {
                    out += bias;
                }
                activation.apply(&mut out);
                Ok(out)
            }
            LayerKind::Pool2D { mode, window } => self.pool2d(x, *mode, window),
            LayerKind::BatchNorm { epsilon, scale, center } => {
                let mut next = 0;
                let gamma = if *scale {
                    next += 1;
                    Some(&self.weights[next - 1])
                } else {
                    None
                };
                let beta = if *center {
                    next += 1;
                    Some(&self.weights[next - 1])
                } else {
                    None
                };
                let mean = &self.weights[next];
                let variance = &self.weights[next + 1];

                let mut out = x.clone();
                let last = Axis(out.ndim() - 1);
                for mut lane in out.lanes_mut(last) {
                    for (c, v) in lane.iter_mut().enumerate() {
                        let mut y = (*v - mean[[c]]) / (variance[[c]] + epsilon).sqrt();
                        if let Some(g) = gamma {
                            y *= g[[c]];
                        }
                        if let Some(b) = beta {
                            y += b[[c]];
                        }
                        *v = y;
                    }
                }
                Ok(out)
            }
        }
    }

    fn conv2d(&self, x: &Tensor, window: &Window) -> std::result::Result<Tensor, String> {
        let input = x.view().into_dimensionality::<Ix4>().map_err(|e| e.to_string())?;
        let kernel = self.weights[0]
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|e| e.to_string())?;
        let (batch, height, width, channels) = input.dim();
        let (kh, kw, kc, filters) = kernel.dim();
        if kc != channels {
            return Err(format!("kernel expects {} channels, input has {}", kc, channels));
        }
        let (out_h, pad_top) = window
            .padding
            .output_len(height, kh, window.strides.0)
            .ok_or("input smaller than kernel")?;
        let (out_w, pad_left) = window
            .padding
            .output_len(width, kw, window.strides.1)
            .ok_or("input smaller than kernel")?;

        let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, out_h, out_w, filters]));
        for n in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for ky in 0..kh {
                        let iy = (oy * window.strides.0 + ky) as isize - pad_top as isize;
                        if iy < 0 || iy as usize >= height {
                            continue;
                        }
                        for kx in 0..kw {
                            let ix = (ox * window.strides.1 + kx) as isize - pad_left as isize;
                            if ix < 0 || ix as usize >= width {
                                continue;
                            }
                            for ci in 0..channels {
                                let v = input[[n, iy as usize, ix as usize, ci]];
                                if v == 0.0 {
                                    continue;
                                }
                                for co in 0..filters {
                                    out[[n, oy, ox, co]] += v * kernel[[ky, kx, ci, co]];
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn pool2d(
        &self,
        x: &Tensor,
        mode: PoolMode,
        window: &Window,
    ) -> std::result::Result<Tensor, String> {
        let input = x.view().into_dimensionality::<Ix4>().map_err(|e| e.to_string())?;
        let (batch, height, width, channels) = input.dim();
        let (ph, pw) = window.size;
        let (out_h, pad_top) = window
            .padding
            .output_len(height, ph, window.strides.0)
            .ok_or("input smaller than pool window")?;
        let (out_w, pad_left) = window
            .padding
            .output_len(width, pw, window.strides.1)
            .ok_or("input smaller than pool window")?;

        let mut out = ArrayD::<f32>::zeros(IxDyn(&[batch, out_h, out_w, channels]));
        for n in 0..batch {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    for c in 0..channels {
                        let mut acc = match mode {
                            PoolMode::Max => f32::NEG_INFINITY,
                            PoolMode::Average => 0.0,
                        };
                        let mut count = 0usize;
                        for ky in 0..ph {
                            let iy = (oy * window.strides.0 + ky) as isize - pad_top as isize;
                            if iy < 0 || iy as usize >= height {
                                continue;
                            }
                            for kx in 0..pw {
                                let ix = (ox * window.strides.1 + kx) as isize - pad_left as isize;
                                if ix < 0 || ix as usize >= width {
                                    continue;
                                }
                                let v = input[[n, iy as usize, ix as usize, c]];
                                acc = match mode {
                                    PoolMode::Max => acc.max(v),
                                    PoolMode::Average => acc + v,
                                };
                                count += 1;
                            }
                        }
                        out[[n, oy, ox, c]] = match mode {
                            PoolMode::Max => acc,
                            PoolMode::Average if count > 0 => acc / count as f32,
                            PoolMode::Average => 0.0,
                        };
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Sequential stack of layers with a name index built once at construction
#[derive(Debug, Clone)]
pub struct Sequential {
    input_shape: Vec<usize>,
    layers: Vec<Layer>,
    by_name: HashMap<String, usize>,
}

impl Sequential {
    /// Build the graph from a Keras `Sequential` model description.
    ///
    /// Learnable tensors start deterministic: kernels and biases zero,
    /// batch-norm gamma and moving variance one.
    pub fn from_topology(topology: &Value) -> Result<Self> {
        let class_name = topology
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or_else(|| NoteScanError::topology("missing class_name"))?;
        if class_name != "Sequential" {
            return Err(NoteScanError::topology(format!(
                "unsupported model class '{}'",
                class_name
            )));
        }

        let config = topology.get("config").unwrap_or(&Value::Null);
        let layer_configs = match config {
            Value::Array(layers) => layers,
            Value::Object(map) => map
                .get("layers")
                .and_then(Value::as_array)
                .ok_or_else(|| NoteScanError::topology("missing config.layers"))?,
            _ => return Err(NoteScanError::topology("missing config")),
        };
        if layer_configs.is_empty() {
            return Err(NoteScanError::topology("model has no layers"));
        }

        let input_shape = layer_configs
            .iter()
            .find_map(|layer| {
                let cfg = layer.get("config")?;
                cfg.get("batch_input_shape")
                    .or_else(|| cfg.get("batch_shape"))
                    .and_then(Value::as_array)
            })
            .ok_or_else(|| NoteScanError::topology("no layer declares an input shape"))?
            .iter()
            .skip(1)
            .map(|d| {
                d.as_u64()
                    .map(|d| d as usize)
                    .ok_or_else(|| NoteScanError::topology("input dimensions must be fixed"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut layers = Vec::with_capacity(layer_configs.len());
        let mut by_name = HashMap::new();
        let mut shape = input_shape.clone();

        for (position, layer_value) in layer_configs.iter().enumerate() {
            let class = layer_value
                .get("class_name")
                .and_then(Value::as_str)
                .ok_or_else(|| NoteScanError::topology(format!("layer {} has no class_name", position)))?;
            let cfg = layer_value.get("config").unwrap_or(&Value::Null);
            let name = cfg
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{}", class.to_lowercase(), position));

            let layer = build_layer(name.clone(), class, cfg, &shape)?;
            shape = layer.output_shape.clone();
            if by_name.insert(name.clone(), layers.len()).is_some() {
                return Err(NoteScanError::topology(format!("duplicate layer name '{}'", name)));
            }
            layers.push(layer);
        }

        Ok(Self {
            input_shape,
            layers,
            by_name,
        })
    }

    /// Per-sample input shape
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    pub fn output_shape(&self) -> &[usize] {
        self.layers
            .last()
            .map(|l| l.output_shape())
            .unwrap_or(&self.input_shape)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.by_name.get(name).map(|&i| &self.layers[i])
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        match self.by_name.get(name) {
            Some(&i) => Some(&mut self.layers[i]),
            None => None,
        }
    }

    /// Run every layer in order on a batched input
    pub fn forward(&self, input: &Tensor) -> std::result::Result<Tensor, ForwardError> {
        if input.ndim() != self.input_shape.len() + 1
            || input.shape()[0] == 0
            || input.shape()[1..] != self.input_shape[..]
        {
            return Err(ForwardError {
                layer: "input".to_string(),
                message: format!(
                    "expected [batch, {:?}], got {:?}",
                    self.input_shape,
                    input.shape()
                ),
            });
        }

        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.forward(&x).map_err(|message| ForwardError {
                layer: layer.name.clone(),
                message,
            })?;
        }
        Ok(x)
    }
}

fn build_layer(name: String, class: &str, cfg: &Value, input: &[usize]) -> Result<Layer> {
    let need_rank = |rank: usize| -> Result<()> {
        if input.len() == rank {
            Ok(())
        } else {
            Err(NoteScanError::topology(format!(
                "layer '{}' ({}) needs rank-{} input, got {:?}",
                name, class, rank, input
            )))
        }
    };

    let (kind, weights, output_shape) = match class {
        "InputLayer" => (LayerKind::Input, Vec::new(), input.to_vec()),
        "Dropout" => (LayerKind::Dropout, Vec::new(), input.to_vec()),
        "Activation" => {
            let activation = Activation::parse(str_field(cfg, "activation", "linear"))?;
            (LayerKind::Activation(activation), Vec::new(), input.to_vec())
        }
        "Flatten" => (LayerKind::Flatten, Vec::new(), vec![input.iter().product()]),
        "Dense" => {
            need_rank(1)?;
            let units = usize_field(cfg, "units")?;
            let activation = Activation::parse(str_field(cfg, "activation", "linear"))?;
            let mut weights = vec![Tensor::zeros(IxDyn(&[input[0], units]))];
            if bool_field(cfg, "use_bias", true) {
                weights.push(Tensor::zeros(IxDyn(&[units])));
            }
            (LayerKind::Dense { activation }, weights, vec![units])
        }
        "Conv2D" => {
            need_rank(3)?;
            check_layout(&name, cfg)?;
            let filters = usize_field(cfg, "filters")?;
            let window = window_field(cfg, "kernel_size", None)?;
            let activation = Activation::parse(str_field(cfg, "activation", "linear"))?;
            let (out_h, out_w) = spatial_output(&name, input, &window)?;
            let mut weights = vec![Tensor::zeros(IxDyn(&[
                window.size.0,
                window.size.1,
                input[2],
                filters,
            ]))];
            if bool_field(cfg, "use_bias", true) {
                weights.push(Tensor::zeros(IxDyn(&[filters])));
            }
            (
                LayerKind::Conv2D { window, activation },
                weights,
                vec![out_h, out_w, filters],
            )
        }
        "MaxPooling2D" | "AveragePooling2D" => {
            need_rank(3)?;
            check_layout(&name, cfg)?;
            let mode = if class == "MaxPooling2D" {
                PoolMode::Max
            } else {
                PoolMode::Average
            };
            let window = window_field(cfg, "pool_size", Some((2, 2)))?;
            let (out_h, out_w) = spatial_output(&name, input, &window)?;
            (LayerKind::Pool2D { mode, window }, Vec::new(), vec![out_h, out_w, input[2]])
        }
        "BatchNormalization" => {
            let channels = *input
                .last()
                .ok_or_else(|| NoteScanError::topology(format!("layer '{}' has scalar input", name)))?;
            let epsilon = cfg.get("epsilon").and_then(Value::as_f64).unwrap_or(1e-3) as f32;
            let scale = bool_field(cfg, "scale", true);
            let center = bool_field(cfg, "center", true);
            let mut weights = Vec::new();
            if scale {
                weights.push(Tensor::ones(IxDyn(&[channels])));
            }
            if center {
                weights.push(Tensor::zeros(IxDyn(&[channels])));
            }
            weights.push(Tensor::zeros(IxDyn(&[channels])));
            weights.push(Tensor::ones(IxDyn(&[channels])));
            (
                LayerKind::BatchNorm {
                    epsilon,
                    scale,
                    center,
                },
                weights,
                input.to_vec(),
            )
        }
        other => {
            return Err(NoteScanError::topology(format!(
                "unsupported layer class '{}' for '{}'",
                other, name
            )))
        }
    };

    Ok(Layer {
        name,
        kind,
        weights,
        output_shape,
    })
}

fn spatial_output(name: &str, input: &[usize], window: &Window) -> Result<(usize, usize)> {
    let h = window.padding.output_len(input[0], window.size.0, window.strides.0);
    let w = window.padding.output_len(input[1], window.size.1, window.strides.1);
    match (h, w) {
        (Some((h, _)), Some((w, _))) if h > 0 && w > 0 => Ok((h, w)),
        _ => Err(NoteScanError::topology(format!(
            "layer '{}' window {:?} does not fit input {:?}",
            name, window.size, input
        ))),
    }
}

/// Reject options the executor does not implement: non channels-last
/// layout, dilation and grouped convolution.
fn check_layout(name: &str, cfg: &Value) -> Result<()> {
    let unsupported = |option: &str, value: &Value| {
        NoteScanError::topology(format!("layer '{}' has unsupported {} {}", name, option, value))
    };

    if let Some(format) = cfg.get("data_format").filter(|v| !v.is_null()) {
        if format.as_str() != Some("channels_last") {
            return Err(unsupported("data_format", format));
        }
    }
    if let Some(dilation) = cfg.get("dilation_rate").filter(|v| !v.is_null()) {
        if pair(dilation) != Some((1, 1)) {
            return Err(unsupported("dilation_rate", dilation));
        }
    }
    if let Some(groups) = cfg.get("groups").filter(|v| !v.is_null()) {
        if groups.as_u64() != Some(1) {
            return Err(unsupported("groups", groups));
        }
    }
    Ok(())
}

fn window_field(cfg: &Value, size_key: &str, default: Option<(usize, usize)>) -> Result<Window> {
    let size = match cfg.get(size_key) {
        Some(v) => pair(v).ok_or_else(|| NoteScanError::topology(format!("invalid {}", size_key)))?,
        None => default.ok_or_else(|| NoteScanError::topology(format!("missing {}", size_key)))?,
    };
    let strides = match cfg.get("strides") {
        Some(Value::Null) | None => {
            // Pooling strides default to the pool size, convolution strides to 1
            if default.is_some() {
                size
            } else {
                (1, 1)
            }
        }
        Some(v) => pair(v).ok_or_else(|| NoteScanError::topology("invalid strides"))?,
    };
    if strides.0 == 0 || strides.1 == 0 || size.0 == 0 || size.1 == 0 {
        return Err(NoteScanError::topology("window and strides must be positive"));
    }
    Ok(Window {
        size,
        strides,
        padding: Padding::parse(str_field(cfg, "padding", "valid"))?,
    })
}

fn pair(value: &Value) -> Option<(usize, usize)> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| (n as usize, n as usize)),
        Value::Array(items) if items.len() == 2 => {
            Some((items[0].as_u64()? as usize, items[1].as_u64()? as usize))
        }
        _ => None,
    }
}

fn usize_field(cfg: &Value, key: &str) -> Result<usize> {
    cfg.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .filter(|&v| v > 0)
        .ok_or_else(|| NoteScanError::topology(format!("missing or invalid '{}'", key)))
}

fn str_field<'a>(cfg: &'a Value, key: &str, default: &'a str) -> &'a str {
    cfg.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn bool_field(cfg: &Value, key: &str, default: bool) -> bool {
    cfg.get(key).and_then(Value::as_bool).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn small_cnn() -> Value {
        json!({
            "class_name": "Sequential",
            "config": {
                "name": "small",
                "layers": [
                    {"class_name": "Conv2D", "config": {
                        "name": "conv", "filters": 2, "kernel_size": [3, 3],
                        "activation": "relu", "batch_input_shape": [null, 6, 6, 1]
                    }},
                    {"class_name": "MaxPooling2D", "config": {"name": "pool", "pool_size": [2, 2]}},
                    {"class_name": "Dropout", "config": {"name": "drop", "rate": 0.25}},
                    {"class_name": "Flatten", "config": {"name": "flat"}},
                    {"class_name": "Dense", "config": {"name": "out", "units": 3, "activation": "softmax"}}
                ]
            }
        })
    }

    #[test]
    fn test_shapes_propagate_through_layers() {
        let model = Sequential::from_topology(&small_cnn()).unwrap();
        assert_eq!(model.input_shape(), &[6, 6, 1]);
        assert_eq!(model.layer("conv").unwrap().weight_shapes(), vec![vec![3, 3, 1, 2], vec![2]]);
        assert_eq!(model.layer("pool").unwrap().output_shape(), &[2, 2, 2]);
        assert_eq!(model.layer("out").unwrap().weight_shapes(), vec![vec![8, 3], vec![3]]);
        assert_eq!(model.output_shape(), &[3]);
        assert!(model.layer("drop").unwrap().weights().is_empty());
    }

    #[test]
    fn test_zero_initialised_softmax_is_uniform() {
        let model = Sequential::from_topology(&small_cnn()).unwrap();
        let input = Tensor::from_elem(IxDyn(&[1, 6, 6, 1]), 0.5);
        let out = model.forward(&input).unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        for v in out.iter() {
            assert!((v - 1.0 / 3.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_conv_same_padding_matches_hand_computation() {
        let topology = json!({
            "class_name": "Sequential",
            "config": [
                {"class_name": "Conv2D", "config": {
                    "name": "conv", "filters": 1, "kernel_size": 3, "padding": "same",
                    "use_bias": false, "batch_input_shape": [null, 2, 2, 1]
                }}
            ]
        });
        let mut model = Sequential::from_topology(&topology).unwrap();
        let kernel = Tensor::ones(IxDyn(&[3, 3, 1, 1]));
        model.layer_mut("conv").unwrap().set_weights(vec![kernel]).unwrap();

        let input = Tensor::from_shape_vec(IxDyn(&[1, 2, 2, 1]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = model.forward(&input).unwrap();
        // Every output window covers the whole 2x2 input
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![10.0; 4]);
    }

    #[test]
    fn test_dense_applies_kernel_and_bias() {
        let topology = json!({
            "class_name": "Sequential",
            "config": {"layers": [
                {"class_name": "Dense", "config": {"name": "d", "units": 2, "batch_input_shape": [null, 2]}}
            ]}
        });
        let mut model = Sequential::from_topology(&topology).unwrap();
        let kernel = Tensor::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bias = Tensor::from_shape_vec(IxDyn(&[2]), vec![0.5, -0.5]).unwrap();
        model.layer_mut("d").unwrap().set_weights(vec![kernel, bias]).unwrap();

        let input = Tensor::from_shape_vec(IxDyn(&[1, 2]), vec![1.0, 1.0]).unwrap();
        let out = model.forward(&input).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![4.5, 5.5]);
    }

    #[test]
    fn test_batch_norm_exposes_four_tensors() {
        let topology = json!({
            "class_name": "Sequential",
            "config": {"layers": [
                {"class_name": "BatchNormalization", "config": {"name": "bn", "batch_input_shape": [null, 4]}}
            ]}
        });
        let model = Sequential::from_topology(&topology).unwrap();
        assert_eq!(model.layer("bn").unwrap().weights().len(), 4);

        let input = Tensor::from_elem(IxDyn(&[1, 4]), 2.0);
        let out = model.forward(&input).unwrap();
        for v in out.iter() {
            assert!((v - 2.0 / (1.0f32 + 1e-3).sqrt()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_set_weights_rejects_wrong_shape_without_change() {
        let mut model = Sequential::from_topology(&small_cnn()).unwrap();
        let layer = model.layer_mut("out").unwrap();
        let bad = vec![Tensor::ones(IxDyn(&[3, 8])), Tensor::ones(IxDyn(&[3]))];
        assert!(matches!(
            layer.set_weights(bad),
            Err(NoteScanError::ShapeMismatch { .. })
        ));
        assert!(layer.weights()[0].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_wrong_input_shape_is_forward_error() {
        let model = Sequential::from_topology(&small_cnn()).unwrap();
        let input = Tensor::zeros(IxDyn(&[1, 5, 6, 1]));
        let err = model.forward(&input).unwrap_err();
        assert_eq!(err.layer, "input");
    }

    #[test]
    fn test_unsupported_layer_is_topology_error() {
        let topology = json!({
            "class_name": "Sequential",
            "config": {"layers": [
                {"class_name": "LSTM", "config": {"name": "rnn", "units": 4, "batch_input_shape": [null, 3, 2]}}
            ]}
        });
        assert!(matches!(
            Sequential::from_topology(&topology),
            Err(NoteScanError::Topology(_))
        ));
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let model = Sequential::from_topology(&small_cnn()).unwrap();
        let err = model.forward(&Tensor::zeros(IxDyn(&[0, 6, 6, 1]))).unwrap_err();
        assert_eq!(err.layer, "input");
    }

    #[test]
    fn test_flatten_keeps_feature_count_for_empty_batch() {
        let model = Sequential::from_topology(&small_cnn()).unwrap();
        let flatten = model.layer("flat").unwrap();
        let out = flatten.forward(&Tensor::zeros(IxDyn(&[0, 2, 2, 2]))).unwrap();
        assert_eq!(out.shape(), &[0, 8]);
    }

    #[test]
    fn test_unimplemented_conv_options_are_rejected() {
        let conv = |extra: Value| {
            let mut cfg = json!({
                "name": "conv", "filters": 1, "kernel_size": [3, 3],
                "batch_input_shape": [null, 6, 6, 1]
            });
            if let (Some(cfg), Value::Object(extra)) = (cfg.as_object_mut(), extra) {
                cfg.extend(extra);
            }
            json!({"class_name": "Sequential", "config": [{"class_name": "Conv2D", "config": cfg}]})
        };

        for extra in [
            json!({"dilation_rate": [2, 2]}),
            json!({"data_format": "channels_first"}),
            json!({"groups": 2}),
        ] {
            let err = Sequential::from_topology(&conv(extra.clone())).unwrap_err();
            assert!(matches!(err, NoteScanError::Topology(_)), "{}", extra);
        }

        let defaults = json!({"dilation_rate": [1, 1], "data_format": "channels_last", "groups": 1});
        let model = Sequential::from_topology(&conv(defaults)).unwrap();
        assert_eq!(model.output_shape(), &[4, 4, 1]);

        let pooled = json!({"class_name": "Sequential", "config": [
            {"class_name": "InputLayer", "config": {"name": "in", "batch_input_shape": [null, 4, 4, 1]}},
            {"class_name": "MaxPooling2D", "config": {"name": "pool", "data_format": "channels_first"}}
        ]});
        assert!(Sequential::from_topology(&pooled).is_err());
    }
}
