// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 推理引擎后端 (ONNX Runtime)
// Inference engine backend: load(model, backend) -> handle, run(handle, inputs) -> outputs

use anyhow::{anyhow, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::Session;
use ort::value::Tensor;
use serde::{Deserialize, Serialize};

/// 推理引擎统一接口
///
/// The pipeline only ever sees this trait, so tests can swap in canned
/// outputs without touching ONNX Runtime.
pub trait InferenceEngine: Send {
    /// Runs one forward pass. Outputs are returned in the model's declared order.
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>) -> Result<Vec<Array<f32, IxDyn>>>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>) -> Result<Vec<Array<f32, IxDyn>>> {
        (**self).run(xs)
    }
}

/// Execution provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum OrtEP {
    #[value(name = "cpu")]
    CPU,
    #[value(name = "cuda")]
    CUDA,
    #[value(name = "trt")]
    Trt,
}

/// 输入张量排布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputLayout {
    /// (1, 3, H, W)
    #[default]
    Nchw,
    /// (1, H, W, 3)
    Nhwc,
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub device_id: i32,
    pub trt_fp16: bool,
}

/// ONNX Runtime 会话封装. The session (and the native handle behind it) is
/// released when the backend is dropped.
pub struct OrtBackend {
    session: Session,
    inputs: Vec<String>,
    outputs: Vec<String>,
    ep: OrtEP,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let provider: ExecutionProviderDispatch = match args.ep {
            OrtEP::CPU => CPUExecutionProvider::default().build(),
            OrtEP::CUDA => CUDAExecutionProvider::default()
                .with_device_id(args.device_id)
                .build(),
            OrtEP::Trt => TensorRTExecutionProvider::default()
                .with_device_id(args.device_id)
                .with_fp16(args.trt_fp16)
                .build(),
        };

        let session = Session::builder()
            .map_err(|e| anyhow!("failed to create session builder: {e}"))?
            .with_execution_providers([provider])
            .map_err(|e| anyhow!("failed to register {:?}: {e}", args.ep))?
            .commit_from_file(&args.f)
            .map_err(|e| anyhow!("failed to load model {}: {e}", args.f))?;

        let inputs = session.inputs.iter().map(|x| x.name.clone()).collect();
        let outputs = session.outputs.iter().map(|x| x.name.clone()).collect();

        Ok(Self {
            session,
            inputs,
            outputs,
            ep: args.ep,
        })
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn input_names(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_names(&self) -> &[String] {
        &self.outputs
    }
}

impl InferenceEngine for OrtBackend {
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>) -> Result<Vec<Array<f32, IxDyn>>> {
        if xs.len() != self.inputs.len() {
            return Err(anyhow!(
                "model expects {} inputs, got {}",
                self.inputs.len(),
                xs.len()
            ));
        }

        let mut feeds = Vec::with_capacity(xs.len());
        for (name, x) in self.inputs.iter().zip(xs) {
            let tensor = Tensor::from_array(x).map_err(|e| anyhow!("bad input {name}: {e}"))?;
            feeds.push((name.clone(), tensor));
        }

        let outputs = self
            .session
            .run(feeds)
            .map_err(|e| anyhow!("inference failed: {e}"))?;

        let mut ys = Vec::with_capacity(self.outputs.len());
        for name in self.outputs.iter() {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("bad output {name}: {e}"))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            ys.push(Array::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }
        Ok(ys)
    }
}
