use std::path::Path;

use anyhow::Context;
use ndarray::{Array2, Array4, Ix2};
use ort::{
    execution_providers::{
        CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
        TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};

/// The three named tensors the layout model consumes.
#[derive(Debug, Clone)]
pub struct DetectorInput {
    /// `[1, 3, 800, 800]` RGB, scaled to `[0, 1]`.
    pub image: Array4<f32>,
    /// `[1, 2]` = `[input_h, input_w]`.
    pub im_shape: Array2<f32>,
    /// `[1, 2]` = `[input_h / src_h, input_w / src_w]`.
    pub scale_factor: Array2<f32>,
}

/// Seam between the analysis pipeline and the inference runtime.
///
/// `Ok(None)` means the model produced no usable detection tensor (no
/// rank-2 float output with at least 6 columns); the pipeline treats that
/// page as empty.
pub trait LayoutDetector {
    fn detect(&self, input: DetectorInput) -> anyhow::Result<Option<Array2<f32>>>;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum OrtExecutionProvider {
    CPU,
    CoreML { ane_only: bool },
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub model_path: std::path::PathBuf,
    pub execution_providers: Vec<OrtExecutionProvider>,
    pub intra_threads: usize,
    pub inter_threads: usize,
}

impl OrtConfig {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        let mut execution_providers = vec![OrtExecutionProvider::CPU];
        if cfg!(target_os = "macos") {
            execution_providers.push(OrtExecutionProvider::CoreML { ane_only: false });
        }
        Self {
            model_path: model_path.as_ref().to_owned(),
            execution_providers,
            intra_threads: OrtLayoutDetector::ORT_INTRATHREAD,
            inter_threads: OrtLayoutDetector::ORT_INTERTHREAD,
        }
    }
}

/// onnxruntime-backed detector. The session is created by and owned by the
/// analysis worker thread; nothing else touches it.
pub struct OrtLayoutDetector {
    session: Session,
    output_names: Vec<String>,
}

impl OrtLayoutDetector {
    /// Detector input side length; the coarse pixmap is fitted within this.
    pub const INPUT_SIZE: u32 = 800;

    pub const ORT_INTRATHREAD: usize = 4;
    pub const ORT_INTERTHREAD: usize = 2;

    pub fn new(config: OrtConfig) -> anyhow::Result<Self> {
        let mut execution_providers = Vec::new();

        // Sort providers by priority
        let mut providers = config.execution_providers;
        providers.sort();

        for provider in providers {
            match provider {
                OrtExecutionProvider::Trt(device_id) => {
                    execution_providers.push(
                        TensorRTExecutionProvider::default()
                            .with_device_id(device_id)
                            .build(),
                    );
                }
                OrtExecutionProvider::CUDA(device_id) => {
                    execution_providers.push(
                        CUDAExecutionProvider::default()
                            .with_device_id(device_id)
                            .build(),
                    );
                }
                OrtExecutionProvider::CoreML { ane_only } => {
                    let provider = CoreMLExecutionProvider::default();
                    let provider = if ane_only {
                        provider.with_ane_only().build()
                    } else {
                        provider.build()
                    };
                    execution_providers.push(provider)
                }
                OrtExecutionProvider::CPU => {
                    execution_providers.push(CPUExecutionProvider::default().build());
                }
            }
        }

        let session = Session::builder()?
            .with_execution_providers(execution_providers)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .with_inter_threads(config.inter_threads)?
            .commit_from_file(&config.model_path)
            .with_context(|| {
                format!("can't load layout model {}", config.model_path.display())
            })?;

        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(Self {
            session,
            output_names,
        })
    }
}

impl LayoutDetector for OrtLayoutDetector {
    #[tracing::instrument(skip_all)]
    fn detect(&self, input: DetectorInput) -> anyhow::Result<Option<Array2<f32>>> {
        let outputs = self.session.run(ort::inputs![
            "im_shape" => input.im_shape,
            "image" => input.image,
            "scale_factor" => input.scale_factor,
        ]?)?;

        // The model contract is positional only in spirit: scan the outputs
        // for the first rank-2 float tensor with >= 6 columns and take that
        // as the detection table.
        for name in &self.output_names {
            let Some(value) = outputs.get(name) else {
                continue;
            };
            let Ok(tensor) = value.try_extract_tensor::<f32>() else {
                continue;
            };
            if tensor.ndim() == 2 && tensor.shape()[1] >= 6 {
                let table = tensor
                    .to_owned()
                    .into_dimensionality::<Ix2>()
                    .context("detection tensor is not rank 2")?;
                return Ok(Some(table));
            }
        }
        tracing::debug!("model produced no detection tensor");
        Ok(None)
    }
}
