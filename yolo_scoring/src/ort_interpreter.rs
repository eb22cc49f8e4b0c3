use crate::{
    config::{ModelConfig, Validatable},
    interpreter::{InferenceError, Interpreter, RawTensor},
};
use ndarray::Array4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};

/// ONNX Runtime session wrapped as an [`Interpreter`].
pub struct OrtInterpreter {
    session: Session,
    output_names: Vec<String>,
}

impl OrtInterpreter {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ort::Error> {
        let mut builder =
            Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = model_config.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }
        let session = builder.commit_from_file(model_config.get_path())?;

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        tracing::info!(
            "Loaded model {:?} with outputs {:?}",
            model_config.get_path(),
            output_names
        );

        Ok(Self {
            session,
            output_names,
        })
    }
}

impl Interpreter for OrtInterpreter {
    fn invoke(&mut self, input: &Array4<f32>) -> Result<Vec<RawTensor>, InferenceError> {
        if self.output_names.is_empty() {
            return Err(InferenceError::NoOutputs);
        }

        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Bind(e.to_string()))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Execution(e.to_string()))?;

        let mut tensors = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (shape, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Extract {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;

            tensors.push(RawTensor::new(
                name.clone(),
                shape.iter().map(|&dim| dim.max(0) as usize).collect(),
                data.to_vec(),
            ));
        }

        Ok(tensors)
    }
}
