mod annotate;
mod artifact;
mod interpreter;
mod labels;
mod nms;
mod ort_interpreter;
mod preprocess;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;
pub mod pipeline;

pub use app::start_app;
pub use interpreter::{InferenceError, Interpreter, RawTensor};
pub use labels::LabelTable;
pub use pipeline::{DetectedObject, ScoreError, ScoringPipeline};
