//! The stages a served model implements.
//!
//! Each replica owns its own instance (cloned from the one handed to the
//! server), calls [`InferenceApi::setup`] once, then drives the stages from
//! a dedicated thread. Stages may block.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApiError;
use crate::worker::{Device, StreamSink};

pub trait InferenceApi: Send + 'static {
    /// Body accepted by `POST /predict`.
    type Request: DeserializeOwned;
    /// Body returned by `POST /predict`.
    type Response: Serialize;
    /// Decoded model input for one request.
    type Input;
    /// Model output for one request.
    type Output;
    /// Model input for a whole batch.
    type Batch;
    /// Model output for a whole batch.
    type BatchOutput;

    /// Load the model onto `device`. Runs once per replica.
    fn setup(&mut self, _device: &Device) -> Result<(), ApiError> {
        Ok(())
    }

    fn decode_request(&self, request: Self::Request) -> Result<Self::Input, ApiError>;

    fn predict(&mut self, input: Self::Input) -> Result<Self::Output, ApiError>;

    fn encode_response(&self, output: Self::Output) -> Result<Self::Response, ApiError>;

    /// Combine decoded inputs into one model input. Needed when
    /// `max_batch_size > 1`.
    fn batch(&self, _inputs: Vec<Self::Input>) -> Result<Self::Batch, ApiError> {
        Err(ApiError::Predict("batching is not implemented".to_string()))
    }

    fn predict_batch(&mut self, _batch: Self::Batch) -> Result<Self::BatchOutput, ApiError> {
        Err(ApiError::Predict("batched predict is not implemented".to_string()))
    }

    /// Split a batch output back into one output per input, in input order.
    fn unbatch(&self, _output: Self::BatchOutput) -> Result<Vec<Self::Output>, ApiError> {
        Err(ApiError::Predict("unbatching is not implemented".to_string()))
    }

    /// Produce the reply as a sequence of encoded chunks. Used when the
    /// server runs with `stream = true`.
    ///
    /// Propagate errors from [`StreamSink::send`] with `?`: it fails once the
    /// caller has gone away.
    fn predict_stream(
        &mut self,
        _input: Self::Input,
        _sink: &mut StreamSink<Self::Response>,
    ) -> Result<(), ApiError> {
        Err(ApiError::Predict("streaming is not implemented".to_string()))
    }
}
