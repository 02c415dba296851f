//! Small APIs used by the bundled binary and by tests.

use infergate_common::{ChatCompletionRequest, CompletionOutput, Usage};
use serde::{Deserialize, Serialize};

use crate::api::InferenceApi;
use crate::error::ApiError;
use crate::worker::{Device, StreamSink};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareRequest {
    pub input: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquareResponse {
    pub output: f64,
}

/// Squares its input. Supports batching.
#[derive(Debug, Clone, Default)]
pub struct SquareApi {
    device: Option<String>,
}

impl SquareApi {
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl InferenceApi for SquareApi {
    type Request = SquareRequest;
    type Response = SquareResponse;
    type Input = f64;
    type Output = f64;
    type Batch = Vec<f64>;
    type BatchOutput = Vec<f64>;

    fn setup(&mut self, device: &Device) -> Result<(), ApiError> {
        self.device = Some(device.to_string());
        Ok(())
    }

    fn decode_request(&self, request: SquareRequest) -> Result<f64, ApiError> {
        Ok(request.input)
    }

    fn predict(&mut self, input: f64) -> Result<f64, ApiError> {
        Ok(input * input)
    }

    fn encode_response(&self, output: f64) -> Result<SquareResponse, ApiError> {
        Ok(SquareResponse { output })
    }

    fn batch(&self, inputs: Vec<f64>) -> Result<Vec<f64>, ApiError> {
        Ok(inputs)
    }

    fn predict_batch(&mut self, batch: Vec<f64>) -> Result<Vec<f64>, ApiError> {
        Ok(batch.into_iter().map(|x| x * x).collect())
    }

    fn unbatch(&self, output: Vec<f64>) -> Result<Vec<f64>, ApiError> {
        Ok(output)
    }
}

/// Answers a chat request with the content of its last message.
///
/// Usage counts whitespace-separated words.
#[derive(Debug, Clone, Default)]
pub struct EchoChatApi;

impl InferenceApi for EchoChatApi {
    type Request = ChatCompletionRequest;
    type Response = CompletionOutput;
    type Input = String;
    type Output = String;
    type Batch = ();
    type BatchOutput = ();

    fn decode_request(&self, request: ChatCompletionRequest) -> Result<String, ApiError> {
        request
            .messages
            .last()
            .map(|m| m.content.clone())
            .ok_or_else(|| ApiError::Decode("messages must not be empty".to_string()))
    }

    fn predict(&mut self, input: String) -> Result<String, ApiError> {
        Ok(input)
    }

    fn encode_response(&self, output: String) -> Result<CompletionOutput, ApiError> {
        let usage = word_usage(&output);
        Ok(CompletionOutput {
            text: output,
            finish_reason: None,
            usage: Some(usage),
        })
    }

    /// One chunk per word. Usage rides on the last chunk.
    fn predict_stream(
        &mut self,
        input: String,
        sink: &mut StreamSink<CompletionOutput>,
    ) -> Result<(), ApiError> {
        let words: Vec<&str> = input.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            let last = i + 1 == words.len();
            sink.send(CompletionOutput {
                text: if i == 0 { word.to_string() } else { format!(" {}", word) },
                finish_reason: None,
                usage: last.then(|| word_usage(&input)),
            })?;
        }
        Ok(())
    }
}

fn word_usage(text: &str) -> Usage {
    let words = text.split_whitespace().count() as u32;
    Usage {
        prompt_tokens: words,
        completion_tokens: words,
        total_tokens: words.saturating_mul(2),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountRequest {
    pub input: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountChunk {
    pub output: u32,
}

/// Streams `1..=input`. Without streaming, answers with `input` itself.
#[derive(Debug, Clone, Default)]
pub struct CountApi;

impl InferenceApi for CountApi {
    type Request = CountRequest;
    type Response = CountChunk;
    type Input = u32;
    type Output = u32;
    type Batch = ();
    type BatchOutput = ();

    fn decode_request(&self, request: CountRequest) -> Result<u32, ApiError> {
        Ok(request.input)
    }

    fn predict(&mut self, input: u32) -> Result<u32, ApiError> {
        Ok(input)
    }

    fn encode_response(&self, output: u32) -> Result<CountChunk, ApiError> {
        Ok(CountChunk { output })
    }

    fn predict_stream(&mut self, input: u32, sink: &mut StreamSink<CountChunk>) -> Result<(), ApiError> {
        for output in 1..=input {
            sink.send(CountChunk { output })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_api_records_device() {
        let mut api = SquareApi::default();
        assert!(api.device().is_none());
        api.setup(&Device::new(vec!["cuda:0".to_string(), "cuda:1".to_string()]))
            .unwrap();
        assert_eq!(api.device(), Some("cuda:0,cuda:1"));
    }

    #[test]
    fn test_echo_chat_usage_counts_words() {
        let output = EchoChatApi.encode_response("a b c".to_string()).unwrap();
        assert_eq!(output.text, "a b c");
        assert_eq!(output.usage.unwrap().total_tokens, 6);
    }
}
