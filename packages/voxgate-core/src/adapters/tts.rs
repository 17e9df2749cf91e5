//! HTTP text-to-speech adapter, streaming raw PCM16 audio from the
//! provider response body and yielding it as float32 chunks.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};

use super::TtsAdapter;

#[derive(Serialize)]
struct SynthRequest<'a> {
    text: &'a str,
    voice_id: &'a str,
    sample_rate: u32,
}

/// TTS adapter backed by a provider that streams raw PCM16 LE mono audio as
/// the HTTP response body (chunked transfer, no container framing).
pub struct HttpTtsAdapter {
    client: Client,
    endpoint: String,
    api_key: String,
    sample_rate: u32,
    first_chunk_timeout: Duration,
}

impl HttpTtsAdapter {
    pub fn new(
        endpoint: String,
        api_key: String,
        sample_rate: u32,
        first_chunk_timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            sample_rate,
            first_chunk_timeout,
        }
    }
}

#[async_trait]
impl TtsAdapter for HttpTtsAdapter {
    async fn synth(
        &self,
        text: &str,
        voice_id: &str,
    ) -> GatewayResult<BoxStream<'static, GatewayResult<Vec<f32>>>> {
        let request = SynthRequest {
            text,
            voice_id,
            sample_rate: self.sample_rate,
        };

        let response = tokio::time::timeout(
            self.first_chunk_timeout,
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| GatewayError::ProviderTimeout("tts first chunk timed out".into()))?
        .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderRejected(format!(
                "tts provider returned {status}: {body}"
            )));
        }

        let mut byte_stream = response.bytes_stream();
        let first_chunk_timeout = self.first_chunk_timeout;

        let output = stream! {
            // Leftover bytes when a chunk boundary splits a sample in half.
            let mut carry = BytesMut::new();
            // Getting a 200 promptly doesn't mean the body starts flowing
            // promptly: the first-chunk budget covers the body too, not just
            // the response headers, so it's re-applied here until the first
            // batch of samples is actually yielded.
            let mut first_chunk_emitted = false;
            loop {
                let next_item = if first_chunk_emitted {
                    byte_stream.next().await
                } else {
                    match tokio::time::timeout(first_chunk_timeout, byte_stream.next()).await {
                        Ok(item) => item,
                        Err(_) => {
                            yield Err(GatewayError::ProviderTimeout("tts first chunk timed out".into()));
                            return;
                        }
                    }
                };

                match next_item {
                    Some(Ok(chunk)) => {
                        carry.extend_from_slice(&chunk);
                        let usable = (carry.len() / 2) * 2;
                        if usable == 0 {
                            continue;
                        }
                        let mut samples = Vec::with_capacity(usable / 2);
                        let mut taken = carry.split_to(usable);
                        while taken.has_remaining() {
                            samples.push(taken.get_i16_le() as f32 / i16::MAX as f32);
                        }
                        first_chunk_emitted = true;
                        yield Ok(samples);
                    }
                    Some(Err(e)) => {
                        yield Err(map_request_error(e));
                        return;
                    }
                    None => {
                        if !carry.is_empty() {
                            // A single dangling byte at end-of-stream is a
                            // malformed provider response; drop it.
                            log::warn!("[HttpTtsAdapter] dropping {} dangling byte(s)", carry.len());
                        }
                        return;
                    }
                }
            }
        };

        Ok(output.boxed())
    }
}

fn map_request_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::ProviderTimeout("tts request timed out".into())
    } else {
        GatewayError::ProviderUnavailable(format!("tts request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    #[test]
    fn pcm16_to_float_roundtrip_scale() {
        let mut raw = BytesMut::new();
        raw.put_i16_le(i16::MAX);
        raw.put_i16_le(i16::MIN);
        raw.put_i16_le(0);

        let mut buf = raw.freeze();
        let mut samples = Vec::new();
        while buf.len() >= 2 {
            let b0 = buf[0];
            let b1 = buf[1];
            let sample = i16::from_le_bytes([b0, b1]) as f32 / i16::MAX as f32;
            samples.push(sample);
            buf = buf.slice(2..);
        }

        assert!((samples[0] - 1.0).abs() < 1e-6);
        assert!(samples[1] < -0.99);
        assert_eq!(samples[2], 0.0);
    }
}
