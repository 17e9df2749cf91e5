//! HTTP speech-to-text adapter, talking to a Whisper-style transcription
//! endpoint over multipart upload.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::adapters::AudioContainer;
use crate::error::{GatewayError, GatewayResult};

use super::SttAdapter;

/// Sample rate the provider expects; WAV input is downmixed and resampled
/// to this before upload.
const PROVIDER_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// STT adapter backed by a Whisper-compatible `/transcriptions` endpoint.
pub struct HttpSttAdapter {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl HttpSttAdapter {
    pub fn new(endpoint: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            model,
            timeout,
        }
    }

    /// Quick zero-energy check: all-silence or too-short a buffer both fail
    /// with `AudioEmpty` before a provider round trip is attempted.
    fn reject_if_empty(bytes: &[u8]) -> GatewayResult<()> {
        const MIN_MEANINGFUL_BYTES: usize = 64;
        if bytes.len() < MIN_MEANINGFUL_BYTES || bytes.iter().all(|&b| b == 0) {
            return Err(GatewayError::AudioEmpty);
        }
        Ok(())
    }
}

#[async_trait]
impl SttAdapter for HttpSttAdapter {
    async fn transcribe(&self, bytes: &[u8], format: AudioContainer) -> GatewayResult<String> {
        Self::reject_if_empty(bytes)?;

        // WAV carries its own sample rate/channel count in the header, so it's
        // the only container this adapter can downmix and resample itself;
        // the others are forwarded as-is for the provider to decode.
        let prepared = match format {
            AudioContainer::Wav => downmix_and_resample_wav(bytes),
            _ => bytes.to_vec(),
        };

        let file_part = Part::bytes(prepared)
            .file_name(format!("audio.{}", format.extension()))
            .mime_str(format.mime_type())
            .map_err(|e| GatewayError::ProviderRejected(format!("invalid mime type: {e}")))?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::ProviderUnavailable(format!("response read failed: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GatewayError::ProviderRejected(format!(
                "stt provider returned {status}: {message}"
            )));
        }

        let parsed: TranscriptionResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::ProviderRejected(format!("malformed response: {e}")))?;

        let trimmed = parsed.text.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::AudioEmpty);
        }
        Ok(trimmed.to_string())
    }
}

/// Minimal parsed view of a PCM WAV file's header: enough to downmix and
/// resample the payload without needing a full RIFF chunk walker.
struct WavFormat {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    data_offset: usize,
    data_len: usize,
}

/// Walks RIFF chunks looking for `fmt ` and `data`. Returns `None` on any
/// malformed or truncated header; callers fall back to forwarding the
/// original bytes unchanged in that case.
fn parse_wav_header(bytes: &[u8]) -> Option<WavFormat> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }

    let mut offset = 12;
    let mut channels = None;
    let mut sample_rate = None;
    let mut bits_per_sample = None;
    let mut data_offset = None;
    let mut data_len = None;

    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_size = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().ok()?) as usize;
        let body_start = offset + 8;

        if chunk_id == b"fmt " {
            if body_start + 16 > bytes.len() {
                return None;
            }
            channels = Some(u16::from_le_bytes(bytes[body_start + 2..body_start + 4].try_into().ok()?));
            sample_rate = Some(u32::from_le_bytes(bytes[body_start + 4..body_start + 8].try_into().ok()?));
            bits_per_sample =
                Some(u16::from_le_bytes(bytes[body_start + 14..body_start + 16].try_into().ok()?));
        } else if chunk_id == b"data" {
            data_offset = Some(body_start);
            data_len = Some(chunk_size.min(bytes.len().saturating_sub(body_start)));
        }

        // Chunks are word-aligned; a chunk with odd size has one pad byte.
        offset = body_start + chunk_size + (chunk_size & 1);
    }

    Some(WavFormat {
        channels: channels?,
        sample_rate: sample_rate?,
        bits_per_sample: bits_per_sample?,
        data_offset: data_offset?,
        data_len: data_len?,
    })
}

/// Averages interleaved channels down to mono. A no-op for already-mono input.
fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resample between arbitrary sample rates.
fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if samples.is_empty() || from_rate == to_rate {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let src_pos = i as f64 * ratio;
            let idx = src_pos.floor() as usize;
            let frac = (src_pos - idx as f64) as f32;
            let a = samples.get(idx).copied().unwrap_or(0);
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            (a as f32 + (b as f32 - a as f32) * frac).round() as i16
        })
        .collect()
}

/// Writes a standard 44-byte-header PCM16 mono WAV file at
/// [`PROVIDER_SAMPLE_RATE`].
fn encode_wav_16bit_mono(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let mut out = BytesMut::with_capacity(44 + data_len);
    let byte_rate = sample_rate * 2;

    out.put_slice(b"RIFF");
    out.put_u32_le(36 + data_len as u32);
    out.put_slice(b"WAVE");
    out.put_slice(b"fmt ");
    out.put_u32_le(16);
    out.put_u16_le(1); // PCM
    out.put_u16_le(1); // mono
    out.put_u32_le(sample_rate);
    out.put_u32_le(byte_rate);
    out.put_u16_le(2); // block align
    out.put_u16_le(16); // bits per sample
    out.put_slice(b"data");
    out.put_u32_le(data_len as u32);
    for &s in samples {
        out.put_i16_le(s);
    }
    out.to_vec()
}

/// Downmixes and resamples a WAV buffer to 16kHz mono PCM16 before the
/// provider upload. Only 16-bit PCM WAV is understood; anything else (an
/// unparsable header, non-16-bit samples) is forwarded unchanged rather than
/// rejected, since the provider may still be able to decode it.
fn downmix_and_resample_wav(bytes: &[u8]) -> Vec<u8> {
    let Some(fmt) = parse_wav_header(bytes) else {
        log::debug!("[HttpSttAdapter] unparsable wav header, forwarding audio unchanged");
        return bytes.to_vec();
    };
    if fmt.bits_per_sample != 16 {
        log::debug!(
            "[HttpSttAdapter] unsupported wav bit depth {}, forwarding audio unchanged",
            fmt.bits_per_sample
        );
        return bytes.to_vec();
    }
    if fmt.sample_rate == PROVIDER_SAMPLE_RATE && fmt.channels == 1 {
        return bytes.to_vec();
    }

    let data = &bytes[fmt.data_offset..fmt.data_offset + fmt.data_len];
    let samples: Vec<i16> = data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    let mono = downmix_to_mono(&samples, fmt.channels);
    let resampled = resample_linear(&mono, fmt.sample_rate, PROVIDER_SAMPLE_RATE);
    encode_wav_16bit_mono(&resampled, PROVIDER_SAMPLE_RATE)
}

fn map_request_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::ProviderTimeout("stt request timed out".into())
    } else {
        GatewayError::ProviderUnavailable(format!("stt request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_rejected() {
        assert!(matches!(
            HttpSttAdapter::reject_if_empty(&[]),
            Err(GatewayError::AudioEmpty)
        ));
    }

    #[test]
    fn all_zero_buffer_is_rejected() {
        assert!(matches!(
            HttpSttAdapter::reject_if_empty(&[0u8; 128]),
            Err(GatewayError::AudioEmpty)
        ));
    }

    #[test]
    fn nonzero_buffer_of_sufficient_length_passes() {
        let bytes = vec![1u8; 128];
        assert!(HttpSttAdapter::reject_if_empty(&bytes).is_ok());
    }

    #[test]
    fn container_parse_is_case_insensitive() {
        assert_eq!(AudioContainer::parse("WAV"), Some(AudioContainer::Wav));
        assert_eq!(AudioContainer::parse(".mp3"), Some(AudioContainer::Mp3));
        assert_eq!(AudioContainer::parse("flac"), None);
    }

    // Like `encode_wav_16bit_mono` but allows an arbitrary channel count, for
    // building multi-channel fixtures to downmix in tests.
    fn make_wav(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = samples.len() * 2;
        let mut out = BytesMut::with_capacity(44 + data_len);
        let block_align = channels * 2;
        let byte_rate = sample_rate * block_align as u32;

        out.put_slice(b"RIFF");
        out.put_u32_le(36 + data_len as u32);
        out.put_slice(b"WAVE");
        out.put_slice(b"fmt ");
        out.put_u32_le(16);
        out.put_u16_le(1);
        out.put_u16_le(channels);
        out.put_u32_le(sample_rate);
        out.put_u32_le(byte_rate);
        out.put_u16_le(block_align);
        out.put_u16_le(16);
        out.put_slice(b"data");
        out.put_u32_le(data_len as u32);
        for &s in samples {
            out.put_i16_le(s);
        }
        out.to_vec()
    }

    #[test]
    fn parses_standard_wav_header() {
        let wav = make_wav(44_100, 2, &[1, 2, 3, 4]);
        let fmt = parse_wav_header(&wav).expect("should parse");
        assert_eq!(fmt.channels, 2);
        assert_eq!(fmt.sample_rate, 44_100);
        assert_eq!(fmt.bits_per_sample, 16);
        assert_eq!(fmt.data_len, 8);
    }

    #[test]
    fn malformed_header_returns_none() {
        assert!(parse_wav_header(b"not-a-wav-file").is_none());
    }

    #[test]
    fn downmix_averages_stereo_to_mono() {
        let stereo = [10i16, 20, 30, 40];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![15, 35]);
    }

    #[test]
    fn downmix_is_noop_for_mono() {
        let mono = [1i16, 2, 3];
        assert_eq!(downmix_to_mono(&mono, 1), vec![1, 2, 3]);
    }

    #[test]
    fn resample_noop_when_rates_match() {
        let samples = [1i16, 2, 3];
        assert_eq!(resample_linear(&samples, 16_000, 16_000), vec![1, 2, 3]);
    }

    #[test]
    fn resample_shrinks_higher_rate_to_target() {
        let samples: Vec<i16> = (0..441).map(|i| i as i16).collect();
        let resampled = resample_linear(&samples, 44_100, 16_000);
        // 441 samples at 44.1kHz is 10ms; at 16kHz that's ~160 samples.
        assert!((155..=165).contains(&resampled.len()));
    }

    #[test]
    fn downmix_and_resample_wav_produces_16k_mono_header() {
        let wav = make_wav(44_100, 2, &vec![100i16; 4410 * 2]); // 100ms stereo
        let processed = downmix_and_resample_wav(&wav);
        let fmt = parse_wav_header(&processed).expect("output should be a valid wav");
        assert_eq!(fmt.sample_rate, PROVIDER_SAMPLE_RATE);
        assert_eq!(fmt.channels, 1);
        assert_eq!(fmt.bits_per_sample, 16);
    }

    #[test]
    fn already_16k_mono_wav_passes_through_unchanged() {
        let wav = make_wav(16_000, 1, &[1, 2, 3, 4]);
        let processed = downmix_and_resample_wav(&wav);
        assert_eq!(processed, wav);
    }

    #[test]
    fn unparsable_wav_forwards_bytes_unchanged() {
        let garbage = b"RIFF0000not-really-wave".to_vec();
        assert_eq!(downmix_and_resample_wav(&garbage), garbage);
    }
}
