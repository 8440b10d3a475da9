//! Speech-to-text collaborator.
//!
//! The core never runs a speech model itself; it hands a bounded audio
//! segment to a [`Transcriber`] and waits at most the configured timeout.
//! A failed or late transcription is logged and treated as "no fragment".

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::TranscriptionConfig;

/// Mono PCM audio, samples in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSegment {
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Decodes a little-endian `f32` PCM body.
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            bail!(
                "audio body length {} is not a multiple of 4 bytes",
                bytes.len()
            );
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Unix seconds at which the transcription completed.
    #[serde(default)]
    pub timestamp: f64,
}

fn default_confidence() -> f64 {
    1.0
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioSegment) -> Result<TranscriptSegment>;
}

/// Posts audio as JSON to an HTTP speech-to-text service.
///
/// Request: `{ "samples": [f32...], "sample_rate": 16000, "language": "en" }`.
/// Response: `{ "text": "...", "confidence": 0.93 }` (`confidence` optional).
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
}

impl HttpTranscriber {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build transcription HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    language: &'a str,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &AudioSegment) -> Result<TranscriptSegment> {
        let resp = self
            .client
            .post(&self.url)
            .json(&TranscribeRequest {
                samples: &audio.samples,
                sample_rate: audio.sample_rate,
                language: "en",
            })
            .send()
            .await
            .context("transcription request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("transcription service returned {}: {}", status, body);
        }

        let mut segment: TranscriptSegment = resp
            .json()
            .await
            .context("invalid transcription response")?;
        segment.text = segment.text.trim().to_string();
        if segment.timestamp == 0.0 {
            segment.timestamp = now_secs();
        }
        Ok(segment)
    }
}

pub fn create_transcriber(config: &TranscriptionConfig) -> Result<Option<Box<dyn Transcriber>>> {
    match &config.url {
        Some(url) => Ok(Some(Box::new(HttpTranscriber::new(
            url.clone(),
            config.timeout(),
        )?))),
        None => Ok(None),
    }
}

/// Runs one transcription under `limit`. Failures and timeouts yield `None`.
pub async fn transcribe_within(
    transcriber: &dyn Transcriber,
    audio: &AudioSegment,
    limit: Duration,
) -> Option<TranscriptSegment> {
    match tokio::time::timeout(limit, transcriber.transcribe(audio)).await {
        Ok(Ok(segment)) if !segment.text.trim().is_empty() => Some(segment),
        Ok(Ok(_)) => {
            tracing::debug!("transcription returned no text");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "transcription failed; fragment dropped");
            None
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = limit.as_millis() as u64,
                audio_ms = audio.duration().as_millis() as u64,
                "transcription timed out; fragment dropped"
            );
            None
        }
    }
}

pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, Duration);

    #[async_trait]
    impl Transcriber for Fixed {
        async fn transcribe(&self, _audio: &AudioSegment) -> Result<TranscriptSegment> {
            tokio::time::sleep(self.1).await;
            Ok(TranscriptSegment {
                text: self.0.to_string(),
                confidence: 0.9,
                timestamp: now_secs(),
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl Transcriber for Failing {
        async fn transcribe(&self, _audio: &AudioSegment) -> Result<TranscriptSegment> {
            bail!("model not loaded")
        }
    }

    fn silence() -> AudioSegment {
        AudioSegment {
            samples: vec![0.0; 1600],
            sample_rate: AudioSegment::DEFAULT_SAMPLE_RATE,
        }
    }

    #[test]
    fn test_decode_le_f32() {
        let mut bytes = Vec::new();
        for s in [0.5f32, -1.0, 0.25] {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let seg = AudioSegment::from_le_bytes(&bytes, 16_000).unwrap();
        assert_eq!(seg.samples, vec![0.5, -1.0, 0.25]);
        assert!(AudioSegment::from_le_bytes(&bytes[..5], 16_000).is_err());
    }

    #[test]
    fn test_duration() {
        assert_eq!(silence().duration(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_within_limit_returns_segment() {
        let t = Fixed("the lord is my shepherd", Duration::from_millis(1));
        let seg = transcribe_within(&t, &silence(), Duration::from_secs(1)).await;
        assert_eq!(seg.unwrap().text, "the lord is my shepherd");
    }

    #[tokio::test]
    async fn test_timeout_drops_fragment() {
        let t = Fixed("too late", Duration::from_millis(500));
        let seg = transcribe_within(&t, &silence(), Duration::from_millis(20)).await;
        assert!(seg.is_none());
    }

    #[tokio::test]
    async fn test_failure_and_blank_text_drop_fragment() {
        assert!(transcribe_within(&Failing, &silence(), Duration::from_secs(1)).await.is_none());
        let blank = Fixed("   ", Duration::ZERO);
        assert!(transcribe_within(&blank, &silence(), Duration::from_secs(1)).await.is_none());
    }

    #[test]
    fn test_no_url_means_no_transcriber() {
        let cfg = TranscriptionConfig::default();
        assert!(create_transcriber(&cfg).unwrap().is_none());
    }
}
