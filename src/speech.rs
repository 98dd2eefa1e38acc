//! Translation and speech synthesis for the spoken synopsis.
//!
//! The final sentiment analysis is translated from English into the
//! configured speech language and then synthesized to MP3.
//!
//! | Capability | Implementation | Chunk limit |
//! |------------|----------------|-------------|
//! | [`Translator`] | [`MyMemoryTranslator`] (MyMemory API) | 500 bytes |
//! | [`SpeechSynthesizer`] | [`GoogleTts`] (Google Translate TTS) | 100 characters |
//!
//! Both services reject long inputs, so text is split on sentence boundaries
//! with [`chunk_text`] / [`chunk_text_chars`] and the pieces are sent in
//! order.

use crate::api::with_timeout;
use crate::error::PipelineError;
use crate::utils::{chunk_text, chunk_text_chars};
use async_trait::async_trait;
use serde::Deserialize;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, instrument};

pub const MYMEMORY_URL: &str = "https://api.mymemory.translated.net/get";
pub const GOOGLE_TTS_URL: &str = "https://translate.google.com/translate_tts";

const TRANSLATE_CHUNK: usize = 500;
const TTS_CHUNK: usize = 100;

/// Language the generated text is written in.
pub const SOURCE_LANGUAGE: &str = "en";

#[async_trait(?Send)]
pub trait Translator {
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, PipelineError>;
}

#[async_trait(?Send)]
pub trait SpeechSynthesizer {
    /// Synthesize `text` spoken in `language`, returning MP3 bytes.
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct MyMemoryResponse {
    #[serde(rename = "responseData")]
    response_data: MyMemoryData,
    /// Sometimes a number, sometimes a numeric string.
    #[serde(rename = "responseStatus")]
    response_status: serde_json::Value,
    #[serde(rename = "responseDetails", default)]
    response_details: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MyMemoryData {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Read the translated text out of a MyMemory response body.
pub fn parse_translation(body: &str) -> Result<String, PipelineError> {
    let parsed: MyMemoryResponse =
        serde_json::from_str(body).map_err(|e| PipelineError::SchemaViolation {
            what: "translation response",
            reason: e.to_string(),
        })?;
    let status = match &parsed.response_status {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    match status {
        Some(200) => Ok(parsed.response_data.translated_text),
        Some(code) => Err(PipelineError::upstream(
            "translation",
            format!("status {code}: {}", parsed.response_details),
            code == 429 || code >= 500,
        )),
        None => Err(PipelineError::SchemaViolation {
            what: "translation response",
            reason: format!("unexpected responseStatus {}", parsed.response_status),
        }),
    }
}

/// [`Translator`] backed by the free MyMemory API.
#[derive(Debug, Clone)]
pub struct MyMemoryTranslator {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl MyMemoryTranslator {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: MYMEMORY_URL.to_string(),
            timeout,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn translate_chunk(&self, chunk: &str, target_language: &str) -> Result<String, PipelineError> {
        let url = format!(
            "{}?q={}&langpair={}",
            self.endpoint,
            urlencoding::encode(chunk),
            urlencoding::encode(&format!("{SOURCE_LANGUAGE}|{target_language}"))
        );
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("translation", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status("translation", status));
        }
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::from_reqwest("translation", e))?;
        parse_translation(&body)
    }
}

#[async_trait(?Send)]
impl Translator for MyMemoryTranslator {
    #[instrument(level = "info", skip(self, text), fields(text_bytes = text.len()))]
    async fn translate(&self, text: &str, target_language: &str) -> Result<String, PipelineError> {
        let mut translated = Vec::new();
        for chunk in chunk_text(text, TRANSLATE_CHUNK) {
            let piece =
                with_timeout("translation", self.timeout, self.translate_chunk(&chunk, target_language)).await?;
            translated.push(piece);
        }
        info!(chunks = translated.len(), "Translated text");
        Ok(translated.join(" "))
    }
}

/// [`SpeechSynthesizer`] backed by the Google Translate TTS endpoint.
#[derive(Debug, Clone)]
pub struct GoogleTts {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl GoogleTts {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: GOOGLE_TTS_URL.to_string(),
            timeout,
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn chunk_url(&self, chunk: &str, language: &str, idx: usize, total: usize) -> String {
        format!(
            "{}?ie=UTF-8&q={}&tl={}&total={total}&idx={idx}&textlen={}&client=tw-ob",
            self.endpoint,
            urlencoding::encode(chunk),
            urlencoding::encode(language),
            chunk.chars().count()
        )
    }

    async fn synthesize_chunk(&self, url: String) -> Result<Vec<u8>, PipelineError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::from_reqwest("speech", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status("speech", status));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::from_reqwest("speech", e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait(?Send)]
impl SpeechSynthesizer for GoogleTts {
    #[instrument(level = "info", skip(self, text), fields(text_bytes = text.len()))]
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, PipelineError> {
        let chunks = chunk_text_chars(text, TTS_CHUNK);
        if chunks.is_empty() {
            return Err(PipelineError::InvalidRequest("nothing to synthesize".to_string()));
        }
        // MP3 segments are appended as-is.
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let url = self.chunk_url(chunk, language, idx, chunks.len());
            audio.extend(with_timeout("speech", self.timeout, self.synthesize_chunk(url)).await?);
        }
        info!(chunks = chunks.len(), audio_bytes = audio.len(), "Synthesized speech");
        Ok(audio)
    }
}

/// Translate-then-synthesize front end used by the server and the CLI.
#[derive(Clone)]
pub struct Speaker {
    translator: Rc<dyn Translator>,
    synthesizer: Rc<dyn SpeechSynthesizer>,
    default_language: String,
}

impl Speaker {
    pub fn new(
        translator: Rc<dyn Translator>,
        synthesizer: Rc<dyn SpeechSynthesizer>,
        default_language: String,
    ) -> Self {
        Self {
            translator,
            synthesizer,
            default_language,
        }
    }

    /// Speak English `text` in `language` (or the configured default) as MP3.
    #[instrument(level = "info", skip(self, text))]
    pub async fn speak(&self, text: &str, language: Option<&str>) -> Result<Vec<u8>, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("text must not be empty".to_string()));
        }
        let language = language.unwrap_or(self.default_language.as_str());
        let spoken = if language == SOURCE_LANGUAGE {
            text.to_string()
        } else {
            self.translator.translate(text, language).await?
        };
        self.synthesizer.synthesize(&spoken, language).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    #[test]
    fn test_parse_translation_ok() {
        let body = r#"{"responseData": {"translatedText": "नमस्ते", "match": 1}, "responseStatus": 200}"#;
        assert_eq!(parse_translation(body).unwrap(), "नमस्ते");
    }

    #[test]
    fn test_parse_translation_string_status() {
        let body = r#"{"responseData": {"translatedText": "x"}, "responseStatus": "200"}"#;
        assert_eq!(parse_translation(body).unwrap(), "x");
    }

    #[test]
    fn test_parse_translation_quota_is_retryable() {
        let body = r#"{"responseData": {"translatedText": "MYMEMORY WARNING"}, "responseStatus": 429,
                       "responseDetails": "daily limit"}"#;
        let err = parse_translation(body).unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert!(err.retryable());
    }

    #[test]
    fn test_tts_chunk_url() {
        let tts = GoogleTts::new(reqwest::Client::new(), Duration::from_secs(5));
        let url = tts.chunk_url("Hello world.", "hi", 0, 2);
        assert_eq!(
            url,
            "https://translate.google.com/translate_tts?ie=UTF-8&q=Hello%20world.&tl=hi&total=2&idx=0&textlen=12&client=tw-ob"
        );
    }

    struct Upper;

    #[async_trait(?Send)]
    impl Translator for Upper {
        async fn translate(&self, text: &str, _target: &str) -> Result<String, PipelineError> {
            Ok(text.to_uppercase())
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(String, String)>>,
    }

    #[async_trait(?Send)]
    impl SpeechSynthesizer for Recorder {
        async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>, PipelineError> {
            self.calls.borrow_mut().push((text.to_string(), language.to_string()));
            Ok(vec![0xFF, 0xFB])
        }
    }

    #[tokio::test]
    async fn test_speak_translates_to_default_language() {
        let recorder = Rc::new(Recorder::default());
        let speaker = Speaker::new(Rc::new(Upper), recorder.clone(), "hi".to_string());

        let audio = speaker.speak("mostly positive", None).await.unwrap();
        assert_eq!(audio, vec![0xFF, 0xFB]);
        assert_eq!(
            recorder.calls.borrow().as_slice(),
            &[("MOSTLY POSITIVE".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_speak_english_skips_translation() {
        let recorder = Rc::new(Recorder::default());
        let speaker = Speaker::new(Rc::new(Upper), recorder.clone(), "hi".to_string());

        speaker.speak("mostly positive", Some("en")).await.unwrap();
        assert_eq!(recorder.calls.borrow()[0].0, "mostly positive");
    }

    #[tokio::test]
    async fn test_speak_rejects_blank_text() {
        let speaker = Speaker::new(Rc::new(Upper), Rc::new(Recorder::default()), "hi".to_string());
        let err = speaker.speak("  ", None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    /// Serve `replies` in order on a local port, one request each, and
    /// return the base URL plus a handle yielding the request URLs seen.
    fn serve_replies(
        replies: Vec<(u16, Vec<u8>)>,
    ) -> (String, std::thread::JoinHandle<Vec<String>>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = std::thread::spawn(move || {
            let mut seen = Vec::new();
            for (status, body) in replies {
                let request = server.recv().unwrap();
                seen.push(request.url().to_string());
                request
                    .respond(tiny_http::Response::from_data(body).with_status_code(status))
                    .unwrap();
            }
            seen
        });
        (format!("http://{addr}/endpoint"), handle)
    }

    fn translation_body(text: &str, status: u16) -> Vec<u8> {
        serde_json::json!({"responseData": {"translatedText": text}, "responseStatus": status})
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_translate_joins_chunks_in_order() {
        let first = format!("{}.", "a".repeat(300));
        let second = format!("{}.", "b".repeat(300));
        let (endpoint, handle) = serve_replies(vec![
            (200, translation_body("पहला", 200)),
            (200, translation_body("दूसरा", 200)),
        ]);
        let translator =
            MyMemoryTranslator::new(reqwest::Client::new(), Duration::from_secs(5)).with_endpoint(endpoint);

        let translated = translator.translate(&format!("{first} {second}"), "hi").await.unwrap();

        assert_eq!(translated, "पहला दूसरा");
        let seen = handle.join().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].contains("aaa") && seen[1].contains("bbb"));
        assert!(seen[0].ends_with("langpair=en%7Chi"));
    }

    #[tokio::test]
    async fn test_translate_quota_status_is_retryable() {
        let (endpoint, _handle) = serve_replies(vec![(200, translation_body("MYMEMORY WARNING", 429))]);
        let translator =
            MyMemoryTranslator::new(reqwest::Client::new(), Duration::from_secs(5)).with_endpoint(endpoint);

        let err = translator.translate("Hello.", "hi").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert!(err.retryable());
    }

    #[tokio::test]
    async fn test_synthesize_concatenates_segments_in_order() {
        let text = format!("{}. {}.", "a".repeat(80), "b".repeat(80));
        let (endpoint, handle) = serve_replies(vec![(200, vec![1, 2]), (200, vec![3, 4])]);
        let tts = GoogleTts::new(reqwest::Client::new(), Duration::from_secs(5)).with_endpoint(endpoint);

        let audio = tts.synthesize(&text, "hi").await.unwrap();

        assert_eq!(audio, vec![1, 2, 3, 4]);
        let seen = handle.join().unwrap();
        assert!(seen[0].contains("&total=2&idx=0&"));
        assert!(seen[1].contains("&total=2&idx=1&"));
    }

    #[tokio::test]
    async fn test_synthesize_server_error_is_retryable() {
        let (endpoint, _handle) = serve_replies(vec![(503, b"busy".to_vec())]);
        let tts = GoogleTts::new(reqwest::Client::new(), Duration::from_secs(5)).with_endpoint(endpoint);

        let err = tts.synthesize("Hello.", "hi").await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert!(err.retryable());
    }
}
