//! OpenAI-compatible chat-completions client with streaming support.
//!
//! Provides robust oracle API communication with:
//! - Streaming responses (no total timeout, activity-based timeout)
//! - Non-streaming fallback for endpoints that ignore `stream`
//! - Connection health checks
//! - Per-model token accounting written to `token_usage.json`
//!
//! Requests are sent through `curl`; the body is piped on stdin so large
//! multi-image prompts do not hit argument length limits.

use base64::Engine;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Oracle, OracleError, OracleResult, parse_json_reply};
use crate::config::OracleSettings;

/// Images are scaled down to this height before upload
const MAX_IMAGE_HEIGHT: u32 = 512;

const JPEG_QUALITY: u8 = 80;

/// Token counters for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    fn from_json(usage: &serde_json::Value) -> Option<Self> {
        if !usage.is_object() {
            return None;
        }
        Some(Self {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        })
    }

    fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Oracle backed by a chat-completions endpoint
#[derive(Debug)]
pub struct ChatClient {
    settings: OracleSettings,
    temperature: f32,
    usage: Mutex<BTreeMap<String, TokenUsage>>,
}

impl ChatClient {
    pub fn new(settings: OracleSettings) -> Self {
        Self {
            settings,
            temperature: 0.5,
            usage: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    /// Snapshot of accumulated token usage per model
    pub fn usage(&self) -> BTreeMap<String, TokenUsage> {
        match self.usage.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Write accumulated token usage as pretty JSON
    pub fn write_usage(&self, path: &Path) -> OracleResult<()> {
        let json = serde_json::to_string_pretty(&self.usage())
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    fn record_usage(&self, model: &str, usage: TokenUsage) {
        let mut guard = match self.usage.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(model.to_string()).or_default().add(usage);
    }

    /// Send one user message and return the reply text
    fn chat(
        &self,
        model: &str,
        content: serde_json::Value,
        temperature: f32,
    ) -> OracleResult<String> {
        let mut request = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": self.settings.max_tokens,
            "temperature": temperature,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        let body = serde_json::to_string(&request)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

        let started = Instant::now();
        let (reply, usage) = match self.stream(&body)? {
            Some(result) => result,
            None => {
                debug!(model, "stream produced no content, retrying without streaming");
                if let Some(obj) = request.as_object_mut() {
                    obj.remove("stream");
                    obj.remove("stream_options");
                }
                let body = serde_json::to_string(&request)
                    .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
                self.non_streaming(&body)?
            }
        };

        if let Some(usage) = usage {
            self.record_usage(model, usage);
        }
        debug!(
            model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = usage.map(|u| u.prompt_tokens).unwrap_or(0),
            completion_tokens = usage.map(|u| u.completion_tokens).unwrap_or(0),
            "oracle reply received"
        );
        Ok(reply)
    }

    fn curl(&self, streaming: bool) -> Command {
        let mut cmd = Command::new("curl");
        cmd.args(["-s", "-X", "POST", &self.settings.endpoint]);
        if streaming {
            cmd.arg("-N");
        }
        cmd.args(["-H", "Content-Type: application/json"]);
        if let Some(key) = &self.settings.api_key {
            cmd.args(["-H", &format!("Authorization: Bearer {}", key)]);
        }
        cmd.args([
            "--data-binary",
            "@-",
            "--connect-timeout",
            &self.settings.connect_timeout.to_string(),
        ]);
        cmd
    }

    /// Streaming request with activity timeout; `None` if nothing streamed
    fn stream(&self, body: &str) -> OracleResult<Option<(String, Option<TokenUsage>)>> {
        let mut child = self
            .curl(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes())?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Io(std::io::Error::other("Failed to capture stdout")))?;

        // Read streaming response with activity timeout
        let (tx, rx) = mpsc::channel();
        let activity_timeout = Duration::from_secs(self.settings.activity_timeout);

        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let mut full_content = String::new();
        let mut usage = None;
        let mut last_activity = Instant::now();

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(line)) => {
                    last_activity = Instant::now();
                    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        break;
                    }
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                            full_content.push_str(content);
                        }
                        if let Some(u) = TokenUsage::from_json(&json["usage"]) {
                            usage = Some(u);
                        }
                    }
                }
                Ok(Err(e)) => {
                    return Err(OracleError::Io(e));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() > activity_timeout {
                        abort(&mut child);
                        return Err(OracleError::ActivityTimeout(activity_timeout));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        let status = child.wait()?;
        if !status.success() && full_content.is_empty() {
            return Err(OracleError::ConnectionFailed(format!(
                "curl exited with {}",
                status
            )));
        }
        if full_content.is_empty() {
            return Ok(None);
        }
        Ok(Some((full_content, usage)))
    }

    /// Fallback non-streaming request (for APIs that don't support streaming)
    fn non_streaming(&self, body: &str) -> OracleResult<(String, Option<TokenUsage>)> {
        let mut child = self
            .curl(false)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            return Err(OracleError::ConnectionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ));
        }

        let response: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;
        if let Some(message) = response["error"]["message"].as_str() {
            return Err(OracleError::InvalidResponse(message.to_string()));
        }

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| OracleError::InvalidResponse("empty reply".to_string()))?;
        Ok((content.to_string(), TokenUsage::from_json(&response["usage"])))
    }
}

impl Oracle for ChatClient {
    fn rank(&self, prompt: &str, images: &[RgbImage]) -> OracleResult<String> {
        if images.is_empty() {
            debug!(model = %self.settings.text_model, "oracle text request");
            return self.chat(&self.settings.text_model, serde_json::json!(prompt), self.temperature);
        }

        let mut content = vec![serde_json::json!({"type": "text", "text": prompt})];
        for image in images {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": image_data_url(image)?},
            }));
        }
        debug!(model = %self.settings.image_model, images = images.len(), "oracle image request");
        self.chat(
            &self.settings.image_model,
            serde_json::Value::Array(content),
            self.temperature,
        )
    }

    fn extract(&self, text: &str, schema: &str) -> OracleResult<serde_json::Value> {
        let prompt = crate::prompt::extraction(text, schema);
        let reply = self.chat(&self.settings.format_model, serde_json::json!(prompt), 0.0)?;
        parse_json_reply(&reply).inspect_err(|e| {
            warn!(error = %e, "structured extraction failed");
        })
    }
}

/// Downscale to `MAX_IMAGE_HEIGHT` and encode as a JPEG data URL
/// Kill a stalled request and reap it
fn abort(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "curl already exited");
    }
    if let Err(e) = child.wait() {
        warn!(error = %e, "could not reap curl");
    }
}

pub fn image_data_url(image: &RgbImage) -> OracleResult<String> {
    let resized;
    let image = if image.height() > MAX_IMAGE_HEIGHT {
        let width = (image.width() as u64 * MAX_IMAGE_HEIGHT as u64 / image.height() as u64).max(1) as u32;
        resized = imageops::resize(image, width, MAX_IMAGE_HEIGHT, FilterType::Lanczos3);
        &resized
    } else {
        image
    };

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).encode(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgb8,
    )?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:image/jpeg;base64,{}", encoded))
}

/// Check if the oracle endpoint is reachable (connection-only check).
///
/// Any HTTP status counts as reachable; `000` means the connection failed.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> OracleResult<bool> {
    let url = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");
    let scheme = if endpoint.starts_with("https://") { "https" } else { "http" };

    let output = Command::new("curl")
        .args([
            "-s",
            "-o",
            "/dev/null",
            "-w",
            "%{http_code}",
            "--connect-timeout",
            &timeout_secs.to_string(),
            "--max-time",
            &timeout_secs.to_string(),
            "-I",
            &format!("{}://{}", scheme, host_port),
        ])
        .output()?;

    let status = String::from_utf8_lossy(&output.stdout);
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}
