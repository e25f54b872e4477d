//! Per-`TaskKind` handlers invoked by the Agent Manager's worker tasks.
//! Separated from `agent_manager.rs` so the dispatch loop stays focused on
//! scheduling, not on what a task actually does.

use std::path::Path;

use curator_inference::InferenceClient;
use curator_inference::InferenceErr;
use curator_inference::InferenceOptions;
use curator_inference::ResponseFormat as WireResponseFormat;
use curator_protocol::AnalysisType;
use curator_protocol::BatchStrategy;
use curator_protocol::ResponseFormat;
use curator_protocol::Task;
use curator_protocol::TaskKind;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerErr {
    #[error("{0} is not readable as text (binary content detected)")]
    BinaryFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Inference(#[from] InferenceErr),
}

impl HandlerErr {
    /// Only a transient inference failure is retryable; a binary file or an
    /// I/O error will fail identically on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerErr::Inference(e) if e.is_retryable())
    }
}

pub async fn run_task(
    inference: &InferenceClient,
    task: &Task,
    max_content_bytes: usize,
) -> Result<Value, HandlerErr> {
    match &task.kind {
        TaskKind::FileAnalysis {
            file_path,
            analysis_type,
            model,
            expected_response_format,
        } => {
            run_file_analysis(
                inference,
                file_path,
                analysis_type,
                model,
                *expected_response_format,
                max_content_bytes,
            )
            .await
        }
        TaskKind::BatchProcessing {
            file_paths,
            model,
            analysis_type,
            strategy,
            batch_size,
        } => {
            run_batch_processing(
                inference,
                file_paths,
                model,
                analysis_type,
                *strategy,
                *batch_size,
                max_content_bytes,
            )
            .await
        }
        TaskKind::HealthCheck => Ok(serde_json::json!({ "status": "ok" })),
    }
}

/// Bounded head-read of a file: read up to `max_content_bytes`, then sniff
/// the first 8 KiB for a null byte to reject binary files before they ever
/// reach the prompt.
fn read_bounded_text(path: &Path, max_content_bytes: usize) -> Result<String, HandlerErr> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; max_content_bytes];
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    buf.truncate(total);

    let sniff_len = total.min(8192);
    if buf[..sniff_len].contains(&0u8) {
        return Err(HandlerErr::BinaryFile(path.display().to_string()));
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn prompt_for(analysis_type: &AnalysisType, content: &str) -> String {
    match analysis_type {
        AnalysisType::Classification => {
            format!("Classify the following file content into a single category.\n\n{content}")
        }
        AnalysisType::Summary => format!("Summarize the following file content.\n\n{content}"),
        AnalysisType::Extraction => format!(
            "Extract the key structured facts from the following file content.\n\n{content}"
        ),
        AnalysisType::Custom { template } => template.replace("{{content}}", content),
    }
}

fn shape_response(format: ResponseFormat, raw: &str) -> Value {
    match format {
        ResponseFormat::Json => {
            serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "text": raw }))
        }
        ResponseFormat::Text => serde_json::json!({ "text": raw }),
    }
}

async fn run_file_analysis(
    inference: &InferenceClient,
    file_path: &str,
    analysis_type: &AnalysisType,
    model: &str,
    expected_response_format: ResponseFormat,
    max_content_bytes: usize,
) -> Result<Value, HandlerErr> {
    let content = read_bounded_text(Path::new(file_path), max_content_bytes)?;
    let prompt = prompt_for(analysis_type, &content);
    let wire_format = match expected_response_format {
        ResponseFormat::Json => Some(WireResponseFormat::Json),
        ResponseFormat::Text => None,
    };
    let outcome = inference
        .run_inference(
            model,
            &prompt,
            &InferenceOptions {
                format: wire_format,
                ..Default::default()
            },
        )
        .await?;
    Ok(shape_response(expected_response_format, &outcome.response))
}

/// Pause between consecutive sequential batch slices, long enough to let the
/// host breathe between inference calls without meaningfully slowing a run.
const INTER_BATCH_PAUSE: std::time::Duration = std::time::Duration::from_millis(50);

/// `BatchProcessing`: sequential (explicit `batch_size` slices with a short
/// pause between slices) or bounded-parallel (fan out, capped at
/// `min(batch_size, 3)` concurrent calls). A per-file failure
/// is recorded individually rather than failing the whole batch; the batch
/// succeeds overall iff at least one file succeeded.
async fn run_batch_processing(
    inference: &InferenceClient,
    file_paths: &[String],
    model: &str,
    analysis_type: &AnalysisType,
    strategy: BatchStrategy,
    batch_size: usize,
    max_content_bytes: usize,
) -> Result<Value, HandlerErr> {
    let format = ResponseFormat::Json;

    let results: Vec<(String, Result<Value, HandlerErr>)> = match strategy {
        BatchStrategy::Sequential => {
            let slice_len = batch_size.max(1);
            let mut out = Vec::with_capacity(file_paths.len());
            for (slice_index, slice) in file_paths.chunks(slice_len).enumerate() {
                if slice_index > 0 {
                    tokio::time::sleep(INTER_BATCH_PAUSE).await;
                }
                for path in slice {
                    let r = run_file_analysis(
                        inference,
                        path,
                        analysis_type,
                        model,
                        format,
                        max_content_bytes,
                    )
                    .await;
                    out.push((path.clone(), r));
                }
            }
            out
        }
        BatchStrategy::BoundedParallel => {
            let concurrency = batch_size.clamp(1, 3);
            let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(concurrency));
            let futures = file_paths.iter().map(|path| {
                let semaphore = std::sync::Arc::clone(&semaphore);
                let path = path.clone();
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (
                                path,
                                Err(HandlerErr::Io(std::io::Error::other(
                                    "batch concurrency limiter closed unexpectedly",
                                ))),
                            );
                        }
                    };
                    let r = run_file_analysis(
                        inference,
                        &path,
                        analysis_type,
                        model,
                        format,
                        max_content_bytes,
                    )
                    .await;
                    (path, r)
                }
            });
            futures::future::join_all(futures).await
        }
    };

    let succeeded = results.iter().filter(|(_, r)| r.is_ok()).count();
    let items: Vec<Value> = results
        .into_iter()
        .map(|(path, r)| match r {
            Ok(value) => serde_json::json!({ "file_path": path, "success": true, "result": value }),
            Err(err) => {
                serde_json::json!({ "file_path": path, "success": false, "error": err.to_string() })
            }
        })
        .collect();

    if succeeded == 0 {
        return Err(HandlerErr::Inference(InferenceErr::Permanent(
            "batch processing: every file failed".to_string(),
        )));
    }

    Ok(serde_json::json!({ "items": items, "succeeded": succeeded, "total": items.len() }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn binary_content_is_rejected_before_reaching_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.bin");
        std::fs::write(&path, [0x00u8, 0x01, 0x02, 0xff]).unwrap();
        let err = read_bounded_text(&path, 1024).unwrap_err();
        assert!(matches!(err, HandlerErr::BinaryFile(_)));
    }

    #[test]
    fn text_content_within_the_cap_is_read_in_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello world").unwrap();
        let content = read_bounded_text(&path, 1024).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn content_past_the_cap_is_truncated_not_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "a".repeat(100)).unwrap();
        let content = read_bounded_text(&path, 10).unwrap();
        assert_eq!(content.len(), 10);
    }

    #[tokio::test]
    async fn sequential_batch_processes_every_file_across_multiple_slices() {
        use wiremock::Mock;
        use wiremock::MockServer;
        use wiremock::ResponseTemplate;
        use wiremock::matchers::method;
        use wiremock::matchers::path;

        let dir = tempfile::tempdir().unwrap();
        let mut file_paths = Vec::new();
        for i in 0..5 {
            let p = dir.path().join(format!("f{i}.txt"));
            std::fs::write(&p, format!("content {i}")).unwrap();
            file_paths.push(p.display().to_string());
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "ok",
                "done": true,
            })))
            .mount(&server)
            .await;

        let inference = InferenceClient::new(server.uri());
        let result = run_batch_processing(
            &inference,
            &file_paths,
            "some-model",
            &AnalysisType::Summary,
            BatchStrategy::Sequential,
            2,
            1024,
        )
        .await
        .unwrap();

        assert_eq!(result["succeeded"], 5);
        assert_eq!(result["total"], 5);
    }
}
