//! Zero-shot classification through a long-lived helper process.
//!
//! The helper reads one JSON request per line on stdin and answers with one
//! JSON line on stdout:
//!
//! ```text
//! -> {"type":"ping"}                      <- {"type":"pong","status":"ready"}
//! -> {"type":"classify","text":..,
//!     "labels":[topic,"not topic"],
//!     "multi_label":false}                <- {"type":"classification","labels":[..],"scores":[..]}
//! -> {"type":"shutdown"}                  <- {"type":"shutdown","status":"acknowledged"}
//! ```
//!
//! On start it announces itself with `{"type":"initialized"}`, or with
//! `{"type":"error"}` before exiting if the model could not load.

use std::{path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};

use super::{Classification, Classifier};
use crate::error::{ClassificationError, ModelError};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const MAX_MODEL_INPUT_CHARS: usize = 2_000;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ModelResponse {
    Initialized {
        #[serde(default)]
        model: Option<String>,
    },
    Pong,
    Classification {
        labels: Vec<String>,
        #[serde(default)]
        scores: Vec<f64>,
    },
    Error {
        error: String,
    },
    Shutdown,
}

struct ModelProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl ModelProcess {
    async fn send(&mut self, request: serde_json::Value) -> Result<(), ModelError> {
        let mut line = request.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| ModelError::Inference(format!("failed to write request: {err}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|err| ModelError::Inference(format!("failed to flush request: {err}")))
    }

    /// `Ok(None)` when the helper closed its stdout.
    async fn receive(&mut self) -> Result<Option<ModelResponse>, ModelError> {
        let line = self
            .lines
            .next_line()
            .await
            .map_err(|err| ModelError::Inference(format!("failed to read response: {err}")))?;
        match line {
            Some(line) => serde_json::from_str(&line)
                .map(Some)
                .map_err(|err| ModelError::Inference(format!("malformed response '{line}': {err}"))),
            None => Ok(None),
        }
    }
}

pub struct ZeroShotClassifier {
    command: String,
    args: Vec<String>,
    topic: String,
    model: Option<String>,
    process: Mutex<Option<ModelProcess>>,
}

impl ZeroShotClassifier {
    pub fn new(command: String, args: Vec<String>, topic: String, model: Option<String>) -> Self {
        Self {
            command,
            args,
            topic,
            model,
            process: Mutex::new(None),
        }
    }

    fn labels(&self) -> [String; 2] {
        [self.topic.clone(), format!("not {}", self.topic)]
    }

    async fn spawn(&self) -> Result<ModelProcess, ModelError> {
        if let Some(script) = self.args.iter().find(|arg| arg.ends_with(".py")) {
            if !Path::new(script).exists() {
                return Err(ModelError::NotFound(script.clone()));
            }
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(model) = &self.model {
            command.env("HUGGINGFACE_MODEL", model);
        }

        let mut child = command.spawn().map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ModelError::NotFound(self.command.clone()),
            _ => ModelError::Initialization(format!("failed to start '{}': {err}", self.command)),
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ModelError::Initialization("helper pipes unavailable".into()));
        };
        let mut process = ModelProcess {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        };

        match process.receive().await {
            Ok(Some(ModelResponse::Initialized { model })) => {
                log_info!(
                    "zero-shot model ready: {}",
                    model.as_deref().unwrap_or("(unnamed)")
                );
            }
            Ok(Some(ModelResponse::Error { error })) => return Err(ModelError::Initialization(error)),
            Ok(Some(other)) => {
                return Err(ModelError::Initialization(format!(
                    "unexpected greeting {other:?}"
                )))
            }
            Ok(None) => {
                return Err(ModelError::Initialization(
                    "helper exited before it was ready".into(),
                ))
            }
            Err(err) => return Err(ModelError::Initialization(err.to_string())),
        }

        process.send(json!({ "type": "ping" })).await?;
        match process.receive().await? {
            Some(ModelResponse::Pong) => Ok(process),
            other => Err(ModelError::Initialization(format!(
                "helper did not answer ping: {other:?}"
            ))),
        }
    }

    async fn classify_with(
        &self,
        process: &mut ModelProcess,
        text: &str,
    ) -> Result<Classification, ModelError> {
        let text: String = text.chars().take(MAX_MODEL_INPUT_CHARS).collect();
        process
            .send(json!({
                "type": "classify",
                "text": text,
                "labels": self.labels(),
                "multi_label": false,
            }))
            .await?;

        match process.receive().await? {
            Some(ModelResponse::Classification { labels, scores }) => {
                let top = labels.first().map(String::as_str);
                log::debug!("zero-shot labels {labels:?} scores {scores:?}");
                Ok(if top == Some(self.topic.as_str()) {
                    Classification::studying(self.topic.clone())
                } else {
                    Classification::idle()
                })
            }
            Some(ModelResponse::Error { error }) => Err(ModelError::Inference(error)),
            Some(other) => Err(ModelError::Inference(format!("unexpected response {other:?}"))),
            None => Err(ModelError::Inference("helper process exited".into())),
        }
    }
}

#[async_trait]
impl Classifier for ZeroShotClassifier {
    async fn init(&self) -> Result<(), ClassificationError> {
        let mut guard = self.process.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let process = self
            .spawn()
            .await
            .map_err(|err| ClassificationError::from_model("initialize zero-shot model", err))?;
        *guard = Some(process);
        Ok(())
    }

    async fn classify(&self, text: &str) -> Result<Classification, ClassificationError> {
        let mut guard = self.process.lock().await;
        if guard.is_none() {
            let process = self
                .spawn()
                .await
                .map_err(|err| ClassificationError::from_model("start zero-shot model", err))?;
            *guard = Some(process);
        }
        let Some(process) = guard.as_mut() else {
            return Err(ClassificationError::Failed("model process missing".into()));
        };

        match self.classify_with(process, text).await {
            Ok(result) => Ok(result),
            Err(err) => {
                // A helper that stopped answering is respawned on the next call.
                if matches!(&err, ModelError::Inference(msg) if msg.contains("exited")) {
                    *guard = None;
                }
                Err(ClassificationError::from_model(
                    format!("zero-shot classify ({} chars)", text.len()),
                    err,
                ))
            }
        }
    }

    async fn dispose(&self) {
        let Some(mut process) = self.process.lock().await.take() else {
            return;
        };
        if let Err(err) = process.send(json!({ "type": "shutdown" })).await {
            log_warn!("could not ask zero-shot helper to shut down: {err}");
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, process.child.wait()).await {
            Ok(Ok(status)) => log_info!("zero-shot helper exited with {status}"),
            _ => {
                log_warn!("zero-shot helper did not exit in time, killing it");
                let _ = process.child.kill().await;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::Mode;

    const FAKE_HELPER: &str = r#"
echo '{"type":"initialized","model":"fake-mnli","status":"success"}'
while read -r line; do
  case "$line" in
    *'"type":"ping"'*) echo '{"type":"pong","status":"ready"}' ;;
    *'"type":"shutdown"'*) echo '{"type":"shutdown","status":"acknowledged"}'; exit 0 ;;
    *lecture*) echo '{"type":"classification","labels":["studying","not studying"],"scores":[0.91,0.09]}' ;;
    *boom*) echo '{"type":"error","error":"Classification failed: boom"}' ;;
    *) echo '{"type":"classification","labels":["not studying","studying"],"scores":[0.8,0.2]}' ;;
  esac
done
"#;

    fn fake() -> ZeroShotClassifier {
        ZeroShotClassifier::new(
            "sh".into(),
            vec!["-c".into(), FAKE_HELPER.into()],
            "studying".into(),
            None,
        )
    }

    #[tokio::test]
    async fn test_classifies_through_helper() {
        let classifier = fake();
        classifier.init().await.unwrap();

        let studying = classifier.classify("lecture notes on graphs").await.unwrap();
        assert_eq!(studying, Classification::studying("studying"));

        let idle = classifier.classify("cat videos").await.unwrap();
        assert_eq!(idle.mode, Mode::Idle);

        classifier.dispose().await;
    }

    #[tokio::test]
    async fn test_error_response_is_inference_error() {
        let classifier = fake();
        let err = classifier.classify("boom").await.unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::Model {
                source: ModelError::Inference(_),
                ..
            }
        ));
        assert!(!err.is_model_not_found());
        classifier.dispose().await;
    }

    #[tokio::test]
    async fn test_missing_script_is_model_not_found() {
        let classifier = ZeroShotClassifier::new(
            "python3".into(),
            vec!["/definitely/missing/classifier.py".into()],
            "studying".into(),
            None,
        );
        assert!(classifier.init().await.unwrap_err().is_model_not_found());
    }

    #[tokio::test]
    async fn test_failed_startup_is_initialization_error() {
        let classifier = ZeroShotClassifier::new(
            "sh".into(),
            vec![
                "-c".into(),
                r#"echo '{"type":"error","error":"Failed to initialize model: no weights"}'"#.into(),
            ],
            "studying".into(),
            None,
        );
        let err = classifier.init().await.unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::Model {
                source: ModelError::Initialization(ref msg),
                ..
            } if msg.contains("no weights")
        ));
    }
}
