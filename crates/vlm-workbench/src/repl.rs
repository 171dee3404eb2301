//! Line-oriented terminal front-end.
//!
//! Stdin commands and session completions are multiplexed on one task:
//!
//! ```text
//!  stdin lines ──► parse_command ──► Repl::execute ──► SessionDriver op
//!                                                          │ spawn
//!  driver.next_event() ◄───────────── request tasks ◄──────┘
//!        │
//!        └──► driver.apply ──► render_snapshot
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use vlm_session::{
    FeedbackActionKey, FeedbackStatus, ModelIdentity, ModelRun, SessionDriver, SessionError,
    TransitionRecord, WorkbenchSnapshot,
};

use crate::health::HealthMonitor;
use crate::http::HttpBackend;

pub const HELP: &str = "\
commands:
  image <path>         load an image (resets results)
  prompt <text>        set the analysis prompt
  run                  run teacher and student on the current input
  pass <model>         label a model's response as pass
  fail <model>         label a model's response as fail
  prefer <model|none>  select the preferred response
  rationale [text]     set or clear the preference rationale
  submit               submit the preference
  ask <text>           single-model question about the image
  status               show the workbench
  health               show the last backend health probe
  stats                show backend engine statistics
  history              show recent state transitions
  clear                unload the image
  help                 show this text
  quit                 exit
models: teacher (t), student (s)";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Image(PathBuf),
    Prompt(String),
    Run,
    Label { model: ModelIdentity, is_pass: bool },
    Prefer(Option<ModelIdentity>),
    Rationale(String),
    Submit,
    Ask(String),
    Status,
    Health,
    Stats,
    History,
    Clear,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("unbalanced quotes")]
    Unbalanced,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("unknown model '{0}' (expected teacher or student)")]
    UnknownModel(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let words = shlex::split(line).ok_or(CommandError::Unbalanced)?;
    let Some((head, args)) = words.split_first() else {
        return Ok(None);
    };
    let rest = args.join(" ");

    let command = match head.to_ascii_lowercase().as_str() {
        "image" | "img" => Command::Image(PathBuf::from(required("image", &rest)?)),
        "prompt" => Command::Prompt(required("prompt", &rest)?),
        "run" | "compare" => Command::Run,
        "pass" => Command::Label {
            model: model_arg("pass", &rest)?,
            is_pass: true,
        },
        "fail" => Command::Label {
            model: model_arg("fail", &rest)?,
            is_pass: false,
        },
        "prefer" => match rest.trim().to_ascii_lowercase().as_str() {
            "none" | "-" => Command::Prefer(None),
            _ => Command::Prefer(Some(model_arg("prefer", &rest)?)),
        },
        "rationale" | "why" => Command::Rationale(rest),
        "submit" => Command::Submit,
        "ask" => Command::Ask(required("ask", &rest)?),
        "status" | "s" => Command::Status,
        "health" => Command::Health,
        "stats" => Command::Stats,
        "history" => Command::History,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn required(command: &'static str, rest: &str) -> Result<String, CommandError> {
    if rest.trim().is_empty() {
        Err(CommandError::MissingArgument(command))
    } else {
        Ok(rest.to_string())
    }
}

fn model_arg(command: &'static str, rest: &str) -> Result<ModelIdentity, CommandError> {
    let raw = required(command, rest)?;
    raw.parse()
        .map_err(|_| CommandError::UnknownModel(raw.trim().to_string()))
}

// ── Rendering ────────────────────────────────────────────────────────────

pub fn render_snapshot(snap: &WorkbenchSnapshot) -> String {
    let mut out = String::new();
    match &snap.image {
        Some(image) => {
            let _ = writeln!(out, "image:  {} ({} bytes)", image.file_name, image.bytes);
        }
        None => out.push_str("image:  (none)\n"),
    }
    let _ = writeln!(out, "prompt: {}", snap.prompt);
    if snap.busy {
        out.push_str("running...\n");
    }
    if let Some(banner) = &snap.error_banner {
        let _ = writeln!(out, "error:  {banner}");
    }

    for model in ModelIdentity::ALL {
        render_panel(&mut out, snap, model);
    }

    if snap.teacher.is_succeeded() && snap.student.is_succeeded() {
        let winner = snap
            .selection
            .winner
            .map(|m| m.as_str())
            .unwrap_or("(none)");
        let _ = write!(out, "preference: {winner}");
        if let Some(rationale) = &snap.selection.rationale {
            let _ = write!(out, " \"{rationale}\"");
        }
        if let Some(status) = snap.feedback_status(FeedbackActionKey::Preference) {
            let _ = write!(out, " [{}]", status_text(status));
        }
        let _ = writeln!(
            out,
            "{}",
            if snap.preference_enabled {
                " (submit enabled)"
            } else {
                ""
            }
        );
    }
    out
}

fn render_panel(out: &mut String, snap: &WorkbenchSnapshot, model: ModelIdentity) {
    let run = snap.run(model);
    let _ = writeln!(out, "── {model} {}", "─".repeat(40));
    match run {
        ModelRun::Idle => out.push_str("  (no result)\n"),
        ModelRun::Pending => out.push_str("  waiting...\n"),
        ModelRun::Succeeded { response, latency } => {
            let _ = writeln!(out, "  latency: {latency:.2}s");
            for line in response.lines() {
                let _ = writeln!(out, "  {line}");
            }
        }
        ModelRun::Failed { error } => {
            let _ = writeln!(out, "  failed: {error}");
        }
    }
    let labels: Vec<String> = [true, false]
        .into_iter()
        .filter_map(|is_pass| {
            let key = FeedbackActionKey::label(model, is_pass);
            snap.feedback_status(key)
                .map(|status| format!("{}={}", if is_pass { "pass" } else { "fail" }, status_text(status)))
        })
        .collect();
    if !labels.is_empty() {
        let _ = writeln!(out, "  labels: {}", labels.join(" "));
    }
}

fn status_text(status: &FeedbackStatus) -> String {
    match status {
        FeedbackStatus::Pending => "saving".into(),
        FeedbackStatus::Success => "saved".into(),
        FeedbackStatus::Error { message } => format!("error: {message}"),
    }
}

pub fn render_history<'a>(records: impl Iterator<Item = &'a TransitionRecord>) -> String {
    let mut out = String::new();
    for record in records {
        let kind = serde_json::to_string(&record.kind).unwrap_or_default();
        let _ = writeln!(
            out,
            "{:>4} {} {kind}",
            record.seq,
            record.at.format("%H:%M:%S%.3f")
        );
    }
    out
}

// ── Loop ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    driver: SessionDriver,
    client: Arc<HttpBackend>,
    health: HealthMonitor,
}

impl Repl {
    pub fn new(driver: SessionDriver, client: Arc<HttpBackend>, health: HealthMonitor) -> Self {
        Self {
            driver,
            client,
            health,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}\n");
        println!("{}", render_snapshot(&self.driver.snapshot()));

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read stdin")? else {
                        break;
                    };
                    match parse_command(&line) {
                        Ok(None) => {}
                        Ok(Some(command)) => match self.execute(command).await {
                            Ok(Flow::Quit) => break,
                            Ok(Flow::Continue) => {}
                            Err(e) => println!("error: {e:#}"),
                        },
                        Err(e) => println!("{e}"),
                    }
                }
                Some(event) = self.driver.next_event() => {
                    if self.driver.apply(event) {
                        println!("{}", render_snapshot(&self.driver.snapshot()));
                    }
                }
            }
        }
        debug!("Leaving interactive session");
        Ok(())
    }

    pub async fn execute(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Image(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                let file_name = path
                    .file_name()
                    .and_then(|value| value.to_str())
                    .unwrap_or("image.png")
                    .to_string();
                self.driver.load_image(bytes, file_name);
                self.show();
            }
            Command::Prompt(text) => {
                self.driver.set_prompt(text);
                self.show();
            }
            Command::Run => {
                if self.driver.workbench().is_busy() {
                    return Err(SessionError::Busy.into());
                }
                self.driver.run_comparison()?;
                self.show();
            }
            Command::Label { model, is_pass } => {
                self.driver.submit_label(model, is_pass)?;
                self.show();
            }
            Command::Prefer(Some(model)) => {
                self.driver.select_winner(model)?;
                self.show();
            }
            Command::Prefer(None) => {
                self.driver.clear_winner();
                self.show();
            }
            Command::Rationale(text) => {
                self.driver.set_rationale(&text);
            }
            Command::Submit => {
                self.driver.submit_preference()?;
                self.show();
            }
            Command::Ask(question) => {
                let bundle = self.driver.workbench().bundle_with_prompt(&question)?;
                let client = Arc::clone(&self.client);
                tokio::spawn(async move {
                    match client.ask(&bundle).await {
                        Ok(answer) => println!("── answer {}\n{answer}", "─".repeat(40)),
                        Err(e) => {
                            warn!(kind = e.kind(), error = %e, "Inference request failed");
                            println!("ask failed: {e}");
                        }
                    }
                });
            }
            Command::Status => self.show(),
            Command::Health => match self.health.latest() {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("backend not reachable"),
            },
            Command::Stats => {
                let stats = self.client.stats().await?;
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Command::History => {
                print!(
                    "{}",
                    render_history(self.driver.workbench().history().records())
                );
            }
            Command::Clear => {
                self.driver.clear();
                self.show();
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn show(&self) {
        println!("{}", render_snapshot(&self.driver.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use vlm_session::{
        Backend, DpoFeedback, HealthStatus, ImageSummary, InferenceOutput, InputBundle,
        PreferenceSelection, RequestError, SessionOptions, SftFeedback,
    };

    use crate::config::WorkbenchConfig;

    /// Backend whose requests never complete, except `infer` when `answers`.
    #[derive(Default)]
    struct StalledBackend {
        answers: bool,
        infer_calls: AtomicUsize,
    }

    #[async_trait]
    impl Backend for StalledBackend {
        async fn infer(
            &self,
            model: ModelIdentity,
            _bundle: Arc<InputBundle>,
        ) -> Result<InferenceOutput, RequestError> {
            self.infer_calls.fetch_add(1, Ordering::SeqCst);
            if !self.answers {
                std::future::pending::<()>().await;
            }
            Ok(InferenceOutput {
                response: format!("{model} answer"),
                latency: 0.5,
            })
        }

        async fn submit_sft(&self, _feedback: SftFeedback) -> Result<(), RequestError> {
            std::future::pending().await
        }

        async fn submit_dpo(&self, _feedback: DpoFeedback) -> Result<(), RequestError> {
            std::future::pending().await
        }

        async fn health(&self) -> Result<HealthStatus, RequestError> {
            std::future::pending().await
        }
    }

    fn repl_over(backend: Arc<StalledBackend>) -> Repl {
        let mut driver = SessionDriver::new(
            backend.clone(),
            SessionOptions {
                feedback_expiry: Duration::from_secs(3),
                initial_prompt: "describe traffic".into(),
            },
        );
        driver.load_image(vec![1, 2, 3], "road.png");
        let client = Arc::new(HttpBackend::new(Arc::new(WorkbenchConfig::default())).unwrap());
        let health = HealthMonitor::spawn(backend, Duration::from_secs(60));
        Repl::new(driver, client, health)
    }

    async fn let_tasks_run() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_run_while_busy_is_rejected() {
        let backend = Arc::new(StalledBackend::default());
        let mut repl = repl_over(backend.clone());

        assert!(matches!(repl.execute(Command::Run).await, Ok(Flow::Continue)));
        let_tasks_run().await;
        assert_eq!(backend.infer_calls.load(Ordering::SeqCst), 2);

        let err = repl.execute(Command::Run).await.unwrap_err();
        assert_eq!(err.downcast_ref::<SessionError>(), Some(&SessionError::Busy));
        let_tasks_run().await;
        assert_eq!(backend.infer_calls.load(Ordering::SeqCst), 2);
        assert!(repl.driver.workbench().is_busy());
    }

    #[tokio::test]
    async fn test_label_and_submit_leave_status_pending() {
        let backend = Arc::new(StalledBackend {
            answers: true,
            ..StalledBackend::default()
        });
        let mut repl = repl_over(backend);
        repl.execute(Command::Run).await.unwrap();
        repl.driver.settle_comparison().await;

        repl.execute(Command::Label {
            model: ModelIdentity::Student,
            is_pass: true,
        })
        .await
        .unwrap();
        repl.execute(Command::Prefer(Some(ModelIdentity::Teacher)))
            .await
            .unwrap();
        repl.execute(Command::Submit).await.unwrap();

        let snap = repl.driver.snapshot();
        assert_eq!(
            snap.feedback.get(&FeedbackActionKey::StudentPass),
            Some(&FeedbackStatus::Pending)
        );
        assert_eq!(
            snap.feedback.get(&FeedbackActionKey::Preference),
            Some(&FeedbackStatus::Pending)
        );
        let text = render_snapshot(&snap);
        assert!(text.contains("pass=saving"), "{text}");
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("run").unwrap(), Some(Command::Run));
        assert_eq!(
            parse_command("image '/tmp/road scene.jpg'").unwrap(),
            Some(Command::Image(PathBuf::from("/tmp/road scene.jpg")))
        );
        assert_eq!(
            parse_command("pass s").unwrap(),
            Some(Command::Label {
                model: ModelIdentity::Student,
                is_pass: true
            })
        );
        assert_eq!(
            parse_command("FAIL teacher").unwrap(),
            Some(Command::Label {
                model: ModelIdentity::Teacher,
                is_pass: false
            })
        );
        assert_eq!(
            parse_command("prompt Count the \"cars\" please").unwrap(),
            Some(Command::Prompt("Count the cars please".into()))
        );
        assert_eq!(parse_command("prefer none").unwrap(), Some(Command::Prefer(None)));
        assert_eq!(
            parse_command("rationale").unwrap(),
            Some(Command::Rationale(String::new()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_command("prompt \"open").unwrap_err(),
            CommandError::Unbalanced
        );
        assert_eq!(
            parse_command("launch").unwrap_err(),
            CommandError::Unknown("launch".into())
        );
        assert_eq!(
            parse_command("pass").unwrap_err(),
            CommandError::MissingArgument("pass")
        );
        assert_eq!(
            parse_command("prefer judge").unwrap_err(),
            CommandError::UnknownModel("judge".into())
        );
    }

    fn finished_snapshot() -> WorkbenchSnapshot {
        let mut snap = WorkbenchSnapshot {
            image: Some(ImageSummary {
                file_name: "a.png".into(),
                bytes: 7,
            }),
            prompt: "describe traffic".into(),
            teacher: ModelRun::Failed {
                error: "teacher error: Internal Server Error".into(),
            },
            student: ModelRun::Succeeded {
                response: "text2".into(),
                latency: 0.8,
            },
            error_banner: Some("teacher error: Internal Server Error".into()),
            student_label_enabled: true,
            ..WorkbenchSnapshot::default()
        };
        snap.feedback
            .insert(FeedbackActionKey::StudentPass, FeedbackStatus::Success);
        snap
    }

    #[test]
    fn test_render_failed_and_succeeded_panels() {
        let text = render_snapshot(&finished_snapshot());
        assert!(text.contains("image:  a.png (7 bytes)"));
        assert!(text.contains("error:  teacher error: Internal Server Error"));
        assert!(text.contains("failed: teacher error: Internal Server Error"));
        assert!(text.contains("latency: 0.80s"));
        assert!(text.contains("labels: pass=saved"));
        assert!(!text.contains("preference:"));
    }

    #[test]
    fn test_render_preference_line() {
        let snap = WorkbenchSnapshot {
            teacher: ModelRun::Succeeded {
                response: "text1".into(),
                latency: 1.2,
            },
            student: ModelRun::Succeeded {
                response: "text2".into(),
                latency: 0.8,
            },
            selection: PreferenceSelection {
                winner: Some(ModelIdentity::Student),
                rationale: Some("more concise".into()),
            },
            preference_enabled: true,
            ..WorkbenchSnapshot::default()
        };
        let text = render_snapshot(&snap);
        assert!(text.contains("preference: student \"more concise\" (submit enabled)"));
    }
}
