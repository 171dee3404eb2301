//! Scripted backend for driving the session deterministically.
//!
//! Every backend call is forwarded to the test as a [`BackendCall`] carrying
//! a oneshot reply handle, so the test decides when (and in which order)
//! each request completes.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use vlm_session::{
    Backend, DpoFeedback, HealthStatus, InferenceOutput, InputBundle, ModelIdentity, RequestError,
    SessionDriver, SessionOptions, SftFeedback,
};

pub const EXPIRY: Duration = Duration::from_secs(3);

pub type InferReply = oneshot::Sender<Result<InferenceOutput, RequestError>>;
pub type FeedbackReply = oneshot::Sender<Result<(), RequestError>>;

pub enum BackendCall {
    Infer {
        model: ModelIdentity,
        bundle: Arc<InputBundle>,
        reply: InferReply,
    },
    Sft {
        feedback: SftFeedback,
        reply: FeedbackReply,
    },
    Dpo {
        feedback: DpoFeedback,
        reply: FeedbackReply,
    },
}

pub struct ScriptedBackend {
    calls: mpsc::UnboundedSender<BackendCall>,
}

fn dropped() -> RequestError {
    RequestError::Transport("reply dropped".into())
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn infer(
        &self,
        model: ModelIdentity,
        bundle: Arc<InputBundle>,
    ) -> Result<InferenceOutput, RequestError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.calls.send(BackendCall::Infer {
            model,
            bundle,
            reply,
        });
        rx.await.unwrap_or_else(|_| Err(dropped()))
    }

    async fn submit_sft(&self, feedback: SftFeedback) -> Result<(), RequestError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.calls.send(BackendCall::Sft { feedback, reply });
        rx.await.unwrap_or_else(|_| Err(dropped()))
    }

    async fn submit_dpo(&self, feedback: DpoFeedback) -> Result<(), RequestError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.calls.send(BackendCall::Dpo { feedback, reply });
        rx.await.unwrap_or_else(|_| Err(dropped()))
    }

    async fn health(&self) -> Result<HealthStatus, RequestError> {
        Ok(HealthStatus {
            status: "ok".into(),
            model_loaded: true,
            mode: None,
            tensor_parallel_size: None,
            gpu_memory_utilization: None,
        })
    }
}

pub struct Harness {
    pub driver: SessionDriver,
    pub calls: mpsc::UnboundedReceiver<BackendCall>,
}

impl Harness {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_test_writer()
            .try_init();
        let (tx, calls) = mpsc::unbounded_channel();
        let driver = SessionDriver::new(
            Arc::new(ScriptedBackend { calls: tx }),
            SessionOptions {
                feedback_expiry: EXPIRY,
                initial_prompt: "describe traffic".into(),
            },
        );
        Self { driver, calls }
    }

    /// Load image A and start a comparison; returns (teacher, student) replies.
    pub async fn start_run(&mut self) -> (InferReply, InferReply) {
        if self.driver.snapshot().image.is_none() {
            self.driver.load_image(b"image-a".to_vec(), "a.png");
        }
        self.driver.run_comparison().expect("run accepted");
        self.infer_pair().await
    }

    /// Collect the two inference calls of one run, keyed by model.
    pub async fn infer_pair(&mut self) -> (InferReply, InferReply) {
        let mut teacher = None;
        let mut student = None;
        for _ in 0..2 {
            match self.calls.recv().await.expect("backend call") {
                BackendCall::Infer {
                    model: ModelIdentity::Teacher,
                    reply,
                    ..
                } => teacher = Some(reply),
                BackendCall::Infer {
                    model: ModelIdentity::Student,
                    reply,
                    ..
                } => student = Some(reply),
                _ => panic!("expected inference call"),
            }
        }
        (teacher.expect("teacher call"), student.expect("student call"))
    }

    /// Run a comparison where both models answer successfully.
    pub async fn ready(&mut self) {
        let (teacher, student) = self.start_run().await;
        teacher.send(ok("text1", 1.2)).unwrap();
        student.send(ok("text2", 0.8)).unwrap();
        self.driver.settle_comparison().await;
    }

    pub async fn next_sft(&mut self) -> (SftFeedback, FeedbackReply) {
        match self.calls.recv().await.expect("backend call") {
            BackendCall::Sft { feedback, reply } => (feedback, reply),
            _ => panic!("expected sft call"),
        }
    }

    pub async fn next_dpo(&mut self) -> (DpoFeedback, FeedbackReply) {
        match self.calls.recv().await.expect("backend call") {
            BackendCall::Dpo { feedback, reply } => (feedback, reply),
            _ => panic!("expected dpo call"),
        }
    }

    /// Let spawned tasks run without advancing the clock.
    pub async fn yield_tasks(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }
}

pub fn ok(text: &str, latency: f64) -> Result<InferenceOutput, RequestError> {
    Ok(InferenceOutput {
        response: text.into(),
        latency,
    })
}
