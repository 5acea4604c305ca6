//! Agent loop - model / tool cycle as an explicit state machine

use serde::Serialize;
use tracing::{debug, info, warn};

use super::llm::{LlmClient, ModelReply, StreamEvent};
use super::message::{Message, ToolCall, ToolResult};
use super::session::Session;
use super::sink::OutputSink;
use crate::error::{ProviderError, ToolError, ToolErrorKind};
use crate::tools::{ToolRunner, ToolSpec};

/// Where a session is in its current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTools,
    Completed,
    Cancelled,
    Exhausted,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Exhausted | Self::Failed
        )
    }

    /// States a turn can be picked up again from.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Cancelled | Self::Exhausted | Self::Failed)
    }
}

/// One executed tool call, for progress reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub name: String,
    pub success: bool,
}

/// What a turn got done before it stopped early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub iterations: usize,
    pub tool_runs: Vec<ToolRun>,
    pub last_text: Option<String>,
}

impl Progress {
    fn record(&mut self, call: &ToolCall, result: &ToolResult) {
        self.tool_runs.push(ToolRun {
            name: call.name.clone(),
            success: result.success,
        });
    }

    /// Human readable summary.
    pub fn report(&self) -> String {
        let mut out = format!("{} model call(s)", self.iterations);
        if self.tool_runs.is_empty() {
            out.push_str(", no tools run.");
        } else {
            let failed = self.tool_runs.iter().filter(|r| !r.success).count();
            let runs = self
                .tool_runs
                .iter()
                .map(|r| format!("{} ({})", r.name, if r.success { "ok" } else { "failed" }))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                ", {} tool run(s), {failed} failed: {runs}.",
                self.tool_runs.len()
            ));
        }
        if let Some(text) = &self.last_text {
            let snippet: String = text.chars().take(300).collect();
            out.push_str(&format!("\nLast message: {snippet}"));
        }
        out
    }
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum LoopOutcome {
    Completed { answer: String },
    Cancelled { progress: Progress },
    Exhausted { progress: Progress },
    Failed { error: ProviderError },
}

impl LoopOutcome {
    pub fn state(&self) -> LoopState {
        match self {
            Self::Completed { .. } => LoopState::Completed,
            Self::Cancelled { .. } => LoopState::Cancelled,
            Self::Exhausted { .. } => LoopState::Exhausted,
            Self::Failed { .. } => LoopState::Failed,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Completed { answer } => Some(answer),
            _ => None,
        }
    }
}

/// Result of one model query, before the loop decides what to do with it.
enum Step {
    Reply(ModelReply),
    Cancelled,
    Failed(ProviderError),
}

/// Drives a [`Session`] through model calls and tool batches until the model
/// answers, the iteration cap is hit, the user cancels or the provider fails.
pub struct AgentLoop<C: LlmClient> {
    client: C,
    tools: ToolRunner,
    streaming: bool,
}

impl<C: LlmClient> AgentLoop<C> {
    pub fn new(client: C, tools: ToolRunner) -> Self {
        Self {
            client,
            tools,
            streaming: false,
        }
    }

    /// Forward text to the sink as it arrives.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn tools(&self) -> &ToolRunner {
        &self.tools
    }

    /// Run one user turn.
    pub async fn run(&self, session: &mut Session, input: &str, sink: &mut dyn OutputSink) -> LoopOutcome {
        info!(provider = self.client.name(), model = self.client.model(), "starting turn");
        session.begin_turn();
        session.push(Message::user(input));
        self.drive(session, sink).await
    }

    /// Continue a turn that stopped early, on the history as it stands.
    /// Returns `None` when the session has nothing to resume.
    pub async fn resume(&self, session: &mut Session, sink: &mut dyn OutputSink) -> Option<LoopOutcome> {
        if !session.state().is_resumable() {
            return None;
        }
        info!(from = ?session.state(), "resuming turn");
        session.begin_turn();
        Some(self.drive(session, sink).await)
    }

    async fn drive(&self, session: &mut Session, sink: &mut dyn OutputSink) -> LoopOutcome {
        let specs = self.tools.specs();
        let cancel = session.cancel_flag();
        let mut progress = Progress::default();

        loop {
            if cancel.is_cancelled() {
                return Self::stop_cancelled(session, sink, progress);
            }
            if session.iterations() >= session.max_iterations() {
                return Self::stop_exhausted(session, sink, progress);
            }

            let iteration = session.record_iteration();
            progress.iterations = iteration;
            session.transition(LoopState::AwaitingModel);
            sink.awaiting_model(iteration, session.max_iterations());

            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                step = self.query(session.messages(), &specs, &mut *sink) => step,
            };

            let reply = match step {
                Step::Reply(reply) => reply,
                Step::Cancelled => {
                    debug!(iteration, "model call abandoned");
                    return Self::stop_cancelled(session, sink, progress);
                }
                Step::Failed(error) => return Self::stop_failed(session, sink, error),
            };

            session.add_usage(reply.usage);
            if !reply.text.trim().is_empty() {
                progress.last_text = Some(reply.text.clone());
            }

            if !reply.has_tool_calls() {
                session.push(Message::assistant(reply.text.clone()));
                session.transition(LoopState::Completed);
                info!(iterations = iteration, chars = reply.text.len(), "turn completed");
                sink.final_answer(&reply.text);
                return LoopOutcome::Completed { answer: reply.text };
            }

            let calls = reply.tool_calls;
            session.push(Message::assistant_with_tools(reply.text, calls.clone()));
            session.transition(LoopState::ExecutingTools);

            for (index, call) in calls.iter().enumerate() {
                if cancel.is_cancelled() {
                    Self::answer_skipped(session, &calls[index..]);
                    return Self::stop_cancelled(session, sink, progress);
                }
                sink.tool_started(call);
                let result = self.tools.execute(call).await;
                debug!(tool = %call.name, id = %call.id, success = result.success, "tool finished");
                sink.tool_finished(call, &result);
                progress.record(call, &result);
                session.push(Message::tool_result(result));
            }
        }
    }

    async fn query(&self, messages: &[Message], specs: &[ToolSpec], sink: &mut dyn OutputSink) -> Step {
        let result = if self.streaming {
            self.query_streaming(messages, specs, sink).await
        } else {
            self.client.chat(messages, specs).await
        };
        match result {
            Ok(reply) => Step::Reply(reply),
            Err(error) => Step::Failed(error),
        }
    }

    async fn query_streaming(
        &self,
        messages: &[Message],
        specs: &[ToolSpec],
        sink: &mut dyn OutputSink,
    ) -> Result<ModelReply, ProviderError> {
        let mut stream = self.client.stream(messages, specs).await?;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Text(text) => sink.text_chunk(&text),
                StreamEvent::Done(reply) => return Ok(reply),
            }
        }
        Err(ProviderError::decode(
            self.client.name(),
            "stream ended without a final reply",
        ))
    }

    /// Give every call that will not run a result, so the history stays
    /// answerable on the next turn.
    fn answer_skipped(session: &mut Session, skipped: &[ToolCall]) {
        for call in skipped {
            session.push(Message::tool_result(ToolResult::failure(
                &call.id,
                ToolError::new(ToolErrorKind::Cancelled, "skipped: the user cancelled the turn"),
            )));
        }
    }

    fn stop_cancelled(session: &mut Session, sink: &mut dyn OutputSink, progress: Progress) -> LoopOutcome {
        session.transition(LoopState::Cancelled);
        info!(iterations = progress.iterations, "turn cancelled");
        sink.notice(&format!("Cancelled after {}", progress.report()));
        LoopOutcome::Cancelled { progress }
    }

    fn stop_exhausted(session: &mut Session, sink: &mut dyn OutputSink, progress: Progress) -> LoopOutcome {
        session.transition(LoopState::Exhausted);
        warn!(max = session.max_iterations(), "iteration limit reached");
        sink.notice(&format!(
            "Stopped at the limit of {} iterations: {}",
            session.max_iterations(),
            progress.report()
        ));
        LoopOutcome::Exhausted { progress }
    }

    fn stop_failed(session: &mut Session, sink: &mut dyn OutputSink, error: ProviderError) -> LoopOutcome {
        session.transition(LoopState::Failed);
        warn!(kind = %error.kind, error = %error, "model call failed");
        let mut text = format!("Request failed: {error}");
        if let Some(hint) = error.hint() {
            text.push('\n');
            text.push_str(&hint);
        }
        sink.notice(&text);
        LoopOutcome::Failed { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FakeLlmClient;
    use crate::agent::message::Role;
    use crate::agent::sink::testing::{RecordingSink, SinkEvent};
    use crate::error::ProviderErrorKind;
    use crate::tools::{AutoDeny, ToolSettings, Workspace};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner(dir: &TempDir) -> ToolRunner {
        ToolRunner::new_with_defaults(&Workspace::new(dir.path()).unwrap(), &ToolSettings::default())
    }

    #[tokio::test]
    async fn test_agent_loop_simple() {
        let dir = TempDir::new().unwrap();
        let agent = AgentLoop::new(FakeLlmClient::new(vec!["Hello, human!"]), runner(&dir));
        let mut session = Session::new("sys", 10);
        let mut sink = RecordingSink::default();

        let outcome = agent.run(&mut session, "Hi there", &mut sink).await;

        assert_eq!(outcome.answer(), Some("Hello, human!"));
        assert_eq!(session.state(), LoopState::Completed);
        assert_eq!(session.iterations(), 1);
        assert_eq!(sink.events, vec![SinkEvent::Answer("Hello, human!".into())]);
    }

    #[tokio::test]
    async fn test_list_files_completes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let client = FakeLlmClient::with_tool_call("ls", json!({"path": "src"}), "src has main.rs");
        let agent = AgentLoop::new(client, runner(&dir));
        let mut session = Session::new("sys", 10);
        let mut sink = RecordingSink::default();

        let outcome = agent.run(&mut session, "list files in src", &mut sink).await;

        assert_eq!(outcome.state(), LoopState::Completed);
        let history = agent.client().messages_at(1);
        let tool_msg = history.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert!(tool_msg.content.contains("main.rs"));
        assert_eq!(
            sink.events,
            vec![
                SinkEvent::Started("ls".into()),
                SinkEvent::Finished("ls".into(), true),
                SinkEvent::Answer("src has main.rs".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_never_exceeds_limit() {
        let dir = TempDir::new().unwrap();
        let always_tools = (0..5)
            .map(|i| {
                Ok(ModelReply::with_tool_calls(
                    format!("step {i}"),
                    vec![ToolCall::new(format!("c{i}"), "ls", json!({}))],
                ))
            })
            .collect();
        let agent = AgentLoop::new(FakeLlmClient::scripted(always_tools), runner(&dir));
        let mut session = Session::new("sys", 2);
        let mut sink = RecordingSink::default();

        let outcome = agent.run(&mut session, "loop forever", &mut sink).await;

        assert_eq!(agent.client().calls(), 2);
        assert_eq!(session.iterations(), 2);
        let LoopOutcome::Exhausted { progress } = outcome else {
            panic!("expected exhaustion");
        };
        assert_eq!(progress.tool_runs.len(), 2);
        assert_eq!(progress.last_text.as_deref(), Some("step 1"));
        assert!(sink.notices()[0].contains("limit of 2 iterations"));
        assert!(session.unanswered_calls().is_empty());
    }

    #[tokio::test]
    async fn test_declined_delete_continues() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("build")).unwrap();
        let client = FakeLlmClient::with_tool_call("delete", json!({"path": "build/"}), "Left it alone.");
        let agent = AgentLoop::new(client, runner(&dir).with_confirmation(Box::new(AutoDeny)));
        let mut session = Session::new("sys", 10);
        let mut sink = RecordingSink::default();

        let outcome = agent.run(&mut session, "clean the build", &mut sink).await;

        assert_eq!(outcome.answer(), Some("Left it alone."));
        assert!(dir.path().join("build").exists());
        let result = session.messages()[3].tool_result.clone().unwrap();
        assert!(!result.success);
        assert_eq!(result.error, Some(ToolErrorKind::UserDeclined));
    }

    #[tokio::test]
    async fn test_auth_failure_preserves_session_and_resumes() {
        let dir = TempDir::new().unwrap();
        let client = FakeLlmClient::scripted(vec![
            Err(ProviderError::from_status("openrouter", 401, r#"{"error":{"message":"bad key"}}"#)),
            Ok(ModelReply::text("Now it works.")),
        ]);
        let agent = AgentLoop::new(client, runner(&dir));
        let mut session = Session::new("sys", 10);
        let mut sink = RecordingSink::default();

        let outcome = agent.run(&mut session, "hello", &mut sink).await;

        let LoopOutcome::Failed { error } = &outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.kind, ProviderErrorKind::Auth);
        assert_eq!(session.state(), LoopState::Failed);
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, "hello");
        assert!(sink.notices()[0].contains("codeagent config --api-key"));

        let resumed = agent.resume(&mut session, &mut sink).await.unwrap();
        assert_eq!(resumed.answer(), Some("Now it works."));
        let users = session.messages().iter().filter(|m| m.role == Role::User).count();
        assert_eq!(users, 1);
        assert!(agent.resume(&mut session, &mut sink).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_abandons_model_call() {
        let dir = TempDir::new().unwrap();
        let agent = AgentLoop::new(FakeLlmClient::hanging(), runner(&dir));
        let mut session = Session::new("sys", 10);
        let flag = session.cancel_flag();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.cancel();
        });
        let mut sink = RecordingSink::default();

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            agent.run(&mut session, "wait", &mut sink),
        )
        .await
        .expect("cancellation should end the turn");

        assert_eq!(outcome.state(), LoopState::Cancelled);
        assert_eq!(session.state(), LoopState::Cancelled);
        assert!(sink.notices()[0].starts_with("Cancelled"));
    }

    /// Cancels the session the first time a tool starts.
    struct CancelOnFirstTool {
        flag: crate::agent::CancelFlag,
        inner: RecordingSink,
    }

    impl OutputSink for CancelOnFirstTool {
        fn text_chunk(&mut self, chunk: &str) {
            self.inner.text_chunk(chunk);
        }
        fn tool_started(&mut self, call: &ToolCall) {
            self.flag.cancel();
            self.inner.tool_started(call);
        }
        fn tool_finished(&mut self, call: &ToolCall, result: &ToolResult) {
            self.inner.tool_finished(call, result);
        }
        fn final_answer(&mut self, text: &str) {
            self.inner.final_answer(text);
        }
        fn notice(&mut self, text: &str) {
            self.inner.notice(text);
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_answers_remaining_calls() {
        let dir = TempDir::new().unwrap();
        let client = FakeLlmClient::scripted(vec![Ok(ModelReply::with_tool_calls(
            "",
            vec![
                ToolCall::new("a", "ls", json!({})),
                ToolCall::new("b", "ls", json!({})),
                ToolCall::new("c", "ls", json!({})),
            ],
        ))]);
        let agent = AgentLoop::new(client, runner(&dir));
        let mut session = Session::new("sys", 10);
        let mut sink = CancelOnFirstTool {
            flag: session.cancel_flag(),
            inner: RecordingSink::default(),
        };

        let outcome = agent.run(&mut session, "look around", &mut sink).await;

        let LoopOutcome::Cancelled { progress } = outcome else {
            panic!("expected cancellation");
        };
        assert_eq!(progress.tool_runs.len(), 1);
        let results: Vec<_> = session.messages()[3..]
            .iter()
            .map(|m| m.tool_result.clone().unwrap())
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert_eq!(results[1].error, Some(ToolErrorKind::Cancelled));
        assert_eq!(results[2].call_id, "c");
        assert!(session.unanswered_calls().is_empty());
    }

    #[tokio::test]
    async fn test_results_follow_call_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
        let client = FakeLlmClient::scripted(vec![
            Ok(ModelReply::with_tool_calls(
                "Reading both.",
                vec![
                    ToolCall::new("first", "read_file", json!({"path": "a.txt"})),
                    ToolCall::new("second", "nope", json!({})),
                ],
            )),
            Ok(ModelReply::text("done")),
        ]);
        let agent = AgentLoop::new(client, runner(&dir));
        let mut session = Session::new("sys", 10);

        agent.run(&mut session, "read", &mut RecordingSink::default()).await;

        let history = agent.client().messages_at(1);
        let n = history.len();
        assert_eq!(history[n - 3].tool_calls.len(), 2);
        assert_eq!(history[n - 2].tool_call_id(), Some("first"));
        assert_eq!(history[n - 1].tool_call_id(), Some("second"));
        let unknown = history[n - 1].tool_result.as_ref().unwrap();
        assert_eq!(unknown.error, Some(ToolErrorKind::UnknownTool));
    }

    #[tokio::test]
    async fn test_streaming_forwards_chunks_and_counts_usage() {
        let dir = TempDir::new().unwrap();
        let mut reply = ModelReply::text("streamed answer");
        reply.usage = crate::agent::llm::Usage::new(12, 3);
        let agent = AgentLoop::new(FakeLlmClient::scripted(vec![Ok(reply)]), runner(&dir)).streaming(true);
        let mut session = Session::new("sys", 10);
        let mut sink = RecordingSink::default();

        agent.run(&mut session, "hi", &mut sink).await;

        assert_eq!(sink.streamed_text(), "streamed answer");
        assert_eq!(session.usage().total_tokens, 15);
    }

    #[test]
    fn test_progress_report() {
        let progress = Progress {
            iterations: 3,
            tool_runs: vec![
                ToolRun { name: "bash".into(), success: true },
                ToolRun { name: "edit_file".into(), success: false },
            ],
            last_text: Some("Trying again".into()),
        };
        let report = progress.report();
        assert!(report.starts_with("3 model call(s), 2 tool run(s), 1 failed"));
        assert!(report.contains("edit_file (failed)"));
        assert!(report.ends_with("Last message: Trying again"));
    }
}
