//! Where the loop reports what it is doing

use super::message::{ToolCall, ToolResult};

/// Receives incremental loop output. The terminal UI implements this; tests
/// record into memory.
pub trait OutputSink: Send {
    /// A streamed piece of model text.
    fn text_chunk(&mut self, chunk: &str);

    fn tool_started(&mut self, call: &ToolCall);

    fn tool_finished(&mut self, call: &ToolCall, result: &ToolResult);

    /// The turn ended with a plain answer. `text` may already have been
    /// streamed through [`text_chunk`](Self::text_chunk).
    fn final_answer(&mut self, text: &str);

    /// Status line for stops that are not a normal answer.
    fn notice(&mut self, text: &str);

    /// About to ask the model for the next step.
    fn awaiting_model(&mut self, _iteration: usize, _max_iterations: usize) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SinkEvent {
        Chunk(String),
        Started(String),
        Finished(String, bool),
        Answer(String),
        Notice(String),
    }

    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub events: Vec<SinkEvent>,
    }

    impl RecordingSink {
        pub fn notices(&self) -> Vec<&str> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Notice(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }

        pub fn streamed_text(&self) -> String {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SinkEvent::Chunk(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl OutputSink for RecordingSink {
        fn text_chunk(&mut self, chunk: &str) {
            self.events.push(SinkEvent::Chunk(chunk.to_string()));
        }
        fn tool_started(&mut self, call: &ToolCall) {
            self.events.push(SinkEvent::Started(call.name.clone()));
        }
        fn tool_finished(&mut self, call: &ToolCall, result: &ToolResult) {
            self.events
                .push(SinkEvent::Finished(call.name.clone(), result.success));
        }
        fn final_answer(&mut self, text: &str) {
            self.events.push(SinkEvent::Answer(text.to_string()));
        }
        fn notice(&mut self, text: &str) {
            self.events.push(SinkEvent::Notice(text.to_string()));
        }
    }
}
