use std::sync::Mutex;

use anyhow::Error;
use async_trait::async_trait;
use serde::Serialize;

/// One visible step of a chain run, streamed into the chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainStep {
    Thought { text: String },
    ToolCall { tool: String, input: String },
    Observation { text: String },
    Answer { text: String },
}

pub trait StepObserver: Send + Sync {
    fn on_step(&self, step: &ChainStep);
}

/// Keeps every step in memory.
#[derive(Default)]
pub struct RecordingObserver {
    steps: Mutex<Vec<ChainStep>>,
}

impl RecordingObserver {
    pub fn steps(&self) -> Vec<ChainStep> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StepObserver for RecordingObserver {
    fn on_step(&self, step: &ChainStep) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(step.clone());
        }
    }
}

#[async_trait]
pub trait Chain: Send + Sync {
    async fn run(&self, input: String, observer: &dyn StepObserver) -> Result<String, Error>;
}
