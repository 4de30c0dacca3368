use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use sql_chat::chain::{Chain, ChainStep, RecordingObserver};
use sql_chat::db::{ConnectionParams, Database};
use sql_chat::llm::{ChatMessage, ChatModel};
use sql_chat::seed::create_student_db;
use sql_chat::text_to_sql_chain::TextToSqlChain;

/// Replies with canned responses in order and keeps what it was sent.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Error> {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left"))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

async fn student_db(dir: &tempfile::TempDir) -> Database {
    let path = dir.path().join("student.db");
    create_student_db(&path).await.unwrap();
    Database::connect(&ConnectionParams::sqlite(), &path)
        .await
        .unwrap()
}

#[tokio::test]
async fn answers_from_query_result() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&[
        "```sql\nSELECT NAME FROM STUDENT WHERE SECTION = 'A' ORDER BY NAME;\n```",
        "Alice and Eve are in section A.",
    ]);
    let chain = TextToSqlChain::new(model.clone(), db, 5, 3);
    let observer = RecordingObserver::default();

    let answer = chain
        .run("Show me all students in section A".to_string(), &observer)
        .await
        .unwrap();

    assert_eq!(answer, "Alice and Eve are in section A.");

    let steps = observer.steps();
    assert_eq!(
        steps.first(),
        Some(&ChainStep::Thought {
            text: "Looking up the schema".into()
        })
    );
    assert!(steps.contains(&ChainStep::ToolCall {
        tool: "sql_db_query".into(),
        input: "SELECT NAME FROM STUDENT WHERE SECTION = 'A' ORDER BY NAME".into(),
    }));
    assert!(steps.contains(&ChainStep::Observation {
        text: "NAME\nAlice\nEve\n".into(),
    }));
    assert_eq!(
        steps.last(),
        Some(&ChainStep::Answer {
            text: "Alice and Eve are in section A.".into()
        })
    );

    let calls = model.calls();
    assert_eq!(calls.len(), 2);
    let system = &calls[0][0].content;
    assert!(system.contains("SQLite expert"));
    assert!(system.contains("CREATE TABLE STUDENT"));
    assert!(system.contains("at most 5 results"));
    assert!(calls[1][1].content.contains("SQLResult:\nNAME\nAlice\nEve"));
}

#[tokio::test]
async fn failed_query_is_fed_back_for_another_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&[
        "SELECT GRADE FROM STUDENT",
        "SELECT COUNT(*) AS total FROM STUDENT",
        "There are 5 students.",
    ]);
    let chain = TextToSqlChain::new(model.clone(), db, 5, 3);
    let observer = RecordingObserver::default();

    let answer = chain
        .run("How many students are there?".to_string(), &observer)
        .await
        .unwrap();
    assert_eq!(answer, "There are 5 students.");

    let retry = &model.calls()[1];
    let feedback = &retry.last().unwrap().content;
    assert!(feedback.starts_with("That query failed with:"));
    assert!(observer.steps().iter().any(|s| matches!(
        s,
        ChainStep::Observation { text } if text.starts_with("Error:")
    )));
}

#[tokio::test]
async fn writes_are_refused_and_attempts_run_out() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&["DELETE FROM STUDENT", "DROP TABLE STUDENT"]);
    let chain = TextToSqlChain::new(model.clone(), db.clone(), 5, 2);

    let err = chain
        .run("Remove everyone".to_string(), &RecordingObserver::default())
        .await
        .unwrap_err();

    assert!(err.to_string().starts_with("Agent stopped after 2 attempts"));
    assert!(err.to_string().contains("DROP statements are not allowed"));
    assert_eq!(db.run("SELECT COUNT(*) FROM STUDENT").await.unwrap().rows[0][0].as_deref(), Some("5"));
}

#[tokio::test]
async fn writes_hidden_in_read_syntax_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&[
        "SELECT * INTO backup FROM STUDENT",
        "SELECT NAME FROM STUDENT WHERE MARKS > 90",
        "Alice scored above 90.",
    ]);
    let chain = TextToSqlChain::new(model.clone(), db, 5, 3);
    let observer = RecordingObserver::default();

    let answer = chain
        .run("Copy the students somewhere".to_string(), &observer)
        .await
        .unwrap();
    assert_eq!(answer, "Alice scored above 90.");

    let binding = model.calls();
    let feedback = &binding[1].last().unwrap().content;
    assert!(feedback.contains("SELECT INTO statements are not allowed"));
}

#[tokio::test]
async fn empty_results_still_show_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&[
        "SELECT NAME FROM STUDENT WHERE MARKS > 100",
        "No student scored above 100.",
    ]);
    let chain = TextToSqlChain::new(model.clone(), db, 5, 3);
    let observer = RecordingObserver::default();

    chain
        .run("Who scored above 100?".to_string(), &observer)
        .await
        .unwrap();

    assert!(observer.steps().contains(&ChainStep::Observation {
        text: "NAME\n(no rows)".into(),
    }));
    assert!(model.calls()[1][1].content.contains("SQLResult:\nNAME\n(no rows)"));
}

#[tokio::test]
async fn small_talk_is_answered_without_sql() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let model = ScriptedModel::new(&["NO_SQL: Hi! Ask me about the students."]);
    let chain = TextToSqlChain::new(model.clone(), db, 5, 3);
    let observer = RecordingObserver::default();

    let answer = chain.run("hello".to_string(), &observer).await.unwrap();

    assert_eq!(answer, "Hi! Ask me about the students.");
    assert_eq!(model.calls().len(), 1);
    assert!(!observer
        .steps()
        .iter()
        .any(|s| matches!(s, ChainStep::ToolCall { tool, .. } if tool == "sql_db_query")));
}

#[tokio::test]
async fn model_errors_propagate() {
    let dir = tempfile::tempdir().unwrap();
    let db = student_db(&dir).await;
    let chain = TextToSqlChain::new(ScriptedModel::new(&[]), db, 5, 3);

    let err = chain
        .run("anything".to_string(), &RecordingObserver::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "no scripted reply left");
}
