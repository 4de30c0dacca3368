use std::sync::Arc;

use anyhow::{anyhow, Error};
use async_trait::async_trait;

use crate::chain::{Chain, ChainStep, StepObserver};
use crate::db::{Database, QueryResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::sql::{check_read_only, extract_sql};

const NO_SQL_MARKER: &str = "NO_SQL:";
const MAX_OBSERVATION_CHARS: usize = 4000;

const ANSWER_PROMPT: &str = "You are a helpful data analyst. Answer the user's question using only \
the SQL result provided. Be concise, mention concrete values, and do not show the SQL unless asked.";

/// Turns a question into SQL against the connected database, runs it and
/// phrases the result. Failed or refused statements are fed back to the
/// model for another attempt.
pub struct TextToSqlChain {
    client: Arc<dyn ChatModel>,
    db: Database,
    top_k: usize,
    max_attempts: usize,
}

#[async_trait]
impl Chain for TextToSqlChain {
    async fn run(&self, input: String, observer: &dyn StepObserver) -> Result<String, Error> {
        observer.on_step(&ChainStep::Thought {
            text: "Looking up the schema".to_string(),
        });

        let mut messages = vec![
            ChatMessage::system(self.construct_prompt(observer).await?),
            ChatMessage::user(input.clone()),
        ];

        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let reply = self.client.complete(&messages).await?;

            if let Some(answer) = reply.trim().strip_prefix(NO_SQL_MARKER) {
                let answer = answer.trim().to_string();
                observer.on_step(&ChainStep::Answer { text: answer.clone() });
                return Ok(answer);
            }

            let sql_query = extract_sql(&reply);
            tracing::info!(attempt, sql = %sql_query, "generated sql");
            observer.on_step(&ChainStep::ToolCall {
                tool: "sql_db_query".to_string(),
                input: sql_query.clone(),
            });

            match self.query(&sql_query).await {
                Ok(data) => {
                    observer.on_step(&ChainStep::Observation {
                        text: truncate(&data.to_string()),
                    });
                    let answer = self.answer(&input, &sql_query, &data).await?;
                    observer.on_step(&ChainStep::Answer { text: answer.clone() });
                    return Ok(answer);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(attempt, error = %last_error, "sql attempt failed");
                    observer.on_step(&ChainStep::Observation {
                        text: format!("Error: {last_error}"),
                    });
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(format!(
                        "That query failed with: {last_error}\nRewrite the query and return only the corrected SQL."
                    )));
                }
            }
        }

        Err(anyhow!(
            "Agent stopped after {} attempts: {}",
            self.max_attempts,
            last_error
        ))
    }
}

impl TextToSqlChain {
    pub fn new(client: Arc<dyn ChatModel>, db: Database, top_k: usize, max_attempts: usize) -> Self {
        Self {
            client,
            db,
            top_k,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn construct_prompt(&self, observer: &dyn StepObserver) -> Result<String, Error> {
        let db_info = self.get_db_info(observer).await?;
        let dialect = self.db.dialect();

        Ok(format!(
            "You are a {dialect} expert. Given an input question, create a syntactically correct \
{dialect} query that answers it. Unless the user asks for a specific number of rows, limit the \
query to at most {top_k} results. Never query for all columns of a table, only the ones needed. \
Only use tables and columns from the schema below. Only read data: never write INSERT, UPDATE, \
DELETE or DDL statements.\n\n\
Only use the following tables:\n{db_info}\n\n\
Only return the SQL query. If the question cannot be answered from this database, reply with \
`{NO_SQL_MARKER}` followed by a short answer.",
            top_k = self.top_k,
        ))
    }

    async fn get_db_info(&self, observer: &dyn StepObserver) -> Result<String, Error> {
        observer.on_step(&ChainStep::ToolCall {
            tool: "sql_db_list_tables".to_string(),
            input: String::new(),
        });
        let tables = self.db.usable_table_names().await?;
        observer.on_step(&ChainStep::Observation {
            text: tables.join(", "),
        });

        observer.on_step(&ChainStep::ToolCall {
            tool: "sql_db_schema".to_string(),
            input: tables.join(", "),
        });
        let info = self.db.table_info(&tables).await?;
        observer.on_step(&ChainStep::Observation {
            text: truncate(&info),
        });

        Ok(info)
    }

    async fn query(&self, generated_query: &str) -> Result<QueryResult, Error> {
        check_read_only(generated_query, self.db.sql_dialect().as_ref()).map_err(|refusal| anyhow!("{refusal}"))?;
        Ok(self.db.run(generated_query).await?)
    }

    async fn answer(&self, question: &str, sql: &str, data: &QueryResult) -> Result<String, Error> {
        let messages = [
            ChatMessage::system(ANSWER_PROMPT),
            ChatMessage::user(format!(
                "Question: {question}\nSQLQuery: {sql}\nSQLResult:\n{}\nAnswer:",
                truncate(&data.to_string())
            )),
        ];
        Ok(self.client.complete(&messages).await?.trim().to_string())
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OBSERVATION_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_OBSERVATION_CHARS).collect();
    cut.push_str("\n...");
    cut
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn long_observations_are_cut() {
        let long = "x".repeat(5000);
        let cut = truncate(&long);
        assert!(cut.ends_with("\n..."));
        assert_eq!(cut.chars().count(), 4004);
        assert_eq!(truncate("short"), "short");
    }
}
