use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    Ollama,
}

/// Runtime settings, read from flags, the environment and `.env`.
#[derive(Debug, Clone, Parser)]
#[command(name = "sql_chat", about = "Chat with a SQL database in natural language")]
pub struct AppConfig {
    #[arg(long, env = "SQL_CHAT_BIND", default_value = "127.0.0.1:8501")]
    pub bind: SocketAddr,

    /// SQLite database used when the form selects the local database.
    #[arg(long, env = "SQL_CHAT_SQLITE_PATH", default_value = "student.db")]
    pub sqlite_path: PathBuf,

    #[arg(long, env = "SQL_CHAT_PROVIDER", value_enum, default_value_t = LlmProvider::Groq)]
    pub provider: LlmProvider,

    #[arg(long, env = "SQL_CHAT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "SQL_CHAT_TEMPERATURE", default_value_t = 0.1)]
    pub temperature: f32,

    #[arg(long, env = "GROQ_BASE_URL", default_value = GROQ_BASE_URL)]
    pub groq_base_url: String,

    /// Used when the form leaves the key blank.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "OLLAMA_HOST", default_value = "http://localhost")]
    pub ollama_host: String,

    #[arg(long, env = "OLLAMA_PORT", default_value_t = 11434)]
    pub ollama_port: u16,

    #[arg(long, env = "SQL_CHAT_CACHE_TTL_SECS", default_value_t = 7200)]
    pub cache_ttl_secs: u64,

    /// Sessions unused for this long are dropped.
    #[arg(long, env = "SQL_CHAT_SESSION_IDLE_SECS", default_value_t = 86400)]
    pub session_idle_secs: u64,

    #[arg(long, env = "SQL_CHAT_MAX_QUERY_HISTORY", default_value_t = 50)]
    pub max_query_history: usize,

    #[arg(long, env = "SQL_CHAT_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    #[arg(long, env = "SQL_CHAT_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: usize,
}

impl AppConfig {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8501)),
            sqlite_path: PathBuf::from("student.db"),
            provider: LlmProvider::Groq,
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            groq_base_url: GROQ_BASE_URL.to_string(),
            groq_api_key: None,
            ollama_host: "http://localhost".to_string(),
            ollama_port: 11434,
            cache_ttl_secs: 7200,
            session_idle_secs: 86400,
            max_query_history: 50,
            top_k: 5,
            max_attempts: 3,
        }
    }
}
