use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::BigDecimal;
use sqlx::{Column, Executor, Row};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};

use crate::error::AppError;
use crate::sql::{quote_backtick, quote_double};

const SAMPLE_ROWS_IN_TABLE_INFO: usize = 3;
pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DatabaseKind {
    Sqlite,
    Mysql,
    Postgres,
}

/// Credentials for a remote server. Also used for Postgres.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub kind: DatabaseKind,
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl ConnectionParams {
    pub fn sqlite() -> Self {
        Self {
            kind: DatabaseKind::Sqlite,
            remote: RemoteConfig::default(),
        }
    }

    pub fn describe(&self) -> String {
        match self.kind {
            DatabaseKind::Sqlite => "sqlite (local)".to_string(),
            DatabaseKind::Mysql => format!("mysql://{}@{}/{}", self.remote.user, self.remote.host, self.remote.database),
            DatabaseKind::Postgres => format!("postgres://{}@{}/{}", self.remote.user, self.remote.host, self.remote.database),
        }
    }
}

/// Checks the sidebar form before anything is contacted.
pub fn validate_inputs(api_key: &str, params: &ConnectionParams) -> Result<(), AppError> {
    if api_key.trim().is_empty() {
        return Err(AppError::Validation("Please enter your Groq API key".into()));
    }
    validate_connection(params)
}

pub fn validate_connection(params: &ConnectionParams) -> Result<(), AppError> {
    let label = match params.kind {
        DatabaseKind::Sqlite => return Ok(()),
        DatabaseKind::Mysql => "MySQL",
        DatabaseKind::Postgres => "Postgres",
    };

    let remote = &params.remote;
    let fields = [
        ("host", &remote.host),
        ("user", &remote.user),
        ("password", &remote.password),
        ("database", &remote.database),
    ];
    for (field, value) in fields {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("Please provide {label} {field}")));
        }
    }
    Ok(())
}

/// Tabular result of a query, every cell rendered as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    fn collect<R: Row>(rows: &[R], cell: fn(&R, usize) -> Option<String>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let rows = rows
            .iter()
            .map(|row| (0..row.len()).map(|index| cell(row, index)).collect())
            .collect();

        QueryResult { columns, rows }
    }

    fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first().cloned().flatten())
            .collect()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            if !self.columns.is_empty() {
                writeln!(f, "{}", self.columns.join(" | "))?;
            }
            return write!(f, "(no rows)");
        }
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let cells: Vec<&str> = row.iter().map(|c| c.as_deref().unwrap_or("NULL")).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

macro_rules! try_cell {
    ($row:expr, $index:expr, $($ty:ty),+ $(,)?) => {
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>($index) {
                return value.map(|v| v.to_string());
            }
        )+
    };
}

fn sqlite_cell(row: &SqliteRow, index: usize) -> Option<String> {
    try_cell!(row, index, String, i64, f64);
    if let Ok(bytes) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return bytes.map(|b| format!("<{} bytes>", b.len()));
    }
    // SQLite converts any storage class to text on request
    row.try_get_unchecked::<Option<String>, _>(index).ok().flatten()
}

fn mysql_cell(row: &MySqlRow, index: usize) -> Option<String> {
    try_cell!(row, index, String, i64, u64, f64, BigDecimal, NaiveDateTime, NaiveDate, NaiveTime, DateTime<Utc>);
    row.try_get_unchecked::<Option<String>, _>(index).ok().flatten()
}

fn postgres_cell(row: &PgRow, index: usize) -> Option<String> {
    try_cell!(
        row,
        index,
        String,
        i64,
        i32,
        i16,
        f64,
        f32,
        bool,
        BigDecimal,
        NaiveDateTime,
        NaiveDate,
        NaiveTime,
        DateTime<Utc>,
    );
    Some("<unsupported>".to_string())
}

/// An open connection pool to one of the supported backends.
#[derive(Debug, Clone)]
pub enum Database {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
    Postgres(PgPool),
}

impl Database {
    pub async fn connect(params: &ConnectionParams, sqlite_path: &Path) -> Result<Self, AppError> {
        validate_connection(params)?;

        let db = match params.kind {
            DatabaseKind::Sqlite => {
                let path = std::path::absolute(sqlite_path)
                    .unwrap_or_else(|_| sqlite_path.to_path_buf());
                if !path.exists() {
                    return Err(AppError::DatabaseFileMissing(path.display().to_string()));
                }
                let options = SqliteConnectOptions::new().filename(&path).read_only(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?;
                Database::Sqlite(pool)
            }
            DatabaseKind::Mysql => {
                let remote = &params.remote;
                let (host, port) = split_host(&remote.host, 3306);
                let options = MySqlConnectOptions::new()
                    .host(host)
                    .port(port)
                    .username(&remote.user)
                    .password(&remote.password)
                    .database(&remote.database);
                let pool = MySqlPoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?;
                Database::MySql(pool)
            }
            DatabaseKind::Postgres => {
                let remote = &params.remote;
                let (host, port) = split_host(&remote.host, 5432);
                let options = PgConnectOptions::new()
                    .host(host)
                    .port(port)
                    .username(&remote.user)
                    .password(&remote.password)
                    .database(&remote.database);
                let pool = PgPoolOptions::new()
                    .max_connections(4)
                    .connect_with(options)
                    .await
                    .map_err(|e| AppError::Connection(e.to_string()))?;
                Database::Postgres(pool)
            }
        };

        db.ping().await?;
        tracing::info!(database = %params.describe(), "connected to database");
        Ok(db)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.fetch("SELECT 1", &[])
            .await
            .map(|_| ())
            .map_err(|e| AppError::Connection(e.to_string()))
    }

    pub fn dialect(&self) -> &'static str {
        match self {
            Database::Sqlite(_) => "SQLite",
            Database::MySql(_) => "MySQL",
            Database::Postgres(_) => "PostgreSQL",
        }
    }

    /// Parser dialect used to check generated statements.
    pub fn sql_dialect(&self) -> Box<dyn Dialect> {
        match self {
            Database::Sqlite(_) => Box::new(SQLiteDialect {}),
            Database::MySql(_) => Box::new(MySqlDialect {}),
            Database::Postgres(_) => Box::new(PostgreSqlDialect {}),
        }
    }

    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Database::MySql(_) => quote_backtick(name),
            Database::Sqlite(_) | Database::Postgres(_) => quote_double(name),
        }
    }

    /// Runs a statement with text parameters and renders every cell.
    async fn fetch(&self, sql: &str, params: &[&str]) -> Result<QueryResult, sqlx::Error> {
        match self {
            Database::Sqlite(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(param.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                let mut result = QueryResult::collect(&rows, sqlite_cell);
                if rows.is_empty() {
                    result.columns = described_columns(pool, sql).await?;
                }
                Ok(result)
            }
            Database::MySql(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(param.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                let mut result = QueryResult::collect(&rows, mysql_cell);
                if rows.is_empty() {
                    result.columns = described_columns(pool, sql).await?;
                }
                Ok(result)
            }
            Database::Postgres(pool) => {
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(param.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                let mut result = QueryResult::collect(&rows, postgres_cell);
                if rows.is_empty() {
                    result.columns = described_columns(pool, sql).await?;
                }
                Ok(result)
            }
        }
    }

    /// Executes a generated statement.
    pub async fn run(&self, sql: &str) -> Result<QueryResult, AppError> {
        Ok(self.fetch(sql, &[]).await?)
    }

    pub async fn usable_table_names(&self) -> Result<Vec<String>, AppError> {
        let sql = match self {
            Database::Sqlite(_) => {
                "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name"
            }
            Database::MySql(_) => {
                "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables WHERE table_schema = DATABASE() ORDER BY name"
            }
            Database::Postgres(_) => {
                "SELECT table_name::text AS name FROM information_schema.tables WHERE table_schema = 'public' ORDER BY name"
            }
        };
        Ok(self.fetch(sql, &[]).await?.first_column())
    }

    /// Column names and types of one table.
    pub async fn columns(&self, table: &str) -> Result<Vec<(String, String)>, AppError> {
        let (sql, params): (&str, Vec<&str>) = match self {
            Database::Sqlite(_) => ("SELECT name, type FROM pragma_table_info(?)", vec![table]),
            Database::MySql(_) => (
                "SELECT CAST(column_name AS CHAR), CAST(column_type AS CHAR) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position",
                vec![table],
            ),
            Database::Postgres(_) => (
                "SELECT column_name::text, data_type::text FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
                vec![table],
            ),
        };

        let result = self.fetch(sql, &params).await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|mut row| {
                let data_type = row.pop().flatten().unwrap_or_default();
                let name = row.pop().flatten()?;
                Some((name, data_type))
            })
            .collect())
    }

    /// Schema description handed to the model: columns plus a few sample rows
    /// for each of `tables`, or every usable table when `tables` is empty.
    pub async fn table_info(&self, tables: &[String]) -> Result<String, AppError> {
        let tables = if tables.is_empty() {
            self.usable_table_names().await?
        } else {
            tables.to_vec()
        };

        let mut sections = Vec::with_capacity(tables.len());
        for table in &tables {
            let columns = self.columns(table).await?;
            let column_list: Vec<String> = columns
                .iter()
                .map(|(name, data_type)| format!("\t{name} {data_type}"))
                .collect();

            let sample = self.sample_rows(table, SAMPLE_ROWS_IN_TABLE_INFO).await?;

            sections.push(format!(
                "CREATE TABLE {} (\n{}\n)\n\n/*\n{} rows from {} table:\n{}*/",
                table,
                column_list.join(",\n"),
                SAMPLE_ROWS_IN_TABLE_INFO,
                table,
                sample
            ));
        }

        Ok(sections.join("\n\n"))
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<QueryResult, AppError> {
        let sql = format!("SELECT * FROM {} LIMIT {}", self.quote_identifier(table), limit);
        self.run(&sql).await
    }

    /// First rows of a known table, for the schema panel.
    pub async fn preview(&self, table: &str) -> Result<QueryResult, AppError> {
        let tables = self.usable_table_names().await?;
        if !tables.iter().any(|t| t == table) {
            return Err(AppError::UnknownTable(table.to_string()));
        }
        self.sample_rows(table, PREVIEW_ROWS).await
    }
}

/// Column names of a statement without running it, for empty results.
async fn described_columns<'c, E>(executor: E, sql: &str) -> Result<Vec<String>, sqlx::Error>
where
    E: Executor<'c>,
{
    let described = executor.describe(sql).await?;
    Ok(described
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect())
}

fn split_host(host: &str, default_port: u16) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => (name, port),
            Err(_) => (host, default_port),
        },
        None => (host, default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::create_student_db;

    fn mysql(host: &str, user: &str, password: &str, database: &str) -> ConnectionParams {
        ConnectionParams {
            kind: DatabaseKind::Mysql,
            remote: RemoteConfig {
                host: host.into(),
                user: user.into(),
                password: password.into(),
                database: database.into(),
            },
        }
    }

    fn message(err: AppError) -> String {
        err.to_string()
    }

    #[test]
    fn blank_api_key_is_rejected_first() {
        let err = validate_inputs("   ", &mysql("", "", "", "")).unwrap_err();
        assert_eq!(message(err), "Please enter your Groq API key");
    }

    #[test]
    fn mysql_fields_are_checked_in_order() {
        let err = validate_inputs("gsk", &mysql("", "root", "pw", "school")).unwrap_err();
        assert_eq!(message(err), "Please provide MySQL host");

        let err = validate_inputs("gsk", &mysql("localhost", "root", " ", "school")).unwrap_err();
        assert_eq!(message(err), "Please provide MySQL password");

        let err = validate_inputs("gsk", &mysql("localhost", "root", "pw", "")).unwrap_err();
        assert_eq!(message(err), "Please provide MySQL database");

        assert!(validate_inputs("gsk", &mysql("localhost", "root", "pw", "school")).is_ok());
    }

    #[test]
    fn sqlite_needs_only_a_key() {
        assert!(validate_inputs("gsk", &ConnectionParams::sqlite()).is_ok());
    }

    #[test]
    fn kind_serializes_uppercase() {
        let json = serde_json::to_string(&DatabaseKind::Mysql).unwrap();
        assert_eq!(json, "\"MYSQL\"");
        let kind: DatabaseKind = serde_json::from_str("\"SQLITE\"").unwrap();
        assert_eq!(kind, DatabaseKind::Sqlite);
    }

    #[test]
    fn host_port_is_split() {
        assert_eq!(split_host("db.internal:3307", 3306), ("db.internal", 3307));
        assert_eq!(split_host("localhost", 3306), ("localhost", 3306));
    }

    #[tokio::test]
    async fn missing_sqlite_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.db");
        let err = Database::connect(&ConnectionParams::sqlite(), &path)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DatabaseFileMissing(_)));
    }

    #[tokio::test]
    async fn reads_schema_and_rows_from_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student.db");
        create_student_db(&path).await.unwrap();

        let db = Database::connect(&ConnectionParams::sqlite(), &path)
            .await
            .unwrap();
        assert_eq!(db.dialect(), "SQLite");
        assert_eq!(db.usable_table_names().await.unwrap(), vec!["STUDENT"]);

        let columns = db.columns("STUDENT").await.unwrap();
        assert_eq!(columns[0], ("NAME".to_string(), "VARCHAR(25)".to_string()));
        assert_eq!(columns[3], ("MARKS".to_string(), "INT".to_string()));

        let info = db.table_info(&[]).await.unwrap();
        assert!(info.contains("CREATE TABLE STUDENT"));
        assert!(info.contains("3 rows from STUDENT table"));

        let result = db
            .run("SELECT NAME, MARKS FROM STUDENT WHERE SECTION = 'A' ORDER BY MARKS DESC")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["NAME", "MARKS"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Some("Alice".to_string()), Some("92".to_string())],
                vec![Some("Eve".to_string()), Some("73".to_string())],
            ]
        );

        let preview = db.preview("STUDENT").await.unwrap();
        assert_eq!(preview.rows.len(), 5);
        assert!(matches!(
            db.preview("GRADES").await,
            Err(AppError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn empty_results_keep_their_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student.db");
        create_student_db(&path).await.unwrap();

        let db = Database::connect(&ConnectionParams::sqlite(), &path)
            .await
            .unwrap();
        let result = db
            .run("SELECT NAME, MARKS FROM STUDENT WHERE MARKS > 100")
            .await
            .unwrap();

        assert!(result.rows.is_empty());
        assert_eq!(result.columns, vec!["NAME", "MARKS"]);
    }

    #[tokio::test]
    async fn sqlite_connection_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("student.db");
        create_student_db(&path).await.unwrap();

        let db = Database::connect(&ConnectionParams::sqlite(), &path)
            .await
            .unwrap();
        assert!(db.run("DELETE FROM STUDENT").await.is_err());
    }

    #[test]
    fn result_renders_as_table_text() {
        let result = QueryResult {
            columns: vec!["NAME".into(), "MARKS".into()],
            rows: vec![vec![Some("Bob".into()), None]],
        };
        assert_eq!(result.to_string(), "NAME | MARKS\nBob | NULL\n");
        assert_eq!(QueryResult::default().to_string(), "(no rows)");
    }
}
