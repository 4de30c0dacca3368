use std::path::PathBuf;

use sql_chat::seed::create_student_db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SQL_CHAT_SQLITE_PATH").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("student.db"));

    let rows = create_student_db(&path).await?;

    println!("The inserted records are");
    for row in rows {
        println!("{:?}", row);
    }

    Ok(())
}
