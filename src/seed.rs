use std::path::Path;

use anyhow::Error;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;

pub const STUDENTS: &[(&str, &str, &str, i64)] = &[
    ("Alice", "Cyber Security", "A", 92),
    ("Bob", "Machine Learning", "B", 78),
    ("Charlie", "Cloud Computing", "C", 65),
    ("David", "AI & Robotics", "B", 88),
    ("Eve", "Blockchain", "A", 73),
];

/// Creates the demo `STUDENT` table and returns the rows as inserted.
pub async fn create_student_db(path: &Path) -> Result<Vec<(String, String, String, i64)>, Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "CREATE TABLE STUDENT(NAME VARCHAR(25), CLASS VARCHAR(25), SECTION VARCHAR(25), MARKS INT)",
    )
    .execute(&mut *tx)
    .await?;

    for (name, class, section, marks) in STUDENTS {
        sqlx::query("INSERT INTO STUDENT VALUES (?, ?, ?, ?)")
            .bind(*name)
            .bind(*class)
            .bind(*section)
            .bind(*marks)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let rows = sqlx::query("SELECT NAME, CLASS, SECTION, MARKS FROM STUDENT")
        .fetch_all(&pool)
        .await?;
    let inserted = rows
        .iter()
        .map(|row| -> Result<_, sqlx::Error> {
            Ok((
                row.try_get("NAME")?,
                row.try_get("CLASS")?,
                row.try_get("SECTION")?,
                row.try_get("MARKS")?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;

    pool.close().await;
    Ok(inserted)
}
