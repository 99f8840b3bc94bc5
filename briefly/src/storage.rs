use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::info;

use crate::articles::Article;

/// Create the `articles` table if it does not exist.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            url TEXT NOT NULL,
            publisher TEXT NOT NULL DEFAULT '',
            published_date TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            topic TEXT NOT NULL,
            created_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create articles table")?;

    Ok(())
}

/// Replace the stored selection with `articles`, keeping their order.
pub async fn replace_articles(pool: &SqlitePool, articles: &[Article]) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query("DELETE FROM articles")
        .execute(&mut tx)
        .await
        .context("failed to clear articles")?;

    let now = Utc::now();
    for article in articles {
        sqlx::query(
            r#"
            INSERT INTO articles (title, url, publisher, published_date, text, topic, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&article.title)
        .bind(&article.url)
        .bind(&article.publisher)
        .bind(&article.published_date)
        .bind(&article.text)
        .bind(&article.topic)
        .bind(now)
        .execute(&mut tx)
        .await
        .with_context(|| format!("failed to insert article {}", article.url))?;
    }

    tx.commit().await.context("failed to commit articles")?;
    info!("storage: saved {} articles", articles.len());
    Ok(())
}

/// All stored articles in insertion order.
pub async fn load_articles(pool: &SqlitePool) -> Result<Vec<Article>> {
    sqlx::query_as::<_, Article>(
        "SELECT title, url, publisher, published_date, text, topic FROM articles ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .context("failed to load articles")
}

/// Stored articles whose URL is in `urls`, in table order.
pub async fn load_articles_by_urls(pool: &SqlitePool, urls: &[String]) -> Result<Vec<Article>> {
    let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
    let mut articles = load_articles(pool).await?;
    articles.retain(|a| wanted.contains(a.url.as_str()));
    Ok(articles)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory sqlite pool");
    ensure_schema(&pool).await.expect("ensure schema");
    pool
}
