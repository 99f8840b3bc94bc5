use serde::{Deserialize, Serialize};

/// A discovered article. `text` is absent when extraction failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub title: String,
    pub url: String,
    pub publisher: String,
    pub published_date: String,
    pub text: Option<String>,
    pub topic: String,
}

impl CandidateItem {
    /// Keep the item only if it carries non-empty text.
    pub fn into_article(self) -> Option<Article> {
        let text = self.text.filter(|t| !t.trim().is_empty())?;
        Some(Article {
            title: self.title,
            url: self.url,
            publisher: self.publisher,
            published_date: self.published_date,
            text,
            topic: self.topic,
        })
    }
}

/// An article with extracted text, as persisted in the `articles` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub publisher: String,
    pub published_date: String,
    pub text: String,
    pub topic: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: Option<&str>) -> CandidateItem {
        CandidateItem {
            title: "Title".to_string(),
            url: "https://example.com/a".to_string(),
            publisher: "Example".to_string(),
            published_date: "Mon, 13 Oct 2025 08:00:00 +0000".to_string(),
            text: text.map(String::from),
            topic: "technology".to_string(),
        }
    }

    #[test]
    fn test_into_article_requires_text() {
        assert!(candidate(None).into_article().is_none());
        assert!(candidate(Some("   \n")).into_article().is_none());
        let article = candidate(Some("Body")).into_article().unwrap();
        assert_eq!(article.text, "Body");
        assert_eq!(article.topic, "technology");
    }
}
