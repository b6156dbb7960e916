//! Markdown digest rendering.
//!
//! Records are grouped by category under a dated heading. A record whose
//! summarization failed still appears (its title and link are real news);
//! it simply carries no summary paragraph.
//!
//! # Output Structure
//!
//! ```text
//! digest_output_dir/
//! └── news_2025-05-06.md
//! ```

use crate::models::NewsRecord;
use itertools::Itertools;
use std::error::Error;
use tokio::fs;
use tracing::{info, instrument};

/// Render one run's records as a category-grouped Markdown digest.
pub fn render_digest(records: &[NewsRecord], date: &str) -> String {
    let mut digest = format!("# News Digest — {date}\n");

    let by_category = records
        .iter()
        .map(|record| (record.category.clone(), record))
        .into_group_map();

    for category in by_category.keys().sorted() {
        digest.push_str(&format!("\n## {category}\n"));
        for record in &by_category[category] {
            match &record.link {
                Some(link) => digest.push_str(&format!("\n### [{}]({})\n", record.title, link)),
                None => digest.push_str(&format!("\n### {}\n", record.title)),
            }
            digest.push_str(&format!("\n*{}*\n", record.source));
            if let Some(summary) = &record.summary {
                digest.push_str(&format!("\n{summary}\n"));
            }
        }
    }

    digest
}

/// Write the digest file for `date` under `output_dir`, returning its path.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_digest(
    records: &[NewsRecord],
    output_dir: &str,
    date: &str,
) -> Result<String, Box<dyn Error>> {
    let digest = render_digest(records, date);
    fs::create_dir_all(output_dir).await?;
    let path = format!("{}/news_{}.md", output_dir.trim_end_matches('/'), date);
    fs::write(&path, digest).await?;
    info!(path = %path, records = records.len(), "Wrote Markdown digest");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SummaryState;
    use chrono::Utc;

    fn record(category: &str, title: &str, summary: Option<&str>) -> NewsRecord {
        NewsRecord {
            id: 1,
            title: title.to_string(),
            link: Some(format!("https://example.test/{}", title.to_lowercase())),
            source: "TestSite".to_string(),
            category: category.to_string(),
            fingerprint: "fp".to_string(),
            summary: summary.map(|s| s.to_string()),
            summary_state: if summary.is_some() {
                SummaryState::Summarized
            } else {
                SummaryState::Failed
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn groups_by_category_in_sorted_order() {
        let records = vec![
            record("ROBOTICS", "Arms", Some("robot arms improved")),
            record("AI", "Models", Some("models got bigger")),
            record("ROBOTICS", "Legs", Some("robot legs too")),
        ];

        let digest = render_digest(&records, "2025-05-06");
        let ai = digest.find("## AI").unwrap();
        let robotics = digest.find("## ROBOTICS").unwrap();
        assert!(ai < robotics);
        assert!(digest.contains("# News Digest — 2025-05-06"));
        assert!(digest.contains("[Arms](https://example.test/arms)"));
        assert!(digest.contains("robot legs too"));
    }

    #[test]
    fn failed_summary_falls_back_to_the_title_alone() {
        let records = vec![record("AI", "Mystery", None)];
        let digest = render_digest(&records, "2025-05-06");
        assert!(digest.contains("[Mystery]"));
        // no summary paragraph, but the entry is present with its source
        assert!(digest.contains("*TestSite*"));
    }

    #[test]
    fn empty_run_renders_just_the_header() {
        let digest = render_digest(&[], "2025-05-06");
        assert_eq!(digest.trim(), "# News Digest — 2025-05-06");
    }

    #[tokio::test]
    async fn write_digest_creates_the_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("AI", "Models", Some("summary"))];

        let path = write_digest(&records, dir.path().to_str().unwrap(), "2025-05-06")
            .await
            .unwrap();
        assert!(path.ends_with("news_2025-05-06.md"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("## AI"));
    }
}
