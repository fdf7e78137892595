//! Rendering of command results

use marquee_catalog::{CatalogMetrics, Movie, MoviePage, TrendingFeed};
use serde::Serialize;
use std::fmt::Write;

/// Result of one command
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    /// Popular or search results
    Page(MoviePage),
    /// A single movie
    Movie(Movie),
    /// Trending feed
    Trending(TrendingFeed),
    /// Client metrics
    Metrics(CatalogMetrics),
}

impl CommandOutput {
    /// Render as pretty JSON or as plain text
    pub fn render(&self, json: bool) -> serde_json::Result<String> {
        if json {
            serde_json::to_string_pretty(self)
        } else {
            Ok(self.to_text())
        }
    }

    /// Plain-text rendering
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Page(page) => {
                if page.items.is_empty() {
                    out.push_str("No results.\n");
                }
                for movie in &page.items {
                    let _ = writeln!(out, "{}", movie_line(movie));
                }
                if page.total_pages > 0 {
                    let _ = writeln!(out, "Page {} of {}", page.current_page, page.total_pages);
                }
            }
            Self::Movie(movie) => {
                let _ = writeln!(out, "{}", movie_line(movie));
                if let Some(url) = &movie.asset_url {
                    let _ = writeln!(out, "Poster: {url}");
                }
            }
            Self::Trending(feed) => {
                for movie in &feed.items {
                    let marker = if feed.new_item_ids.contains(&movie.id) {
                        " [new]"
                    } else {
                        ""
                    };
                    let _ = writeln!(out, "{}{marker}", movie_line(movie));
                }
                if feed.is_stale {
                    out.push_str("(showing cached results, refreshing)\n");
                }
            }
            Self::Metrics(metrics) => {
                let breaker = &metrics.circuit_breaker;
                let _ = writeln!(
                    out,
                    "Circuit breaker: {:?} ({} consecutive failures)",
                    breaker.state, breaker.consecutive_failures
                );
                for (name, stats) in [
                    ("Page cache", &metrics.page_cache),
                    ("Detail cache", &metrics.detail_cache),
                    ("Prefetch store", &metrics.prefetch_cache),
                ] {
                    let _ = writeln!(
                        out,
                        "{name}: {} entries, {} bytes, {} hits, {} misses, {:.1}% hit rate",
                        stats.entry_count,
                        stats.size_bytes,
                        stats.hits,
                        stats.misses,
                        stats.hit_rate * 100.0
                    );
                }
                let _ = writeln!(out, "Pending requests: {}", metrics.pending_keys.len());
            }
        }
        out
    }
}

fn movie_line(movie: &Movie) -> String {
    format!(
        "{:>8}  {} ({})  {:.1}/5",
        movie.id, movie.title, movie.year, movie.rating
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use marquee_catalog::MovieId;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn movie(id: u64, title: &str) -> Movie {
        Movie {
            id: MovieId::from(id),
            title: title.to_string(),
            year: "1982".to_string(),
            rating: 4.0,
            poster_path: Some("/br.jpg".to_string()),
            asset_url: Some("https://image.tmdb.org/t/p/w780/br.jpg".to_string()),
        }
    }

    #[test]
    fn test_page_text() {
        let output = CommandOutput::Page(MoviePage {
            items: vec![movie(78, "Blade Runner")],
            total_pages: 3,
            current_page: 1,
        });
        assert_eq!(
            output.to_text(),
            "      78  Blade Runner (1982)  4.0/5\nPage 1 of 3\n"
        );
    }

    #[test]
    fn test_empty_page_text() {
        let output = CommandOutput::Page(MoviePage::empty(1));
        assert_eq!(output.to_text(), "No results.\n");
    }

    #[test]
    fn test_trending_marks_new_items() {
        let output = CommandOutput::Trending(TrendingFeed {
            items: vec![movie(1, "Old"), movie(2, "Fresh")],
            new_item_ids: vec![MovieId::from(2)],
            is_stale: false,
            last_error: None,
            fetched_at_age: Duration::from_secs(1),
        });
        let text = output.to_text();
        assert!(text.contains("Old (1982)  4.0/5\n"));
        assert!(text.contains("Fresh (1982)  4.0/5 [new]\n"));
    }

    #[test]
    fn test_movie_json() {
        let output = CommandOutput::Movie(movie(78, "Blade Runner"));
        let json: serde_json::Value = serde_json::from_str(&output.render(true).unwrap()).unwrap();
        assert_eq!(json["id"], "78");
        assert_eq!(json["asset_url"], "https://image.tmdb.org/t/p/w780/br.jpg");
    }
}
