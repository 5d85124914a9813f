use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static AUTHOR: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[name="author"], meta[property="article:author"]"#));
static PUBLISHED: Lazy<Selector> =
    Lazy::new(|| selector(r#"meta[property="article:published_time"]"#));
static ARTICLE_PARAGRAPHS: Lazy<Selector> = Lazy::new(|| selector("article p"));
static PARAGRAPHS: Lazy<Selector> = Lazy::new(|| selector("p"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedArticle {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub text: String,
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .filter_map(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pull title, author, date and paragraph text out of an article page.
/// Paragraphs inside `<article>` win over page-wide paragraphs.
pub fn extract(html: &str) -> ExtractedArticle {
    let doc = Html::parse_document(html);

    let title = meta_content(&doc, &OG_TITLE).or_else(|| {
        doc.select(&TITLE)
            .next()
            .map(|t| normalize_whitespace(&t.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    });
    let author = meta_content(&doc, &AUTHOR);
    let publish_date = meta_content(&doc, &PUBLISHED).map(|d| d.chars().take(10).collect());

    let collect = |sel: &Selector| -> Vec<String> {
        doc.select(sel)
            .map(|p| normalize_whitespace(&p.text().collect::<String>()))
            .filter(|p| !p.is_empty())
            .collect()
    };
    let mut paragraphs = collect(&ARTICLE_PARAGRAPHS);
    if paragraphs.is_empty() {
        paragraphs = collect(&PARAGRAPHS);
    }

    ExtractedArticle {
        title,
        author,
        publish_date,
        text: paragraphs.join("\n\n"),
    }
}

pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

/// First `max_sentences` sentences of `text`.
pub fn summarize(text: &str, max_sentences: usize) -> String {
    let mut out = String::new();
    let mut taken = 0;
    for sentence in text.split_inclusive(['.', '!', '?']) {
        if taken == max_sentences {
            break;
        }
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(sentence);
        taken += 1;
    }
    out
}

/// An article is kept only when its body is long enough and longer than its summary.
pub fn is_substantial(text: &str, summary: &str, min_words: usize) -> bool {
    let text_words = word_count(text.trim());
    text_words >= min_words && text_words > word_count(summary.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>Fallback Title</title>
        <meta property="og:title" content="Rust 2.0 Announced">
        <meta name="author" content="Jane Doe">
        <meta property="article:published_time" content="2026-10-16T08:30:00Z">
        </head><body>
        <nav><p>Home</p></nav>
        <article><p>First   paragraph here.</p><p>Second one!</p></article>
        </body></html>"#;

    #[test]
    fn extracts_metadata_and_article_paragraphs() {
        let a = extract(PAGE);
        assert_eq!(a.title.as_deref(), Some("Rust 2.0 Announced"));
        assert_eq!(a.author.as_deref(), Some("Jane Doe"));
        assert_eq!(a.publish_date.as_deref(), Some("2026-10-16"));
        assert_eq!(a.text, "First paragraph here.\n\nSecond one!");
    }

    #[test]
    fn falls_back_to_page_paragraphs_and_title() {
        let a = extract("<html><head><title> Plain </title></head><body><p>Only text.</p></body></html>");
        assert_eq!(a.title.as_deref(), Some("Plain"));
        assert_eq!(a.text, "Only text.");
        assert!(a.author.is_none());
    }

    #[test]
    fn summary_takes_leading_sentences() {
        let text = "One. Two! Three? Four.";
        assert_eq!(summarize(text, 2), "One. Two!");
        assert_eq!(summarize(text, 10), "One. Two! Three? Four.");
    }

    #[test]
    fn substantial_requires_min_words_and_longer_than_summary() {
        let body = "word ".repeat(60);
        assert!(is_substantial(&body, "short summary", 50));
        assert!(!is_substantial("too short", "", 50));
        assert!(!is_substantial(&body, &body, 50));
    }
}
