//! Pure assembly of report documents from a request.

use kw_core::{summarize, NewsItem, ReportOutline, ReportRequest, StockSnapshot, SummaryLimit};

/// Character budget for per-item news summaries.
pub const NEWS_SUMMARY_CHARS: usize = 250;

/// Width of the rule printed under the title.
const RULE_WIDTH: usize = 40;

const MISSING: &str = "n/a";

/// Lay out a manual report. Calling it twice on the same request yields the
/// same outline.
pub fn build_outline(request: &ReportRequest) -> ReportOutline {
    let mut outline = ReportOutline::default();

    outline.push_line(request.display_title());
    outline.push_line("=".repeat(RULE_WIDTH));
    outline.push_line("");

    push_news(&mut outline, &request.news);
    if let Some(stock) = &request.stock {
        push_stock(&mut outline, stock);
    }
    push_uploads(&mut outline, &request.uploads);

    if let Some(notes) = request.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        outline.push_line("Notes:");
        outline.push_line(notes);
        outline.push_line("");
    }

    outline
}

fn push_news(outline: &mut ReportOutline, news: &[NewsItem]) {
    if news.is_empty() {
        outline.push_line("No news included.");
        outline.push_line("");
        return;
    }

    outline.push_line("News:");
    for (idx, item) in news.iter().enumerate() {
        outline.push_line(format!("{}. {}", idx + 1, item.title));

        let source = item
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&item.title);
        let summary = summarize(source, SummaryLimit::Chars(NEWS_SUMMARY_CHARS));
        if !summary.is_empty() {
            outline.push_line(format!("   Summary: {summary}"));
            outline.push_insight(summary);
        }
        if let Some(url) = &item.url {
            outline.push_line(format!("   Link: {url}"));
        }
        outline.push_line("");
    }
}

fn push_stock(outline: &mut ReportOutline, stock: &StockSnapshot) {
    outline.push_line("Stock:");
    outline.push_line(format!("Symbol: {}", stock.symbol));
    if let Some(price) = &stock.price {
        outline.push_line(format!(
            "Price: {price} ({} / {})",
            stock.change.as_deref().unwrap_or(MISSING),
            stock.change_percent.as_deref().unwrap_or(MISSING),
        ));
        let insight = format!(
            "Stock {}: {price} {}",
            stock.symbol,
            stock.change_percent.as_deref().unwrap_or_default()
        );
        outline.push_insight(insight.trim_end());
    }
    outline.push_line("");
}

fn push_uploads(outline: &mut ReportOutline, uploads: &[String]) {
    if uploads.is_empty() {
        outline.push_line("No uploads included.");
    } else {
        outline.push_line("Uploads included:");
        for name in uploads {
            outline.push_line(format!(" - {name}"));
        }
    }
    outline.push_line("");
}

/// Headline summary for the quick report: the first two titles as sentences.
pub fn quick_summary(news: &[NewsItem]) -> String {
    let joined = news
        .iter()
        .map(|item| item.title.trim().trim_end_matches('.').trim_end())
        .filter(|title| !title.is_empty())
        .collect::<Vec<_>>()
        .join(". ");
    summarize(&joined, SummaryLimit::Sentences(2))
}

/// Lay out the quick project report: top five headlines, the stock line and
/// caller-supplied insights.
pub fn build_quick_outline(
    news: &[NewsItem],
    stock: Option<&StockSnapshot>,
    insights: &[String],
) -> ReportOutline {
    let mut outline = ReportOutline::default();
    outline.push_line("Project Report");
    outline.push_line("=".repeat(RULE_WIDTH));
    outline.push_line("");

    outline.push_line("News Summary:");
    if news.is_empty() {
        outline.push_line("No news included.");
    }
    for item in news.iter().take(5) {
        outline.push_line(format!("- {}", item.title));
    }
    outline.push_line("");

    outline.push_line("Stock Summary:");
    match stock {
        Some(stock) => outline.push_line(format!(
            "{} @ {}",
            stock.symbol,
            stock.price.as_deref().unwrap_or(MISSING)
        )),
        None => outline.push_line("No stock data"),
    }
    outline.push_line("");

    outline.push_line("Insights:");
    for insight in insights {
        outline.push_line(format!("- {insight}"));
        outline.push_insight(insight.clone());
    }
    outline.push_line("");
    outline
}
