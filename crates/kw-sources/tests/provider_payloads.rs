use kw_sources::{parse_global_quote, parse_news_api, parse_serpapi, SourceError};
use serde_json::json;

#[test]
fn news_api_articles_are_normalized() {
    let body = json!({
        "status": "ok",
        "totalResults": 2,
        "articles": [
            {
                "source": {"id": null, "name": "Wire"},
                "title": "Markets rally",
                "description": "Stocks rose. Investors cheered.",
                "url": "https://example.com/rally",
                "urlToImage": "https://example.com/rally.png",
                "publishedAt": "2026-10-18T09:00:00Z"
            },
            {"title": null, "description": null, "url": null}
        ]
    });

    let articles = parse_news_api(&body).unwrap();
    assert_eq!(articles.len(), 2);
    assert_eq!(articles[0].title, "Markets rally");
    assert_eq!(articles[0].url_to_image.as_deref(), Some("https://example.com/rally.png"));
    assert_eq!(articles[0].published_at.as_deref(), Some("2026-10-18T09:00:00Z"));
    assert_eq!(articles[1].title, "");
    assert!(articles[1].description.is_none());
}

#[test]
fn news_api_error_payload_carries_message() {
    let body = json!({"status": "error", "code": "apiKeyInvalid", "message": "Your API key is invalid."});
    match parse_news_api(&body) {
        Err(SourceError::Api { source_id, message }) => {
            assert_eq!(source_id, "newsapi");
            assert_eq!(message, "Your API key is invalid.");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[test]
fn global_quote_maps_numbered_fields() {
    let body = json!({
        "Global Quote": {
            "01. symbol": "AAPL",
            "02. open": "149.00",
            "05. price": "150.00",
            "07. latest trading day": "2026-10-16",
            "09. change": "+1.00",
            "10. change percent": "0.6711%"
        }
    });

    let quote = parse_global_quote(&body).unwrap();
    assert_eq!(quote.symbol, "AAPL");
    assert_eq!(quote.price.as_deref(), Some("150.00"));
    assert_eq!(quote.change.as_deref(), Some("+1.00"));
    assert_eq!(quote.change_percent.as_deref(), Some("0.6711%"));
    assert_eq!(quote.latest_trading_day.as_deref(), Some("2026-10-16"));
}

#[test]
fn empty_or_throttled_quote_is_none() {
    assert!(parse_global_quote(&json!({"Global Quote": {}})).is_none());
    assert!(parse_global_quote(&json!({"Note": "Thank you for using Alpha Vantage!"})).is_none());
}

#[test]
fn serpapi_results_and_errors() {
    let body = json!({
        "search_metadata": {"status": "Success"},
        "organic_results": [
            {"position": 1, "title": "Rust", "link": "https://www.rust-lang.org", "snippet": "A language."},
            {"position": 2, "title": "Crates", "link": "https://crates.io"}
        ]
    });
    let results = parse_serpapi(&body).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].snippet.as_deref(), Some("A language."));
    assert!(results[1].snippet.is_none());

    let err = parse_serpapi(&json!({"error": "Invalid API key."})).unwrap_err();
    assert_eq!(err.to_string(), "serpapi: Invalid API key.");

    assert!(parse_serpapi(&json!({})).unwrap().is_empty());
}
