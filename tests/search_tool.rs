//! Formatting properties of the search tool

use proptest::prelude::*;
use std::sync::Arc;

use veille_cli::config::SearchConfig;
use veille_cli::search::{no_results_message, SearchTool, StaticSearchProvider, TextHit};

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

fn tool(hits: Vec<TextHit>) -> SearchTool {
    SearchTool::new(
        Arc::new(StaticSearchProvider::with_text(hits)),
        &SearchConfig::default(),
    )
}

fn hit_strategy() -> impl Strategy<Value = TextHit> {
    let word = "[A-Za-zéèà0-9]{1,12}( [A-Za-z0-9]{1,12}){0,3}";
    (word, "https://[a-z]{1,10}\\.fr/[a-z0-9]{0,8}", word).prop_map(|(title, href, body)| {
        TextHit { title, href, body }
    })
}

proptest! {
    #[test]
    fn one_block_per_record_in_provider_order(hits in prop::collection::vec(hit_strategy(), 1..10)) {
        let output = block_on(tool(hits.clone()).search("requête"))
            .unwrap();

        let expected: Vec<String> = hits
            .iter()
            .map(|h| format!("Title: {}\nURL: {}\nDescription: {}", h.title, h.href, h.body))
            .collect();
        prop_assert_eq!(&output, &expected.join("\n\n"));
        prop_assert_eq!(output.matches("Title: ").count(), hits.len());
        prop_assert!(!output.ends_with('\n'));
        prop_assert!(!output.ends_with(' '));
    }

    #[test]
    fn same_records_give_identical_output(
        hits in prop::collection::vec(hit_strategy(), 0..10),
        query in "[a-z ]{1,30}",
    ) {
        let tool = tool(hits);
        let first = block_on(tool.search(&query)).unwrap();
        let second = block_on(tool.search(&query)).unwrap();
        prop_assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn no_records_gives_the_fallback(query in "[a-zA-Zé ]{1,40}") {
        let output = block_on(tool(Vec::new()).search(&query)).unwrap();
        prop_assert_eq!(&output, &no_results_message(&query));
        prop_assert!(output.contains(query.as_str()));
    }
}

#[test]
fn fallback_wording() {
    assert_eq!(
        no_results_message("voitures"),
        "N'a pas pu trouver de résultat à propos de voitures."
    );
}

#[test]
fn results_are_capped_at_configured_maximum() {
    let hits: Vec<TextHit> = (0..12)
        .map(|i| TextHit {
            title: format!("r{}", i),
            href: "http://x".to_string(),
            body: "b".to_string(),
        })
        .collect();
    let output = block_on(tool(hits).search("q")).unwrap();
    assert_eq!(output.matches("Title: ").count(), 10);
    assert!(output.starts_with("Title: r0\n"));
}
