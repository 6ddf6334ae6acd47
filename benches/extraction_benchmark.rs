//! Benchmarks for Tarnhelm extraction and caching

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::net::{IpAddr, Ipv4Addr};
use tarnhelm::{
    cache::ResolutionCache,
    tools::{fetch, search},
};

fn create_results_page(result_count: usize) -> String {
    let blocks: String = (0..result_count)
        .map(|i| {
            format!(
                r#"<div class="result results_links web-result">
                    <h2 class="result__title">
                        <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample{i}.com%2Fpage&rut=x">Test Result {i}</a>
                    </h2>
                    <a class="result__snippet">This is test result number {i} with some description text</a>
                </div>"#
            )
        })
        .collect();
    format!("<html><body><div id=\"links\">{blocks}</div></body></html>")
}

fn create_article_page(paragraphs: usize) -> String {
    let body: String = (0..paragraphs)
        .map(|i| format!("<p>Paragraph {i} of the article, with   uneven   spacing.</p>\n"))
        .collect();
    format!(
        "<html><head><style>p {{ margin: 0; }}</style></head><body>\
         <header>Site</header><nav><a href=\"/\">Home</a></nav>\
         <article>{body}</article><script>track();</script><footer>Legal</footer>\
         </body></html>"
    )
}

fn bench_search_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_parsing");

    for size in [1, 10, 30].iter() {
        let html = create_results_page(*size);

        group.bench_with_input(BenchmarkId::new("parse_results", size), &html, |b, html| {
            b.iter(|| search::parse_search_results(black_box(html), 10));
        });

        let results = search::parse_search_results(&html, *size);
        group.bench_with_input(
            BenchmarkId::new("format_results", size),
            &results,
            |b, results| {
                b.iter(|| search::format_results(black_box("test query"), black_box(results)));
            },
        );
    }

    group.finish();
}

fn bench_content_cleaning(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_cleaning");

    for size in [10, 100, 1000].iter() {
        let html = create_article_page(*size);

        group.bench_with_input(BenchmarkId::new("clean_page_text", size), &html, |b, html| {
            b.iter(|| fetch::truncate_content(&fetch::clean_page_text(black_box(html))));
        });
    }

    group.finish();
}

fn bench_resolution_cache(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

    let mut group = c.benchmark_group("resolution_cache");

    group.bench_function("cache_get_hit", |b| {
        let cache = ResolutionCache::new();
        runtime.block_on(cache.set("html.duckduckgo.com", ip));

        b.to_async(&runtime)
            .iter(|| async { cache.get(black_box("html.duckduckgo.com")).await });
    });

    group.bench_function("cache_set_existing", |b| {
        let cache = ResolutionCache::new();
        runtime.block_on(cache.set("html.duckduckgo.com", ip));

        b.to_async(&runtime)
            .iter(|| async { cache.set(black_box("html.duckduckgo.com"), ip).await });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_search_parsing,
    bench_content_cleaning,
    bench_resolution_cache
);
criterion_main!(benches);
