//! Benchmarks for extraction and scoring.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gleaner::extract::{Extractor, RelevanceScorer};

fn sample_page(paragraphs: usize) -> String {
    let mut html = String::from(
        "<html><head><title>Graduate funding</title><script>var x = 1;</script></head><body>\
         <nav><a href=\"/\">Home</a><a href=\"/about\">About</a></nav><main>",
    );
    for i in 0..paragraphs {
        html.push_str(&format!(
            "<p>Fully funded scholarship {i} for international students in computer science. \
             <a href=\"/programs/{i}\">Programme {i}</a> \
             <a href=\"https://partner.example.org/{i}\">Partner {i}</a></p>"
        ));
    }
    html.push_str("</main><footer>Contact</footer></body></html>");
    html
}

fn extract_benchmark(c: &mut Criterion) {
    let extractor = Extractor::default();
    let small = sample_page(10);
    let large = sample_page(500);

    c.bench_function("extract_small", |b| {
        b.iter(|| extractor.extract(black_box(&small), "https://uni.test/funding"))
    });
    c.bench_function("extract_large", |b| {
        b.iter(|| extractor.extract(black_box(&large), "https://uni.test/funding"))
    });
}

fn score_benchmark(c: &mut Criterion) {
    let scorer = RelevanceScorer::default();
    let text = Extractor::default()
        .extract(&sample_page(500), "https://uni.test/funding")
        .text;

    c.bench_function("score_large", |b| b.iter(|| scorer.score(black_box(&text))));
}

criterion_group!(benches, extract_benchmark, score_benchmark);
criterion_main!(benches);
