use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use study_rag::embeddings::chunking::{ChunkingConfig, split};
use uuid::Uuid;

fn lecture_notes(sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Sentence {} covers cell division, osmotic pressure and the role of enzyme {} in metabolism.",
                i,
                i % 17
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let text = lecture_notes(2_000);
    let document_id = Uuid::new_v4();

    let config = ChunkingConfig::default();
    c.bench_function("chunking", |b| {
        b.iter(|| split(document_id, black_box(&text), black_box(&config)))
    });

    let no_overlap = ChunkingConfig::new(config.max_tokens, 0);
    c.bench_function("chunking_no_overlap", |b| {
        b.iter(|| split(document_id, black_box(&text), black_box(&no_overlap)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
