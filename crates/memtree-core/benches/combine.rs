use criterion::{Criterion, black_box, criterion_group, criterion_main};
use memtree_core::{Memory, combine_embeddings, normalize};

fn memories(n: usize, dim: usize) -> Vec<Memory> {
    (0..n)
        .map(|i| {
            let mut m = Memory::new(format!("m{i}"), "", "", i as i64);
            m.prompt_embedding = Some((0..dim).map(|d| ((i * 31 + d) % 97) as f32).collect());
            m.response_embedding = Some((0..dim).map(|d| ((i * 17 + d) % 89) as f32).collect());
            m
        })
        .collect()
}

fn bench_combine(c: &mut Criterion) {
    let short_term = memories(20, 1536);
    c.bench_function("combine_embeddings_20x1536", |b| {
        b.iter(|| combine_embeddings(black_box(&short_term)))
    });

    let v: Vec<f32> = (0..1536).map(|d| d as f32).collect();
    c.bench_function("normalize_1536", |b| b.iter(|| normalize(black_box(v.clone()))));
}

criterion_group!(benches, bench_combine);
criterion_main!(benches);
