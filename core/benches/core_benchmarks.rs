use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_core::handle::Arena;

// ---------------------------------------------------------------------------
// Arena churn
// ---------------------------------------------------------------------------

fn bench_arena_insert_remove(c: &mut Criterion) {
    c.bench_function("arena_insert_remove_1024", |b| {
        let mut arena = Arena::with_capacity(1024);
        b.iter(|| {
            let handles: Vec<_> = (0..1024u32).map(|i| arena.insert(i)).collect();
            for h in handles {
                black_box(arena.remove(h));
            }
        });
    });
}

fn bench_arena_lookup(c: &mut Criterion) {
    let mut arena = Arena::new();
    let handles: Vec<_> = (0..1024u32).map(|i| arena.insert(i)).collect();

    c.bench_function("arena_lookup_1024", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for h in &handles {
                sum += u64::from(*arena.get(*h).unwrap_or(&0));
            }
            black_box(sum)
        });
    });
}

criterion_group!(benches, bench_arena_insert_remove, bench_arena_lookup);
criterion_main!(benches);
