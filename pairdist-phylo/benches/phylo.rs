use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pairdist_phylo::{
    bionj, create_model, fast_distances, ml_distances, newick, DistanceOptions, GammaRates,
    TreeLikelihood,
};
use pairdist_seq::{Alignment, DataType};

fn random_alignment(n: usize, len: usize, seed: u64) -> Alignment {
    let mut state = seed;
    let mut next = || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        (state >> 33) as usize
    };
    let ancestor: Vec<u8> = (0..len).map(|_| b"ACGT"[next() % 4]).collect();
    let pairs: Vec<(String, Vec<u8>)> = (0..n)
        .map(|i| {
            let seq = ancestor
                .iter()
                .map(|&b| if next() % 10 == 0 { b"ACGT"[next() % 4] } else { b })
                .collect();
            (format!("t{}", i), seq)
        })
        .collect();
    Alignment::from_pairs(pairs, DataType::Dna).expect("valid alignment")
}

fn bench_distances(c: &mut Criterion) {
    let mut group = c.benchmark_group("distances");
    let aln = random_alignment(50, 1_000, 42);
    let opts = DistanceOptions::default();

    group.bench_function("fast_50x1k", |b| {
        b.iter(|| fast_distances(black_box(&aln), &opts))
    });

    let small = random_alignment(10, 500, 7);
    let model = create_model("HKY85").unwrap();
    let rates = GammaRates::new(4, 0.5).unwrap();
    group.bench_function("ml_10x500_hky_g4", |b| {
        b.iter(|| ml_distances(black_box(&small), model.as_ref(), &rates, &opts))
    });

    group.finish();
}

fn bench_bionj(c: &mut Criterion) {
    let mut group = c.benchmark_group("bionj");
    let aln = random_alignment(200, 300, 137);
    let est = fast_distances(&aln, &DistanceOptions::default());

    group.bench_function("200_taxa", |b| {
        b.iter(|| bionj(black_box(&est.distances), Some(&est.variances)))
    });

    group.finish();
}

fn bench_likelihood(c: &mut Criterion) {
    let mut group = c.benchmark_group("likelihood");
    let aln = random_alignment(30, 1_000, 99);
    let est = fast_distances(&aln, &DistanceOptions::default());
    let tree = bionj(&est.distances, Some(&est.variances)).unwrap();
    let text = newick::write(&tree);
    let tree = newick::parse(&text).unwrap();
    let lik = TreeLikelihood::new(&tree, &aln).unwrap();
    let model = create_model("GTR").unwrap();
    let rates = GammaRates::new(4, 0.5).unwrap();

    group.bench_function("30x1k_gtr_g4", |b| {
        b.iter(|| lik.log_likelihood(black_box(model.as_ref()), &rates))
    });

    let branch = lik.branches()[1];
    group.bench_function("branch_function", |b| {
        b.iter(|| lik.branch_function(model.as_ref(), &rates, black_box(branch)))
    });

    group.finish();
}

criterion_group!(benches, bench_distances, bench_bionj, bench_likelihood);
criterion_main!(benches);
