use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use riskfuse::export::export_forest;
use riskfuse::ml::{Classifier, TreeStructures};
use riskfuse::ml::forest::{ForestOptions, train_forest};
use riskfuse::telemetry::{FeatureVector, GeneratorConfig, generate};

const GROUP_COUNT: usize = 120;

fn setup_rows() -> (Vec<FeatureVector>, Vec<usize>) {
    let config = GeneratorConfig {
        group_count: GROUP_COUNT,
        seed: 7,
        ..GeneratorConfig::default()
    };
    let samples = generate(&config).expect("generate");
    let x = samples.iter().map(|sample| sample.features).collect();
    let y = samples.iter().map(|sample| sample.label.index()).collect();
    (x, y)
}

fn bench_forest_fit(c: &mut Criterion) {
    let (x, y) = setup_rows();
    for n_trees in [8usize, 32] {
        let options = ForestOptions {
            n_trees,
            ..ForestOptions::default()
        };
        c.bench_with_input(
            BenchmarkId::new("forest_fit", n_trees),
            &options,
            |b, options| {
                b.iter(|| train_forest(black_box(&x), black_box(&y), options).expect("fit"));
            },
        );
    }
}

fn bench_predict_and_export(c: &mut Criterion) {
    let (x, y) = setup_rows();
    let model = train_forest(&x, &y, &ForestOptions::default()).expect("fit");
    c.bench_function("forest_predict_batch", |b| {
        b.iter(|| model.predict_proba_batch(black_box(&x)));
    });
    c.bench_function("forest_export", |b| {
        b.iter(|| export_forest(black_box(model.forest())));
    });
}

criterion_group!(benches, bench_forest_fit, bench_predict_and_export);
criterion_main!(benches);
