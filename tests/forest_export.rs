use riskfuse::export::{NodeRow, export_forest, parse_forest};
use riskfuse::ml::forest::{ForestOptions, Node, train_forest};
use riskfuse::ml::{Classifier, TreeStructures};
use riskfuse::telemetry::{FeatureVector, GeneratorConfig, generate};

fn trained() -> (Vec<FeatureVector>, riskfuse::ml::forest::DecisionForest) {
    let samples = generate(&GeneratorConfig {
        group_count: 30,
        seed: 5,
        ..GeneratorConfig::default()
    })
    .unwrap();
    let x: Vec<FeatureVector> = samples.iter().map(|sample| sample.features).collect();
    let y: Vec<usize> = samples.iter().map(|sample| sample.label.index()).collect();
    let options = ForestOptions {
        n_trees: 6,
        seed: 3,
        ..ForestOptions::default()
    };
    let model = train_forest(&x, &y, &options).unwrap();
    (x, model)
}

#[test]
fn exported_forest_predicts_like_the_trained_one() {
    let (x, model) = trained();
    let text = export_forest(model.forest());
    let parsed = parse_forest(&text).unwrap();
    assert_eq!(parsed.trees.len(), 6);
    assert_eq!(parsed.node_count(), model.forest().node_count());

    // Thresholds are written with 6 decimals, so a row sitting right on a split may route
    // differently after the round trip.
    let matching = x
        .iter()
        .filter(|row| {
            let before = model.predict_proba(row.as_ref());
            let after = parsed.predict_proba(row.as_ref());
            before.iter().zip(&after).all(|(a, b)| (a - b).abs() < 1e-5)
        })
        .count();
    assert!(matching * 100 >= x.len() * 99, "{matching} of {}", x.len());
}

#[test]
fn export_layout_is_header_then_preorder_rows() {
    let (_, model) = trained();
    let text = export_forest(model.forest());
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("n_trees 6"));

    for tree in &model.forest().trees {
        assert_eq!(
            lines.next(),
            Some(format!("tree {}", tree.nodes.len()).as_str())
        );
        for (index, node) in tree.nodes.iter().enumerate() {
            let line = lines.next().unwrap();
            assert_eq!(line, NodeRow::from_node(0, index, node).to_string());
            let fields: Vec<&str> = line.split_whitespace().collect();
            assert_eq!(fields.len(), 8);
            match node {
                Node::Leaf { .. } => {
                    assert_eq!(fields[1], "-1");
                    assert_eq!(fields[3], "-1");
                    assert_eq!(fields[4], "-1");
                }
                Node::Split { left, right, .. } => {
                    assert!(left > &index && right > &index);
                }
            }
        }
    }
    assert_eq!(lines.next(), None);
}

#[test]
fn trained_forest_round_trips_node_by_node() {
    let samples = generate(&GeneratorConfig {
        group_count: 60,
        seed: 21,
        ..GeneratorConfig::default()
    })
    .unwrap();
    let x: Vec<FeatureVector> = samples.iter().map(|sample| sample.features).collect();
    let y: Vec<usize> = samples.iter().map(|sample| sample.label.index()).collect();
    let options = ForestOptions {
        n_trees: 16,
        seed: 8,
        ..ForestOptions::default()
    };
    let model = train_forest(&x, &y, &options).unwrap();
    let parsed = parse_forest(&export_forest(model.forest())).unwrap();
    assert_eq!(parsed.trees.len(), model.forest().trees.len());

    let mut leaves = 0usize;
    for (trained, reread) in model.forest().trees.iter().zip(&parsed.trees) {
        assert_eq!(trained.nodes.len(), reread.nodes.len());
        for (before, after) in trained.nodes.iter().zip(&reread.nodes) {
            match (before, after) {
                (Node::Leaf { .. }, Node::Leaf { values }) => {
                    leaves += 1;
                    assert!(values.iter().all(|p| *p >= 0.0), "{values:?}");
                    let sum: f64 = values.iter().sum();
                    assert!((sum - 1.0).abs() <= 1e-4, "leaf sums to {sum}");
                }
                (
                    Node::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    },
                    Node::Split {
                        feature: parsed_feature,
                        threshold: parsed_threshold,
                        left: parsed_left,
                        right: parsed_right,
                    },
                ) => {
                    assert_eq!(feature, parsed_feature);
                    assert_eq!(left, parsed_left);
                    assert_eq!(right, parsed_right);
                    assert!((parsed_threshold - threshold).abs() <= 5e-7 + 1e-12);
                }
                _ => panic!("node kind changed: {before:?} vs {after:?}"),
            }
        }
    }
    assert!(leaves > 16);
}
