use ndarray::array;

use super::*;
use crate::{data::SparseColumns, RgfError};

/// x0 <= 0.5 ? 1.0 : (x1 <= 2.0 ? -2.0 : 3.0)
fn stump_pair() -> Ensemble {
    let tree = ModelTree::new(vec![
        ModelNode {
            depth: 0,
            parent: None,
            children: Some((1, 2)),
            feature: Some(0),
            threshold: 0.5,
            weight: 0.0,
        },
        ModelNode {
            depth: 1,
            parent: Some(0),
            children: None,
            feature: None,
            threshold: 0.0,
            weight: 1.0,
        },
        ModelNode {
            depth: 1,
            parent: Some(0),
            children: Some((3, 4)),
            feature: Some(1),
            threshold: 2.0,
            weight: 0.0,
        },
        ModelNode {
            depth: 2,
            parent: Some(2),
            children: None,
            feature: None,
            threshold: 0.0,
            weight: -2.0,
        },
        ModelNode {
            depth: 2,
            parent: Some(2),
            children: None,
            feature: None,
            threshold: 0.0,
            weight: 3.0,
        },
    ]);
    let single = ModelTree::new(vec![ModelNode {
        depth: 0,
        parent: None,
        children: None,
        feature: None,
        threshold: 0.0,
        weight: 0.25,
    }]);
    Ensemble {
        trees: vec![tree, single],
        bias: 0.5,
        feature_count: 2,
        config: "loss=squared,lambda=0.01".to_string(),
        signature: "rgf test".to_string(),
    }
}

#[test]
fn test_predict_routes_points() {
    let model = stump_pair();
    let x = array![[0.0, 9.0], [1.0, 1.0], [1.0, 2.5], [0.5, 0.0]];
    let y_hat = model.predict(x.view());
    assert_eq!(y_hat, array![1.75, -1.25, 3.75, 1.75]);

    let sparse = SparseColumns::from_dense(x.view());
    assert_eq!(model.predict_source(&sparse), y_hat);
    assert_eq!(model.predict_row(&[(0, 1.0), (1, 3.0)]), 3.75);
    assert_eq!(model.leaf_count(), 4);
}

#[test]
fn test_binary_round_trip_is_exact() {
    let mut model = stump_pair();
    model.trees[0].nodes[3].weight = 0.1 + 0.2;
    model.bias = -1.0 / 3.0;
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    assert_eq!(&bytes[..4], b"RGFM");

    let back = Ensemble::read_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(back, model);
    assert_eq!(back.bias.to_bits(), model.bias.to_bits());
}

#[test]
fn test_empty_ensemble_round_trip() {
    let model = Ensemble {
        trees: vec![],
        bias: 0.0,
        feature_count: 0,
        config: String::new(),
        signature: String::new(),
    };
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    assert_eq!(Ensemble::read_from(&mut bytes.as_slice()).unwrap(), model);
}

#[test]
fn test_bad_magic_and_version() {
    let mut bytes = Vec::new();
    stump_pair().write_to(&mut bytes).unwrap();

    let mut wrong_magic = bytes.clone();
    wrong_magic[0] = b'X';
    assert!(matches!(
        Ensemble::read_from(&mut wrong_magic.as_slice()),
        Err(RgfError::Format(_))
    ));

    let mut wrong_version = bytes.clone();
    wrong_version[4] = 9;
    assert!(matches!(
        Ensemble::read_from(&mut wrong_version.as_slice()),
        Err(RgfError::Format(_))
    ));
}

#[test]
fn test_truncated_file_is_an_error() {
    let mut bytes = Vec::new();
    stump_pair().write_to(&mut bytes).unwrap();
    bytes.truncate(bytes.len() - 3);
    assert!(Ensemble::read_from(&mut bytes.as_slice()).is_err());
}

#[test]
fn test_structural_validation() {
    let mut model = stump_pair();
    // child pointing at a lower id
    model.trees[0].nodes[2].children = Some((1, 4));
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    assert!(matches!(
        Ensemble::read_from(&mut bytes.as_slice()),
        Err(RgfError::Format(_))
    ));

    let mut model = stump_pair();
    model.trees[0].nodes[1].feature = Some(1);
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    assert!(matches!(
        Ensemble::read_from(&mut bytes.as_slice()),
        Err(RgfError::Format(_))
    ));

    let mut model = stump_pair();
    model.trees[0].nodes[0].feature = Some(5);
    let mut bytes = Vec::new();
    model.write_to(&mut bytes).unwrap();
    assert!(matches!(
        Ensemble::read_from(&mut bytes.as_slice()),
        Err(RgfError::Format(_))
    ));
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.rgf");
    let model = stump_pair();
    model.save(&path).unwrap();
    assert_eq!(Ensemble::load(&path).unwrap(), model);
    assert!(matches!(
        Ensemble::load(dir.path().join("missing.rgf")),
        Err(RgfError::Io(_))
    ));
}
