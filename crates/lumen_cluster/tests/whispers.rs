//! Clustering behaviour on synthetic face-like embeddings.

use lumen_cluster::{ChineseWhispers, ClusterError, Metric, WhisperParams};

/// Points scattered tightly around `center`.
fn blob(center: &[f32], count: usize, spread: f32) -> Vec<Vec<f32>> {
    (0..count)
        .map(|i| {
            center
                .iter()
                .enumerate()
                .map(|(d, c)| {
                    let offset = ((i * 7 + d * 3) % 5) as f32 - 2.0;
                    c + offset * spread
                })
                .collect()
        })
        .collect()
}

fn labelled(groups: &[Vec<Vec<f32>>]) -> Vec<(String, Vec<f32>)> {
    let mut input = Vec::new();
    for (g, points) in groups.iter().enumerate() {
        for (i, p) in points.iter().enumerate() {
            input.push((format!("g{}-{}", g, i), p.clone()));
        }
    }
    input
}

#[test]
fn test_separated_groups_get_distinct_clusters() {
    let input = labelled(&[
        blob(&[0.0, 0.0, 0.0, 0.0], 6, 0.02),
        blob(&[5.0, 5.0, 5.0, 5.0], 6, 0.02),
    ]);
    let result = ChineseWhispers::default().cluster(&input).unwrap();

    let first: Vec<_> = result[..6].iter().map(|(_, c)| *c).collect();
    let second: Vec<_> = result[6..].iter().map(|(_, c)| *c).collect();
    assert!(first.iter().all(|c| c.is_some() && *c == first[0]));
    assert!(second.iter().all(|c| c.is_some() && *c == second[0]));
    assert_ne!(first[0], second[0]);
}

#[test]
fn test_same_input_same_output() {
    let input = labelled(&[
        blob(&[0.0, 1.0, 0.0], 8, 0.05),
        blob(&[0.3, 1.2, 0.1], 8, 0.05),
        blob(&[3.0, 0.0, 2.0], 5, 0.05),
    ]);
    let engine = ChineseWhispers::new(WhisperParams {
        radius: 0.4,
        ..WhisperParams::default()
    })
    .unwrap();
    let a = engine.cluster(&input).unwrap();
    let b = engine.cluster(&input).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_sparse_vectors_are_left_unclustered() {
    let mut input = labelled(&[blob(&[0.0, 0.0], 4, 0.01)]);
    input.push(("loner".to_string(), vec![10.0, 10.0]));
    input.push(("pair-a".to_string(), vec![-10.0, 0.0]));
    input.push(("pair-b".to_string(), vec![-10.0, 0.1]));

    let result = ChineseWhispers::new(WhisperParams {
        min_neighbors: 2,
        ..WhisperParams::default()
    })
    .unwrap()
    .cluster(&input)
    .unwrap();

    let by_label = |name: &str| result.iter().find(|(l, _)| l == name).map(|(_, c)| *c);
    assert_eq!(by_label("loner"), Some(None));
    // One neighbor each: below the floor of two
    assert_eq!(by_label("pair-a"), Some(None));
    assert_eq!(by_label("pair-b"), Some(None));
    assert!(result[..4].iter().all(|(_, c)| c.is_some()));
}

#[test]
fn test_metric_changes_linking() {
    // Manhattan distance 0.8, Euclidean ~0.57
    let input = vec![
        ("a".to_string(), vec![0.0, 0.0]),
        ("b".to_string(), vec![0.4, 0.4]),
    ];
    let params = WhisperParams {
        radius: 0.6,
        min_neighbors: 1,
        ..WhisperParams::default()
    };
    let euclid = ChineseWhispers::new(params).unwrap().cluster(&input).unwrap();
    assert_eq!(euclid[0].1, euclid[1].1);
    assert!(euclid[0].1.is_some());

    let manhattan = ChineseWhispers::new(WhisperParams {
        metric: Metric::Manhattan,
        ..params
    })
    .unwrap()
    .cluster(&input)
    .unwrap();
    assert_eq!(manhattan[0].1, None);
    assert_eq!(manhattan[1].1, None);
}

#[test]
fn test_mismatched_dimensions_are_rejected() {
    let input = vec![
        (1, vec![0.0, 0.0, 0.0]),
        (2, vec![0.0, 0.0]),
    ];
    let err = ChineseWhispers::default().cluster(&input).unwrap_err();
    assert_eq!(
        err,
        ClusterError::DimensionMismatch {
            index: 1,
            expected: 3,
            found: 2
        }
    );
}

#[test]
fn test_params_deserialize_with_defaults() {
    let params: WhisperParams =
        serde_json::from_str(r#"{"metric": "manhattan", "radius": 0.3}"#).unwrap();
    assert_eq!(params.metric, Metric::Manhattan);
    assert_eq!(params.radius, 0.3);
    assert_eq!(params.min_neighbors, 2);
    assert_eq!(params.rounds, 25);
}
