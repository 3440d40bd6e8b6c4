use deployment_gate::{decide, DeploymentGate, Decision, Direction, GateConfig};
use modelops_registry::{ArtifactRef, InMemoryMetricsStore, InMemoryRegistry, MetricMap, RegistryService, Stage};
use proptest::prelude::*;
use std::sync::Arc;

fn metrics(mae: f64, r2: f64) -> MetricMap {
    MetricMap::from([("mae".to_string(), mae), ("r2_score".to_string(), r2)])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_gate_sequence_keeps_one_production(runs in prop::collection::vec((0.1f64..50.0, 0.0f64..1.0), 1..12)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let reg = Arc::new(InMemoryRegistry::new());
            let store = Arc::new(InMemoryMetricsStore::new());
            let cfg = GateConfig::default().with_guard("r2_score", 0.1, Direction::HigherIsBetter);
            let gate = DeploymentGate::new(reg.clone(), store.clone(), cfg);
            let mut best_mae = f64::INFINITY;
            for (i, (mae, r2)) in runs.iter().enumerate() {
                let run = store.record_run(&metrics(*mae, *r2));
                let out = gate.run(&run, ArtifactRef::new(format!("a{i}"))).await.unwrap();
                if out.promoted {
                    // promotions never raise the primary metric
                    prop_assert!(*mae <= best_mae);
                    best_mae = *mae;
                }
                prop_assert_eq!(reg.production_count(), 1);
                for v in reg.list_versions().await.unwrap() {
                    let expected_prod = reg.production_version().await.unwrap() == Some(v.version);
                    prop_assert_eq!(v.stage == Stage::Production, expected_prod);
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn lower_primary_without_guards_is_always_approved(base in 0.1f64..100.0, gain in 0.001f64..10.0) {
        let cfg = GateConfig::default();
        let baseline = MetricMap::from([("mae".to_string(), base + gain)]);
        let candidate = MetricMap::from([("mae".to_string(), base)]);
        prop_assert_eq!(decide(&cfg, &candidate, Some(&baseline)).decision, Decision::Approve);
        prop_assert_eq!(decide(&cfg, &baseline, Some(&candidate)).decision, Decision::Reject);
    }
}
