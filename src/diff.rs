use crate::snapshot::{render_value, Component, Snapshot};
use serde_json::Value;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub component: Component,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub detected_at: SystemTime,
}

impl ChangeRecord {
    pub fn old_display(&self) -> String {
        render_value(self.old_value.as_ref())
    }

    pub fn new_display(&self) -> String {
        render_value(self.new_value.as_ref())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} changed from {} to {}",
            self.component,
            self.old_display(),
            self.new_display()
        )
    }
}

/// Compares `current` against `baseline` component by component.
///
/// Records come out in `Component::ALL` order. A component missing from one
/// side compares as absent, so presence changes are reported too.
pub fn diff(current: &Snapshot, baseline: &Snapshot, detected_at: SystemTime) -> Vec<ChangeRecord> {
    Component::ALL
        .iter()
        .filter_map(|&component| {
            let old_value = baseline.get(component);
            let new_value = current.get(component);
            if old_value == new_value {
                return None;
            }
            Some(ChangeRecord {
                component,
                old_value: old_value.cloned(),
                new_value: new_value.cloned(),
                detected_at,
            })
        })
        .collect()
}

/// Folds a confirmed change into the baseline.
pub fn accept(baseline: &mut Snapshot, change: &ChangeRecord) {
    match &change.new_value {
        Some(value) => baseline.set(change.component, value.clone()),
        None => {
            baseline.remove(change.component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::UNIX_EPOCH;

    fn full_snapshot() -> Snapshot {
        Snapshot::new()
            .with(
                Component::Cpu,
                json!({"model_name": "Ryzen 7 5800X", "physical_cores": 8, "total_cores": 16}),
            )
            .with(
                Component::Ssd,
                json!([{"device": "/dev/nvme0n1p2", "total": 512_000_000_000_u64, "type": "SSD"}]),
            )
            .with(Component::Gpu, json!(["NVIDIA GeForce RTX 3060"]))
            .with(Component::Ram, "16.00 GB")
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let a = full_snapshot();
        assert!(diff(&a, &a.clone(), UNIX_EPOCH).is_empty());
    }

    #[test]
    fn each_single_component_change_yields_one_record() {
        let baseline = full_snapshot();
        for component in Component::ALL {
            let mut current = baseline.clone();
            current.set(component, json!("replaced"));
            let changes = diff(&current, &baseline, UNIX_EPOCH);
            assert_eq!(changes.len(), 1, "component {component}");
            assert_eq!(changes[0].component, component);
            assert_eq!(changes[0].new_value, Some(json!("replaced")));
        }
    }

    #[test]
    fn ram_upgrade_reports_old_and_new() {
        let baseline = Snapshot::new().with(Component::Ram, "16.00 GB");
        let current = Snapshot::new().with(Component::Ram, "32.00 GB");

        let changes = diff(&current, &baseline, UNIX_EPOCH);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].component, Component::Ram);
        assert_eq!(changes[0].old_display(), "16.00 GB");
        assert_eq!(changes[0].new_display(), "32.00 GB");
        assert_eq!(changes[0].summary(), "RAM changed from 16.00 GB to 32.00 GB");
    }

    #[test]
    fn missing_component_is_treated_as_absent() {
        let baseline = full_snapshot();
        let mut current = baseline.clone();
        current.remove(Component::Gpu);

        let changes = diff(&current, &baseline, UNIX_EPOCH);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].component, Component::Gpu);
        assert_eq!(changes[0].new_value, None);
        assert_eq!(changes[0].new_display(), "<absent>");
    }

    #[test]
    fn output_follows_fixed_component_order() {
        let baseline = full_snapshot();
        let current = Snapshot::new()
            .with(Component::Ram, "8.00 GB")
            .with(Component::Cpu, json!({"total_cores": 4}))
            .with(Component::Ssd, json!([]))
            .with(Component::Gpu, json!(["NVIDIA GeForce RTX 3060"]));

        let order: Vec<Component> = diff(&current, &baseline, UNIX_EPOCH)
            .into_iter()
            .map(|c| c.component)
            .collect();
        assert_eq!(order, vec![Component::Cpu, Component::Ssd, Component::Ram]);
    }

    #[test]
    fn nested_difference_counts_as_change() {
        let baseline = full_snapshot();
        let mut current = baseline.clone();
        current.set(
            Component::Cpu,
            json!({"model_name": "Ryzen 7 5800X", "physical_cores": 8, "total_cores": 8}),
        );
        assert_eq!(diff(&current, &baseline, UNIX_EPOCH).len(), 1);
    }

    #[test]
    fn accept_merges_new_value_or_removes_key() {
        let mut baseline = Snapshot::new().with(Component::Ram, "16.00 GB");
        let current = Snapshot::new().with(Component::Ram, "32.00 GB");
        let change = diff(&current, &baseline, UNIX_EPOCH).remove(0);
        accept(&mut baseline, &change);
        assert_eq!(baseline, current);

        let empty = Snapshot::new();
        let change = diff(&empty, &baseline, UNIX_EPOCH).remove(0);
        accept(&mut baseline, &change);
        assert_eq!(baseline, empty);
    }
}
