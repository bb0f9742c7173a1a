use serde_json::Value;

/// Spec fields whose change forces a scale-down before broker topology is
/// touched, when auth is enabled.
pub const AUTH_SCALE_DOWN_PARAMS: [&str; 4] = ["enable", "type", "idpServer", "idpExternalServer"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffOp {
    Add,
    Change,
    Remove,
}

/// One observed difference between the last-handled spec and the current one.
/// Paths are relative to the spec root, so `path[0]` is the top-level field.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecChange {
    pub op: DiffOp,
    pub path: Vec<String>,
}

impl SpecChange {
    fn new(op: DiffOp, path: Vec<String>) -> Self {
        Self { op, path }
    }

    pub fn top_field(&self) -> Option<&str> {
        self.path.first().map(String::as_str)
    }

    pub fn leaf(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }
}

/// Structural diff of two spec documents. Added or removed keys are reported
/// as a single entry for the whole subtree; differing values recurse down to
/// the changed leaf.
pub fn diff_specs(old: &Value, new: &Value) -> Vec<SpecChange> {
    let mut out = Vec::new();
    walk(old, new, &mut Vec::new(), &mut out);
    out
}

fn walk(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Vec<SpecChange>) {
    match (old, new) {
        (Value::Object(o), Value::Object(n)) => {
            for (key, old_val) in o {
                match n.get(key) {
                    None => out.push(SpecChange::new(DiffOp::Remove, child(path, key))),
                    Some(new_val) => {
                        path.push(key.clone());
                        walk(old_val, new_val, path, out);
                        path.pop();
                    }
                }
            }
            for key in n.keys() {
                if !o.contains_key(key) {
                    out.push(SpecChange::new(DiffOp::Add, child(path, key)));
                }
            }
        }
        (o, n) if o != n => out.push(SpecChange::new(DiffOp::Change, path.clone())),
        _ => {}
    }
}

fn child(path: &[String], key: &str) -> Vec<String> {
    let mut p = path.to_vec();
    p.push(key.to_string());
    p
}

/// Update-event filter: suppress reconciliation when every observed change
/// sits under the excluded bookkeeping field. This keeps a switchover-only
/// edit (and the switchover handler's own writes) from triggering a full
/// redeploy, while a mixed diff still reconciles.
pub fn update_requires_reconcile(diff: &[SpecChange], excluded_field: &str) -> bool {
    if diff.len() == 1 && diff[0].top_field() == Some(excluded_field) {
        return false;
    }
    if diff.len() == 2
        && diff[0].op == DiffOp::Add
        && diff[0].top_field() == Some(excluded_field)
        && diff[1].op == DiffOp::Change
        && diff[1].top_field() == Some(excluded_field)
    {
        return false;
    }
    !diff.is_empty()
}

/// True when the diff touches an auth parameter from the scale-down set.
pub fn touches_auth_scale_down_params(diff: &[SpecChange]) -> bool {
    diff.iter()
        .filter_map(SpecChange::leaf)
        .any(|leaf| AUTH_SCALE_DOWN_PARAMS.contains(&leaf))
}

/// Disaster-recovery mode as seen in a serialized spec document.
pub fn dr_mode_of(spec: &Value) -> Option<&str> {
    spec.get("disasterRecovery")?.get("mode")?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_reports_adds_changes_and_removes() {
        let old = json!({"a": 1, "b": {"c": "x"}, "gone": true});
        let new = json!({"a": 2, "b": {"c": "x", "d": "y"}});
        let diff = diff_specs(&old, &new);
        assert!(diff.contains(&SpecChange::new(DiffOp::Change, vec!["a".into()])));
        assert!(diff.contains(&SpecChange::new(DiffOp::Add, vec!["b".into(), "d".into()])));
        assert!(diff.contains(&SpecChange::new(DiffOp::Remove, vec!["gone".into()])));
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn dr_only_change_is_suppressed() {
        let old = json!({"disasterRecovery": {"mode": "active"}});
        let new = json!({"disasterRecovery": {"mode": "standby"}});
        let diff = diff_specs(&old, &new);
        assert!(!update_requires_reconcile(&diff, "disasterRecovery"));
    }

    #[test]
    fn dr_add_then_change_pair_is_suppressed() {
        let diff = vec![
            SpecChange::new(DiffOp::Add, vec!["disasterRecovery".into()]),
            SpecChange::new(
                DiffOp::Change,
                vec!["disasterRecovery".into(), "mode".into()],
            ),
        ];
        assert!(!update_requires_reconcile(&diff, "disasterRecovery"));
    }

    #[test]
    fn dr_subtree_appearing_alone_is_suppressed() {
        let old = json!({"api": {"replicas": 1}});
        let new = json!({"api": {"replicas": 1}, "disasterRecovery": {"mode": "standby"}});
        let diff = diff_specs(&old, &new);
        assert!(!update_requires_reconcile(&diff, "disasterRecovery"));
    }

    #[test]
    fn dr_pair_plus_other_field_is_not_suppressed() {
        let diff = vec![
            SpecChange::new(DiffOp::Add, vec!["disasterRecovery".into()]),
            SpecChange::new(
                DiffOp::Change,
                vec!["disasterRecovery".into(), "mode".into()],
            ),
            SpecChange::new(DiffOp::Change, vec!["api".into(), "replicas".into()]),
        ];
        assert!(update_requires_reconcile(&diff, "disasterRecovery"));
    }

    #[test]
    fn empty_diff_is_suppressed() {
        assert!(!update_requires_reconcile(&[], "disasterRecovery"));
    }

    #[test]
    fn auth_param_detection_uses_leaf_names() {
        let old = json!({"common": {"auth": {"idpServer": "https://a"}}});
        let new = json!({"common": {"auth": {"idpServer": "https://b"}}});
        assert!(touches_auth_scale_down_params(&diff_specs(&old, &new)));

        let old = json!({"api": {"replicas": 1}});
        let new = json!({"api": {"replicas": 3}});
        assert!(!touches_auth_scale_down_params(&diff_specs(&old, &new)));
    }
}
