use std::collections::BTreeMap;

/// Labels that indicate the resource is managed by the calico operator.
pub fn managed_labels() -> Option<BTreeMap<String, String>> {
    Some(BTreeMap::from_iter(vec![(
        "managed-by".to_owned(),
        "calico-operator".to_owned(),
    )]))
}
