//! Group based visibility of API definitions.

use std::collections::{BTreeSet, HashSet};

use crate::models::{ApiDefinition, ApiId, GUEST_GROUP};

/// Returns the ids of every API whose authorized groups share at least one
/// name with `user_groups` (the guest group is always included).
pub fn authorized_api_ids<S: AsRef<str>>(user_groups: &[S], apis: &[ApiDefinition]) -> BTreeSet<ApiId> {
    let mut groups: HashSet<&str> = user_groups.iter().map(AsRef::as_ref).collect();
    groups.insert(GUEST_GROUP);

    apis.iter()
        .filter(|api| api.authorized_groups.iter().any(|g| groups.contains(g.as_str())))
        .map(|api| api.id)
        .collect()
}

/// Single-API form of [`authorized_api_ids`].
pub fn is_authorized<S: AsRef<str>>(user_groups: &[S], api: &ApiDefinition) -> bool {
    api.authorized_groups
        .iter()
        .any(|g| g.as_str() == GUEST_GROUP || user_groups.iter().any(|u| u.as_ref() == g.as_str()))
}
