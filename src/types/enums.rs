use crate::config::EnumScopePolicy;
use serde::Serialize;

/// Enum declared on a wrapped type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumMeta {
    pub name: String,
    /// Enclosing type path, outermost first, ending with the declaring type
    pub owner_path: Vec<String>,
    pub values: Vec<(String, i64)>,
}

impl EnumMeta {
    /// Scope the enum reports under the given naming policy
    pub fn scope(&self, policy: EnumScopePolicy) -> String {
        match policy {
            EnumScopePolicy::Immediate => self.owner_path.last().cloned().unwrap_or_default(),
            EnumScopePolicy::Qualified => self.owner_path.join("."),
        }
    }

    pub fn qualified_name(&self, policy: EnumScopePolicy) -> String {
        let scope = self.scope(policy);
        if scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", scope, self.name)
        }
    }

    pub fn value(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}
