/// Broadcast scopes a live connection can belong to.
///
/// Keys are only ever built through this type so tenant-wide and
/// entity-scoped groups cannot collide.
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Every connection of a company (tenant)
    Company(Uuid),
    /// Connections following a single task's update stream
    Task(Uuid),
}

impl GroupKey {
    pub fn company(tenant_id: Uuid) -> Self {
        GroupKey::Company(tenant_id)
    }

    pub fn task(task_id: Uuid) -> Self {
        GroupKey::Task(task_id)
    }

    /// Parse the wire form (`company-{uuid}` / `task-{uuid}`).
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(id) = s.strip_prefix("company-") {
            return Uuid::parse_str(id).ok().map(GroupKey::Company);
        }
        if let Some(id) = s.strip_prefix("task-") {
            return Uuid::parse_str(id).ok().map(GroupKey::Task);
        }
        None
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Company(id) => write!(f, "company-{}", id),
            GroupKey::Task(id) => write!(f, "task-{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_format() {
        let id = Uuid::new_v4();
        assert_eq!(GroupKey::company(id).to_string(), format!("company-{}", id));
        assert_eq!(GroupKey::task(id).to_string(), format!("task-{}", id));
    }

    #[test]
    fn test_same_id_different_scope_never_collides() {
        let id = Uuid::new_v4();
        assert_ne!(GroupKey::company(id), GroupKey::task(id));
        assert_ne!(GroupKey::company(id).to_string(), GroupKey::task(id).to_string());
    }

    #[test]
    fn test_parse() {
        let id = Uuid::new_v4();
        assert_eq!(
            GroupKey::parse(&format!("task-{}", id)),
            Some(GroupKey::Task(id))
        );
        assert_eq!(
            GroupKey::parse(&GroupKey::company(id).to_string()),
            Some(GroupKey::Company(id))
        );
        assert_eq!(GroupKey::parse("project-123"), None);
        assert_eq!(GroupKey::parse("task-not-a-uuid"), None);
    }
}
