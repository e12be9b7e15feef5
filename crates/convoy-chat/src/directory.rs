use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;

use convoy_types::{GroupMember, MemberRole};

/// Source of group membership. Only consulted when a group's conversation is
/// first created, to seed its member set.
pub trait GroupDirectory: Send + Sync + 'static {
    fn members(&self, group_id: &str) -> Result<Vec<GroupMember>>;
}

/// In-memory directory for embedding and tests.
#[derive(Default)]
pub struct StaticDirectory {
    groups: RwLock<HashMap<String, Vec<GroupMember>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a group's members. The first user becomes the owner.
    pub fn set_group<I, S>(&self, group_id: &str, user_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = user_ids
            .into_iter()
            .enumerate()
            .map(|(idx, user_id)| GroupMember {
                user_id: user_id.into(),
                role: if idx == 0 { MemberRole::Owner } else { MemberRole::Member },
            })
            .collect();

        self.groups
            .write()
            .map_err(|e| anyhow::anyhow!("Directory lock poisoned: {}", e))?
            .insert(group_id.to_string(), members);
        Ok(())
    }

    pub fn add_member(&self, group_id: &str, user_id: &str, role: MemberRole) -> Result<()> {
        self.groups
            .write()
            .map_err(|e| anyhow::anyhow!("Directory lock poisoned: {}", e))?
            .entry(group_id.to_string())
            .or_default()
            .push(GroupMember {
                user_id: user_id.to_string(),
                role,
            });
        Ok(())
    }
}

impl GroupDirectory for StaticDirectory {
    fn members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let groups = self
            .groups
            .read()
            .map_err(|e| anyhow::anyhow!("Directory lock poisoned: {}", e))?;
        Ok(groups.get(group_id).cloned().unwrap_or_default())
    }
}
