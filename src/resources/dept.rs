use super::{ActionPermissions, AuditMeta, Resource};
use crate::{
    auth::Permission,
    error::Error,
    store::{FieldValue, Filter},
    validate::{Checks, FieldError, Validate},
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Dept {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub meta: AuditMeta,
    pub name: String,
    pub parent_id: Option<i64>,
    pub sort: i64,
    pub leader: Option<String>,
}

impl Dept {
    /// `root` plus every department below it. Tolerates cycles.
    #[must_use]
    pub fn subtree(depts: &[Dept], root: i64) -> BTreeSet<i64> {
        let mut children: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for dept in depts {
            if let Some(parent) = dept.parent_id {
                children.entry(parent).or_default().push(dept.meta.id);
            }
        }

        let mut seen = BTreeSet::from([root]);
        let mut pending = vec![root];
        while let Some(id) = pending.pop() {
            for child in children.get(&id).into_iter().flatten() {
                if seen.insert(*child) {
                    pending.push(*child);
                }
            }
        }
        seen
    }
}

#[derive(Debug, Deserialize)]
pub struct DeptCreate {
    pub name: String,
    pub parent_id: Option<i64>,
    pub sort: Option<i64>,
    pub leader: Option<String>,
    pub description: Option<String>,
}

impl Validate for DeptCreate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .length("name", &self.name, 2, 50)
            .optional_length("leader", self.leader.as_deref(), 0, 50)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct DeptUpdate {
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub sort: Option<i64>,
    pub leader: Option<String>,
    pub description: Option<String>,
}

impl Validate for DeptUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        Checks::new()
            .optional_length("name", self.name.as_deref(), 2, 50)
            .optional_length("leader", self.leader.as_deref(), 0, 50)
            .optional_length("description", self.description.as_deref(), 0, 255)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DeptQuery {
    pub name: Option<String>,
    pub parent_id: Option<i64>,
    pub available: Option<bool>,
}

impl Resource for Dept {
    const KIND: &'static str = "dept";
    const LABEL: &'static str = "departments";
    const TABLE: &'static str = "system_dept";
    const PERMISSIONS: ActionPermissions = ActionPermissions {
        query: Permission::DeptQuery,
        create: Permission::DeptCreate,
        update: Permission::DeptUpdate,
        delete: Permission::DeptDelete,
        patch: Permission::DeptPatch,
        export: Permission::DeptExport,
    };
    const SORTABLE: &'static [&'static str] = &["id", "sort", "name", "created_at"];
    const EXPORT: &'static [(&'static str, &'static str)] = &[
        ("id", "ID"),
        ("name", "Name"),
        ("parent_id", "Parent"),
        ("sort", "Sort"),
        ("leader", "Leader"),
        ("available", "Available"),
        ("description", "Description"),
        ("created_at", "Created at"),
    ];
    const SELF_REFERENCE: Option<&'static str> = Some("parent_id");

    type Create = DeptCreate;
    type Update = DeptUpdate;
    type Query = DeptQuery;

    fn meta(&self) -> &AuditMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut AuditMeta {
        &mut self.meta
    }

    fn create(payload: DeptCreate, mut meta: AuditMeta) -> Result<Self, Error> {
        meta.description = payload.description;
        Ok(Self {
            meta,
            name: payload.name.trim().to_string(),
            parent_id: payload.parent_id,
            sort: payload.sort.unwrap_or(1),
            leader: payload.leader,
        })
    }

    fn apply(&mut self, changes: DeptUpdate) -> Result<(), Error> {
        if changes.parent_id == Some(self.meta.id) {
            return Err(Error::domain("a department cannot be its own parent"));
        }
        if let Some(name) = changes.name {
            self.name = name.trim().to_string();
        }
        if changes.parent_id.is_some() {
            self.parent_id = changes.parent_id;
        }
        if let Some(sort) = changes.sort {
            self.sort = sort;
        }
        if changes.leader.is_some() {
            self.leader = changes.leader;
        }
        if changes.description.is_some() {
            self.meta.description = changes.description;
        }
        Ok(())
    }

    fn filter(query: &DeptQuery) -> Filter {
        Filter::new()
            .contains("name", query.name.as_deref())
            .equals("parent_id", query.parent_id)
            .equals("available", query.available)
    }

    fn field(&self, column: &str) -> Option<FieldValue> {
        Some(match column {
            "name" => FieldValue::from(self.name.as_str()),
            "parent_id" => FieldValue::Int(self.parent_id),
            "sort" => FieldValue::from(self.sort),
            "leader" => FieldValue::Text(self.leader.clone()),
            _ => return None,
        })
    }

    fn columns(&self) -> Vec<(&'static str, FieldValue)> {
        ["name", "parent_id", "sort", "leader"]
            .into_iter()
            .filter_map(|column| self.field(column).map(|value| (column, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dept(id: i64, parent_id: Option<i64>) -> Dept {
        let mut meta = AuditMeta::new(None, Utc::now());
        meta.id = id;
        Dept {
            meta,
            name: format!("dept-{id}"),
            parent_id,
            sort: 1,
            leader: None,
        }
    }

    #[test]
    fn subtree_walks_all_descendants() {
        let depts = vec![
            dept(1, None),
            dept(2, Some(1)),
            dept(3, Some(2)),
            dept(4, Some(1)),
            dept(5, None),
        ];
        assert_eq!(Dept::subtree(&depts, 1), BTreeSet::from([1, 2, 3, 4]));
        assert_eq!(Dept::subtree(&depts, 2), BTreeSet::from([2, 3]));
        assert_eq!(Dept::subtree(&depts, 5), BTreeSet::from([5]));
    }

    #[test]
    fn subtree_survives_cycles() {
        let depts = vec![dept(1, Some(2)), dept(2, Some(1))];
        assert_eq!(Dept::subtree(&depts, 1), BTreeSet::from([1, 2]));
    }

    #[test]
    fn cannot_parent_itself() {
        let mut dept = dept(7, None);
        let result = dept.apply(DeptUpdate {
            name: None,
            parent_id: Some(7),
            sort: None,
            leader: None,
            description: None,
        });
        assert!(matches!(result, Err(Error::Domain { .. })));
    }
}
