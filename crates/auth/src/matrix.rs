//! Permission-matrix transformations.
//!
//! The settings backend reports a two-level module tree where every node is
//! annotated with the flags a role currently holds. The editor works on a
//! flat record list instead, and persists it with a full replace. This module
//! is the pure bridge between the two shapes:
//!
//! - flatten a tree into records (view and edit variants),
//! - stamp a record list back onto a tree for display,
//! - apply single-flag toggles and bulk grant/revoke to a record list.
//!
//! A module that has submodules expresses permissions only through them;
//! module-level records exist only for leafless modules.

use serde::{Deserialize, Serialize};

use medidesk_core::{ModuleId, RoleId, SubModuleId};

use crate::permissions::{CrudFlag, Permission, PermissionFlags, clamp_for_node, is_dashboard};

/// A submodule of the permission tree, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubModuleNode {
    pub id: SubModuleId,
    pub module_id: ModuleId,
    pub name: String,
    /// Flags the role currently holds on this node, if any.
    #[serde(rename = "permissions", default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<PermissionFlags>,
}

/// A top-level module of the permission tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleNode {
    pub id: ModuleId,
    pub name: String,
    #[serde(default)]
    pub sub_modules: Vec<SubModuleNode>,
    /// Flags on the module itself; meaningful only when `sub_modules` is empty.
    #[serde(rename = "permissions", default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<PermissionFlags>,
}

impl ModuleNode {
    /// Key of the module-level grant (leafless modules only).
    pub fn key(&self) -> NodeKey<'_> {
        NodeKey {
            module_id: self.id,
            sub_module_id: None,
            name: &self.name,
        }
    }
}

impl SubModuleNode {
    pub fn key(&self) -> NodeKey<'_> {
        NodeKey {
            module_id: self.module_id,
            sub_module_id: Some(self.id),
            name: &self.name,
        }
    }
}

/// Identity of one grantable node, as targeted by the editor.
///
/// The name rides along because the dashboard rule depends on it.
#[derive(Debug, Clone, Copy)]
pub struct NodeKey<'a> {
    pub module_id: ModuleId,
    pub sub_module_id: Option<SubModuleId>,
    pub name: &'a str,
}

/// The working record list for one role's permission editor.
///
/// Invariant: at most one record per `(module_id, sub_module_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    role_id: RoleId,
    records: Vec<Permission>,
}

impl PermissionMatrix {
    /// Flatten a tree for a read-only dialog: only nodes with at least one
    /// flag set produce a record, so the dialog never implies an editable
    /// blank grid.
    pub fn for_view(role_id: RoleId, modules: &[ModuleNode]) -> Self {
        let mut records = Vec::new();
        for (key, flags) in leaf_nodes(modules) {
            let flags = clamp_for_node(key.name, flags.unwrap_or_default());
            if !flags.is_empty() {
                records.push(record(role_id, key, flags));
            }
        }
        Self { role_id, records }
    }

    /// Flatten a tree for the edit grid: every grantable node produces a
    /// record so there is always a row to toggle; absent flags become
    /// all-false.
    pub fn for_edit(role_id: RoleId, modules: &[ModuleNode]) -> Self {
        let mut records = Vec::new();
        for (key, flags) in leaf_nodes(modules) {
            let flags = clamp_for_node(key.name, flags.unwrap_or_default());
            records.push(record(role_id, key, flags));
        }
        Self { role_id, records }
    }

    /// Rebuild a matrix from an already-flat record list (e.g. a preserved
    /// draft after a failed save).
    pub fn from_records(role_id: RoleId, records: Vec<Permission>) -> Self {
        Self { role_id, records }
    }

    pub fn role_id(&self) -> RoleId {
        self.role_id
    }

    pub fn records(&self) -> &[Permission] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Permission> {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Set a single flag on the record for `key`, synthesizing a zero-valued
    /// record when none exists yet.
    ///
    /// On a dashboard-class node every flag other than `View` is a no-op.
    pub fn toggle(&mut self, key: NodeKey<'_>, flag: CrudFlag, value: bool) {
        if is_dashboard(key.name) && flag != CrudFlag::View {
            tracing::debug!(
                node = key.name,
                flag = flag.as_str(),
                "ignoring non-view toggle on dashboard node"
            );
            return;
        }
        self.entry(key).flags.set(flag, value);
    }

    /// Grant every flag on the node ("Grant All"); dashboard-class nodes get
    /// view only.
    pub fn grant_all(&mut self, key: NodeKey<'_>) {
        let flags = if is_dashboard(key.name) {
            PermissionFlags::view_only()
        } else {
            PermissionFlags::all()
        };
        self.entry(key).flags = flags;
    }

    /// Remove the record for the node entirely ("Remove All"). Absence means
    /// "no access", not an explicit deny.
    pub fn revoke_all(&mut self, key: NodeKey<'_>) {
        self.records
            .retain(|r| r.node() != (key.module_id, key.sub_module_id));
    }

    fn entry(&mut self, key: NodeKey<'_>) -> &mut Permission {
        let node = (key.module_id, key.sub_module_id);
        if let Some(idx) = self.records.iter().position(|r| r.node() == node) {
            return &mut self.records[idx];
        }
        self.records
            .push(Permission::zeroed(self.role_id, key.module_id, key.sub_module_id));
        self.records.last_mut().unwrap()
    }
}

/// Stamp a flat record list back onto a tree for display (inverse of
/// flatten). Nodes without a record are left unannotated.
pub fn annotate(modules: &mut [ModuleNode], records: &[Permission]) {
    let lookup = |node: (ModuleId, Option<SubModuleId>)| {
        records.iter().find(|r| r.node() == node).map(|r| r.flags)
    };
    for module in modules.iter_mut() {
        if module.sub_modules.is_empty() {
            module.flags = lookup((module.id, None));
            continue;
        }
        module.flags = None;
        for sub in module.sub_modules.iter_mut() {
            sub.flags = lookup((sub.module_id, Some(sub.id)));
        }
    }
}

/// Enumerate the grantable nodes of a tree in display order: submodules for
/// modules that have them, the module itself otherwise.
fn leaf_nodes<'a>(
    modules: &'a [ModuleNode],
) -> impl Iterator<Item = (NodeKey<'a>, Option<PermissionFlags>)> {
    modules.iter().flat_map(|module| {
        let own: Vec<(NodeKey<'a>, Option<PermissionFlags>)> = if module.sub_modules.is_empty() {
            vec![(module.key(), module.flags)]
        } else {
            module
                .sub_modules
                .iter()
                .map(|sub| (sub.key(), sub.flags))
                .collect()
        };
        own
    })
}

fn record(role_id: RoleId, key: NodeKey<'_>, flags: PermissionFlags) -> Permission {
    Permission {
        role_id,
        module_id: key.module_id,
        sub_module_id: key.sub_module_id,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role() -> RoleId {
        RoleId::new(7)
    }

    fn sub(id: i64, module: i64, name: &str, flags: Option<PermissionFlags>) -> SubModuleNode {
        SubModuleNode {
            id: SubModuleId::new(id),
            module_id: ModuleId::new(module),
            name: name.to_string(),
            flags,
        }
    }

    fn tree() -> Vec<ModuleNode> {
        vec![
            ModuleNode {
                id: ModuleId::new(1),
                name: "Front Office".to_string(),
                sub_modules: vec![
                    sub(10, 1, "Appointments", Some(PermissionFlags::all())),
                    sub(11, 1, "Registrations", None),
                ],
                flags: None,
            },
            ModuleNode {
                id: ModuleId::new(2),
                name: "Reports Dashboard".to_string(),
                sub_modules: vec![],
                flags: Some(PermissionFlags::all()),
            },
            ModuleNode {
                id: ModuleId::new(3),
                name: "Pharmacy".to_string(),
                sub_modules: vec![],
                flags: None,
            },
        ]
    }

    #[test]
    fn view_suppresses_zero_permission_rows() {
        let matrix = PermissionMatrix::for_view(role(), &tree());
        let nodes: Vec<_> = matrix.records().iter().map(Permission::node).collect();
        // "Registrations" has no flags and "Pharmacy" has none either; the
        // dashboard keeps only its view bit.
        assert_eq!(
            nodes,
            vec![
                (ModuleId::new(1), Some(SubModuleId::new(10))),
                (ModuleId::new(2), None),
            ]
        );
        assert_eq!(matrix.records()[1].flags, PermissionFlags::view_only());
    }

    #[test]
    fn edit_yields_a_row_for_every_grantable_node() {
        let matrix = PermissionMatrix::for_edit(role(), &tree());
        assert_eq!(matrix.records().len(), 4);
        // Submodule-bearing modules contribute no module-level record.
        assert!(
            matrix
                .records()
                .iter()
                .all(|r| r.node() != (ModuleId::new(1), None))
        );
        // The unannotated submodule got a zero-valued row.
        let reg = matrix
            .records()
            .iter()
            .find(|r| r.node() == (ModuleId::new(1), Some(SubModuleId::new(11))))
            .unwrap();
        assert!(reg.flags.is_empty());
    }

    #[test]
    fn dashboard_flags_are_clamped_on_flatten() {
        let matrix = PermissionMatrix::for_edit(role(), &tree());
        let dash = matrix
            .records()
            .iter()
            .find(|r| r.node() == (ModuleId::new(2), None))
            .unwrap();
        assert_eq!(dash.flags, PermissionFlags::view_only());
    }

    #[test]
    fn toggle_synthesizes_a_record_when_missing() {
        let mut matrix = PermissionMatrix::from_records(role(), Vec::new());
        let key = NodeKey {
            module_id: ModuleId::new(3),
            sub_module_id: None,
            name: "Pharmacy",
        };
        matrix.toggle(key, CrudFlag::Edit, true);
        assert_eq!(matrix.records().len(), 1);
        let rec = &matrix.records()[0];
        assert!(rec.flags.edit);
        assert!(!rec.flags.view);
    }

    #[test]
    fn toggle_on_dashboard_ignores_mutating_flags() {
        let mut matrix = PermissionMatrix::from_records(role(), Vec::new());
        let key = NodeKey {
            module_id: ModuleId::new(2),
            sub_module_id: None,
            name: "Reports Dashboard",
        };
        matrix.toggle(key, CrudFlag::Add, true);
        matrix.toggle(key, CrudFlag::Edit, true);
        matrix.toggle(key, CrudFlag::Delete, true);
        assert!(matrix.is_empty());

        matrix.toggle(key, CrudFlag::View, true);
        assert_eq!(matrix.records()[0].flags, PermissionFlags::view_only());
    }

    #[test]
    fn grant_all_and_revoke_all() {
        let mut matrix = PermissionMatrix::from_records(role(), Vec::new());
        let key = NodeKey {
            module_id: ModuleId::new(1),
            sub_module_id: Some(SubModuleId::new(10)),
            name: "Appointments",
        };
        matrix.grant_all(key);
        assert_eq!(matrix.records()[0].flags, PermissionFlags::all());

        matrix.revoke_all(key);
        // Removal, not a zero-valued record.
        assert!(matrix.is_empty());
    }

    #[test]
    fn grant_all_on_dashboard_grants_view_only() {
        let mut matrix = PermissionMatrix::from_records(role(), Vec::new());
        let key = NodeKey {
            module_id: ModuleId::new(2),
            sub_module_id: None,
            name: "Reports Dashboard",
        };
        matrix.grant_all(key);
        assert_eq!(matrix.records()[0].flags, PermissionFlags::view_only());
    }

    #[test]
    fn annotate_round_trips_flatten_for_edit() {
        let original = tree();
        let matrix = PermissionMatrix::for_edit(role(), &original);

        let mut redisplayed = original.clone();
        annotate(&mut redisplayed, matrix.records());

        // Re-flattening the annotated tree yields the same records with the
        // same flag values.
        let again = PermissionMatrix::for_edit(role(), &redisplayed);
        assert_eq!(again.records(), matrix.records());
    }

    #[test]
    fn annotate_clears_stale_module_level_flags() {
        let mut display = tree();
        // Pretend the backend left flags on a submodule-bearing module.
        display[0].flags = Some(PermissionFlags::all());
        annotate(&mut display, &[]);
        assert_eq!(display[0].flags, None);
        assert_eq!(display[0].sub_modules[0].flags, None);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_flags() -> impl Strategy<Value = PermissionFlags> {
            (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
                |(view, add, edit, delete)| PermissionFlags {
                    view,
                    add,
                    edit,
                    delete,
                },
            )
        }

        fn arb_tree() -> impl Strategy<Value = Vec<ModuleNode>> {
            let name = proptest::sample::select(vec![
                "Front Office",
                "Pharmacy",
                "Billing Dashboard",
                "Laboratory",
                "Ward Dashboard",
                "Stores",
            ]);
            let sub_node = (0i64..50, name.clone(), proptest::option::of(arb_flags()));
            proptest::collection::vec(
                (
                    0i64..20,
                    name,
                    proptest::option::of(arb_flags()),
                    proptest::collection::vec(sub_node, 0..4),
                ),
                0..6,
            )
            .prop_map(|modules| {
                modules
                    .into_iter()
                    .enumerate()
                    .map(|(i, (id, name, flags, subs))| {
                        let module_id = ModuleId::new(id + (i as i64) * 100);
                        ModuleNode {
                            id: module_id,
                            name: name.to_string(),
                            sub_modules: subs
                                .into_iter()
                                .enumerate()
                                .map(|(j, (sid, sname, sflags))| SubModuleNode {
                                    id: SubModuleId::new(sid + (j as i64) * 1000),
                                    module_id,
                                    name: sname.to_string(),
                                    flags: sflags,
                                })
                                .collect(),
                            flags,
                        }
                    })
                    .collect()
            })
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: every view record appears in the edit flatten with
            /// identical flags.
            #[test]
            fn view_is_a_subset_of_edit(modules in arb_tree()) {
                let view = PermissionMatrix::for_view(RoleId::new(1), &modules);
                let edit = PermissionMatrix::for_edit(RoleId::new(1), &modules);
                for rec in view.records() {
                    let found = edit.records().iter().find(|e| e.node() == rec.node());
                    prop_assert_eq!(found.map(|e| e.flags), Some(rec.flags));
                }
            }

            /// Property: repeating a toggle is idempotent.
            #[test]
            fn toggle_is_idempotent(modules in arb_tree(), value in any::<bool>()) {
                let mut once = PermissionMatrix::for_edit(RoleId::new(1), &modules);
                let keys: Vec<(ModuleId, Option<SubModuleId>, String)> = once
                    .records()
                    .iter()
                    .map(|r| (r.module_id, r.sub_module_id, String::new()))
                    .collect();
                let mut twice = once.clone();
                for (module_id, sub_module_id, name) in &keys {
                    let key = NodeKey {
                        module_id: *module_id,
                        sub_module_id: *sub_module_id,
                        name,
                    };
                    once.toggle(key, CrudFlag::View, value);
                    twice.toggle(key, CrudFlag::View, value);
                    twice.toggle(key, CrudFlag::View, value);
                }
                prop_assert_eq!(once.records(), twice.records());
            }

            /// Property: grant-all then revoke-all leaves no record behind.
            #[test]
            fn revoke_undoes_grant(modules in arb_tree()) {
                let mut matrix = PermissionMatrix::from_records(RoleId::new(1), Vec::new());
                let nodes: Vec<(ModuleId, Option<SubModuleId>, String)> =
                    PermissionMatrix::for_edit(RoleId::new(1), &modules)
                        .records()
                        .iter()
                        .map(|r| (r.module_id, r.sub_module_id, String::new()))
                        .collect();
                for (module_id, sub_module_id, name) in &nodes {
                    let key = NodeKey {
                        module_id: *module_id,
                        sub_module_id: *sub_module_id,
                        name,
                    };
                    matrix.grant_all(key);
                    matrix.revoke_all(key);
                }
                prop_assert!(matrix.is_empty());
            }
        }
    }
}
