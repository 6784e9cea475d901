//! The in-process and SQL backends must answer tree and ACL questions alike.

use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};

use strata::hierarchy::{Hierarchy, HierarchyIndex};
use strata::security::acl::LOCAL_ACL;
use strata::security::permissions::{BROWSE, READ, READ_WRITE, WRITE, WRITE_PROPERTIES};
use strata::security::{evaluate_acp, merged_acp, Ace, AclStore, CheckOptions, PermissionRegistry, PolicyChain, PolicyRequest, ReadAclIndex, SecurityResolver, EVERYONE};
use strata::sql::SqlRepository;
use strata::{Node, NodeId};

const PRINCIPALS: [&str; 4] = ["alice", "bob", "members", EVERYONE];
const PERMISSIONS: [&str; 4] = [READ, WRITE, READ_WRITE, BROWSE];

struct World {
    ids: Vec<NodeId>,
    mem: HierarchyIndex,
    acls: AclStore,
    sql: SqlRepository,
}

fn build(seed: u64, n: usize, int_ids: bool) -> World {
    let mut rng = StdRng::seed_from_u64(seed);
    let mk = |i: usize| if int_ids { NodeId::Int(i as i64 * 7) } else { NodeId::random() };
    let w = World { ids: (0..n).map(mk).collect(), mem: HierarchyIndex::default(), acls: AclStore::new(), sql: SqlRepository::open_in_memory().unwrap() };
    assert_eq!(w.ids.iter().collect::<std::collections::HashSet<_>>().len(), n, "ids must be distinct");
    for i in 0..n {
        let node = if i == 0 {
            Node::root(w.ids[0].clone())
        } else {
            let parent = w.ids[rng.gen_range(0..i)].clone();
            Node::child(w.ids[i].clone(), parent, &format!("node{}", i), "Folder")
        };
        w.mem.add_node(node.clone()).unwrap();
        w.sql.add_node(&node).unwrap();
        if rng.gen_bool(0.4) {
            for _ in 0..rng.gen_range(1..4) {
                let who = PRINCIPALS[rng.gen_range(0..PRINCIPALS.len())];
                let what = PERMISSIONS[rng.gen_range(0..PERMISSIONS.len())];
                let ace = if rng.gen_bool(0.7) { Ace::granting(who, what) } else { Ace::denying(who, what) };
                w.acls.add_ace(&w.ids[i], LOCAL_ACL, ace.clone()).unwrap();
                w.sql.add_ace(&w.ids[i], LOCAL_ACL, ace).unwrap();
            }
        }
    }
    w
}

fn principal_sets() -> Vec<Vec<&'static str>> { vec![vec!["alice"], vec!["bob", "members"], vec!["carol"], vec![]] }

#[test]
fn subtree_membership_agrees() {
    for (seed, int_ids) in [(1u64, false), (2, true)] {
        let w = build(seed, 40, int_ids);
        for a in &w.ids {
            for b in &w.ids {
                assert_eq!(w.mem.is_in_tree(a, b).unwrap(), w.sql.is_in_tree(a, b).unwrap(), "is_in_tree({}, {})", a, b);
            }
            assert_eq!(w.mem.ancestors(a).unwrap(), w.sql.ancestors(a).unwrap());
        }
    }
}

#[test]
fn acl_decisions_agree() {
    let registry = PermissionRegistry::standard();
    let w = build(3, 50, false);
    for id in &w.ids {
        let acp = merged_acp(&w.mem, &w.acls, id).unwrap();
        for principals in principal_sets() {
            for p in [READ, WRITE_PROPERTIES, BROWSE, WRITE] {
                let resolved = registry.resolve(p);
                let perms: Vec<&str> = resolved.iter().map(String::as_str).collect();
                let mem = evaluate_acp(&acp, &principals, &perms).allow;
                let sql = w.sql.access_allowed(id, &principals, &perms).unwrap();
                assert_eq!(mem, sql, "node {} principals {:?} permission {}", id, principals, p);
            }
        }
    }
}

#[test]
fn sql_search_matches_per_node_checks() {
    let registry = PermissionRegistry::standard();
    let w = build(4, 50, true);
    let resolved = registry.resolve(READ);
    let perms: Vec<&str> = resolved.iter().map(String::as_str).collect();
    for principals in principal_sets() {
        let owned: Vec<String> = principals.iter().map(|s| s.to_string()).collect();
        let found = w.sql.search(&w.ids[0], Some(&owned), &resolved, None).unwrap();
        let expected: Vec<NodeId> =
            w.ids.iter().filter(|id| evaluate_acp(&merged_acp(&w.mem, &w.acls, id).unwrap(), &principals, &perms).allow).cloned().collect();
        assert_eq!(found, expected, "principals {:?}", principals);
    }
}

#[test]
fn read_acl_filtering_agrees_with_resolver() {
    let registry = Arc::new(PermissionRegistry::standard());
    let resolver = SecurityResolver::new(Arc::new(PolicyChain::new()), registry.clone());
    let w = build(5, 60, false);
    let index = ReadAclIndex::new(registry.resolve(READ));
    index.rebuild(&w.mem, &w.acls, &w.ids).unwrap();
    assert!(index.acl_count() <= w.ids.len());
    let resolved = resolver.resolve_permission(READ);
    for principals in principal_sets() {
        let (principal, groups) = match principals.split_first() {
            Some((p, rest)) => (p.to_string(), rest.iter().map(|s| s.to_string()).collect::<Vec<_>>()),
            None => continue,
        };
        let expected: Vec<NodeId> = w
            .ids
            .iter()
            .filter(|id| {
                let node = w.mem.get_node(id).unwrap().unwrap();
                let acp = merged_acp(&w.mem, &w.acls, id).unwrap();
                let req = PolicyRequest {
                    node: &node,
                    acp: &acp,
                    principal: &principal,
                    permission: READ,
                    resolved_permissions: &resolved,
                    additional_principals: &groups,
                    lock: None,
                };
                resolver.check_permission(&req, &CheckOptions::default()).allow
            })
            .cloned()
            .collect();
        assert_eq!(index.filter_readable(&w.ids, &principals), expected, "principals {:?}", principals);
    }
}

#[test]
fn corrupted_cycle_terminates_with_false() {
    let h = HierarchyIndex::new(10_000);
    h.add_node(Node::root("root")).unwrap();
    h.add_node(Node::child("a", "root", "a", "Folder")).unwrap();
    h.add_node(Node::child("b", "a", "b", "Folder")).unwrap();
    h.set_parent_unchecked(&NodeId::from("a"), Some(NodeId::from("b")));
    assert!(!h.is_in_tree(&NodeId::from("b"), &NodeId::from("root")).unwrap());
    assert!(h.is_in_tree(&NodeId::from("b"), &NodeId::from("a")).unwrap());
    assert!(h.ancestors(&NodeId::from("b")).is_err());
}
