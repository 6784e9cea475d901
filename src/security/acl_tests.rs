use super::*;
use crate::hierarchy::HierarchyIndex;
use crate::model::Node;

fn id(s: &str) -> NodeId { NodeId::from(s) }

#[test]
fn acl_name_must_not_be_empty() {
    assert!(Acl::new("").is_err());
    assert!(Acl::new("  ").is_err());
    assert_eq!(Acl::new("local").unwrap().name(), "local");
}

#[test]
fn adding_to_empty_acl_increments_count_and_keeps_order() {
    let mut acl = Acl::new(LOCAL_ACL).unwrap();
    assert!(acl.is_empty());
    acl.add(Ace::granting("alice", "Read"));
    assert_eq!(acl.len(), 1);
    acl.add(Ace::denying("bob", "Write"));
    acl.add(Ace::granting("carol", "Read"));
    assert_eq!(acl.len(), 3);
    let who: Vec<&str> = acl.aces().iter().map(|a| a.principal.as_str()).collect();
    assert_eq!(who, vec!["alice", "bob", "carol"]);
    let pos: Vec<u32> = acl.aces().iter().map(|a| a.position).collect();
    assert_eq!(pos, vec![0, 1, 2]);
}

#[test]
fn insert_and_remove_renumber_positions() {
    let mut acl = Acl::new(LOCAL_ACL).unwrap();
    acl.add(Ace::granting("alice", "Read"));
    acl.add(Ace::granting("bob", "Read"));
    acl.insert(0, Ace::denying("mallory", "Everything"));
    assert_eq!(acl.aces()[0].principal, "mallory");
    assert_eq!(acl.aces()[2].position, 2);
    assert_eq!(acl.remove_principal("mallory"), 1);
    assert_eq!(acl.aces()[0].principal, "alice");
    assert_eq!(acl.aces()[0].position, 0);
    assert_eq!(acl.remove_principal("nobody"), 0);
}

#[test]
fn acp_keeps_acl_order_and_replaces_by_name() {
    let mut acp = Acp::new();
    acp.acl_mut(LOCAL_ACL).unwrap().add(Ace::granting("a", "Read"));
    acp.acl_mut(INHERITED_ACL).unwrap().add(Ace::granting("b", "Read"));
    let mut replacement = Acl::new(LOCAL_ACL).unwrap();
    replacement.add(Ace::granting("c", "Write"));
    acp.set_acl(replacement);
    let names: Vec<&str> = acp.acls().iter().map(|a| a.name()).collect();
    assert_eq!(names, vec![LOCAL_ACL, INHERITED_ACL]);
    assert_eq!(acp.acl(LOCAL_ACL).unwrap().aces()[0].principal, "c");
    assert!(acp.remove_acl(INHERITED_ACL));
    assert_eq!(acp.ace_count(), 1);
}

#[test]
fn merged_acp_is_nearest_first() {
    let h = HierarchyIndex::default();
    h.add_node(Node::root("root")).unwrap();
    h.add_node(Node::child("f", "root", "f", "Folder")).unwrap();
    h.add_node(Node::child("d", "f", "d", "File")).unwrap();
    let store = AclStore::new();
    store.add_ace(&id("root"), LOCAL_ACL, Ace::granting("admins", "Everything")).unwrap();
    store.add_ace(&id("d"), LOCAL_ACL, Ace::granting("alice", "Read")).unwrap();
    store.add_ace(&id("d"), INHERITED_ACL, Ace::granting("bob", "Read")).unwrap();

    let m = merged_acp(&h, &store, &id("d")).unwrap();
    let origin: Vec<(String, &str)> = m.entries().iter().map(|e| (e.node.to_string(), e.ace.principal.as_str())).collect();
    assert_eq!(origin, vec![("d".to_string(), "alice"), ("d".to_string(), "bob"), ("root".to_string(), "admins")]);
}

#[test]
fn version_falls_back_to_live_document_acls() {
    let h = HierarchyIndex::default();
    h.add_node(Node::root("root")).unwrap();
    h.add_node(Node::child("live", "root", "doc", "File")).unwrap();
    h.add_node(Node::version_of("v1", "live", "File")).unwrap();
    let store = AclStore::new();
    store.add_ace(&id("live"), LOCAL_ACL, Ace::granting("alice", "Read")).unwrap();
    store.add_ace(&id("root"), LOCAL_ACL, Ace::granting("admins", "Everything")).unwrap();

    let m = merged_acp(&h, &store, &id("v1")).unwrap();
    let nodes: Vec<String> = m.entries().iter().map(|e| e.node.to_string()).collect();
    assert_eq!(nodes, vec!["live", "root"]);
}

#[test]
fn unknown_node_has_empty_merged_acp() {
    let h = HierarchyIndex::default();
    let store = AclStore::new();
    assert!(merged_acp(&h, &store, &id("ghost")).unwrap().is_empty());
}
