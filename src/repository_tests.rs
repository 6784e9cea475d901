use super::*;
use crate::config::CoreConfig;
use crate::hierarchy::HierarchyIndex;
use crate::locks::MemoryLockManager;
use crate::security::acl::LOCAL_ACL;
use crate::security::permissions::{READ, WRITE};
use crate::security::{Ace, AclStore};

struct Fixture {
    repo: Repository,
    h: Arc<HierarchyIndex>,
    acls: Arc<AclStore>,
}

fn id(s: &str) -> NodeId { NodeId::from(s) }

fn fixture() -> Fixture {
    let h = Arc::new(HierarchyIndex::default());
    h.add_node(Node::root("root")).unwrap();
    h.add_node(Node::child("ws", "root", "ws", "Workspace")).unwrap();
    h.add_node(Node::child("doc", "ws", "doc", "File")).unwrap();
    h.add_node(Node::child("doc2", "ws", "doc2", "File")).unwrap();
    let acls = Arc::new(AclStore::new());
    acls.add_ace(&id("ws"), LOCAL_ACL, Ace::granting("editors", WRITE)).unwrap();
    acls.add_ace(&id("ws"), LOCAL_ACL, Ace::granting("readers", READ)).unwrap();
    let cfg = CoreConfig { administrators: vec!["admin".to_string()], ..CoreConfig::default() };
    let repo = Repository::new(h.clone(), acls.clone(), Arc::new(MemoryLockManager::new()), Arc::new(cfg.resolver()));
    Fixture { repo, h, acls }
}

fn editor(name: &str) -> Subject { Subject::new(name).with_group("editors") }

#[test]
fn check_combines_groups_and_acls() {
    let f = fixture();
    let none = CheckOptions::default();
    assert!(f.repo.check(&id("doc"), &editor("alice"), WRITE_PROPERTIES, &none).unwrap().allow);
    assert!(!f.repo.check(&id("doc"), &Subject::new("alice"), WRITE_PROPERTIES, &none).unwrap().allow);
    let reader = Subject::new("bob").with_group("readers");
    assert!(f.repo.check(&id("doc"), &reader, "Browse", &none).unwrap().allow);
    assert!(!f.repo.check(&id("doc"), &reader, WRITE, &none).unwrap().allow);
    assert_eq!(reader.principals(), vec!["bob", "readers"]);
}

#[test]
fn unknown_node_is_not_found_but_check_or_deny_denies() {
    let f = fixture();
    let err = f.repo.check(&id("ghost"), &editor("alice"), READ, &CheckOptions::default()).unwrap_err();
    assert_eq!(err.http_status(), 404);
    let d = f.repo.check_or_deny(&id("ghost"), &editor("alice"), READ, &CheckOptions::default());
    assert!(!d.allow);
    assert_eq!(d.reason, DecisionReason::Failed { code: "node_not_found".into() });
}

#[test]
fn lock_blocks_other_writers_until_unlocked() {
    let f = fixture();
    let none = CheckOptions::default();
    f.repo.lock(&id("doc"), &editor("alice")).unwrap();
    assert!(!f.repo.check(&id("doc"), &editor("carol"), WRITE_PROPERTIES, &none).unwrap().allow);
    assert!(f.repo.check(&id("doc"), &editor("alice"), WRITE_PROPERTIES, &none).unwrap().allow);
    let bypass = CheckOptions::default().bypassing(LockedDocumentPolicy::NAME);
    assert!(f.repo.check(&id("doc"), &editor("carol"), WRITE_PROPERTIES, &bypass).unwrap().allow);

    let err = f.repo.lock(&id("doc"), &editor("carol")).unwrap_err();
    assert_eq!(err.conflict_owner(), Some("alice"));
    assert_eq!(f.repo.lock(&id("doc"), &editor("alice")).unwrap_err().conflict_owner(), Some("alice"));

    assert_eq!(f.repo.unlock(&id("doc"), &editor("carol")).unwrap_err().code_str(), "unlock_denied");
    assert!(f.repo.unlock(&id("doc"), &editor("alice")).unwrap().is_some());
    assert!(f.repo.check(&id("doc"), &editor("carol"), WRITE_PROPERTIES, &none).unwrap().allow);
}

#[test]
fn lock_needs_write_permission() {
    let f = fixture();
    let err = f.repo.lock(&id("doc"), &Subject::new("bob").with_group("readers")).unwrap_err();
    assert_eq!(err.code_str(), "permission_denied");
}

#[test]
fn administrators_unlock_anything() {
    let f = fixture();
    f.repo.lock(&id("doc"), &editor("alice")).unwrap();
    let removed = f.repo.unlock(&id("doc"), &Subject::new("admin")).unwrap().unwrap();
    assert_eq!(removed.owner, "alice");
}

#[test]
fn unlock_permission_from_acl_counts_as_administrative() {
    let f = fixture();
    f.acls.add_ace(&id("ws"), LOCAL_ACL, Ace::granting("ops", UNLOCK)).unwrap();
    f.repo.lock(&id("doc"), &editor("alice")).unwrap();
    assert!(f.repo.unlock(&id("doc"), &Subject::new("ops")).unwrap().is_some());
}

#[test]
fn post_filter_drops_documents_locked_by_others() {
    let f = fixture();
    f.repo.lock(&id("doc"), &editor("alice")).unwrap();
    let ids = vec![id("ws"), id("doc"), id("doc2"), id("ghost")];
    let none = CheckOptions::default();
    assert_eq!(f.repo.post_filter(&ids, &editor("carol"), WRITE_PROPERTIES, &none), vec![id("ws"), id("doc2")]);
    assert_eq!(f.repo.post_filter(&ids, &editor("alice"), WRITE_PROPERTIES, &none), vec![id("ws"), id("doc"), id("doc2")]);
    // reads are untouched by the lock policy, so no filtering happens at all
    assert_eq!(f.repo.post_filter(&ids, &editor("carol"), READ, &none), ids);
}

#[test]
fn scope_follows_the_hierarchy() {
    let f = fixture();
    assert!(f.repo.is_in_scope(&id("doc"), &id("ws")).unwrap());
    f.h.add_node(Node::child("other", "root", "other", "Folder")).unwrap();
    f.h.move_node(&id("doc"), &id("other")).unwrap();
    assert!(!f.repo.is_in_scope(&id("doc"), &id("ws")).unwrap());
}

#[test]
fn sql_backed_repository_agrees() {
    let sql = Arc::new(SqlRepository::open_in_memory().unwrap());
    sql.add_node(&Node::root("root")).unwrap();
    sql.add_node(&Node::child("doc", "root", "doc", "File")).unwrap();
    sql.add_ace(&id("root"), LOCAL_ACL, Ace::granting("editors", WRITE)).unwrap();
    let repo = Repository::from_sql(sql, Arc::new(CoreConfig::default().resolver()));
    repo.lock(&id("doc"), &editor("alice")).unwrap();
    assert!(!repo.check(&id("doc"), &editor("carol"), WRITE_PROPERTIES, &CheckOptions::default()).unwrap().allow);
    assert!(repo.unlock(&id("doc"), &editor("alice")).unwrap().is_some());
}

fn template_repo(denied: &str) -> (Arc<SqlRepository>, Repository) {
    let sql = Arc::new(SqlRepository::open_in_memory().unwrap());
    sql.add_node(&Node::root("root")).unwrap();
    sql.add_node(&Node::child("tpl", "root", "tpl", "Template")).unwrap();
    sql.add_node(&Node::child("doc", "root", "doc", "File")).unwrap();
    sql.add_ace(&id("root"), LOCAL_ACL, Ace::granting("alice", crate::security::permissions::EVERYTHING)).unwrap();
    let cfg = CoreConfig {
        administrators: vec!["admin".to_string()],
        denied_types: vec![crate::config::DeniedType { primary_type: "Template".into(), permissions: vec![denied.to_string()] }],
        ..CoreConfig::default()
    };
    let repo = Repository::from_sql(sql.clone(), Arc::new(cfg.resolver()));
    (sql, repo)
}

#[test]
fn search_then_post_filter_drops_type_denied_nodes() {
    let (sql, repo) = template_repo(READ);
    let alice = Subject::new("alice");
    let none = CheckOptions::default();
    assert!(!repo.check(&id("tpl"), &alice, READ, &none).unwrap().allow);

    let resolved = repo.resolver().resolve_permission(READ);
    let found = sql.search(&id("root"), Some(alice.principals().as_slice()), &resolved, None).unwrap();
    assert_eq!(found, vec![id("root"), id("tpl"), id("doc")]);
    assert_eq!(repo.post_filter(&found, &alice, READ, &none), vec![id("root"), id("doc")]);

    // administrators search without a security clause and keep everything
    let everything = sql.search(&id("root"), None, &[], None).unwrap();
    assert_eq!(repo.post_filter(&everything, &Subject::new("admin"), READ, &none), everything);
}

#[test]
fn denied_permission_also_denies_compounds_containing_it() {
    let (_sql, repo) = template_repo(WRITE);
    let alice = Subject::new("alice");
    let none = CheckOptions::default();
    for perm in [WRITE, crate::security::permissions::READ_WRITE, crate::security::permissions::EVERYTHING] {
        let d = repo.check(&id("tpl"), &alice, perm, &none).unwrap();
        assert!(!d.allow, "{}", perm);
        assert_eq!(d.reason, DecisionReason::Policy { name: "type-deny:Template".into() });
        assert!(repo.check(&id("doc"), &alice, perm, &none).unwrap().allow, "{}", perm);
    }
    assert!(repo.check(&id("tpl"), &alice, READ, &none).unwrap().allow);
}
