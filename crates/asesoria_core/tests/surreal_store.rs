//! Integration tests for the SurrealDB-backed store
//!
//! These run the full migration list against the in-memory SurrealDB engine
//! and drive the engine through the facade, so the unique indexes and the
//! record conversions are exercised together.

use asesoria_core::{
    AuthorizationFacade, ConversationKind, CoreError, ErrorKind, Role, RoleSource, User, UserId,
    db::{
        IdentityStore, LabelStore, SurrealStore,
        client::create_test_db,
        migration::{MigrationOptions, MigrationRunner, migrations},
    },
    label::default_seed,
};
use pretty_assertions::assert_eq;
use std::future::Future;
use std::sync::Arc;
use surrealdb::{Surreal, engine::any::Any};

/// Retry while the store reports a transient failure
async fn retrying<T, F, Fut>(mut call: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    for _ in 0..10 {
        match call().await {
            Err(e) if e.is_retryable() => continue,
            other => return other,
        }
    }
    call().await
}

#[tokio::test]
async fn test_migrations_are_recorded_once() {
    let store = create_test_db().await.unwrap();
    let latest = migrations().last().map(|m| m.version).unwrap();
    assert_eq!(
        MigrationRunner::current_version(&*store).await.unwrap(),
        latest
    );

    let again = MigrationRunner::run(&store, &MigrationOptions::default())
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(store.all_labels().await.unwrap().len(), default_seed().len());
}

#[tokio::test]
async fn test_business_id_unique_index() {
    let store = create_test_db().await.unwrap();
    let facade = AuthorizationFacade::new(store);
    facade.register_user("CONS0001", "Ana").await.unwrap();

    let err = facade.register_user("CONS0001", "Ana bis").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_user_round_trip() {
    let store = create_test_db().await.unwrap();
    let user = User::new("ADV0002", "Beto");
    store.insert_user(&user).await.unwrap();

    let by_id = store.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(by_id.business_id, "ADV0002");
    assert_eq!(by_id.role, Some(Role::Asesor));

    let by_business_id = store
        .get_user_by_business_id("ADV0002")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_business_id.id, user.id);
    assert!(store.get_user_by_business_id("NOPE").await.unwrap().is_none());
}

#[tokio::test]
async fn test_conversation_and_labels_end_to_end() {
    let store = create_test_db().await.unwrap();
    let facade = AuthorizationFacade::new(store.clone());
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();
    let usuario = facade.register_user("XAXX010101000", "Carla").await.unwrap();
    let asesor = facade.register_user("ADV0002", "Beto").await.unwrap();

    let denied = facade
        .authorize_create(usuario.id, &[asesor.id], ConversationKind::Direct)
        .await
        .unwrap_err();
    assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

    let group = facade
        .authorize_create(consultor.id, &[usuario.id, asesor.id], ConversationKind::Group)
        .await
        .unwrap();
    assert_eq!(facade.get_conversation(group.id).await.unwrap(), group);

    let catalog = facade.list_catalog().await.unwrap();
    let urgente = catalog.iter().find(|l| l.name == "Urgente").unwrap();
    let pendiente = catalog.iter().find(|l| l.name == "Pendiente").unwrap();

    let first = facade.assign(usuario.id, group.id, urgente.id).await.unwrap();
    let again = facade.assign(asesor.id, group.id, urgente.id).await.unwrap();
    assert_eq!(first.id, again.id);
    assert_eq!(again.assigned_by, Some(usuario.id));
    facade.assign(consultor.id, group.id, pendiente.id).await.unwrap();

    let names: Vec<String> = facade
        .list_labels(group.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["Pendiente", "Urgente"]);

    assert_eq!(
        facade.conversations_with_label(urgente.id).await.unwrap(),
        vec![group.id]
    );

    assert!(facade.unassign(asesor.id, group.id, pendiente.id).await.unwrap());
    assert!(!facade.unassign(asesor.id, group.id, pendiente.id).await.unwrap());

    assert_eq!(facade.delete_conversation(group.id).await.unwrap(), 1);
    assert!(
        store
            .assignments_for_label(urgente.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_label_name_unique_index() {
    let store = create_test_db().await.unwrap();
    let facade = AuthorizationFacade::new(store);
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();

    let custom = facade
        .upsert_label(consultor.id, "Cobranza", "#0EA5E9", "wallet")
        .await
        .unwrap();
    let err = facade
        .rename_label(consultor.id, custom.id, "Urgente")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let restyled = facade
        .update_label_style(consultor.id, custom.id, Some("#0284C7"), None)
        .await
        .unwrap();
    assert_eq!(restyled.color, "#0284C7");
    assert_eq!(restyled.icon, "wallet");
}

#[tokio::test]
async fn test_reclassify_and_counts() {
    let store = create_test_db().await.unwrap();
    for (business_id, stored) in [
        ("CONS0001", Some(Role::Usuario)),
        ("ADMIN000CONS", None),
        ("ADV0002", Some(Role::Usuario)),
        ("XAXX010101000", Some(Role::Usuario)),
    ] {
        let mut user = User::new(business_id, business_id);
        user.role = stored;
        store.insert_user(&user).await.unwrap();
    }

    let facade = AuthorizationFacade::new(store.clone());
    let first = facade.reclassify_all().await.unwrap();
    let second = facade.reclassify_all().await.unwrap();

    assert!(first.is_complete());
    assert_eq!(first.changed, 3);
    assert_eq!(second.changed, 0);
    assert_eq!(first.counts, second.counts);
    assert_eq!(first.counts.get(Role::Consultor), 2);
    assert_eq!(first.counts.get(Role::Asesor), 1);
    assert_eq!(first.counts.get(Role::Usuario), 1);
    assert_eq!(store.count_by_role().await.unwrap(), first.counts);
}

#[tokio::test]
async fn test_list_users_pages() {
    let store = create_test_db().await.unwrap();
    for business_id in ["D", "B", "A", "C", "E"] {
        store
            .insert_user(&User::new(business_id, business_id))
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let page = store.list_users(after.as_deref(), 2).await.unwrap();
        if page.is_empty() {
            break;
        }
        after = page.last().map(|u| u.business_id.clone());
        seen.extend(page.into_iter().map(|u| u.business_id));
    }
    assert_eq!(seen, vec!["A", "B", "C", "D", "E"]);
}

#[tokio::test]
async fn test_purge_user_keeps_assignment() {
    let store = create_test_db().await.unwrap();
    let facade = AuthorizationFacade::new(store.clone());
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();
    let usuario = facade.register_user("XAXX010101000", "Carla").await.unwrap();
    let conversation = facade
        .authorize_create(usuario.id, &[consultor.id], ConversationKind::Direct)
        .await
        .unwrap();
    let label = facade.list_catalog().await.unwrap().remove(0);
    facade.assign(usuario.id, conversation.id, label.id).await.unwrap();

    assert_eq!(facade.purge_user(usuario.id).await.unwrap(), 1);
    assert!(store.get_user(usuario.id).await.unwrap().is_none());

    let rows = store
        .assignments_for_conversation(conversation.id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].assigned_by, None);
}

#[tokio::test]
async fn test_unreachable_store_is_unavailable() {
    let store = Arc::new(SurrealStore::new(Surreal::<Any>::init()));
    let facade = AuthorizationFacade::new(store);

    let err = facade
        .authorize_create(UserId::generate(), &[UserId::generate()], ConversationKind::Direct)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(err.is_retryable());
    assert!(err.denial().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upsert_label_settles_on_one_row() {
    let store = create_test_db().await.unwrap();
    let facade = Arc::new(AuthorizationFacade::new(store.clone()));
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let facade = facade.clone();
            tokio::spawn(async move {
                facade
                    .upsert_label(consultor.id, "Nueva", "#22C55E", "sparkles")
                    .await
            })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let named: Vec<_> = store
        .all_labels()
        .await
        .unwrap()
        .into_iter()
        .filter(|l| l.name == "Nueva")
        .collect();
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, ids[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assign_settles_on_one_row() {
    let store = create_test_db().await.unwrap();
    let facade = Arc::new(AuthorizationFacade::new(store.clone()));
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();
    let usuario = facade.register_user("XAXX010101000", "Carla").await.unwrap();
    let conversation = facade
        .authorize_create(usuario.id, &[consultor.id], ConversationKind::Direct)
        .await
        .unwrap();
    let label = facade.list_catalog().await.unwrap().remove(0);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let facade = facade.clone();
            let actor = if i % 2 == 0 { consultor.id } else { usuario.id };
            tokio::spawn(async move { facade.assign(actor, conversation.id, label.id).await })
        })
        .collect();
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(
        store
            .assignments_for_conversation(conversation.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overrides_survive_concurrent_reclassify() {
    let store = create_test_db().await.unwrap();
    let mut pinned = Vec::new();
    for i in 0..20 {
        let mut user = User::new(format!("CONS{i:04}"), "stale");
        user.role = None;
        store.insert_user(&user).await.unwrap();
        if i % 4 == 0 {
            pinned.push(user.id);
        }
    }
    let facade = Arc::new(AuthorizationFacade::new(store.clone()));

    let pass = {
        let facade = facade.clone();
        tokio::spawn(async move { facade.reclassify_all().await })
    };
    for id in &pinned {
        retrying(|| facade.override_role(*id, Role::Asesor))
            .await
            .unwrap();
    }
    pass.await.unwrap().unwrap();

    for id in &pinned {
        let user = store.get_user(*id).await.unwrap().unwrap();
        assert_eq!(user.role, Some(Role::Asesor));
        assert_eq!(user.role_source, RoleSource::Override);
    }
}

#[tokio::test]
async fn test_rename_refused_once_assigned() {
    let store = create_test_db().await.unwrap();
    let facade = AuthorizationFacade::new(store);
    let consultor = facade.register_user("CONS0001", "Ana").await.unwrap();
    let usuario = facade.register_user("XAXX010101000", "Carla").await.unwrap();
    let conversation = facade
        .authorize_create(usuario.id, &[consultor.id], ConversationKind::Direct)
        .await
        .unwrap();
    let label = facade
        .upsert_label(consultor.id, "Cobranza", "#0EA5E9", "wallet")
        .await
        .unwrap();

    let renamed = facade
        .rename_label(consultor.id, label.id, "Cobros")
        .await
        .unwrap();
    assert_eq!(renamed.name, "Cobros");

    facade.assign(usuario.id, conversation.id, label.id).await.unwrap();
    let err = facade
        .rename_label(consultor.id, label.id, "Pagos")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(facade.catalog().get(label.id).await.unwrap().name, "Cobros");
}
