use shared::command::{CommandAction, CommandSource};
use shared::domain::SystemTag;

use super::*;

fn heart() -> StructureRecord {
    StructureRecord {
        id: StructureId::from("heart"),
        canonical_id: StructureId::from("heart"),
        name: "Heart".to_string(),
        alternate_name: Some("Cor".to_string()),
        system: SystemTag::Cardiovascular,
        parent_id: None,
    }
}

fn left_ventricle() -> StructureRecord {
    StructureRecord {
        id: StructureId::from("left_ventricle"),
        canonical_id: StructureId::from("left_ventricle"),
        name: "Left ventricle".to_string(),
        alternate_name: None,
        system: SystemTag::Cardiovascular,
        parent_id: Some(StructureId::from("heart")),
    }
}

async fn storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    storage().await.health_check().await.expect("health check");
}

#[tokio::test]
async fn stores_and_lists_structures_in_insertion_order() {
    let storage = storage().await;
    storage.create_structure(&heart()).await.expect("heart");
    storage
        .create_structure(&left_ventricle())
        .await
        .expect("left ventricle");

    let structures = storage.all_structures().await.expect("list");
    assert_eq!(structures.len(), 2);
    assert_eq!(structures[0].canonical_id, StructureId::from("heart"));
    assert_eq!(structures[1].parent_id, Some(StructureId::from("heart")));

    let found = storage
        .find_structure_by_id(&StructureId::from("heart"))
        .await
        .expect("find")
        .expect("present");
    assert_eq!(found.alternate_name.as_deref(), Some("Cor"));
    assert!(storage
        .find_structure_by_id(&StructureId::from("wing"))
        .await
        .expect("find")
        .is_none());
}

#[tokio::test]
async fn stores_synonyms_in_bulk() {
    let storage = storage().await;
    storage.create_structure(&heart()).await.expect("heart");
    storage
        .create_synonyms(&[
            SynonymEntry {
                term: "ticker".to_string(),
                language: "en".to_string(),
                priority: 1,
                canonical_id: StructureId::from("heart"),
            },
            SynonymEntry {
                term: "cor".to_string(),
                language: "la".to_string(),
                priority: 5,
                canonical_id: StructureId::from("heart"),
            },
        ])
        .await
        .expect("synonyms");

    let synonyms = storage.all_synonyms().await.expect("list");
    assert_eq!(synonyms.len(), 2);
    assert_eq!(synonyms[0].term, "ticker");
    assert_eq!(synonyms[1].language, "la");
}

#[tokio::test]
async fn backs_the_ontology_resolver() {
    let storage = storage().await;
    storage.create_structure(&heart()).await.expect("heart");
    storage
        .create_synonyms(&[SynonymEntry {
            term: "heart".to_string(),
            language: "en".to_string(),
            priority: 1,
            canonical_id: StructureId::from("heart"),
        }])
        .await
        .expect("synonyms");

    let resolver = ontology::OntologyResolver::load(&storage).await.expect("load");
    assert_eq!(resolver.resolve("hart"), Some(StructureId::from("heart")));
}

#[tokio::test]
async fn creates_sessions_with_distinct_active_codes() {
    let storage = storage().await;
    let first = storage.create_session("Thorax", UserId(1)).await.expect("first");
    let second = storage.create_session("Skull", UserId(1)).await.expect("second");

    assert_eq!(first.code.len(), 6);
    assert_ne!(first.code, second.code);
    assert!(first.is_active);

    let fetched = storage
        .get_session_by_code(&first.code)
        .await
        .expect("by code")
        .expect("present");
    assert_eq!(fetched.id, first.id);
    assert_eq!(fetched.title, "Thorax");
}

#[tokio::test]
async fn viewer_state_updates_persist_until_session_ends() {
    let storage = storage().await;
    let session = storage.create_session("Thorax", UserId(1)).await.expect("session");

    let mut state = ViewerState::default();
    state.visible_systems.insert(SystemTag::Cardiovascular);
    state.highlighted_id = Some(StructureId::from("heart"));
    storage
        .update_viewer_state(session.id, &state)
        .await
        .expect("update");

    let fetched = storage
        .get_session(session.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(fetched.viewer_state, state);

    let ended = storage.end_session(session.id).await.expect("end");
    assert!(!ended.is_active);
    // Frozen after end: both further writes and code lookups are refused.
    assert!(storage.update_viewer_state(session.id, &state).await.is_err());
    assert!(storage
        .get_session_by_code(&session.code)
        .await
        .expect("by code")
        .is_none());
    assert!(storage.end_session(session.id).await.is_err());
}

#[tokio::test]
async fn records_command_executions_for_audit() {
    let storage = storage().await;
    let session = storage.create_session("Thorax", UserId(1)).await.expect("session");

    let command = Command::new(CommandSource::Voice, CommandAction::Show, "heart");
    storage
        .record_command_execution(session.id, UserId(2), &command, true)
        .await
        .expect("record ok");
    let failed = Command::new(CommandSource::Voice, CommandAction::Show, "xyzzy");
    storage
        .record_command_execution(session.id, UserId(2), &failed, false)
        .await
        .expect("record failed");

    let executions = storage
        .list_command_executions(session.id)
        .await
        .expect("list");
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].command.id, command.id);
    assert!(executions[0].success);
    assert_eq!(executions[1].command.target, "xyzzy");
    assert!(!executions[1].success);
}
