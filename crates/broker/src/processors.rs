use std::sync::Arc;

use async_trait::async_trait;
use ontology::OntologyResolver;
use shared::command::Command;
use tracing::debug;

use crate::CommandProcessor;

/// Resolves the free-text target of a structure-directed command to a
/// canonical identifier before it is forwarded to any rendering target.
pub struct StructureCommandProcessor {
    resolver: Arc<OntologyResolver>,
}

impl StructureCommandProcessor {
    pub fn new(resolver: Arc<OntologyResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl CommandProcessor for StructureCommandProcessor {
    fn name(&self) -> &str {
        "structure-command"
    }

    fn can_process(&self, command: &Command) -> bool {
        command.action.requires_target()
    }

    async fn process(&self, command: &Command) -> Result<Command, String> {
        match self.resolver.resolve(&command.target) {
            Some(id) => {
                debug!(term = %command.target, resolved = %id, "resolved command target");
                Ok(command.with_target(id.0))
            }
            None => Err(format!("could not resolve term '{}'", command.target)),
        }
    }
}

/// Scene-level controls (rotate, zoom, reset) need no resolution and pass
/// through untouched.
pub struct ViewControlProcessor;

#[async_trait]
impl CommandProcessor for ViewControlProcessor {
    fn name(&self) -> &str {
        "view-control"
    }

    fn can_process(&self, command: &Command) -> bool {
        !command.action.requires_target()
    }

    async fn process(&self, command: &Command) -> Result<Command, String> {
        Ok(command.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontology::OntologyIndex;
    use shared::command::{CommandAction, CommandSource};
    use shared::domain::{StructureId, StructureRecord, SynonymEntry, SystemTag};

    fn resolver() -> Arc<OntologyResolver> {
        let mut index = OntologyIndex::new();
        index
            .insert_structure(StructureRecord {
                id: StructureId::from("heart"),
                canonical_id: StructureId::from("heart"),
                name: "Heart".to_string(),
                alternate_name: None,
                system: SystemTag::Cardiovascular,
                parent_id: None,
            })
            .expect("heart");
        index
            .insert_synonym(SynonymEntry {
                term: "heart".to_string(),
                language: "en".to_string(),
                priority: 1,
                canonical_id: StructureId::from("heart"),
            })
            .expect("synonym");
        Arc::new(OntologyResolver::from_index(index))
    }

    #[tokio::test]
    async fn resolves_misspelled_target() {
        let processor = StructureCommandProcessor::new(resolver());
        let command = Command::new(CommandSource::Voice, CommandAction::Show, "hart");
        assert!(processor.can_process(&command));
        let processed = processor.process(&command).await.expect("resolved");
        assert_eq!(processed.target, "heart");
        assert_eq!(processed.id, command.id);
    }

    #[tokio::test]
    async fn unresolvable_target_is_a_processor_failure() {
        let processor = StructureCommandProcessor::new(resolver());
        let command = Command::new(CommandSource::Voice, CommandAction::Show, "xyzzy");
        let error = processor.process(&command).await.expect_err("unresolved");
        assert!(error.contains("xyzzy"));
    }

    #[tokio::test]
    async fn view_controls_pass_through() {
        let processor = ViewControlProcessor;
        let structure = Command::new(CommandSource::Ui, CommandAction::Show, "heart");
        assert!(!processor.can_process(&structure));

        let zoom = Command::new(CommandSource::Ui, CommandAction::Zoom, "")
            .with_metadata(serde_json::json!({ "factor": 1.5 }));
        assert!(processor.can_process(&zoom));
        let processed = processor.process(&zoom).await.expect("pass through");
        assert_eq!(processed, zoom);
    }
}
