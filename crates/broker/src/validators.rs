use shared::command::{Command, CommandSource};

use crate::CommandValidator;

/// Structure-directed actions must carry a non-blank target; view controls
/// (reset, rotate, zoom) are exempt.
pub struct TargetRequiredValidator;

impl CommandValidator for TargetRequiredValidator {
    fn name(&self) -> &str {
        "target-required"
    }

    fn validate(&self, command: &Command) -> Result<(), String> {
        if command.action.requires_target() && command.target.trim().is_empty() {
            return Err(format!(
                "action {:?} requires a target structure",
                command.action
            ));
        }
        Ok(())
    }
}

/// Rejects voice commands whose transcript confidence is below a floor.
/// Commands without a confidence value pass; the transcription layer is
/// allowed to omit it.
pub struct VoiceConfidenceValidator {
    pub min_confidence: f64,
}

impl VoiceConfidenceValidator {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl CommandValidator for VoiceConfidenceValidator {
    fn name(&self) -> &str {
        "voice-confidence"
    }

    fn validate(&self, command: &Command) -> Result<(), String> {
        if command.source != CommandSource::Voice {
            return Ok(());
        }
        let confidence = command
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("confidence"))
            .and_then(|value| value.as_f64());
        match confidence {
            Some(confidence) if confidence < self.min_confidence => Err(format!(
                "voice confidence {confidence:.2} below minimum {:.2}",
                self.min_confidence
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::command::CommandAction;

    #[test]
    fn target_required_for_structure_actions() {
        let validator = TargetRequiredValidator;
        let missing = Command::new(CommandSource::Ui, CommandAction::Show, "  ");
        assert!(validator.validate(&missing).is_err());

        let present = Command::new(CommandSource::Ui, CommandAction::Show, "heart");
        assert!(validator.validate(&present).is_ok());

        let view_control = Command::new(CommandSource::Ui, CommandAction::Reset, "");
        assert!(validator.validate(&view_control).is_ok());
    }

    #[test]
    fn low_confidence_voice_command_rejected() {
        let validator = VoiceConfidenceValidator::new(0.6);
        let low = Command::new(CommandSource::Voice, CommandAction::Show, "heart")
            .with_metadata(serde_json::json!({ "confidence": 0.3 }));
        assert!(validator.validate(&low).is_err());

        let high = Command::new(CommandSource::Voice, CommandAction::Show, "heart")
            .with_metadata(serde_json::json!({ "confidence": 0.9 }));
        assert!(validator.validate(&high).is_ok());
    }

    #[test]
    fn confidence_only_checked_for_voice() {
        let validator = VoiceConfidenceValidator::new(0.6);
        let ui = Command::new(CommandSource::Ui, CommandAction::Show, "heart")
            .with_metadata(serde_json::json!({ "confidence": 0.1 }));
        assert!(validator.validate(&ui).is_ok());

        let voice_without = Command::new(CommandSource::Voice, CommandAction::Show, "heart");
        assert!(validator.validate(&voice_without).is_ok());
    }
}
