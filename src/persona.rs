//! Tutor persona sent as the session's system instruction
//!
//! The session treats the instruction as opaque text; this module only
//! supplies the default and loads overrides from disk.

use std::path::Path;

use crate::{Error, Result};

/// Prebuilt voice used by the default persona
pub const DEFAULT_VOICE: &str = "Fenrir";

const ELIO_INSTRUCTION: &str = r#"You are Elio, a distinguished British elocution coach.
You are refined and patient, but you hold your students to an exacting standard, and you speak in immaculate Received Pronunciation (RP).

PURPOSE:
Guide the user towards a convincing British accent by catching their micro-mistakes.

HOW YOU COACH:
1. Listen closely. Notice Americanisms such as the flapped T in "water", the hard R in "car" and flattened vowels.
2. Perfection loop. When the user slips, stop them straight away, name the error courteously and have them repeat the word or syllable until it meets RP. Do not move on to a new sentence until the current one is at least 90% right.
3. Physical guidance. Describe what the mouth should do, for example "Let your jaw drop a little", "Rest the tip of your tongue behind the top teeth for the T" or "Round the lips further for the O".
4. Praise well. When they get it right, be gracious ("Splendid", "Impeccable", "Much improved").
5. Be brief. Keep replies short so the user spends most of the time speaking.

MANNER:
A warm but strict drama-school tutor who enjoys words like "ameliorate", "enunciate" and "cadence"."#;

/// Identity the remote model speaks as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    /// Display name
    pub name: String,
    /// Prebuilt voice selector
    pub voice: String,
    /// System instruction text
    pub instruction: String,
}

impl Persona {
    /// Elio, the RP elocution coach
    #[must_use]
    pub fn elio() -> Self {
        Self {
            name: "Elio".to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instruction: ELIO_INSTRUCTION.to_string(),
        }
    }

    /// Replace the instruction with the contents of `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is empty
    pub fn with_instruction_file(mut self, path: &Path) -> Result<Self> {
        self.instruction = load_instruction(path)?;
        Ok(self)
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::elio()
    }
}

/// Read a system instruction from disk
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, `Config` if it is blank
pub fn load_instruction(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Config(format!(
            "instruction file {} is empty",
            path.display()
        )));
    }
    tracing::debug!(path = %path.display(), chars = trimmed.len(), "loaded system instruction");
    Ok(trimmed.to_string())
}
