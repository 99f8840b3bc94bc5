use thiserror::Error;

/// Conditions that abort a broadcast run without writing any audio.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("duration of {requested} minutes is out of range (1 to {max})")]
    DurationOutOfRange { requested: u32, max: u32 },

    #[error("no script content generated")]
    EmptyScript,

    #[error("script produced no parts")]
    NoScriptParts,

    #[error("no audio content generated for part {part} of {total}")]
    EmptyAudio { part: usize, total: usize },
}
