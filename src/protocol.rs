use serde::{Deserialize, Serialize};

/// Discrete notifications from the audio loop towards the UI.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusEvent {
    InputOk,
    InputFail,
    OutputOk,
    OutputFail,
    ReceiveOk,
    ReceiveFail,
    /// The loop has exited, meters and LEDs go back to idle.
    ResetAll,
}

/// Receiver of [`StatusEvent`]s. Implementations must return immediately and
/// must not fail; a dropped notification is acceptable.
pub trait StatusSink: Send + Sync {
    fn post(&self, event: StatusEvent);
}

/// Messages sent to the UI process.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    Status {
        event: StatusEvent,
    },
    Stats {
        level_left_db: f64,
        level_right_db: f64,
        jitter_ms: f64,
        connected: bool,
    },
    Error {
        text: String,
    },
}

/// Messages received from the UI process.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Fader position, 0..=MAX_FADER.
    Fader { value: u32 },
    /// Reverb level 0..=MAX_REVERB and target channel.
    Reverb {
        level: u32,
        #[serde(default)]
        on_left: Option<bool>,
    },
    /// Textual server address (IP literal).
    Server { address: String },
    Start,
    Stop,
}
