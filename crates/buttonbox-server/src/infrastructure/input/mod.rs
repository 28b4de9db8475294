//! Input execution backends.
//!
//! The default backend logs every command instead of synthesising OS input,
//! which keeps the server useful for protocol bring-up on machines where no
//! input driver is wired in yet.  Platform drivers implement the same
//! [`InputExecutor`] trait.

use async_trait::async_trait;
use buttonbox_core::Command;
use tokio::time::Duration;
use tracing::info;

use crate::application::dispatch_commands::{ExecutionError, InputExecutor};

/// Executor that logs commands without touching the OS input layer.
///
/// Hold-style key presses still honour their duration so client-side timing
/// behaves the same as with a real driver.
#[derive(Debug, Default)]
pub struct LogOnlyExecutor;

impl LogOnlyExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InputExecutor for LogOnlyExecutor {
    async fn execute(&self, command: &Command) -> Result<(), ExecutionError> {
        match command {
            Command::KeyEvent {
                key,
                modifiers,
                press,
            } => {
                info!(key = %key, modifiers = ?modifiers, press = ?press.kind, "key event");
                if let Some(hold_ms) = press.hold_millis() {
                    tokio::time::sleep(Duration::from_millis(hold_ms)).await;
                }
            }
            Command::MouseEvent {
                button,
                modifiers,
                press,
            } => {
                info!(button = ?button, modifiers = ?modifiers, press = ?press.kind, "mouse event");
                if let Some(hold_ms) = press.hold_millis() {
                    tokio::time::sleep(Duration::from_millis(hold_ms)).await;
                }
            }
            Command::MouseScroll {
                direction,
                clicks,
                modifiers,
            } => {
                info!(direction = ?direction, clicks, modifiers = ?modifiers, "mouse scroll");
            }
            Command::OpenBrowser { url } => {
                info!(url = %url, "open browser");
            }
            Command::CapturePointer { purpose } => {
                info!(purpose = ?purpose, "capture pointer position");
            }
            Command::DragLoop { action } => {
                info!(action = ?action, "drag loop");
            }
        }
        Ok(())
    }
}
