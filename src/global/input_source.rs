use std::sync::Arc;

use parse_display::Display;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::component::ComponentName;

use super::{Global, InputMessage, InputMessageData, InputSourceName, Message};

#[derive(Display)]
#[display("`{name}` (id = {id}, priority = {priority:?})")]
pub struct InputSource {
    pub(super) id: usize,
    pub(super) name: InputSourceName,
    pub(super) priority: Option<i32>,
    pub(super) input_tx: broadcast::Sender<InputMessage>,
}

impl InputSource {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &InputSourceName {
        &self.name
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn component(&self) -> ComponentName {
        self.name.component()
    }

    pub fn send(
        &self,
        data: InputMessageData,
    ) -> Result<usize, broadcast::error::SendError<InputMessage>> {
        self.input_tx
            .send(InputMessage::new(self.id, self.name.component(), data))
    }

    pub fn channel(&self) -> &broadcast::Sender<InputMessage> {
        &self.input_tx
    }
}

/// Handle to a registered input source
///
/// Dropping the handle clears the priority slot the source was feeding and
/// unregisters it.
pub struct InputSourceHandle {
    pub(super) input_source: Arc<InputSource>,
    pub(super) global: Global,
}

impl std::ops::Deref for InputSourceHandle {
    type Target = InputSource;

    fn deref(&self) -> &Self::Target {
        &*self.input_source
    }
}

impl Drop for InputSourceHandle {
    fn drop(&mut self) {
        if let Some(priority) = self.input_source.priority {
            self.input_source
                .send(InputMessageData::Clear { priority })
                .ok();
        }

        let global = self.global.clone();
        let input_source = self.input_source.clone();
        tokio::spawn(async move {
            global.unregister_source(&*input_source).await;
        });
    }
}

#[derive(Debug, Error)]
pub enum InputSourceError {
    #[error("invalid priority: {0}")]
    InvalidPriority(i32),
}
