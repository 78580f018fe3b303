use std::collections::HashMap;
use std::sync::Arc;

use parse_display::Display;
use tokio::sync::{broadcast, RwLock};

use crate::component::ComponentName;

mod event;
pub use event::*;

mod input_message;
pub use input_message::*;

mod input_source;
pub use input_source::*;

/// Capacity of the broadcast channels
const CHANNEL_CAPACITY: usize = 60;

pub trait Message: Sized + Clone {
    type Data;

    fn new(source_id: usize, component: ComponentName, data: Self::Data) -> Self;

    fn source_id(&self) -> usize;

    fn component(&self) -> ComponentName;

    fn data(&self) -> &Self::Data;
}

#[derive(Display, Debug, Clone)]
pub enum InputSourceName {
    #[display("PriorityMuxer")]
    PriorityMuxer,
    #[display("Boot sequence")]
    BootSequence,
    #[display("Video capture")]
    VideoGrabber,
    #[display("System capture")]
    SystemGrabber,
    #[display("Effect({name})")]
    Effect { name: String },
    #[display("Network({peer_addr}): {origin}")]
    Network { peer_addr: String, origin: String },
}

impl InputSourceName {
    pub fn component(&self) -> ComponentName {
        match self {
            InputSourceName::PriorityMuxer => ComponentName::All,
            InputSourceName::BootSequence => ComponentName::Color,
            InputSourceName::VideoGrabber => ComponentName::VideoGrabber,
            InputSourceName::SystemGrabber => ComponentName::SystemGrabber,
            InputSourceName::Effect { .. } => ComponentName::Effect,
            InputSourceName::Network { .. } => ComponentName::Image,
        }
    }
}

#[derive(Clone)]
pub struct Global(Arc<RwLock<GlobalData>>);

impl Global {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(GlobalData::new())))
    }

    pub async fn register_input_source(
        &self,
        name: InputSourceName,
        priority: Option<i32>,
    ) -> Result<InputSourceHandle, InputSourceError> {
        if let Some(priority) = priority {
            if priority < 0 || priority > 255 {
                return Err(InputSourceError::InvalidPriority(priority));
            }
        }

        Ok(InputSourceHandle {
            input_source: self.0.write().await.register_input_source(name, priority),
            global: self.clone(),
        })
    }

    pub async fn subscribe_input(&self) -> broadcast::Receiver<InputMessage> {
        self.0.read().await.input_tx.subscribe()
    }

    pub async fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.0.read().await.event_tx.subscribe()
    }

    pub async fn send_event(&self, event: Event) {
        // Send errors just mean nobody is listening
        self.0.read().await.event_tx.send(event).ok();
    }

    pub async fn read_input_sources<T>(
        &self,
        f: impl FnOnce(&HashMap<usize, Arc<InputSource>>) -> T,
    ) -> T {
        let data = self.0.read().await;
        f(&data.input_sources)
    }

    pub(crate) async fn unregister_source(&self, input_source: &InputSource) {
        self.0.write().await.unregister_source(input_source);
    }
}

impl Default for Global {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GlobalData {
    input_tx: broadcast::Sender<InputMessage>,
    event_tx: broadcast::Sender<Event>,
    input_sources: HashMap<usize, Arc<InputSource>>,
    next_input_source_id: usize,
}

impl GlobalData {
    fn new() -> Self {
        let (input_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (event_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            input_tx,
            event_tx,
            input_sources: HashMap::new(),
            next_input_source_id: 1,
        }
    }

    fn register_input_source(
        &mut self,
        name: InputSourceName,
        priority: Option<i32>,
    ) -> Arc<InputSource> {
        let id = self.next_input_source_id;
        self.next_input_source_id += 1;

        let input_source = Arc::new(InputSource {
            id,
            name,
            priority,
            input_tx: self.input_tx.clone(),
        });

        debug!(source = %input_source, "registered input source");
        self.input_sources.insert(id, input_source.clone());

        input_source
    }

    fn unregister_source(&mut self, input_source: &InputSource) {
        if let Some(is) = self.input_sources.remove(&input_source.id) {
            debug!(source = %is, "unregistered input source");
        }
    }
}
