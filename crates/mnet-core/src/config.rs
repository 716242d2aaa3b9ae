use crate::queue::DEFAULT_QUEUE_DEPTH;

/// How a frame reaches the receive side once the transmit path has routed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxPath {
    /// Pure software loopback: the frame is copied into a fresh receive buffer and delivered
    /// upward inside the transmit call. No completion queue, no poll.
    Immediate,
    /// NAPI-style: the frame is parked in the destination's completion queue and delivered by a
    /// budget-bounded poll.
    #[default]
    Deferred,
    /// No-op skeleton: the frame is counted and freed.
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub rx_path: RxPath,
    /// Completion queue depth per device (1 = the single slot).
    pub queue_depth: usize,
    /// Name used by [`crate::Engine::create`] when no explicit name is given; `%d` is replaced by
    /// the lowest free index.
    pub name_template: String,
}

impl EngineConfig {
    pub const DEFAULT_NAME_TEMPLATE: &'static str = "mnet%d";

    pub fn with_rx_path(mut self, rx_path: RxPath) -> Self {
        self.rx_path = rx_path;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_name_template(mut self, name_template: impl Into<String>) -> Self {
        self.name_template = name_template.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rx_path: RxPath::default(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            name_template: Self::DEFAULT_NAME_TEMPLATE.to_string(),
        }
    }
}
