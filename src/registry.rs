use std::collections::HashMap;

use tracing::info;

use crate::config::TraceConfig;
use crate::consumer::TraceConsumer;

/// Opaque stream identity. In the original system this is the address of a
/// driver stream handle; any stable integer works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey(pub u64);

/// Process-scoped registry mapping stream keys to consumers.
///
/// Constructed explicitly at startup and torn down explicitly; there is no
/// hidden global instance. Exactly one consumer exists per stream key,
/// created lazily on first [`TraceContext::touch`]. The map itself is
/// single-writer by contract: concurrent `touch`/`get` requires external
/// synchronization.
pub struct TraceContext {
    config: TraceConfig,
    consumers: HashMap<StreamKey, TraceConsumer>,
    next_index: u32,
}

impl TraceContext {
    /// # Panics
    ///
    /// Panics if the configuration contract is violated; sizing errors are
    /// programming errors, not runtime conditions.
    pub fn new(config: TraceConfig) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid trace configuration: {e}");
        }
        TraceContext {
            config,
            consumers: HashMap::new(),
            next_index: 0,
        }
    }

    /// Idempotent lazy creation: wires a consumer for an unseen key and
    /// returns `true`; no-op returning `false` for a known key.
    ///
    /// # Panics
    ///
    /// Panics if the stream's output file cannot be created (fatal by
    /// design: the trace would silently be lost otherwise).
    pub fn touch(&mut self, key: StreamKey) -> bool {
        if self.consumers.contains_key(&key) {
            return false;
        }
        let path = self.config.path_for(self.next_index);
        let consumer = match TraceConsumer::create(&self.config, &path) {
            Ok(c) => c,
            Err(e) => panic!("failed to open trace sink {path:?}: {e}"),
        };
        info!(key = key.0, path = %path, "stream registered");
        self.next_index += 1;
        self.consumers.insert(key, consumer);
        true
    }

    /// Looks up the consumer for a known key.
    ///
    /// # Panics
    ///
    /// Panics if the key was never touched; calling `get` before `touch`
    /// is a caller contract violation.
    pub fn get(&self, key: StreamKey) -> &TraceConsumer {
        match self.consumers.get(&key) {
            Some(c) => c,
            None => panic!("stream {key:?} used before touch()"),
        }
    }

    /// Mutable lookup, for driving the consumer lifecycle.
    ///
    /// # Panics
    ///
    /// Same contract as [`TraceContext::get`].
    pub fn get_mut(&mut self, key: StreamKey) -> &mut TraceConsumer {
        match self.consumers.get_mut(&key) {
            Some(c) => c,
            None => panic!("stream {key:?} used before touch()"),
        }
    }

    pub fn stream_count(&self) -> usize {
        self.consumers.len()
    }

    /// Raw buffer view for a stream, handed to external producer code at
    /// kernel-launch time.
    ///
    /// # Panics
    ///
    /// Same contract as [`TraceContext::get`].
    pub fn fill_info(&self, key: StreamKey) -> crate::slot::TraceInfo {
        self.get(key).fill_info()
    }

    /// Tears every consumer down. Each must be Idle: callers finish
    /// tracing before shutdown, enforced by the consumer's own drop
    /// contract.
    pub fn shutdown(mut self) {
        for (key, consumer) in self.consumers.drain() {
            assert!(
                consumer.is_idle(),
                "stream {key:?} still running at shutdown"
            );
            drop(consumer);
        }
        info!("trace context shut down");
    }
}
