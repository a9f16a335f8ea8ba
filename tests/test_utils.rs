#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay::{
    Batch, BatchProcessor, Consumer, ConsumerConfig, ConsumerState, DeliveryType, JsonDecoder,
    ProcessContext, Topic,
};
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;

pub const PROJECT: &str = "acme";
pub const REGION: &str = "local";
pub const WAIT: Duration = Duration::from_secs(5);

/// Processor that fails a configurable number of times per event id
#[derive(Default)]
pub struct ScriptedProcessor {
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<HashMap<String, usize>>,
    metadata: Mutex<Vec<HashMap<String, String>>>,
}

impl ScriptedProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `times` batches carrying event `id`
    pub fn fail(self: &Arc<Self>, id: &str, times: usize) -> Arc<Self> {
        self.failures.lock().unwrap().insert(id.to_string(), times);
        Arc::clone(self)
    }

    pub fn fail_always(self: &Arc<Self>, id: &str) -> Arc<Self> {
        self.fail(id, usize::MAX)
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Message attributes seen through the processing context
    pub fn seen_metadata(&self) -> Vec<HashMap<String, String>> {
        self.metadata.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchProcessor for ScriptedProcessor {
    async fn process_batch(&self, ctx: &ProcessContext, batch: &mut Batch) -> anyhow::Result<()> {
        if let Some(metadata) = ctx.metadata() {
            self.metadata.lock().unwrap().push(metadata.clone());
        }

        for event in batch.iter() {
            let id = event.id.clone().unwrap_or_default();
            *self.calls.lock().unwrap().entry(id.clone()).or_insert(0) += 1;

            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("scripted failure for event {id}");
                }
            }
        }
        Ok(())
    }
}

/// Collects everything a fmt subscriber writes
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&self) -> Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }

    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

pub struct CaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

/// A valid config for `topics`, logging to `logger`
pub fn config(
    topics: &[&str],
    delivery: DeliveryType,
    processor: Arc<dyn BatchProcessor>,
    logger: Dispatch,
) -> ConsumerConfig {
    ConsumerConfig {
        region: REGION.to_string(),
        project: PROJECT.to_string(),
        topics: topics.iter().map(|name| Topic::from(*name)).collect(),
        decoder: Some(Arc::new(JsonDecoder)),
        logger: Some(logger),
        processor: Some(processor),
        delivery: Some(delivery),
        ..ConsumerConfig::default()
    }
}

pub fn event_payload(id: &str) -> String {
    format!(r#"{{"id":"{id}","kind":"span","body":{{"duration_ms":12}}}}"#)
}

/// Wait until `consumer` reaches `state`
pub async fn wait_for_state(consumer: &Consumer, state: ConsumerState) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if consumer.state() == state {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    consumer.state() == state
}
