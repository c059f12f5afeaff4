//! Bounded synthesis dispatch and order-restoring playback.
//!
//! Phrase jobs run concurrently under a semaphore and complete in arbitrary
//! order; the client must hear phrases in sequence. `PlaybackReassembler`
//! holds a sequence-indexed map of finished audio plus a next-to-play
//! cursor: whenever the phrase at the cursor is done its audio moves to the
//! ordered playback queue and the cursor advances, draining completion
//! bursts in order. A phrase that finishes early is held, never discarded,
//! until the cursor reaches it. The reassembler is mutated only under its
//! lock, by synthesis completions; the playback consumer on the other end of
//! the queue emits one phrase at a time and idles when the queue is empty.
//!
//! A failed job still marks its sequence done (with no audio) so the cursor
//! can never wedge behind it; the failure is reported in playback order.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{chunk_audio, Phrase, SpeechSynthesizer};

/// Playback output, strictly ordered by phrase sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// One audio chunk of the phrase at the cursor.
    Audio { seq: u64, index: usize, chunk: Bytes },
    /// The phrase's synthesis job failed; it plays as zero-duration audio.
    PhraseFailed { seq: u64, error: String },
    /// All of the phrase's audio has been emitted.
    PhraseDone { seq: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Concurrent synthesis jobs (the system's one bounded pool).
    pub workers: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

/// What a completed pipeline run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    /// Phrases accepted for synthesis.
    pub dispatched: u64,
    /// Phrases fully emitted to the playback consumer.
    pub played: u64,
}

struct PhraseEntry {
    chunks: Vec<Bytes>,
    done: bool,
    error: Option<String>,
}

/// A phrase released to the ordered playback queue.
struct ReleasedPhrase {
    seq: u64,
    chunks: Vec<Bytes>,
    error: Option<String>,
}

/// Sequence-indexed holding map plus next-to-play cursor.
pub struct PlaybackReassembler {
    entries: HashMap<u64, PhraseEntry>,
    cursor: u64,
    released: u64,
    queue: mpsc::UnboundedSender<ReleasedPhrase>,
}

impl PlaybackReassembler {
    fn new(queue: mpsc::UnboundedSender<ReleasedPhrase>) -> Self {
        Self {
            entries: HashMap::new(),
            cursor: 1,
            released: 0,
            queue,
        }
    }

    /// Next sequence the playback queue is waiting on.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Phrases released to the playback queue so far.
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Make the sequence known ahead of completion.
    pub fn register(&mut self, seq: u64) {
        self.entries.entry(seq).or_insert(PhraseEntry {
            chunks: Vec::new(),
            done: false,
            error: None,
        });
    }

    /// Append one audio chunk for a pending phrase.
    pub fn add_chunk(&mut self, seq: u64, chunk: Bytes) {
        self.register(seq);
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.chunks.push(chunk);
        }
    }

    /// Mark the phrase complete and release any in-order run starting at the
    /// cursor.
    pub fn mark_done(&mut self, seq: u64) {
        self.register(seq);
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.done = true;
        }
        self.drain_ready();
    }

    /// Record a failed job as a zero-duration phrase so the cursor can pass.
    pub fn fail(&mut self, seq: u64, error: String) {
        self.register(seq);
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.chunks.clear();
            entry.error = Some(error);
            entry.done = true;
        }
        self.drain_ready();
    }

    fn drain_ready(&mut self) {
        while self
            .entries
            .get(&self.cursor)
            .is_some_and(|entry| entry.done)
        {
            let Some(entry) = self.entries.remove(&self.cursor) else {
                break;
            };
            debug!(seq = self.cursor, chunks = entry.chunks.len(), "phrase released");
            // The receiver only disappears when the cycle is torn down.
            let _ = self.queue.send(ReleasedPhrase {
                seq: self.cursor,
                chunks: entry.chunks,
                error: entry.error,
            });
            self.cursor += 1;
            self.released += 1;
        }
    }
}

/// Handle for feeding phrases into a running pipeline. Dropping it marks the
/// end of the cycle's phrase stream; the pipeline finishes once every
/// dispatched phrase has been played.
pub struct SynthesisPipeline {
    phrases: mpsc::Sender<Phrase>,
}

impl SynthesisPipeline {
    /// Spawn the dispatcher and playback consumer for one reply cycle.
    ///
    /// Ordered playback output is delivered through `events`; when `cancel`
    /// fires, jobs abandon their collaborator calls and the queue drains
    /// without emitting.
    pub fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        options: PipelineOptions,
        cancel: CancellationToken,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> (Self, JoinHandle<PipelineSummary>) {
        let (phrase_tx, phrase_rx) = mpsc::channel::<Phrase>(64);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<ReleasedPhrase>();
        let reassembler = Arc::new(Mutex::new(PlaybackReassembler::new(queue_tx)));

        let dispatcher = tokio::spawn(dispatch(
            phrase_rx,
            synthesizer,
            options,
            cancel.clone(),
            reassembler,
        ));
        let playback = tokio::spawn(play_in_order(queue_rx, cancel, events));

        let supervisor = tokio::spawn(async move {
            let dispatched = dispatcher.await.unwrap_or(0);
            let played = playback.await.unwrap_or(0);
            PipelineSummary { dispatched, played }
        });

        (Self { phrases: phrase_tx }, supervisor)
    }

    /// Queue one phrase for synthesis. Returns false if the pipeline has
    /// already shut down.
    pub async fn dispatch(&self, phrase: Phrase) -> bool {
        self.phrases.send(phrase).await.is_ok()
    }
}

/// Pull phrases off the cycle's stream and run them under the worker pool.
/// Returns the number of phrases dispatched.
async fn dispatch(
    mut phrases: mpsc::Receiver<Phrase>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    options: PipelineOptions,
    cancel: CancellationToken,
    reassembler: Arc<Mutex<PlaybackReassembler>>,
) -> u64 {
    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut jobs = JoinSet::new();
    let mut dispatched = 0u64;

    while let Some(phrase) = phrases.recv().await {
        dispatched += 1;
        reassembler.lock().register(phrase.seq);

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let synthesizer = synthesizer.clone();
        let cancel = cancel.clone();
        let reassembler = reassembler.clone();
        jobs.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => None,
                result = synthesizer.synthesize(&phrase.text) => Some(result),
            };
            let mut guard = reassembler.lock();
            match result {
                Some(Ok(audio)) => {
                    for chunk in chunk_audio(audio) {
                        guard.add_chunk(phrase.seq, chunk);
                    }
                    guard.mark_done(phrase.seq);
                }
                Some(Err(e)) => {
                    warn!(seq = phrase.seq, "synthesis failed: {e}");
                    guard.fail(phrase.seq, e.to_string());
                }
                None => {
                    debug!(seq = phrase.seq, "synthesis abandoned by cancellation");
                    guard.mark_done(phrase.seq);
                }
            }
            drop(permit);
        });
    }

    while jobs.join_next().await.is_some() {}
    dispatched
}

/// The single playback consumer: one phrase at a time, in cursor order,
/// idling (a channel recv, no busy-wait) whenever the queue is empty.
/// Returns the number of phrases emitted.
async fn play_in_order(
    mut queue: mpsc::UnboundedReceiver<ReleasedPhrase>,
    cancel: CancellationToken,
    events: mpsc::Sender<PlaybackEvent>,
) -> u64 {
    let mut played = 0u64;
    while let Some(phrase) = queue.recv().await {
        if cancel.is_cancelled() {
            // Keep draining so late completions are absorbed, not replayed.
            continue;
        }
        if let Some(error) = phrase.error {
            if events
                .send(PlaybackEvent::PhraseFailed {
                    seq: phrase.seq,
                    error,
                })
                .await
                .is_err()
            {
                break;
            }
        }
        let mut delivered = true;
        for (index, chunk) in phrase.chunks.into_iter().enumerate() {
            if events
                .send(PlaybackEvent::Audio {
                    seq: phrase.seq,
                    index,
                    chunk,
                })
                .await
                .is_err()
            {
                delivered = false;
                break;
            }
        }
        if !delivered
            || events
                .send(PlaybackEvent::PhraseDone { seq: phrase.seq })
                .await
                .is_err()
        {
            break;
        }
        played += 1;
    }
    played
}
