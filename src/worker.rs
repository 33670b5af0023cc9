//! Decoding workers: one OS thread each, translating one sentence at a time.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use smt_core::model::Model;
use smt_core::search::{decode_sentence, SearchStrategy};
use smt_core::sentence::Sentence;
use tracing::{debug, debug_span, warn};

use crate::directive::Directives;
use crate::pool::Lease;
use crate::translation::Translation;
use crate::translations::Translations;

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Where a finished translation goes.
pub(crate) enum Reply {
    /// Slot `position` of a streamed request.
    Ordered {
        translations: Translations,
        position: usize,
    },
    /// A caller blocked in `Decoder::decode`.
    Direct(mpsc::Sender<Translation>),
}

impl Reply {
    pub fn send(self, translation: Translation) {
        match self {
            Reply::Ordered { translations, position } => translations.record(position, translation),
            Reply::Direct(tx) => {
                let _ = tx.send(translation);
            }
        }
    }
}

pub(crate) struct Job {
    /// The request the sentence belongs to; traced with every event.
    pub request: usize,
    pub sentence: Sentence,
    pub reply: Reply,
    /// Held for the duration of the job; dropping it frees the worker.
    pub lease: Lease<WorkerHandle>,
}

impl Job {
    /// Hand the job to the leased worker's thread.
    pub fn start(self) {
        debug!(
            request = self.request,
            worker = self.lease.id,
            sentence = self.sentence.id(),
            "dispatching sentence"
        );
        let tx = self.lease.tx.clone();
        if let Err(mpsc::SendError(job)) = tx.send(self) {
            job.fail("worker thread is gone");
        }
    }

    fn fail(self, reason: &str) {
        let Job {
            request,
            sentence,
            reply,
            lease,
        } = self;
        warn!(request, worker = lease.id, sentence = sentence.id(), reason, "sentence not decoded");
        drop(lease);
        reply.send(Translation::failed(sentence.id(), reason));
    }
}

/// The pool's view of a worker: where to send its jobs.
pub struct WorkerHandle {
    id: usize,
    tx: mpsc::Sender<Job>,
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

/// The decoding context owned by one worker thread.
pub(crate) struct DecoderWorker {
    id: usize,
    model: Arc<Model>,
    search: Arc<dyn SearchStrategy>,
    directives: Directives,
}

impl DecoderWorker {
    pub fn new(id: usize, model: Arc<Model>, search: Arc<dyn SearchStrategy>, directives: Directives) -> Self {
        Self {
            id,
            model,
            search,
            directives,
        }
    }

    /// Start the worker thread; returns the pool handle and the join handle.
    pub fn spawn(self) -> std::io::Result<(WorkerHandle, JoinHandle<()>)> {
        let id = self.id;
        let (tx, rx) = mpsc::channel::<Job>();
        let thread = thread::Builder::new()
            .name(format!("smt-decoder-{id}"))
            .spawn(move || self.run(rx))?;
        Ok((WorkerHandle { id, tx }, thread))
    }

    fn run(self, rx: mpsc::Receiver<Job>) {
        let _span = debug_span!("worker", worker = self.id).entered();
        debug!("worker started");
        while let Ok(job) = rx.recv() {
            let Job {
                request,
                sentence,
                reply,
                lease,
            } = job;
            let translation = self.translate(request, &sentence);
            // free the worker before the result becomes visible
            drop(lease);
            reply.send(translation);
        }
        debug!("worker stopped");
    }

    /// Translate one sentence. Never panics: a panic inside the search is
    /// turned into a failed translation.
    pub fn translate(&self, request: usize, sentence: &Sentence) -> Translation {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.translate_inner(request, sentence)));
        result.unwrap_or_else(|payload| {
            let reason = panic_message(payload.as_ref());
            warn!(request, worker = self.id, sentence = sentence.id(), reason = %reason, "translation panicked");
            Translation::failed(sentence.id(), format!("worker panicked: {reason}")).with_elapsed(start.elapsed())
        })
    }

    fn translate_inner(&self, request: usize, sentence: &Sentence) -> Translation {
        let _span = debug_span!("translate", request, worker = self.id, sentence = sentence.id()).entered();
        let start = Instant::now();
        let directive_output = sentence.metadata().and_then(|meta| self.directives.apply(meta));

        let translation = match decode_sentence(&self.model, self.search.as_ref(), sentence) {
            Ok(derivations) => Translation::success(
                sentence.id(),
                derivations,
                self.model.features.dense_features(),
                self.model.config.name_convention(),
                start.elapsed(),
            ),
            Err(e) => {
                warn!(sentence = sentence.id(), error = %e, "translation failed");
                Translation::failed(sentence.id(), e.to_string()).with_elapsed(start.elapsed())
            }
        };
        debug!(
            sentence = sentence.id(),
            score = translation.score(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "translated"
        );
        translation.with_directive_output(directive_output)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
