//! The decoder: model construction, the worker pool and request dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use smt_core::ff::{FeatureFactory, FeatureFunction, FeatureSet, PhraseModel};
use smt_core::grammar::{Grammar, GrammarError, MemoryGrammar};
use smt_core::lm::{LmLoader, NativeLoader};
use smt_core::model::Model;
use smt_core::rule::CUSTOM_OWNER;
use smt_core::search::{SearchStrategy, StackSearch};
use smt_core::sentence::Sentence;
use smt_core::settings::{ConfigError, DecoderConfig, SearchAlgorithm};
use smt_core::vocab::Vocabulary;
use smt_core::weights::{NameConvention, WeightTable, Weights};
use thiserror::Error;
use tracing::{debug, debug_span, info, warn};

use crate::directive::Directives;
use crate::pool::WorkerPool;
use crate::translation::Translation;
use crate::translations::Translations;
use crate::worker::{DecoderWorker, Job, Reply, WorkerHandle};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Grammar(#[from] GrammarError),
    #[error("cannot start thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("decoder is shut down")]
    Closed,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`Decoder`] from a config plus anything supplied in code.
pub struct DecoderBuilder {
    config: DecoderConfig,
    vocab: Arc<Vocabulary>,
    features: Vec<Box<dyn FeatureFunction>>,
    grammars: Vec<Arc<dyn Grammar>>,
    search: Option<Arc<dyn SearchStrategy>>,
    lm_loader: Option<Box<dyn LmLoader>>,
}

impl DecoderBuilder {
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            vocab: Arc::new(Vocabulary::new()),
            features: Vec::new(),
            grammars: Vec::new(),
            search: None,
            lm_loader: None,
        }
    }

    /// The vocabulary the decoder will use; grammars built in code must
    /// intern their words here.
    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// Register a feature after the configured ones.
    pub fn with_feature(mut self, feature: Box<dyn FeatureFunction>) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_grammar(mut self, grammar: Arc<dyn Grammar>) -> Self {
        self.grammars.push(grammar);
        self
    }

    /// Replace the built-in search. Required for `cky`.
    pub fn with_search(mut self, search: Arc<dyn SearchStrategy>) -> Self {
        self.search = Some(search);
        self
    }

    /// Open language models with `loader` instead of the native library.
    pub fn with_lm_loader(mut self, loader: Box<dyn LmLoader>) -> Self {
        self.lm_loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<Decoder, DecoderError> {
        let Self {
            config,
            vocab,
            features: extra_features,
            grammars: extra_grammars,
            search,
            lm_loader,
        } = self;
        config.validate()?;
        let _span = debug_span!("build_decoder").entered();

        let search: Arc<dyn SearchStrategy> = match (search, config.search_algorithm) {
            (Some(search), _) => search,
            (None, SearchAlgorithm::Stack) => Arc::new(StackSearch::new()),
            (None, search) => return Err(ConfigError::UnsupportedSearch { search }.into()),
        };

        let table = WeightTable::from_config(&config)?;
        debug!(weights = table.len(), "read initial weights");

        let mut grammars: Vec<Arc<dyn Grammar>> = Vec::new();
        for g in &config.grammars {
            let grammar = MemoryGrammar::load(&g.owner, &g.path, &vocab)?;
            info!(owner = %g.owner, path = %g.path.display(), rules = grammar.len(), "loaded grammar");
            grammars.push(Arc::new(grammar));
        }
        grammars.extend(extra_grammars);
        let custom = Arc::new(MemoryGrammar::new(CUSTOM_OWNER));
        grammars.push(Arc::clone(&custom) as Arc<dyn Grammar>);

        // one phrase model per owner, sized by its widest grammar
        let mut owners: Vec<(String, usize)> = Vec::new();
        for grammar in &grammars {
            let dense = grammar.num_dense_features();
            match owners.iter_mut().find(|(owner, _)| owner == grammar.owner()) {
                Some((_, n)) => *n = (*n).max(dense),
                None => owners.push((grammar.owner().to_string(), dense)),
            }
        }
        let mut features: Vec<Box<dyn FeatureFunction>> = owners
            .iter()
            .map(|(owner, dense)| Box::new(PhraseModel::new(owner, *dense)) as Box<dyn FeatureFunction>)
            .collect();
        let loader: Box<dyn LmLoader> = match lm_loader {
            Some(loader) => loader,
            None => Box::new(NativeLoader::new(config.lm_library.clone())),
        };
        let mut factory = FeatureFactory::new(&config, &vocab, loader.as_ref());
        for line in &config.features {
            features.push(factory.build(line)?);
        }
        features.extend(extra_features);

        let features = Arc::new(FeatureSet::register(features)?);
        let weights = Arc::new(Weights::new(Arc::clone(features.dense_features()), &table));
        let num_workers = config.num_parallel_decoders;
        let model = Arc::new(Model::new(Arc::new(config), vocab, weights, features, grammars));
        model.estimate_grammars();

        let directives = Directives::new(Arc::clone(&model), Arc::clone(&custom));
        let mut handles = Vec::with_capacity(num_workers);
        let mut threads = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let worker = DecoderWorker::new(id, Arc::clone(&model), Arc::clone(&search), directives.clone());
            let (handle, thread) = worker.spawn().map_err(DecoderError::Spawn)?;
            handles.push(handle);
            threads.push(thread);
        }

        info!(
            workers = num_workers,
            features = model.features.len(),
            dense = model.features.dense_features().len(),
            grammars = model.grammars.len(),
            "decoder ready"
        );
        Ok(Decoder {
            model,
            custom,
            pool: WorkerPool::new(handles),
            threads: Mutex::new(threads),
            next_request: AtomicUsize::new(0),
        })
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct Decoder {
    model: Arc<Model>,
    custom: Arc<MemoryGrammar>,
    pool: Arc<WorkerPool<WorkerHandle>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_request: AtomicUsize,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Result<Self, DecoderError> {
        DecoderBuilder::new(config).build()
    }

    pub fn builder(config: DecoderConfig) -> DecoderBuilder {
        DecoderBuilder::new(config)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn weights(&self) -> &Arc<Weights> {
        &self.model.weights
    }

    /// The runtime-editable grammar targeted by directives.
    pub fn custom_grammar(&self) -> &Arc<MemoryGrammar> {
        &self.custom
    }

    /// Idle workers right now.
    pub fn available_workers(&self) -> usize {
        self.pool.available()
    }

    pub fn num_workers(&self) -> usize {
        self.pool.capacity()
    }

    /// Translate a stream of sentences. Returns at once; results are read
    /// from the returned collection in input order.
    pub fn submit<I>(&self, sentences: I) -> Result<Translations, DecoderError>
    where
        I: IntoIterator<Item = Sentence>,
        I::IntoIter: Send + 'static,
    {
        if self.pool.is_closed() {
            return Err(DecoderError::Closed);
        }
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let translations = Translations::new();
        let out = translations.clone();
        let pool = Arc::clone(&self.pool);
        let sentences = sentences.into_iter();
        thread::Builder::new()
            .name(format!("smt-request-{request}"))
            .spawn(move || dispatch(request, &pool, sentences, &out))
            .map_err(DecoderError::Spawn)?;
        Ok(translations)
    }

    /// Translate one sentence and wait for the result.
    pub fn decode(&self, sentence: Sentence) -> Translation {
        let id = sentence.id();
        let request = self.next_request.fetch_add(1, Ordering::Relaxed);
        let Some(lease) = self.pool.acquire() else {
            return Translation::failed(id, DecoderError::Closed.to_string());
        };
        let (tx, rx) = mpsc::channel();
        Job {
            request,
            sentence,
            reply: Reply::Direct(tx),
            lease,
        }
        .start();
        rx.recv()
            .unwrap_or_else(|_| Translation::failed(id, "worker dropped the sentence"))
    }

    /// Every dense feature with its weight, in slot order, one per line.
    pub fn show_weights(&self) -> String {
        let convention = self.model.config.name_convention();
        self.model
            .weights
            .dense_snapshot()
            .into_iter()
            .map(|(name, value)| match convention {
                NameConvention::Moses => format!("{}= {value}", convention.to_external(&name)),
                NameConvention::Native => format!("{name} {value}"),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stop accepting work, wait for running sentences and join the workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        if threads.is_empty() {
            return;
        }
        self.pool.close();
        // dropping the handles disconnects every worker's queue
        drop(self.pool.drain());
        for thread in threads {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        info!("decoder shut down");
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Request loop: one worker acquisition per sentence, in input order.
fn dispatch(
    request: usize,
    pool: &Arc<WorkerPool<WorkerHandle>>,
    sentences: impl Iterator<Item = Sentence>,
    translations: &Translations,
) {
    let _span = debug_span!("request", request).entered();
    let mut position = 0;
    for sentence in sentences {
        match pool.acquire() {
            Some(lease) => Job {
                request,
                sentence,
                reply: Reply::Ordered {
                    translations: translations.clone(),
                    position,
                },
                lease,
            }
            .start(),
            None => translations.record(
                position,
                Translation::failed(sentence.id(), DecoderError::Closed.to_string()),
            ),
        }
        position += 1;
    }
    translations.finish(position);
    debug!(request, sentences = position, "request fully dispatched");
}
